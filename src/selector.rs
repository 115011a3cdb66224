use crate::models::{Question, QuestionBank};
use crate::progression::QuizMode;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const QUESTIONS_PER_DAY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizConfig {
    pub mode: QuizMode,
    pub count: usize,
    /// Sequential ("daily") selection starts here and keeps stored order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
}

impl QuizConfig {
    pub fn exam() -> Self {
        Self {
            mode: QuizMode::Exam,
            count: usize::MAX,
            start_index: None,
        }
    }

    pub fn study(count: usize) -> Self {
        Self {
            mode: QuizMode::Study,
            count,
            start_index: None,
        }
    }

    /// Day numbers start at 1.
    pub fn daily(day: usize) -> Self {
        Self {
            mode: QuizMode::Study,
            count: QUESTIONS_PER_DAY,
            start_index: Some(day.saturating_sub(1) * QUESTIONS_PER_DAY),
        }
    }
}

pub fn select_questions(
    bank: &QuestionBank,
    module_id: i64,
    topic: &str,
    config: &QuizConfig,
) -> Vec<Question> {
    select_questions_with(&mut rand::thread_rng(), bank, module_id, topic, config)
}

pub fn select_questions_with<R: Rng + ?Sized>(
    rng: &mut R,
    bank: &QuestionBank,
    module_id: i64,
    topic: &str,
    config: &QuizConfig,
) -> Vec<Question> {
    let available = bank
        .get(&module_id)
        .and_then(|topics| topics.get(topic))
        .map(Vec::as_slice)
        .unwrap_or_default();

    if config.mode == QuizMode::Exam {
        let mut all = available.to_vec();
        all.shuffle(rng);
        debug!("exam selection: {} questions for {}/{}", all.len(), module_id, topic);
        return all;
    }

    if let Some(start) = config.start_index {
        let start = start.min(available.len());
        let end = start.saturating_add(config.count).min(available.len());
        debug!("sequential selection [{}, {}) for {}/{}", start, end, module_id, topic);
        return available[start..end].to_vec();
    }

    let mut picked = available.to_vec();
    picked.shuffle(rng);
    picked.truncate(config.count);
    debug!("random selection: {} questions for {}/{}", picked.len(), module_id, topic);
    picked
}
