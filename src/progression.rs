use crate::models::{Exam, Module, TopicId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Minimum exam-mode score (percent) that advances a track.
pub const PASS_THRESHOLD: u32 = 80;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuizMode {
    Study,
    Exam,
}

pub fn sub_topic_key(module_id: i64, sub_topic: &str) -> String {
    format!("{module_id}-{sub_topic}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizCompletion {
    pub module_id: i64,
    pub topic: String,
    pub mode: QuizMode,
    pub correct: u32,
    pub total: u32,
}

impl QuizCompletion {
    /// Whole-percent score, rounded down.
    pub fn score(&self) -> u32 {
        if self.total == 0 {
            0
        } else {
            self.correct.min(self.total) * 100 / self.total
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    SubTopicUnlocked { module_id: i64, sub_topic: String },
    #[serde(rename_all = "camelCase")]
    ModuleCompleted {
        completed_module_id: i64,
        unlocked_module_id: i64,
        unlocked_module_title: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UnlockOutcome {
    UnlockedAll,
    Reset,
    #[serde(rename_all = "camelCase")]
    UnlockedExam { exam_id: i64, title: String },
    #[serde(rename_all = "camelCase")]
    UnlockedModule { module_id: i64, title: String },
    NoMatch,
}

impl UnlockOutcome {
    pub fn changed_state(&self) -> bool {
        !matches!(self, UnlockOutcome::NoMatch)
    }
}

/// The two reserved codes, stored case-folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockCodes {
    pub unlock_all: String,
    pub reset: String,
}

impl UnlockCodes {
    pub fn new(unlock_all: &str, reset: &str) -> Self {
        Self {
            unlock_all: unlock_all.trim().to_lowercase(),
            reset: reset.trim().to_lowercase(),
        }
    }
}

impl Default for UnlockCodes {
    fn default() -> Self {
        Self::new("unlockall", "resetall")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    pub unlocked_module_ids: BTreeSet<i64>,
    pub unlocked_sub_topic_keys: BTreeSet<String>,
}

impl ProgressionState {
    /// First module and its first sub-topic of every exam.
    pub fn initial(exams: &[Exam]) -> Self {
        let mut state = Self::default();
        state.ensure_entry_points(exams);
        state
    }

    pub fn ensure_entry_points(&mut self, exams: &[Exam]) -> bool {
        let mut changed = false;
        for module in exams.iter().filter_map(|e| e.modules.first()) {
            changed |= self.unlock_module(module.id);
            if let Some(first) = module.sub_topics.first() {
                changed |= self.unlock_sub_topic(module.id, &first.title);
            }
        }
        changed
    }

    pub fn is_module_unlocked(&self, module_id: i64) -> bool {
        self.unlocked_module_ids.contains(&module_id)
    }

    pub fn is_sub_topic_unlocked(&self, module_id: i64, sub_topic: &str) -> bool {
        self.unlocked_sub_topic_keys
            .contains(&sub_topic_key(module_id, sub_topic))
    }

    pub fn unlock_module(&mut self, module_id: i64) -> bool {
        self.unlocked_module_ids.insert(module_id)
    }

    pub fn unlock_sub_topic(&mut self, module_id: i64, sub_topic: &str) -> bool {
        self.unlocked_sub_topic_keys
            .insert(sub_topic_key(module_id, sub_topic))
    }

    fn unlock_module_fully(&mut self, module: &Module) -> bool {
        let mut changed = self.unlock_module(module.id);
        for sub in &module.sub_topics {
            changed |= self.unlock_sub_topic(module.id, &sub.title);
        }
        changed
    }

    /// Applies a finished quiz to the track. Only passing exam-mode runs on a
    /// whole sub-topic move anything; re-applying the same completion is a
    /// no-op and yields no event.
    pub fn advance(&mut self, exams: &[Exam], completion: &QuizCompletion) -> Option<ProgressEvent> {
        if completion.mode != QuizMode::Exam || completion.score() < PASS_THRESHOLD {
            return None;
        }
        let topic = TopicId::parse(&completion.topic);
        if topic.content_point.is_some() {
            return None;
        }

        let Some((exam, module_pos)) = exams.iter().find_map(|e| {
            e.modules
                .iter()
                .position(|m| m.id == completion.module_id)
                .map(|pos| (e, pos))
        }) else {
            warn!("quiz completion for unknown module {}", completion.module_id);
            return None;
        };
        let module = &exam.modules[module_pos];
        let sub_pos = module
            .sub_topics
            .iter()
            .position(|s| s.title == topic.sub_topic)?;

        if let Some(next) = module.sub_topics.get(sub_pos + 1) {
            if !self.unlock_sub_topic(module.id, &next.title) {
                return None;
            }
            info!("unlocked sub-topic '{}' in module {}", next.title, module.id);
            return Some(ProgressEvent::SubTopicUnlocked {
                module_id: module.id,
                sub_topic: next.title.clone(),
            });
        }

        if let Some(next_module) = exam.modules.get(module_pos + 1) {
            let mut changed = self.unlock_module(next_module.id);
            if let Some(first) = next_module.sub_topics.first() {
                changed |= self.unlock_sub_topic(next_module.id, &first.title);
            }
            if !changed {
                return None;
            }
            info!(
                "module {} completed, unlocked module {} in exam {}",
                module.id, next_module.id, exam.id
            );
            return Some(ProgressEvent::ModuleCompleted {
                completed_module_id: module.id,
                unlocked_module_id: next_module.id,
                unlocked_module_title: next_module.title.clone(),
            });
        }

        info!("exam {} track complete", exam.id);
        None
    }

    /// Free-text unlock. The unlock-all code toggles between everything
    /// unlocked and the initial state; otherwise exam titles are tried before
    /// module titles. Matching is on trimmed, case-folded text.
    pub fn apply_code(&mut self, exams: &[Exam], code: &str, codes: &UnlockCodes) -> UnlockOutcome {
        let normalized = code.trim().to_lowercase();
        if normalized.is_empty() {
            return UnlockOutcome::NoMatch;
        }

        if normalized == codes.unlock_all {
            let mut module_ids = exams.iter().flat_map(|e| &e.modules).map(|m| m.id).peekable();
            let all_unlocked = module_ids.peek().is_some()
                && module_ids.all(|id| self.unlocked_module_ids.contains(&id));
            if all_unlocked {
                *self = Self::initial(exams);
                info!("unlock-all code reset progression");
                return UnlockOutcome::Reset;
            }
            for module in exams.iter().flat_map(|e| &e.modules) {
                self.unlock_module_fully(module);
            }
            info!("unlock-all code unlocked every module");
            return UnlockOutcome::UnlockedAll;
        }

        if normalized == codes.reset {
            *self = Self::initial(exams);
            info!("reset code applied");
            return UnlockOutcome::Reset;
        }

        if let Some(exam) = exams.iter().find(|e| e.title.trim().to_lowercase() == normalized) {
            for module in &exam.modules {
                self.unlock_module_fully(module);
            }
            info!("unlock code opened exam {}", exam.id);
            return UnlockOutcome::UnlockedExam {
                exam_id: exam.id,
                title: exam.title.clone(),
            };
        }

        if let Some(module) = exams
            .iter()
            .flat_map(|e| &e.modules)
            .find(|m| m.title.trim().to_lowercase() == normalized)
        {
            self.unlock_module_fully(module);
            info!("unlock code opened module {}", module.id);
            return UnlockOutcome::UnlockedModule {
                module_id: module.id,
                title: module.title.clone(),
            };
        }

        UnlockOutcome::NoMatch
    }

    pub fn rename_sub_topic(&mut self, module_id: i64, from: &str, to: &str) -> bool {
        if self.unlocked_sub_topic_keys.remove(&sub_topic_key(module_id, from)) {
            self.unlocked_sub_topic_keys.insert(sub_topic_key(module_id, to));
            true
        } else {
            false
        }
    }

    pub fn remove_sub_topic(&mut self, module_id: i64, sub_topic: &str) -> bool {
        self.unlocked_sub_topic_keys
            .remove(&sub_topic_key(module_id, sub_topic))
    }

    pub fn remove_module(&mut self, module: &Module) -> bool {
        let mut changed = self.unlocked_module_ids.remove(&module.id);
        for sub in &module.sub_topics {
            changed |= self.remove_sub_topic(module.id, &sub.title);
        }
        changed
    }
}
