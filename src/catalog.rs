use crate::models::{Exam, ModuleIcon, QuestionBank, TopicId};
use crate::progression::ProgressionState;
use crate::visibility::VisibilityMaps;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPointView {
    pub title: String,
    pub visible: bool,
    pub question_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTopicView {
    pub title: String,
    pub visible: bool,
    pub unlocked: bool,
    pub question_count: usize,
    pub content_points: Vec<ContentPointView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleView {
    pub id: i64,
    pub title: String,
    pub icon: ModuleIcon,
    pub color: String,
    pub visible: bool,
    pub unlocked: bool,
    pub sub_topics: Vec<SubTopicView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamView {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub modules: Vec<ModuleView>,
}

fn count(bank: &QuestionBank, module_id: i64, topic: &TopicId) -> usize {
    bank.get(&module_id)
        .and_then(|t| t.get(&topic.to_string()))
        .map_or(0, Vec::len)
}

/// Hierarchy annotated with overlay and unlock state. Hidden nodes are
/// dropped unless `include_hidden` is set.
pub fn build_catalog(
    exams: &[Exam],
    bank: &QuestionBank,
    visibility: &VisibilityMaps,
    progression: &ProgressionState,
    include_hidden: bool,
) -> Vec<ExamView> {
    exams
        .iter()
        .map(|exam| ExamView {
            id: exam.id,
            title: exam.title.clone(),
            description: exam.description.clone(),
            modules: exam
                .modules
                .iter()
                .filter(|m| include_hidden || visibility.is_module_visible(m.id))
                .map(|m| ModuleView {
                    id: m.id,
                    title: m.title.clone(),
                    icon: m.icon,
                    color: m.color.clone(),
                    visible: visibility.is_module_visible(m.id),
                    unlocked: progression.is_module_unlocked(m.id),
                    sub_topics: m
                        .sub_topics
                        .iter()
                        .filter(|s| include_hidden || visibility.is_sub_topic_visible(m.id, &s.title))
                        .map(|s| SubTopicView {
                            title: s.title.clone(),
                            visible: visibility.is_sub_topic_visible(m.id, &s.title),
                            unlocked: progression.is_sub_topic_unlocked(m.id, &s.title),
                            question_count: count(bank, m.id, &TopicId::sub_topic(&s.title)),
                            content_points: s
                                .content
                                .iter()
                                .filter(|p| {
                                    include_hidden || visibility.is_content_point_visible(m.id, &s.title, p)
                                })
                                .map(|p| ContentPointView {
                                    title: p.clone(),
                                    visible: visibility.is_content_point_visible(m.id, &s.title, p),
                                    question_count: count(bank, m.id, &TopicId::content_point(&s.title, p)),
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect()
}
