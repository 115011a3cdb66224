use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Separator between a sub-topic title and a content-point title inside a
/// topic identifier.
pub const TOPIC_SEPARATOR: &str = "::";

pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ModuleIcon {
    #[default]
    Book,
    Shield,
    Lock,
    Network,
    Code,
    Database,
    Cloud,
    Terminal,
}

pub const DEFAULT_MODULE_COLOR: &str = "blue";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubTopic {
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
}

impl SubTopic {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub icon: ModuleIcon,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub sub_topics: Vec<SubTopic>,
}

fn default_color() -> String {
    DEFAULT_MODULE_COLOR.to_string()
}

impl Module {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            icon: ModuleIcon::default(),
            color: default_color(),
            sub_topics: Vec::new(),
        }
    }

    pub fn sub_topic(&self, title: &str) -> Option<&SubTopic> {
        self.sub_topics.iter().find(|s| s.title == title)
    }

    pub fn sub_topic_mut(&mut self, title: &str) -> Option<&mut SubTopic> {
        self.sub_topics.iter_mut().find(|s| s.title == title)
    }

    /// Every topic identifier this module defines, sub-topics first followed
    /// by their content points, in hierarchy order.
    pub fn topic_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        for sub in &self.sub_topics {
            out.push(TopicId::sub_topic(&sub.title).to_string());
            for point in &sub.content {
                out.push(TopicId::content_point(&sub.title, point).to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// (exam index, module index) of the module with `module_id`.
pub fn locate_module(exams: &[Exam], module_id: i64) -> Option<(usize, usize)> {
    exams.iter().enumerate().find_map(|(ei, exam)| {
        exam.modules
            .iter()
            .position(|m| m.id == module_id)
            .map(|mi| (ei, mi))
    })
}

pub fn find_module(exams: &[Exam], module_id: i64) -> Option<&Module> {
    exams.iter().flat_map(|e| &e.modules).find(|m| m.id == module_id)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Difficulty {
    Low,
    Medium,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
}

/// A question as submitted by the editor or the AI client, before an id has
/// been assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
}

impl QuestionDraft {
    pub fn into_question(self, id: String) -> Question {
        Question {
            id,
            question: self.question,
            options: self.options,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
            difficulty: self.difficulty,
        }
    }
}

/// topic identifier -> ordered questions
pub type TopicQuestions = BTreeMap<String, Vec<Question>>;

/// module id -> topic identifier -> ordered questions
pub type QuestionBank = BTreeMap<i64, TopicQuestions>;

/// Parsed form of a topic identifier: `"SubTopic"` or `"SubTopic::Point"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicId {
    pub sub_topic: String,
    pub content_point: Option<String>,
}

impl TopicId {
    pub fn sub_topic(title: &str) -> Self {
        Self {
            sub_topic: title.to_string(),
            content_point: None,
        }
    }

    pub fn content_point(sub_topic: &str, point: &str) -> Self {
        Self {
            sub_topic: sub_topic.to_string(),
            content_point: Some(point.to_string()),
        }
    }

    /// Splits on the first separator. An empty point after the separator is
    /// treated as a sub-topic level identifier.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(TOPIC_SEPARATOR) {
            Some((sub, point)) if !point.is_empty() => Self::content_point(sub, point),
            Some((sub, _)) => Self::sub_topic(sub),
            None => Self::sub_topic(raw),
        }
    }
}

impl std::fmt::Display for TopicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.content_point {
            Some(point) => write!(f, "{}{}{}", self.sub_topic, TOPIC_SEPARATOR, point),
            None => f.write_str(&self.sub_topic),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

/// Checks the shape every stored question must have. `prefix` is prepended to
/// field names so callers validating whole documents can locate the issue.
pub fn validate_question(
    prefix: &str,
    question: &str,
    options: &[String],
    correct_answer: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if question.trim().is_empty() {
        issues.push(ValidationIssue::new(format!("{prefix}question"), "must not be empty"));
    }
    if options.len() != OPTIONS_PER_QUESTION {
        issues.push(ValidationIssue::new(
            format!("{prefix}options"),
            format!("must contain exactly {OPTIONS_PER_QUESTION} options"),
        ));
    }
    let mut seen = HashSet::new();
    for (j, opt) in options.iter().enumerate() {
        if opt.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("{prefix}options[{j}]"), "must not be empty"));
        }
        if !seen.insert(opt.as_str()) {
            issues.push(ValidationIssue::new(format!("{prefix}options[{j}]"), "must be unique"));
        }
    }
    if !options.iter().any(|o| o == correct_answer) {
        issues.push(ValidationIssue::new(
            format!("{prefix}correctAnswer"),
            "must equal one of the options",
        ));
    }
    issues
}

pub fn validate_draft(draft: &QuestionDraft) -> Result<(), Vec<ValidationIssue>> {
    let issues = validate_question("", &draft.question, &draft.options, &draft.correct_answer);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> QuestionDraft {
        QuestionDraft {
            id: None,
            question: "Which port does HTTPS use?".into(),
            options: vec!["80".into(), "443".into(), "22".into(), "21".into()],
            correct_answer: "443".into(),
            explanation: None,
            difficulty: Some(Difficulty::Low),
        }
    }

    #[test]
    fn topic_id_parse_and_display() {
        let sub = TopicId::parse("Hashing");
        assert_eq!(sub.sub_topic, "Hashing");
        assert!(sub.content_point.is_none());
        assert_eq!(sub.to_string(), "Hashing");

        let point = TopicId::parse("Hashing::Salting");
        assert_eq!(point.content_point.as_deref(), Some("Salting"));
        assert_eq!(point.to_string(), "Hashing::Salting");

        let trailing = TopicId::parse("Hashing::");
        assert!(trailing.content_point.is_none());
    }

    #[test]
    fn module_topic_ids_follow_hierarchy_order() {
        let mut module = Module::new(1, "Crypto");
        module.sub_topics.push(SubTopic {
            title: "Hashing".into(),
            content: vec!["Salting".into()],
        });
        module.sub_topics.push(SubTopic::new("Ciphers"));
        assert_eq!(module.topic_ids(), vec!["Hashing", "Hashing::Salting", "Ciphers"]);
    }

    #[test]
    fn validate_draft_ok() {
        assert!(validate_draft(&draft()).is_ok());
    }

    #[test]
    fn validate_draft_negative() {
        let mut d = draft();
        d.options.pop();
        d.correct_answer = "8443".into();
        let issues = validate_draft(&d).err().unwrap();
        assert!(issues.iter().any(|i| i.field == "options"));
        assert!(issues.iter().any(|i| i.field == "correctAnswer"));
    }

    #[test]
    fn question_uses_camel_case_wire_names() {
        let q = draft().into_question("q1".into());
        let raw = serde_json::to_value(&q).unwrap();
        assert_eq!(raw["correctAnswer"], "443");
        assert_eq!(raw["difficulty"], "Low");
        assert!(raw.get("explanation").is_none());
    }
}
