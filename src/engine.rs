use crate::defaults;
use crate::error::EngineError;
use crate::ids;
use crate::models::{
    find_module, locate_module, validate_draft, Exam, Module, ModuleIcon, Question, QuestionBank,
    QuestionDraft, SubTopic, TopicId, TopicQuestions, ValidationIssue, TOPIC_SEPARATOR,
};
use crate::progression::{
    ProgressEvent, ProgressionState, QuizCompletion, QuizMode, UnlockCodes, UnlockOutcome,
};
use crate::reconcile::{self, ImportDocument, ImportSummary};
use crate::selector::{self, QuizConfig};
use crate::store::{
    load_or_default, BlobStore, CONTENT_POINT_VISIBILITY_KEY, EXAMS_KEY, MODULE_VISIBILITY_KEY,
    QUESTION_BANK_KEY, QUIZ_ATTEMPTS_KEY, STUDY_RESOURCES_KEY, SUB_TOPIC_VISIBILITY_KEY,
    UNLOCKED_MODULES_KEY, UNLOCKED_SUB_TOPICS_KEY,
};
use crate::visibility::{Touched, VisibilityMaps};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: String,
    pub module_id: i64,
    pub topic: String,
    pub mode: QuizMode,
    pub correct: u32,
    pub total: u32,
    pub score: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Link,
    Video,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudyResource {
    pub id: String,
    pub module_id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUpdate {
    pub title: Option<String>,
    pub icon: Option<ModuleIcon>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub attempt: QuizAttempt,
    pub event: Option<ProgressEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Doc {
    Exams,
    Bank,
    ModuleVisibility,
    SubTopicVisibility,
    ContentPointVisibility,
    UnlockedModules,
    UnlockedSubTopics,
    Attempts,
    Resources,
}

const PROGRESSION_DOCS: [Doc; 2] = [Doc::UnlockedModules, Doc::UnlockedSubTopics];

fn visibility_docs(touched: Touched) -> Vec<Doc> {
    let mut docs = Vec::new();
    if touched.modules {
        docs.push(Doc::ModuleVisibility);
    }
    if touched.sub_topics {
        docs.push(Doc::SubTopicVisibility);
    }
    if touched.content_points {
        docs.push(Doc::ContentPointVisibility);
    }
    docs
}

fn required(value: &str, field: &'static str) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Like `required`, and also rejects the topic separator so titles stay
/// splittable inside topic identifiers.
fn title(value: &str, field: &'static str) -> Result<String, EngineError> {
    let value = required(value, field)?;
    if value.contains(TOPIC_SEPARATOR) {
        return Err(EngineError::Validation(vec![ValidationIssue::new(
            field,
            format!("must not contain '{TOPIC_SEPARATOR}'"),
        )]));
    }
    Ok(value)
}

fn confirm(confirmed: bool) -> Result<(), EngineError> {
    if confirmed {
        Ok(())
    } else {
        Err(EngineError::Unconfirmed)
    }
}

/// Moves every bank key belonging to sub-topic `from` (itself and its
/// `from::*` content points) under `to`.
fn rename_bank_sub_topic(topics: &mut TopicQuestions, from: &str, to: &str) -> bool {
    let keys: Vec<String> = topics
        .keys()
        .filter(|k| TopicId::parse(k).sub_topic == from)
        .cloned()
        .collect();
    for key in &keys {
        if let Some(questions) = topics.remove(key) {
            let mut id = TopicId::parse(key);
            id.sub_topic = to.to_string();
            move_questions(topics, id.to_string(), questions);
        }
    }
    !keys.is_empty()
}

/// Stores `questions` under `key`, appending when the key is already taken
/// so that no list is ever replaced by a rename.
fn move_questions(topics: &mut TopicQuestions, key: String, questions: Vec<Question>) {
    match topics.get_mut(&key) {
        Some(existing) => {
            warn!("topic '{}' already had questions, merging renamed list into it", key);
            existing.extend(questions);
        }
        None => {
            topics.insert(key, questions);
        }
    }
}

/// Owns the whole content and progression state. Every mutating operation
/// validates first, applies in memory, then rewrites the affected documents.
pub struct Engine {
    store: Arc<dyn BlobStore>,
    exams: Vec<Exam>,
    bank: QuestionBank,
    visibility: VisibilityMaps,
    progression: ProgressionState,
    attempts: Vec<QuizAttempt>,
    resources: Vec<StudyResource>,
    unlock_codes: UnlockCodes,
}

impl Engine {
    pub fn load(store: Arc<dyn BlobStore>, unlock_codes: UnlockCodes) -> Self {
        let exams: Vec<Exam> = load_or_default(store.as_ref(), EXAMS_KEY, defaults::default_exams);
        let bank: QuestionBank = load_or_default(store.as_ref(), QUESTION_BANK_KEY, defaults::default_bank);

        let mut visibility = VisibilityMaps {
            modules: load_or_default(store.as_ref(), MODULE_VISIBILITY_KEY, Default::default),
            sub_topics: load_or_default(store.as_ref(), SUB_TOPIC_VISIBILITY_KEY, Default::default),
            content_points: load_or_default(store.as_ref(), CONTENT_POINT_VISIBILITY_KEY, Default::default),
        };
        visibility.seed(&exams);

        let initial = ProgressionState::initial(&exams);
        let mut progression = ProgressionState {
            unlocked_module_ids: load_or_default(store.as_ref(), UNLOCKED_MODULES_KEY, || {
                initial.unlocked_module_ids.clone()
            }),
            unlocked_sub_topic_keys: load_or_default(store.as_ref(), UNLOCKED_SUB_TOPICS_KEY, || {
                initial.unlocked_sub_topic_keys.clone()
            }),
        };
        progression.ensure_entry_points(&exams);

        let attempts = load_or_default(store.as_ref(), QUIZ_ATTEMPTS_KEY, Vec::new);
        let resources = load_or_default(store.as_ref(), STUDY_RESOURCES_KEY, Vec::new);

        info!(
            "engine loaded: {} exams, {} modules",
            exams.len(),
            exams.iter().map(|e| e.modules.len()).sum::<usize>()
        );

        Self {
            store,
            exams,
            bank,
            visibility,
            progression,
            attempts,
            resources,
            unlock_codes,
        }
    }

    fn persist(&self, docs: &[Doc]) {
        for doc in docs {
            let (key, serialized) = match doc {
                Doc::Exams => (EXAMS_KEY, serde_json::to_string(&self.exams)),
                Doc::Bank => (QUESTION_BANK_KEY, serde_json::to_string(&self.bank)),
                Doc::ModuleVisibility => (MODULE_VISIBILITY_KEY, serde_json::to_string(&self.visibility.modules)),
                Doc::SubTopicVisibility => (SUB_TOPIC_VISIBILITY_KEY, serde_json::to_string(&self.visibility.sub_topics)),
                Doc::ContentPointVisibility => (
                    CONTENT_POINT_VISIBILITY_KEY,
                    serde_json::to_string(&self.visibility.content_points),
                ),
                Doc::UnlockedModules => (
                    UNLOCKED_MODULES_KEY,
                    serde_json::to_string(&self.progression.unlocked_module_ids),
                ),
                Doc::UnlockedSubTopics => (
                    UNLOCKED_SUB_TOPICS_KEY,
                    serde_json::to_string(&self.progression.unlocked_sub_topic_keys),
                ),
                Doc::Attempts => (QUIZ_ATTEMPTS_KEY, serde_json::to_string(&self.attempts)),
                Doc::Resources => (STUDY_RESOURCES_KEY, serde_json::to_string(&self.resources)),
            };
            let result = serialized
                .map_err(anyhow::Error::from)
                .and_then(|raw| self.store.set(key, &raw));
            if let Err(err) = result {
                warn!("failed to persist '{}': {:#}", key, err);
            }
        }
    }

    fn persist_all(&self) {
        self.persist(&[
            Doc::Exams,
            Doc::Bank,
            Doc::ModuleVisibility,
            Doc::SubTopicVisibility,
            Doc::ContentPointVisibility,
            Doc::UnlockedModules,
            Doc::UnlockedSubTopics,
            Doc::Resources,
        ]);
    }

    fn refresh_entry_points(&mut self) -> bool {
        self.progression.ensure_entry_points(&self.exams)
    }

    pub fn exams(&self) -> &[Exam] {
        &self.exams
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    pub fn visibility(&self) -> &VisibilityMaps {
        &self.visibility
    }

    pub fn progression(&self) -> &ProgressionState {
        &self.progression
    }

    pub fn attempts(&self) -> &[QuizAttempt] {
        &self.attempts
    }

    pub fn module(&self, module_id: i64) -> Result<&Module, EngineError> {
        find_module(&self.exams, module_id).ok_or(EngineError::ModuleNotFound(module_id))
    }

    fn module_mut(&mut self, module_id: i64) -> Result<&mut Module, EngineError> {
        let (ei, mi) = locate_module(&self.exams, module_id).ok_or(EngineError::ModuleNotFound(module_id))?;
        Ok(&mut self.exams[ei].modules[mi])
    }

    fn exam_mut(&mut self, exam_id: i64) -> Result<&mut Exam, EngineError> {
        self.exams
            .iter_mut()
            .find(|e| e.id == exam_id)
            .ok_or(EngineError::ExamNotFound(exam_id))
    }

    /// Errors unless `topic` names a sub-topic or content point of the module.
    fn ensure_topic(&self, module_id: i64, topic: &str) -> Result<(), EngineError> {
        let module = self.module(module_id)?;
        let id = TopicId::parse(topic);
        let sub = module
            .sub_topic(&id.sub_topic)
            .ok_or_else(|| EngineError::SubTopicNotFound(id.sub_topic.clone()))?;
        match &id.content_point {
            Some(point) if !sub.content.contains(point) => Err(EngineError::ContentPointNotFound(point.clone())),
            _ => Ok(()),
        }
    }

    // ---- exams ----

    pub fn add_exam(&mut self, title: &str, description: &str) -> Result<i64, EngineError> {
        let title = required(title, "title")?;
        if self.exams.iter().any(|e| e.title.eq_ignore_ascii_case(&title)) {
            return Err(EngineError::Duplicate(format!("exam '{title}'")));
        }
        let id = ids::next_exam_id(&self.exams);
        self.exams.push(Exam {
            id,
            title,
            description: description.trim().to_string(),
            modules: Vec::new(),
        });
        self.persist(&[Doc::Exams]);
        info!("created exam {}", id);
        Ok(id)
    }

    pub fn update_exam(&mut self, exam_id: i64, title: &str, description: &str) -> Result<(), EngineError> {
        let title = required(title, "title")?;
        if self
            .exams
            .iter()
            .any(|e| e.id != exam_id && e.title.eq_ignore_ascii_case(&title))
        {
            return Err(EngineError::Duplicate(format!("exam '{title}'")));
        }
        let exam = self.exam_mut(exam_id)?;
        exam.title = title;
        exam.description = description.trim().to_string();
        self.persist(&[Doc::Exams]);
        Ok(())
    }

    pub fn delete_exam(&mut self, exam_id: i64, confirmed: bool) -> Result<(), EngineError> {
        let pos = self
            .exams
            .iter()
            .position(|e| e.id == exam_id)
            .ok_or(EngineError::ExamNotFound(exam_id))?;
        confirm(confirmed)?;
        let exam = self.exams.remove(pos);
        for module in &exam.modules {
            self.purge_module(module);
        }
        self.persist_all();
        info!("deleted exam {} with {} modules", exam_id, exam.modules.len());
        Ok(())
    }

    // ---- modules ----

    /// Module titles key import and export documents, so they are unique
    /// across every exam.
    fn ensure_unique_module_title(&self, title: &str, except: Option<i64>) -> Result<(), EngineError> {
        let taken = self
            .exams
            .iter()
            .flat_map(|e| &e.modules)
            .any(|m| Some(m.id) != except && m.title.eq_ignore_ascii_case(title));
        if taken {
            return Err(EngineError::Duplicate(format!("module '{title}'")));
        }
        Ok(())
    }

    pub fn add_module(&mut self, exam_id: i64, title: &str, icon: ModuleIcon, color: &str) -> Result<i64, EngineError> {
        let title = required(title, "title")?;
        self.ensure_unique_module_title(&title, None)?;
        let color = match color.trim() {
            "" => crate::models::DEFAULT_MODULE_COLOR.to_string(),
            c => c.to_string(),
        };
        let id = ids::next_module_id(&self.exams);
        let exam = self.exam_mut(exam_id)?;
        let mut module = Module::new(id, title);
        module.icon = icon;
        module.color = color;
        exam.modules.push(module);
        self.visibility.show_module(id);
        self.refresh_entry_points();
        self.persist(&[Doc::Exams, Doc::ModuleVisibility]);
        self.persist(&PROGRESSION_DOCS);
        info!("created module {} in exam {}", id, exam_id);
        Ok(id)
    }

    pub fn update_module(&mut self, module_id: i64, update: ModuleUpdate) -> Result<(), EngineError> {
        let title = update.title.as_deref().map(|t| required(t, "title")).transpose()?;
        if let Some(title) = &title {
            self.ensure_unique_module_title(title, Some(module_id))?;
        }
        let module = self.module_mut(module_id)?;
        if let Some(title) = title {
            module.title = title;
        }
        if let Some(icon) = update.icon {
            module.icon = icon;
        }
        if let Some(color) = update.color.filter(|c| !c.trim().is_empty()) {
            module.color = color.trim().to_string();
        }
        self.persist(&[Doc::Exams]);
        Ok(())
    }

    fn purge_module(&mut self, module: &Module) {
        self.bank.remove(&module.id);
        self.visibility.remove_module(module.id);
        self.progression.remove_module(module);
        self.resources.retain(|r| r.module_id != module.id);
    }

    /// Removes the module and every bank, visibility, progression and
    /// resource entry that references it.
    pub fn delete_module(&mut self, module_id: i64, confirmed: bool) -> Result<(), EngineError> {
        let (ei, mi) = locate_module(&self.exams, module_id).ok_or(EngineError::ModuleNotFound(module_id))?;
        confirm(confirmed)?;
        let module = self.exams[ei].modules.remove(mi);
        self.purge_module(&module);
        self.refresh_entry_points();
        self.persist_all();
        info!("deleted module {}", module_id);
        Ok(())
    }

    // ---- sub-topics ----

    pub fn add_sub_topic(&mut self, module_id: i64, sub_topic: &str) -> Result<(), EngineError> {
        let sub_topic = title(sub_topic, "title")?;
        let module = self.module_mut(module_id)?;
        if module.sub_topic(&sub_topic).is_some() {
            return Err(EngineError::Duplicate(format!("sub-topic '{sub_topic}'")));
        }
        module.sub_topics.push(SubTopic::new(sub_topic.clone()));
        self.visibility.show_sub_topic(module_id, &sub_topic);
        self.refresh_entry_points();
        self.persist(&[Doc::Exams, Doc::SubTopicVisibility]);
        self.persist(&PROGRESSION_DOCS);
        Ok(())
    }

    /// Renames a sub-topic and carries its bank topics, visibility flags and
    /// unlock entry over to the new title.
    pub fn rename_sub_topic(&mut self, module_id: i64, from: &str, to: &str) -> Result<(), EngineError> {
        let to = title(to, "title")?;
        let module = self.module_mut(module_id)?;
        if module.sub_topic(from).is_none() {
            return Err(EngineError::SubTopicNotFound(from.to_string()));
        }
        if from == to {
            return Ok(());
        }
        if module.sub_topic(&to).is_some() {
            return Err(EngineError::Duplicate(format!("sub-topic '{to}'")));
        }
        if let Some(sub) = module.sub_topic_mut(from) {
            sub.title = to.clone();
        }

        let mut docs = vec![Doc::Exams];
        if let Some(topics) = self.bank.get_mut(&module_id) {
            if rename_bank_sub_topic(topics, from, &to) {
                docs.push(Doc::Bank);
            }
        }
        docs.extend(visibility_docs(self.visibility.rename_sub_topic(module_id, from, &to)));
        if self.progression.rename_sub_topic(module_id, from, &to) {
            docs.push(Doc::UnlockedSubTopics);
        }
        self.persist(&docs);
        info!("renamed sub-topic '{}' to '{}' in module {}", from, to, module_id);
        Ok(())
    }

    pub fn delete_sub_topic(&mut self, module_id: i64, sub_topic: &str, confirmed: bool) -> Result<(), EngineError> {
        let module = self.module_mut(module_id)?;
        let pos = module
            .sub_topics
            .iter()
            .position(|s| s.title == sub_topic)
            .ok_or_else(|| EngineError::SubTopicNotFound(sub_topic.to_string()))?;
        confirm(confirmed)?;
        module.sub_topics.remove(pos);
        if let Some(topics) = self.bank.get_mut(&module_id) {
            topics.retain(|k, _| TopicId::parse(k).sub_topic != sub_topic);
        }
        self.visibility.remove_sub_topic(module_id, sub_topic);
        self.progression.remove_sub_topic(module_id, sub_topic);
        self.refresh_entry_points();
        self.persist(&[Doc::Exams, Doc::Bank, Doc::SubTopicVisibility, Doc::ContentPointVisibility]);
        self.persist(&PROGRESSION_DOCS);
        Ok(())
    }

    // ---- content points ----

    pub fn add_content_point(&mut self, module_id: i64, sub_topic: &str, point: &str) -> Result<(), EngineError> {
        let point = title(point, "contentPoint")?;
        let sub = self
            .module_mut(module_id)?
            .sub_topic_mut(sub_topic)
            .ok_or_else(|| EngineError::SubTopicNotFound(sub_topic.to_string()))?;
        if sub.content.contains(&point) {
            return Err(EngineError::Duplicate(format!("content point '{point}'")));
        }
        sub.content.push(point.clone());
        self.visibility.show_content_point(module_id, sub_topic, &point);
        self.persist(&[Doc::Exams, Doc::ContentPointVisibility]);
        Ok(())
    }

    pub fn rename_content_point(
        &mut self,
        module_id: i64,
        sub_topic: &str,
        from: &str,
        to: &str,
    ) -> Result<(), EngineError> {
        let to = title(to, "contentPoint")?;
        let sub = self
            .module_mut(module_id)?
            .sub_topic_mut(sub_topic)
            .ok_or_else(|| EngineError::SubTopicNotFound(sub_topic.to_string()))?;
        let pos = sub
            .content
            .iter()
            .position(|p| p == from)
            .ok_or_else(|| EngineError::ContentPointNotFound(from.to_string()))?;
        if from == to {
            return Ok(());
        }
        if sub.content.contains(&to) {
            return Err(EngineError::Duplicate(format!("content point '{to}'")));
        }
        sub.content[pos] = to.clone();

        let mut docs = vec![Doc::Exams];
        if let Some(topics) = self.bank.get_mut(&module_id) {
            let old_key = TopicId::content_point(sub_topic, from).to_string();
            if let Some(questions) = topics.remove(&old_key) {
                move_questions(topics, TopicId::content_point(sub_topic, &to).to_string(), questions);
                docs.push(Doc::Bank);
            }
        }
        if self.visibility.rename_content_point(module_id, sub_topic, from, &to) {
            docs.push(Doc::ContentPointVisibility);
        }
        self.persist(&docs);
        Ok(())
    }

    pub fn delete_content_point(
        &mut self,
        module_id: i64,
        sub_topic: &str,
        point: &str,
        confirmed: bool,
    ) -> Result<(), EngineError> {
        let sub = self
            .module_mut(module_id)?
            .sub_topic_mut(sub_topic)
            .ok_or_else(|| EngineError::SubTopicNotFound(sub_topic.to_string()))?;
        let pos = sub
            .content
            .iter()
            .position(|p| p == point)
            .ok_or_else(|| EngineError::ContentPointNotFound(point.to_string()))?;
        confirm(confirmed)?;
        sub.content.remove(pos);
        if let Some(topics) = self.bank.get_mut(&module_id) {
            topics.remove(&TopicId::content_point(sub_topic, point).to_string());
        }
        self.visibility.remove_content_point(module_id, sub_topic, point);
        self.persist(&[Doc::Exams, Doc::Bank, Doc::ContentPointVisibility]);
        Ok(())
    }

    // ---- visibility ----

    pub fn toggle_module_visibility(&mut self, module_id: i64) -> Result<bool, EngineError> {
        self.module(module_id)?;
        let visible = self.visibility.toggle_module(module_id);
        self.persist(&[Doc::ModuleVisibility]);
        Ok(visible)
    }

    pub fn toggle_sub_topic_visibility(&mut self, module_id: i64, sub_topic: &str) -> Result<bool, EngineError> {
        if sub_topic.contains(TOPIC_SEPARATOR) {
            return Err(EngineError::Validation(vec![ValidationIssue::new(
                "subTopic",
                "must name a sub-topic, not a content point",
            )]));
        }
        self.ensure_topic(module_id, sub_topic)?;
        let visible = self.visibility.toggle_sub_topic(module_id, sub_topic);
        self.persist(&[Doc::SubTopicVisibility]);
        Ok(visible)
    }

    pub fn toggle_content_point_visibility(
        &mut self,
        module_id: i64,
        sub_topic: &str,
        point: &str,
    ) -> Result<bool, EngineError> {
        self.ensure_topic(module_id, &TopicId::content_point(sub_topic, point).to_string())?;
        let visible = self.visibility.toggle_content_point(module_id, sub_topic, point);
        self.persist(&[Doc::ContentPointVisibility]);
        Ok(visible)
    }

    // ---- questions ----

    pub fn topic_questions(&self, module_id: i64, topic: &str) -> Vec<Question> {
        self.bank
            .get(&module_id)
            .and_then(|t| t.get(topic))
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_question(&mut self, module_id: i64, topic: &str, draft: QuestionDraft) -> Result<Question, EngineError> {
        self.ensure_topic(module_id, topic)?;
        validate_draft(&draft).map_err(EngineError::Validation)?;
        let id = draft
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(ids::next_question_id);
        let question = draft.into_question(id);
        self.bank
            .entry(module_id)
            .or_default()
            .entry(topic.to_string())
            .or_default()
            .push(question.clone());
        self.persist(&[Doc::Bank]);
        Ok(question)
    }

    pub fn update_question(
        &mut self,
        module_id: i64,
        topic: &str,
        question_id: &str,
        draft: QuestionDraft,
    ) -> Result<Question, EngineError> {
        validate_draft(&draft).map_err(EngineError::Validation)?;
        let slot = self
            .bank
            .get_mut(&module_id)
            .and_then(|t| t.get_mut(topic))
            .and_then(|qs| qs.iter_mut().find(|q| q.id == question_id))
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))?;
        *slot = draft.into_question(question_id.to_string());
        let updated = slot.clone();
        self.persist(&[Doc::Bank]);
        Ok(updated)
    }

    pub fn delete_question(&mut self, module_id: i64, topic: &str, question_id: &str) -> Result<(), EngineError> {
        let questions = self
            .bank
            .get_mut(&module_id)
            .and_then(|t| t.get_mut(topic))
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))?;
        let before = questions.len();
        questions.retain(|q| q.id != question_id);
        if questions.len() == before {
            return Err(EngineError::QuestionNotFound(question_id.to_string()));
        }
        self.persist(&[Doc::Bank]);
        Ok(())
    }

    /// Appends validated drafts (e.g. AI output) to a topic. All drafts are
    /// checked before any is stored.
    pub fn append_questions(
        &mut self,
        module_id: i64,
        topic: &str,
        drafts: Vec<QuestionDraft>,
    ) -> Result<usize, EngineError> {
        self.ensure_topic(module_id, topic)?;
        let mut issues = Vec::new();
        for draft in &drafts {
            if let Err(found) = validate_draft(draft) {
                issues.extend(found);
            }
        }
        if !issues.is_empty() {
            return Err(EngineError::Validation(issues));
        }
        let count = drafts.len();
        let list = self
            .bank
            .entry(module_id)
            .or_default()
            .entry(topic.to_string())
            .or_default();
        list.extend(drafts.into_iter().map(|d| {
            let id = d
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(ids::next_question_id);
            d.into_question(id)
        }));
        self.persist(&[Doc::Bank]);
        Ok(count)
    }

    // ---- import / export ----

    /// Merges an external document. A malformed document is rejected before
    /// anything changes.
    pub fn import_document(&mut self, value: &Value, target_exam: Option<i64>) -> Result<ImportSummary, EngineError> {
        let doc = reconcile::parse_document(value)?;
        self.import_parsed(doc, target_exam)
    }

    pub fn import_parsed(&mut self, doc: ImportDocument, target_exam: Option<i64>) -> Result<ImportSummary, EngineError> {
        let summary = reconcile::reconcile(&mut self.exams, &mut self.bank, &mut self.visibility, doc, target_exam)?;
        self.refresh_entry_points();
        self.persist_all();
        Ok(summary)
    }

    pub fn export_all(&self) -> ImportDocument {
        reconcile::export_all(&self.exams, &self.bank)
    }

    pub fn export_topic(&self, module_id: i64, topic: &str) -> Result<Vec<Question>, EngineError> {
        self.module(module_id)?;
        reconcile::export_topic(&self.bank, module_id, topic)
    }

    /// Replaces the question list of one topic with a bare question array.
    pub fn import_topic(&mut self, module_id: i64, topic: &str, value: &Value) -> Result<usize, EngineError> {
        self.ensure_topic(module_id, topic)?;
        let questions = reconcile::parse_topic_import(value)?;
        let count = questions.len();
        self.bank
            .entry(module_id)
            .or_default()
            .insert(topic.to_string(), questions);
        self.persist(&[Doc::Bank]);
        info!("replaced {} questions in {}/{}", count, module_id, topic);
        Ok(count)
    }

    // ---- quizzes and progression ----

    /// Picks the questions for a new quiz. Refuses topics with no questions.
    pub fn start_quiz(&self, module_id: i64, topic: &str, config: &QuizConfig) -> Result<Vec<Question>, EngineError> {
        self.module(module_id)?;
        if config.count == 0 {
            return Err(EngineError::Validation(vec![ValidationIssue::new(
                "count",
                "must be at least 1",
            )]));
        }
        if self.bank.get(&module_id).and_then(|t| t.get(topic)).map_or(true, Vec::is_empty) {
            return Err(EngineError::NoQuestions);
        }
        Ok(selector::select_questions(&self.bank, module_id, topic, config))
    }

    pub fn complete_quiz(&mut self, completion: &QuizCompletion) -> Result<CompletionOutcome, EngineError> {
        self.module(completion.module_id)?;
        if completion.total == 0 {
            return Err(EngineError::Validation(vec![ValidationIssue::new(
                "total",
                "must be at least 1",
            )]));
        }
        let attempt = QuizAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            module_id: completion.module_id,
            topic: completion.topic.clone(),
            mode: completion.mode,
            correct: completion.correct.min(completion.total),
            total: completion.total,
            score: completion.score(),
            completed_at: Utc::now(),
        };
        self.attempts.push(attempt.clone());
        self.persist(&[Doc::Attempts]);

        let event = self.progression.advance(&self.exams, completion);
        if event.is_some() {
            self.persist(&PROGRESSION_DOCS);
        }
        Ok(CompletionOutcome { attempt, event })
    }

    pub fn apply_unlock_code(&mut self, code: &str) -> UnlockOutcome {
        let outcome = self.progression.apply_code(&self.exams, code, &self.unlock_codes);
        if outcome.changed_state() {
            self.persist(&PROGRESSION_DOCS);
        }
        outcome
    }

    // ---- study resources ----

    pub fn resources_for(&self, module_id: i64) -> Vec<StudyResource> {
        self.resources
            .iter()
            .filter(|r| r.module_id == module_id)
            .cloned()
            .collect()
    }

    pub fn add_resource(
        &mut self,
        module_id: i64,
        title: &str,
        url: &str,
        kind: ResourceKind,
    ) -> Result<StudyResource, EngineError> {
        self.module(module_id)?;
        let resource = StudyResource {
            id: ids::next_resource_id(),
            module_id,
            title: required(title, "title")?,
            url: required(url, "url")?,
            kind,
        };
        self.resources.push(resource.clone());
        self.persist(&[Doc::Resources]);
        Ok(resource)
    }

    pub fn delete_resource(&mut self, resource_id: &str) -> Result<(), EngineError> {
        let before = self.resources.len();
        self.resources.retain(|r| r.id != resource_id);
        if self.resources.len() == before {
            return Err(EngineError::ResourceNotFound(resource_id.to_string()));
        }
        self.persist(&[Doc::Resources]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use serde_json::json;

    fn engine() -> (Arc<MemoryBlobStore>, Engine) {
        let store = Arc::new(MemoryBlobStore::new());
        let engine = Engine::load(store.clone(), UnlockCodes::default());
        (store, engine)
    }

    fn draft(text: &str) -> QuestionDraft {
        QuestionDraft {
            id: None,
            question: text.into(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: "c".into(),
            explanation: Some("because".into()),
            difficulty: None,
        }
    }

    #[test]
    fn loads_default_dataset_when_store_is_empty() {
        let (_, engine) = engine();
        assert_eq!(engine.exams().len(), 2);
        assert!(engine.visibility().modules.values().all(|v| *v));
        assert!(engine.progression().is_module_unlocked(1));
        assert!(engine.progression().is_module_unlocked(3));
        assert!(!engine.progression().is_module_unlocked(2));
    }

    #[test]
    fn corrupt_documents_fall_back_without_failing() {
        let store = Arc::new(MemoryBlobStore::new());
        store.set(EXAMS_KEY, "{{{").unwrap();
        store.set(QUESTION_BANK_KEY, "[]").unwrap();
        let engine = Engine::load(store, UnlockCodes::default());
        assert_eq!(engine.exams(), defaults::default_exams().as_slice());
        assert_eq!(engine.bank(), &defaults::default_bank());
    }

    #[test]
    fn mutations_survive_reload() {
        let (store, mut engine) = engine();
        engine.add_sub_topic(2, "CSRF").unwrap();
        let q = engine.add_question(2, "CSRF", draft("What is a CSRF token?")).unwrap();
        engine.toggle_module_visibility(2).unwrap();

        let reloaded = Engine::load(store, UnlockCodes::default());
        assert!(reloaded.module(2).unwrap().sub_topic("CSRF").is_some());
        assert_eq!(reloaded.topic_questions(2, "CSRF"), vec![q]);
        assert!(!reloaded.visibility().is_module_visible(2));
    }

    #[test]
    fn duplicate_sub_topic_is_rejected_without_change() {
        let (_, mut engine) = engine();
        let before = engine.exams().to_vec();
        let err = engine.add_sub_topic(1, "Firewalls").unwrap_err();
        assert!(matches!(err, EngineError::Duplicate(_)));
        assert!(matches!(engine.add_sub_topic(1, "  "), Err(EngineError::EmptyField(_))));
        assert!(matches!(engine.add_sub_topic(1, "A::B"), Err(EngineError::Validation(_))));
        assert_eq!(engine.exams(), before.as_slice());
    }

    #[test]
    fn sub_topic_rename_cascades() {
        let (_, mut engine) = engine();
        engine.add_question(1, "Firewalls::Packet Filtering", draft("q")).unwrap();
        engine.toggle_content_point_visibility(1, "Firewalls", "Packet Filtering").unwrap();
        engine.toggle_sub_topic_visibility(1, "Firewalls").unwrap();

        engine.rename_sub_topic(1, "Firewalls", "Perimeter").unwrap();

        let topics = &engine.bank()[&1];
        assert!(topics.contains_key("Perimeter"));
        assert!(topics.contains_key("Perimeter::Packet Filtering"));
        assert!(!topics.keys().any(|k| k == "Firewalls" || k.starts_with("Firewalls::")));

        let vis = engine.visibility();
        assert!(!vis.is_sub_topic_visible(1, "Perimeter"));
        assert!(!vis.is_content_point_visible(1, "Perimeter", "Packet Filtering"));
        assert!(!vis.sub_topics[&1].contains_key("Firewalls"));
        assert!(!vis.content_points[&1].contains_key("Firewalls"));

        assert!(engine.progression().is_sub_topic_unlocked(1, "Perimeter"));
        assert!(!engine.progression().is_sub_topic_unlocked(1, "Firewalls"));
    }

    #[test]
    fn content_point_rename_moves_bank_key() {
        let (_, mut engine) = engine();
        engine
            .rename_content_point(3, "Hashing", "Salting", "Salts and Peppers")
            .unwrap();
        let topics = &engine.bank()[&3];
        assert!(topics.contains_key("Hashing::Salts and Peppers"));
        assert!(!topics.contains_key("Hashing::Salting"));
    }

    #[test]
    fn delete_requires_confirmation_and_purges() {
        let (_, mut engine) = engine();
        assert!(matches!(engine.delete_module(1, false), Err(EngineError::Unconfirmed)));
        assert!(engine.module(1).is_ok());

        engine.add_resource(1, "RFC", "https://example.org", ResourceKind::Link).unwrap();
        engine.delete_module(1, true).unwrap();
        assert!(engine.module(1).is_err());
        assert!(!engine.bank().contains_key(&1));
        assert!(!engine.visibility().modules.contains_key(&1));
        assert!(!engine.progression().is_module_unlocked(1));
        assert!(engine.resources_for(1).is_empty());
        // module 2 is now first in its exam
        assert!(engine.progression().is_module_unlocked(2));
    }

    #[test]
    fn start_quiz_refuses_empty_topics() {
        let (_, engine) = engine();
        assert!(matches!(
            engine.start_quiz(1, "VPNs", &QuizConfig::exam()),
            Err(EngineError::NoQuestions)
        ));
        let picked = engine.start_quiz(1, "Firewalls", &QuizConfig::exam()).unwrap();
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn passing_completion_advances_and_records_attempt() {
        let (store, mut engine) = engine();
        let completion = QuizCompletion {
            module_id: 1,
            topic: "Firewalls".into(),
            mode: QuizMode::Exam,
            correct: 2,
            total: 2,
        };
        let outcome = engine.complete_quiz(&completion).unwrap();
        assert_eq!(outcome.attempt.score, 100);
        assert!(matches!(outcome.event, Some(ProgressEvent::SubTopicUnlocked { .. })));
        let again = engine.complete_quiz(&completion).unwrap();
        assert!(again.event.is_none());
        assert_eq!(engine.attempts().len(), 2);

        let reloaded = Engine::load(store, UnlockCodes::default());
        assert!(reloaded.progression().is_sub_topic_unlocked(1, "VPNs"));
        assert_eq!(reloaded.attempts().len(), 2);
    }

    #[test]
    fn import_persists_and_reports_counts() {
        let (store, mut engine) = engine();
        let doc = json!({
            "Cryptography": { "Hashing": [
                {"id": "imp-1", "question": "SHA-256 output size?", "options": ["128","160","256","512"], "correctAnswer": "256"}
            ]},
            "Forensics": { "Memory::Volatility": [] }
        });
        let summary = engine.import_document(&doc, None).unwrap();
        assert_eq!(summary.modules_added, 1);
        assert_eq!(summary.sub_topics_added, 1);

        let reloaded = Engine::load(store, UnlockCodes::default());
        assert_eq!(reloaded.topic_questions(3, "Hashing")[0].id, "imp-1");
        assert!(reloaded.exams()[0].modules.iter().any(|m| m.title == "Forensics"));
    }

    #[test]
    fn malformed_import_changes_nothing() {
        let (store, mut engine) = engine();
        let before = engine.export_all();
        assert!(engine.import_document(&json!([1]), None).is_err());
        assert_eq!(engine.export_all(), before);
        assert!(store.get(EXAMS_KEY).unwrap().is_none());
    }

    #[test]
    fn topic_import_replaces_list() {
        let (_, mut engine) = engine();
        let count = engine
            .import_topic(
                1,
                "Firewalls",
                &json!([{"id": "n1", "question": "x", "options": ["a","b","c","d"], "correctAnswer": "d"}]),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(engine.topic_questions(1, "Firewalls").len(), 1);
        assert!(matches!(engine.export_topic(1, "VPNs"), Err(EngineError::NothingToExport)));
    }

    #[test]
    fn question_editor_enforces_answer_membership() {
        let (_, mut engine) = engine();
        let mut bad = draft("q");
        bad.correct_answer = "z".into();
        assert!(matches!(
            engine.add_question(1, "VPNs", bad.clone()),
            Err(EngineError::Validation(_))
        ));
        let q = engine.add_question(1, "VPNs", draft("q")).unwrap();
        assert!(matches!(
            engine.update_question(1, "VPNs", &q.id, bad),
            Err(EngineError::Validation(_))
        ));
        engine.delete_question(1, "VPNs", &q.id).unwrap();
        assert!(engine.topic_questions(1, "VPNs").is_empty());
    }

    fn stray_question(id: &str) -> Value {
        json!({"id": id, "question": "stray", "options": ["a", "b", "c", "d"], "correctAnswer": "a"})
    }

    #[test]
    fn trailing_separator_import_lands_on_canonical_key() {
        let (_, mut engine) = engine();
        engine
            .import_document(&json!({"Network Security": {"Firewalls::": [stray_question("s1")]}}), None)
            .unwrap();
        let keys: Vec<_> = engine.bank()[&1].keys().cloned().collect();
        assert!(!keys.iter().any(|k| k.ends_with(TOPIC_SEPARATOR)));
        assert_eq!(engine.topic_questions(1, "Firewalls").len(), 1);

        engine.rename_sub_topic(1, "Firewalls", "Perimeter").unwrap();
        assert_eq!(engine.topic_questions(1, "Perimeter")[0].id, "s1");
    }

    #[test]
    fn rename_merges_instead_of_overwriting() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut bank = defaults::default_bank();
        let stray: Question = serde_json::from_value(stray_question("s1")).unwrap();
        bank.get_mut(&1).unwrap().insert("Firewalls::".into(), vec![stray]);
        store.set(QUESTION_BANK_KEY, &serde_json::to_string(&bank).unwrap()).unwrap();
        let mut engine = Engine::load(store, UnlockCodes::default());
        let original = engine.topic_questions(1, "Firewalls").len();

        engine.rename_sub_topic(1, "Firewalls", "Perimeter").unwrap();

        let moved = engine.topic_questions(1, "Perimeter");
        assert_eq!(moved.len(), original + 1);
        assert!(moved.iter().any(|q| q.id == "s1"));
    }

    #[test]
    fn module_titles_are_unique_across_exams() {
        let (_, mut engine) = engine();
        let before = engine.exams().to_vec();
        assert!(matches!(
            engine.add_module(2, "network security", ModuleIcon::Book, ""),
            Err(EngineError::Duplicate(_))
        ));
        let rename = ModuleUpdate {
            title: Some("Cryptography".into()),
            ..ModuleUpdate::default()
        };
        assert!(matches!(engine.update_module(1, rename), Err(EngineError::Duplicate(_))));
        assert_eq!(engine.exams(), before.as_slice());

        let same = ModuleUpdate {
            title: Some("Network Security".into()),
            ..ModuleUpdate::default()
        };
        engine.update_module(1, same).unwrap();
    }

    #[test]
    fn sub_topic_toggle_refuses_content_point_identifier() {
        let (_, mut engine) = engine();
        assert!(matches!(
            engine.toggle_sub_topic_visibility(1, "Firewalls::Packet Filtering"),
            Err(EngineError::Validation(_))
        ));
        assert!(engine.visibility().sub_topics.get(&1).map_or(true, |m| !m.contains_key("Firewalls::Packet Filtering")));
    }
}
