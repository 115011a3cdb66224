//! Folding external content documents into the live hierarchy, and the
//! export formats that produce such documents.
//!
//! An import document maps a module title (or a legacy numeric module id,
//! optionally written `ID:<n>`) to a map of topic identifiers to question
//! lists. Reconciliation only ever adds modules, sub-topics and content
//! points, and replaces question lists topic by topic.

use crate::error::EngineError;
use crate::ids;
use crate::models::{
    locate_module, validate_question, Exam, Module, Question, QuestionBank, SubTopic, TopicId,
    ValidationIssue, TOPIC_SEPARATOR,
};
use crate::visibility::VisibilityMaps;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::info;

static LEGACY_MODULE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:ID:)?\s*(\d+)$").expect("legacy module key pattern"));

/// Title given to the exam created when an import lands on a platform with no
/// exams at all.
pub const IMPORTED_EXAM_TITLE: &str = "Imported Content";

/// topic identifier -> questions, in document order
pub type ImportTopics = IndexMap<String, Vec<Question>>;

/// module title or legacy id -> topics, in document order. Order matters:
/// new modules and sub-topics are appended in the order they appear.
pub type ImportDocument = IndexMap<String, ImportTopics>;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub modules_added: usize,
    pub sub_topics_added: usize,
    pub content_points_added: usize,
    pub topics_merged: usize,
    pub exam_created: bool,
}

/// Decodes and validates a whole import document. Nothing is applied unless
/// every module entry, topic list and question is well-formed.
pub fn parse_document(value: &Value) -> Result<ImportDocument, EngineError> {
    let Value::Object(modules) = value else {
        return Err(EngineError::MalformedDocument(
            "top-level document must be an object".into(),
        ));
    };

    let mut doc = ImportDocument::new();
    let mut issues = Vec::new();
    for (module_key, topics_value) in modules {
        if module_key.trim().is_empty() {
            issues.push(ValidationIssue::new("<module>", "module key must not be empty"));
            continue;
        }
        let Value::Object(topics) = topics_value else {
            return Err(EngineError::MalformedDocument(format!(
                "'{module_key}' must map topic identifiers to question lists"
            )));
        };
        let mut parsed = ImportTopics::new();
        for (topic, list) in topics {
            let id = TopicId::parse(topic);
            if id.sub_topic.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{module_key}/{topic}"),
                    "sub-topic title must not be empty",
                ));
                continue;
            }
            if id.content_point.as_deref().is_some_and(|p| p.contains(TOPIC_SEPARATOR)) {
                issues.push(ValidationIssue::new(
                    format!("{module_key}/{topic}"),
                    "topic identifier may contain at most one separator",
                ));
                continue;
            }
            let questions: Vec<Question> = serde_json::from_value(list.clone()).map_err(|e| {
                EngineError::MalformedDocument(format!("'{module_key}' / '{topic}': {e}"))
            })?;
            for (i, q) in questions.iter().enumerate() {
                issues.extend(validate_question(
                    &format!("{module_key}/{topic}[{i}]."),
                    &q.question,
                    &q.options,
                    &q.correct_answer,
                ));
            }
            // "Sub::" and "Sub" name the same topic; their lists are merged.
            parsed.entry(id.to_string()).or_default().extend(questions);
        }
        doc.insert(module_key.clone(), parsed);
    }

    if issues.is_empty() {
        Ok(doc)
    } else {
        Err(EngineError::Validation(issues))
    }
}

fn resolve_module(exams: &[Exam], key: &str) -> Option<(usize, usize)> {
    let by_title = exams.iter().enumerate().find_map(|(ei, exam)| {
        exam.modules
            .iter()
            .position(|m| m.title == key)
            .map(|mi| (ei, mi))
    });
    by_title.or_else(|| {
        let caps = LEGACY_MODULE_KEY.captures(key.trim())?;
        let id: i64 = caps.get(1)?.as_str().parse().ok()?;
        locate_module(exams, id)
    })
}

/// Merges `doc` into the hierarchy, bank and visibility maps. New modules go
/// to `target_exam` when given, otherwise to the first exam. Fails only
/// before touching anything.
pub fn reconcile(
    exams: &mut Vec<Exam>,
    bank: &mut QuestionBank,
    visibility: &mut VisibilityMaps,
    doc: ImportDocument,
    target_exam: Option<i64>,
) -> Result<ImportSummary, EngineError> {
    let target_pos = match target_exam {
        Some(id) => Some(
            exams
                .iter()
                .position(|e| e.id == id)
                .ok_or(EngineError::ExamNotFound(id))?,
        ),
        None => None,
    };

    let mut summary = ImportSummary::default();
    for (key, topics) in doc {
        let (ei, mi) = match resolve_module(exams, &key) {
            Some(pos) => pos,
            None => {
                if exams.is_empty() {
                    let exam_id = ids::next_exam_id(exams);
                    exams.push(Exam {
                        id: exam_id,
                        title: IMPORTED_EXAM_TITLE.to_string(),
                        description: String::new(),
                        modules: Vec::new(),
                    });
                    summary.exam_created = true;
                }
                let ei = target_pos.unwrap_or(0);
                let id = ids::next_module_id(exams);
                exams[ei].modules.push(Module::new(id, key.clone()));
                visibility.show_module(id);
                summary.modules_added += 1;
                info!("import created module {} '{}'", id, key);
                (ei, exams[ei].modules.len() - 1)
            }
        };

        let module = &mut exams[ei].modules[mi];
        let module_id = module.id;
        for raw in topics.keys() {
            let topic = TopicId::parse(raw);
            if module.sub_topic(&topic.sub_topic).is_none() {
                module.sub_topics.push(SubTopic::new(topic.sub_topic.clone()));
                visibility.show_sub_topic(module_id, &topic.sub_topic);
                summary.sub_topics_added += 1;
            }
            if let Some(point) = &topic.content_point {
                if let Some(sub) = module.sub_topic_mut(&topic.sub_topic) {
                    if !sub.content.contains(point) {
                        sub.content.push(point.clone());
                        visibility.show_content_point(module_id, &topic.sub_topic, point);
                        summary.content_points_added += 1;
                    }
                }
            }
        }

        summary.topics_merged += topics.len();
        bank.entry(module_id).or_default().extend(topics);
    }

    info!(
        "import merged {} topics: {} modules, {} sub-topics, {} content points added",
        summary.topics_merged,
        summary.modules_added,
        summary.sub_topics_added,
        summary.content_points_added
    );
    Ok(summary)
}

/// Structure-complete export: every defined sub-topic and content point has
/// an entry, empty when it has no questions yet. Modules and topics follow
/// hierarchy order; bank topics with no matching node trail behind.
pub fn export_all(exams: &[Exam], bank: &QuestionBank) -> ImportDocument {
    let mut out = ImportDocument::new();
    for module in exams.iter().flat_map(|e| &e.modules) {
        let stored = bank.get(&module.id);
        let mut topics = ImportTopics::new();
        for topic in module.topic_ids() {
            let questions = stored.and_then(|t| t.get(&topic)).cloned().unwrap_or_default();
            topics.insert(topic, questions);
        }
        for (topic, questions) in stored.into_iter().flatten() {
            if !topics.contains_key(topic) {
                topics.insert(topic.clone(), questions.clone());
            }
        }
        let slot = out.entry(module.title.clone()).or_default();
        for (topic, questions) in topics {
            slot.entry(topic).or_insert(questions);
        }
    }
    out
}

pub fn export_topic(bank: &QuestionBank, module_id: i64, topic: &str) -> Result<Vec<Question>, EngineError> {
    match bank.get(&module_id).and_then(|t| t.get(topic)) {
        Some(questions) if !questions.is_empty() => Ok(questions.clone()),
        _ => Err(EngineError::NothingToExport),
    }
}

/// Accepts a bare question array. The first element is shape-checked before
/// the whole array is decoded and validated.
pub fn parse_topic_import(value: &Value) -> Result<Vec<Question>, EngineError> {
    let Value::Array(items) = value else {
        return Err(EngineError::MalformedDocument("expected an array of questions".into()));
    };
    if let Some(first) = items.first() {
        let shaped = first.get("id").is_some_and(Value::is_string)
            && first.get("question").is_some_and(Value::is_string)
            && first.get("options").is_some_and(Value::is_array)
            && first.get("correctAnswer").is_some_and(Value::is_string);
        if !shaped {
            return Err(EngineError::MalformedDocument(
                "questions need id, question, options and correctAnswer".into(),
            ));
        }
    }
    let questions: Vec<Question> = serde_json::from_value(value.clone())
        .map_err(|e| EngineError::MalformedDocument(e.to_string()))?;
    let issues: Vec<_> = questions
        .iter()
        .enumerate()
        .flat_map(|(i, q)| {
            validate_question(&format!("[{i}]."), &q.question, &q.options, &q.correct_answer)
        })
        .collect();
    if issues.is_empty() {
        Ok(questions)
    } else {
        Err(EngineError::Validation(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "Cryptography": {
                "Hashing": [{
                    "id": "q1",
                    "question": "...",
                    "options": ["a", "b", "c", "d"],
                    "correctAnswer": "a"
                }]
            }
        })
    }

    fn platform_with_one_exam() -> Vec<Exam> {
        vec![Exam {
            id: 1,
            title: "Security".into(),
            description: String::new(),
            modules: Vec::new(),
        }]
    }

    fn structure(exams: &[Exam]) -> Vec<(i64, String, Vec<String>)> {
        exams
            .iter()
            .flat_map(|e| &e.modules)
            .flat_map(|m| {
                m.sub_topics
                    .iter()
                    .map(move |s| (m.id, s.title.clone(), s.content.clone()))
            })
            .collect()
    }

    #[test]
    fn import_into_empty_platform_creates_module_and_sub_topic() {
        let mut exams = platform_with_one_exam();
        let mut bank = QuestionBank::new();
        let mut vis = VisibilityMaps::default();
        let doc = parse_document(&sample_doc()).unwrap();
        let summary = reconcile(&mut exams, &mut bank, &mut vis, doc, None).unwrap();

        assert_eq!(summary.modules_added, 1);
        assert_eq!(summary.sub_topics_added, 1);
        let module = &exams[0].modules[0];
        assert_eq!(module.title, "Cryptography");
        assert_eq!(module.sub_topics, vec![SubTopic::new("Hashing")]);
        assert_eq!(bank[&module.id]["Hashing"].len(), 1);
        assert_eq!(vis.modules.get(&module.id), Some(&true));
        assert_eq!(vis.sub_topics[&module.id].get("Hashing"), Some(&true));
    }

    #[test]
    fn import_without_exams_creates_holding_exam() {
        let mut exams = Vec::new();
        let mut bank = QuestionBank::new();
        let mut vis = VisibilityMaps::default();
        let doc = parse_document(&sample_doc()).unwrap();
        let summary = reconcile(&mut exams, &mut bank, &mut vis, doc, None).unwrap();
        assert!(summary.exam_created);
        assert_eq!(exams[0].title, IMPORTED_EXAM_TITLE);
        assert_eq!(exams[0].modules.len(), 1);
    }

    #[test]
    fn reimport_is_structurally_idempotent() {
        let mut exams = platform_with_one_exam();
        let mut bank = QuestionBank::new();
        let mut vis = VisibilityMaps::default();
        let raw = json!({
            "Cryptography": {
                "Hashing::Salting": [],
                "Ciphers": []
            }
        });
        let first = reconcile(&mut exams, &mut bank, &mut vis, parse_document(&raw).unwrap(), None).unwrap();
        assert_eq!(first.content_points_added, 1);
        let after_first = structure(&exams);

        let second = reconcile(&mut exams, &mut bank, &mut vis, parse_document(&raw).unwrap(), None).unwrap();
        assert_eq!(second.modules_added, 0);
        assert_eq!(second.sub_topics_added, 0);
        assert_eq!(second.content_points_added, 0);
        assert_eq!(structure(&exams), after_first);
    }

    #[test]
    fn import_keeps_existing_content_and_flags() {
        let mut exams = platform_with_one_exam();
        let mut module = Module::new(4, "Networks");
        module.sub_topics.push(SubTopic {
            title: "Firewalls".into(),
            content: vec!["Rules".into()],
        });
        exams[0].modules.push(module);
        let mut bank = QuestionBank::new();
        bank.entry(4).or_default().insert("Firewalls".into(), Vec::new());
        let mut vis = VisibilityMaps::default();
        vis.toggle_sub_topic(4, "Firewalls");

        let raw = json!({ "ID:4": { "VPN": [] }, "4": { "Firewalls::Zones": [] } });
        let summary = reconcile(&mut exams, &mut bank, &mut vis, parse_document(&raw).unwrap(), None).unwrap();
        assert_eq!(summary.modules_added, 0);

        let module = &exams[0].modules[0];
        assert_eq!(module.sub_topics.len(), 2);
        assert_eq!(module.sub_topics[0].content, vec!["Rules", "Zones"]);
        assert!(bank[&4].contains_key("Firewalls"));
        assert!(bank[&4].contains_key("VPN"));
        assert!(!vis.is_sub_topic_visible(4, "Firewalls"));
    }

    #[test]
    fn malformed_documents_are_rejected_up_front() {
        for raw in [json!(null), json!([1, 2]), json!("text"), json!({"M": [1]})] {
            assert!(matches!(parse_document(&raw), Err(EngineError::MalformedDocument(_))));
        }
        let bad_answer = json!({
            "M": { "T": [{"id": "q", "question": "x", "options": ["a","b","c","d"], "correctAnswer": "z"}] }
        });
        assert!(matches!(parse_document(&bad_answer), Err(EngineError::Validation(_))));
    }

    #[test]
    fn unknown_target_exam_fails_before_mutation() {
        let mut exams = platform_with_one_exam();
        let mut bank = QuestionBank::new();
        let mut vis = VisibilityMaps::default();
        let doc = parse_document(&sample_doc()).unwrap();
        let err = reconcile(&mut exams, &mut bank, &mut vis, doc, Some(99)).unwrap_err();
        assert!(matches!(err, EngineError::ExamNotFound(99)));
        assert!(exams[0].modules.is_empty());
        assert!(bank.is_empty());
    }

    #[test]
    fn export_lists_every_defined_topic() {
        let mut exams = platform_with_one_exam();
        let mut module = Module::new(2, "Web");
        module.sub_topics.push(SubTopic {
            title: "XSS".into(),
            content: vec!["Stored".into()],
        });
        exams[0].modules.push(module);
        let out = export_all(&exams, &QuestionBank::new());
        let topics = &out["Web"];
        assert_eq!(topics.keys().cloned().collect::<Vec<_>>(), vec!["XSS", "XSS::Stored"]);
        assert!(topics.values().all(Vec::is_empty));
    }

    #[test]
    fn topic_import_checks_shape() {
        assert!(parse_topic_import(&json!([])).unwrap().is_empty());
        assert!(matches!(
            parse_topic_import(&json!([{"id": "q"}])),
            Err(EngineError::MalformedDocument(_))
        ));
        assert!(matches!(
            parse_topic_import(&json!({"id": "q"})),
            Err(EngineError::MalformedDocument(_))
        ));
        let ok = parse_topic_import(&json!([
            {"id": "q", "question": "x", "options": ["a","b","c","d"], "correctAnswer": "b"}
        ]))
        .unwrap();
        assert_eq!(ok[0].correct_answer, "b");
    }

    #[test]
    fn topic_export_refuses_empty() {
        assert!(matches!(
            export_topic(&QuestionBank::new(), 1, "XSS"),
            Err(EngineError::NothingToExport)
        ));
    }

    fn titles(exams: &[Exam]) -> Vec<(String, Vec<String>)> {
        exams
            .iter()
            .flat_map(|e| &e.modules)
            .map(|m| (m.title.clone(), m.sub_topics.iter().map(|s| s.title.clone()).collect()))
            .collect()
    }

    #[test]
    fn import_follows_document_order() {
        let mut exams = platform_with_one_exam();
        let mut bank = QuestionBank::new();
        let mut vis = VisibilityMaps::default();
        let raw: Value = serde_json::from_str(
            r#"{"Zeta Module": {"Intro": [], "Advanced": []}, "Alpha Module": {"Basics": []}}"#,
        )
        .unwrap();
        reconcile(&mut exams, &mut bank, &mut vis, parse_document(&raw).unwrap(), None).unwrap();
        assert_eq!(
            titles(&exams),
            vec![
                ("Zeta Module".to_string(), vec!["Intro".to_string(), "Advanced".to_string()]),
                ("Alpha Module".to_string(), vec!["Basics".to_string()]),
            ]
        );
    }

    #[test]
    fn topic_keys_are_canonicalised() {
        let raw = json!({
            "M": {
                "Intro::": [{"id": "a", "question": "x", "options": ["a","b","c","d"], "correctAnswer": "a"}],
                "Intro": [{"id": "b", "question": "y", "options": ["a","b","c","d"], "correctAnswer": "a"}]
            }
        });
        let doc = parse_document(&raw).unwrap();
        let topics = &doc["M"];
        assert_eq!(topics.keys().cloned().collect::<Vec<_>>(), vec!["Intro"]);
        assert_eq!(topics["Intro"].len(), 2);

        let nested = json!({"M": {"A::B::C": []}});
        assert!(matches!(parse_document(&nested), Err(EngineError::Validation(_))));
    }

    #[test]
    fn export_then_import_rebuilds_same_tree() {
        let mut exams = platform_with_one_exam();
        let mut module = Module::new(7, "Web");
        module.sub_topics = vec![
            SubTopic {
                title: "XSS".into(),
                content: vec!["Stored".into(), "Reflected".into()],
            },
            SubTopic::new("CSRF"),
            SubTopic::new("Auth"),
        ];
        exams[0].modules.push(module);
        exams[0].modules.push(Module::new(8, "Apis"));
        let mut bank = QuestionBank::new();
        bank.entry(7).or_default().insert(
            "CSRF".into(),
            parse_topic_import(&json!([
                {"id": "q", "question": "x", "options": ["a","b","c","d"], "correctAnswer": "a"}
            ]))
            .unwrap(),
        );

        let exported = export_all(&exams, &bank);
        assert_eq!(
            exported["Web"].keys().cloned().collect::<Vec<_>>(),
            vec!["XSS", "XSS::Stored", "XSS::Reflected", "CSRF", "Auth"]
        );

        let wire = serde_json::to_string(&exported).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        let mut fresh = platform_with_one_exam();
        let mut fresh_bank = QuestionBank::new();
        let mut fresh_vis = VisibilityMaps::default();
        reconcile(&mut fresh, &mut fresh_bank, &mut fresh_vis, parse_document(&value).unwrap(), None).unwrap();

        assert_eq!(titles(&fresh), titles(&exams));
        assert_eq!(fresh[0].modules[0].sub_topics[0].content, vec!["Stored", "Reflected"]);
        assert_eq!(export_all(&fresh, &fresh_bank), exported);
    }

    #[test]
    fn hidden_flags_and_nodes_survive_overlapping_imports() {
        let mut exams = platform_with_one_exam();
        let mut module = Module::new(4, "Networks");
        module.sub_topics = vec![
            SubTopic {
                title: "Firewalls".into(),
                content: vec!["Rules".into()],
            },
            SubTopic::new("VPN"),
        ];
        exams[0].modules.push(module);
        let mut bank = QuestionBank::new();
        let mut vis = VisibilityMaps::default();
        vis.seed(&exams);
        vis.toggle_module(4);
        vis.toggle_sub_topic(4, "VPN");
        vis.toggle_content_point(4, "Firewalls", "Rules");
        let before = structure(&exams);

        let docs = [
            json!({"Networks": {"Firewalls::Rules": [], "VPN": [], "Firewalls::Zones": []}}),
            json!({"4": {"Firewalls": [], "VPN::IPsec": []}, "Other": {"VPN": []}}),
            json!({"ID:4": {}}),
        ];
        for raw in docs {
            reconcile(&mut exams, &mut bank, &mut vis, parse_document(&raw).unwrap(), None).unwrap();
        }

        assert!(!vis.is_module_visible(4));
        assert!(!vis.is_sub_topic_visible(4, "VPN"));
        assert!(!vis.is_content_point_visible(4, "Firewalls", "Rules"));
        assert!(vis.is_sub_topic_visible(4, "Firewalls"));
        let after = structure(&exams);
        for node in &before {
            let (id, title, content) = node;
            let kept = after
                .iter()
                .find(|(a_id, a_title, _)| a_id == id && a_title == title)
                .expect("sub-topic kept");
            assert!(content.iter().all(|c| kept.2.contains(c)));
        }
    }
}
