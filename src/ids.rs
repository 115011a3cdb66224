use crate::models::Exam;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// `max(existing) + 1`, or 1 when nothing exists yet.
pub fn next_id<I: IntoIterator<Item = i64>>(existing: I) -> i64 {
    existing.into_iter().max().map(|m| m + 1).unwrap_or(1).max(1)
}

pub fn next_exam_id(exams: &[Exam]) -> i64 {
    next_id(exams.iter().map(|e| e.id))
}

/// Module ids are unique across every exam, not per exam.
pub fn next_module_id(exams: &[Exam]) -> i64 {
    next_id(exams.iter().flat_map(|e| e.modules.iter().map(|m| m.id)))
}

/// Time prefix plus random suffix. Collisions are not checked.
pub fn next_question_id() -> String {
    prefixed_id("q")
}

pub fn next_resource_id() -> String {
    prefixed_id("res")
}

fn prefixed_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Module;

    #[test]
    fn next_id_empty_starts_at_one() {
        assert_eq!(next_id(Vec::new()), 1);
    }

    #[test]
    fn module_ids_are_global_across_exams() {
        let exams = vec![
            Exam {
                id: 1,
                title: "A".into(),
                description: String::new(),
                modules: vec![Module::new(3, "x"), Module::new(7, "y")],
            },
            Exam {
                id: 4,
                title: "B".into(),
                description: String::new(),
                modules: vec![Module::new(5, "z")],
            },
        ];
        let next = next_module_id(&exams);
        assert_eq!(next, 8);
        assert!(exams.iter().flat_map(|e| &e.modules).all(|m| m.id < next));
        assert_eq!(next_exam_id(&exams), 5);
    }

    #[test]
    fn question_ids_differ() {
        let a = next_question_id();
        let b = next_question_id();
        assert!(a.starts_with("q-"));
        assert_ne!(a, b);
    }
}
