use crate::models::Exam;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ModuleVisibility = BTreeMap<i64, bool>;
pub type SubTopicVisibility = BTreeMap<i64, BTreeMap<String, bool>>;
pub type ContentPointVisibility = BTreeMap<i64, BTreeMap<String, BTreeMap<String, bool>>>;

/// Learner-facing display flags layered over the hierarchy. Absent entries
/// read as visible.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityMaps {
    pub modules: ModuleVisibility,
    pub sub_topics: SubTopicVisibility,
    pub content_points: ContentPointVisibility,
}

/// Which of the three maps an operation touched, so only those documents get
/// rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Touched {
    pub modules: bool,
    pub sub_topics: bool,
    pub content_points: bool,
}

impl Touched {
    pub fn all() -> Self {
        Self {
            modules: true,
            sub_topics: true,
            content_points: true,
        }
    }

    pub fn any(&self) -> bool {
        self.modules || self.sub_topics || self.content_points
    }
}

impl VisibilityMaps {
    /// Fills in `true` for every node of the hierarchy that has no flag yet.
    pub fn seed(&mut self, exams: &[Exam]) {
        for module in exams.iter().flat_map(|e| &e.modules) {
            self.modules.entry(module.id).or_insert(true);
            for sub in &module.sub_topics {
                self.sub_topics
                    .entry(module.id)
                    .or_default()
                    .entry(sub.title.clone())
                    .or_insert(true);
                for point in &sub.content {
                    self.content_points
                        .entry(module.id)
                        .or_default()
                        .entry(sub.title.clone())
                        .or_default()
                        .entry(point.clone())
                        .or_insert(true);
                }
            }
        }
    }

    pub fn is_module_visible(&self, module_id: i64) -> bool {
        self.modules.get(&module_id).copied().unwrap_or(true)
    }

    pub fn is_sub_topic_visible(&self, module_id: i64, sub_topic: &str) -> bool {
        self.sub_topics
            .get(&module_id)
            .and_then(|m| m.get(sub_topic))
            .copied()
            .unwrap_or(true)
    }

    pub fn is_content_point_visible(&self, module_id: i64, sub_topic: &str, point: &str) -> bool {
        self.content_points
            .get(&module_id)
            .and_then(|m| m.get(sub_topic))
            .and_then(|s| s.get(point))
            .copied()
            .unwrap_or(true)
    }

    pub fn toggle_module(&mut self, module_id: i64) -> bool {
        let next = !self.is_module_visible(module_id);
        self.modules.insert(module_id, next);
        next
    }

    pub fn toggle_sub_topic(&mut self, module_id: i64, sub_topic: &str) -> bool {
        let next = !self.is_sub_topic_visible(module_id, sub_topic);
        self.sub_topics
            .entry(module_id)
            .or_default()
            .insert(sub_topic.to_string(), next);
        next
    }

    pub fn toggle_content_point(&mut self, module_id: i64, sub_topic: &str, point: &str) -> bool {
        let next = !self.is_content_point_visible(module_id, sub_topic, point);
        self.content_points
            .entry(module_id)
            .or_default()
            .entry(sub_topic.to_string())
            .or_default()
            .insert(point.to_string(), next);
        next
    }

    pub fn show_module(&mut self, module_id: i64) {
        self.modules.insert(module_id, true);
    }

    pub fn show_sub_topic(&mut self, module_id: i64, sub_topic: &str) {
        self.sub_topics
            .entry(module_id)
            .or_default()
            .insert(sub_topic.to_string(), true);
    }

    pub fn show_content_point(&mut self, module_id: i64, sub_topic: &str, point: &str) {
        self.content_points
            .entry(module_id)
            .or_default()
            .entry(sub_topic.to_string())
            .or_default()
            .insert(point.to_string(), true);
    }

    /// Moves the sub-topic flag and all of its content-point flags to `to`.
    pub fn rename_sub_topic(&mut self, module_id: i64, from: &str, to: &str) -> Touched {
        let mut touched = Touched::default();
        if let Some(subs) = self.sub_topics.get_mut(&module_id) {
            if let Some(flag) = subs.remove(from) {
                subs.insert(to.to_string(), flag);
                touched.sub_topics = true;
            }
        }
        if let Some(subs) = self.content_points.get_mut(&module_id) {
            if let Some(points) = subs.remove(from) {
                subs.insert(to.to_string(), points);
                touched.content_points = true;
            }
        }
        touched
    }

    pub fn rename_content_point(&mut self, module_id: i64, sub_topic: &str, from: &str, to: &str) -> bool {
        let Some(points) = self
            .content_points
            .get_mut(&module_id)
            .and_then(|m| m.get_mut(sub_topic))
        else {
            return false;
        };
        match points.remove(from) {
            Some(flag) => {
                points.insert(to.to_string(), flag);
                true
            }
            None => false,
        }
    }

    pub fn remove_module(&mut self, module_id: i64) -> Touched {
        Touched {
            modules: self.modules.remove(&module_id).is_some(),
            sub_topics: self.sub_topics.remove(&module_id).is_some(),
            content_points: self.content_points.remove(&module_id).is_some(),
        }
    }

    pub fn remove_sub_topic(&mut self, module_id: i64, sub_topic: &str) -> Touched {
        Touched {
            modules: false,
            sub_topics: self
                .sub_topics
                .get_mut(&module_id)
                .map(|m| m.remove(sub_topic).is_some())
                .unwrap_or(false),
            content_points: self
                .content_points
                .get_mut(&module_id)
                .map(|m| m.remove(sub_topic).is_some())
                .unwrap_or(false),
        }
    }

    pub fn remove_content_point(&mut self, module_id: i64, sub_topic: &str, point: &str) -> bool {
        self.content_points
            .get_mut(&module_id)
            .and_then(|m| m.get_mut(sub_topic))
            .map(|s| s.remove(point).is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_flags_read_visible() {
        let maps = VisibilityMaps::default();
        assert!(maps.is_module_visible(9));
        assert!(maps.is_sub_topic_visible(9, "Hashing"));
        assert!(maps.is_content_point_visible(9, "Hashing", "Salting"));
    }

    #[test]
    fn toggle_flips_each_level_independently() {
        let mut maps = VisibilityMaps::default();
        assert!(!maps.toggle_sub_topic(1, "Hashing"));
        assert!(maps.is_module_visible(1));
        assert!(!maps.is_sub_topic_visible(1, "Hashing"));
        assert!(maps.toggle_sub_topic(1, "Hashing"));
        assert!(!maps.toggle_content_point(1, "Hashing", "Salting"));
        assert!(!maps.toggle_module(1));
        assert!(maps.is_sub_topic_visible(1, "Hashing"));
    }

    #[test]
    fn rename_moves_flags_without_duplicating() {
        let mut maps = VisibilityMaps::default();
        maps.toggle_sub_topic(1, "Old");
        maps.toggle_content_point(1, "Old", "Point");
        let touched = maps.rename_sub_topic(1, "Old", "New");
        assert!(touched.sub_topics && touched.content_points);
        assert!(!maps.is_sub_topic_visible(1, "New"));
        assert!(!maps.is_content_point_visible(1, "New", "Point"));
        assert!(!maps.sub_topics[&1].contains_key("Old"));
        assert!(!maps.content_points[&1].contains_key("Old"));
    }

    #[test]
    fn remove_module_drops_every_level() {
        let mut maps = VisibilityMaps::default();
        maps.toggle_module(2);
        maps.toggle_sub_topic(2, "A");
        maps.toggle_content_point(2, "A", "p");
        assert_eq!(maps.remove_module(2), Touched::all());
        assert!(maps.modules.is_empty());
        assert!(maps.sub_topics.is_empty());
        assert!(maps.content_points.is_empty());
    }
}
