use anyhow::Context;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const EXAMS_KEY: &str = "exams";
pub const QUESTION_BANK_KEY: &str = "question_bank";
pub const MODULE_VISIBILITY_KEY: &str = "module_visibility";
pub const SUB_TOPIC_VISIBILITY_KEY: &str = "sub_topic_visibility";
pub const CONTENT_POINT_VISIBILITY_KEY: &str = "content_point_visibility";
pub const UNLOCKED_MODULES_KEY: &str = "unlocked_modules";
pub const UNLOCKED_SUB_TOPICS_KEY: &str = "unlocked_sub_topics";
pub const QUIZ_ATTEMPTS_KEY: &str = "quiz_attempts";
pub const STUDY_RESOURCES_KEY: &str = "study_resources";

/// String-keyed document store. Every `set` replaces the whole document.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryBlobStore {
    docs: DashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.docs.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.docs.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per document inside `dir`.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&tmp, value).with_context(|| format!("cannot write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("cannot replace {}", path.display()))?;
        Ok(())
    }
}

/// Reads and decodes `key`, substituting `fallback()` when the document is
/// missing, unreadable or does not parse.
pub fn load_or_default<T, F>(store: &dyn BlobStore, key: &str, fallback: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return fallback(),
        Err(err) => {
            warn!("failed to read persisted '{}': {:#}", key, err);
            return fallback();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!("persisted '{}' is corrupt, using default: {}", key, err);
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falls_back_on_missing_and_corrupt() {
        let store = MemoryBlobStore::new();
        let missing: Vec<i64> = load_or_default(&store, "nums", || vec![1]);
        assert_eq!(missing, vec![1]);

        store.set("nums", "{not json").unwrap();
        let corrupt: Vec<i64> = load_or_default(&store, "nums", || vec![2]);
        assert_eq!(corrupt, vec![2]);

        store.set("nums", "[3,4]").unwrap();
        let ok: Vec<i64> = load_or_default(&store, "nums", Vec::new);
        assert_eq!(ok, vec![3, 4]);
    }

    #[test]
    fn file_store_overwrites_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("data")).unwrap();
        assert!(store.get(EXAMS_KEY).unwrap().is_none());
        store.set(EXAMS_KEY, "[1,2,3]").unwrap();
        store.set(EXAMS_KEY, "[]").unwrap();
        assert_eq!(store.get(EXAMS_KEY).unwrap().as_deref(), Some("[]"));
        assert!(!dir.path().join("data/exams.json.tmp").exists());
    }
}
