use crate::config::{AiSettings, Config};
use crate::engine::Engine;
use crate::error::{EngineError, ErrorDetail};
use crate::models::{find_module, Difficulty, QuestionDraft, TopicId};
use crate::store::BlobStore;
use crate::sync::SyncStatus;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Topic parameters handed to the question generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub exam_title: String,
    pub module_title: String,
    pub sub_topic: String,
    pub content_point: Option<String>,
    pub count: usize,
    pub difficulty: Option<Difficulty>,
}

pub trait AiQuestionClient: Send + Sync {
    /// Returns the raw JSON text produced by the generator.
    fn generate_questions_json(&self, request: &GenerationRequest) -> BoxFuture<'static, anyhow::Result<String>>;
}

#[derive(Clone)]
pub struct MockAiClient;

impl AiQuestionClient for MockAiClient {
    fn generate_questions_json(&self, request: &GenerationRequest) -> BoxFuture<'static, anyhow::Result<String>> {
        let topic = match &request.content_point {
            Some(point) => format!("{} / {}", request.sub_topic, point),
            None => request.sub_topic.clone(),
        };
        let count = request.count.max(1);
        let difficulty = request.difficulty;
        Box::pin(async move {
            let questions: Vec<_> = (0..count)
                .map(|idx| {
                    json!({
                        "question": format!("{}: question {}", topic, idx + 1),
                        "options": ["Correct", "Distractor A", "Distractor B", "Distractor C"],
                        "correctAnswer": "Correct",
                        "explanation": "Generated offline",
                        "difficulty": difficulty.unwrap_or(Difficulty::Medium),
                    })
                })
                .collect();
            Ok(serde_json::Value::Array(questions).to_string())
        })
    }
}

const SYSTEM_PROMPT: &str = "You write multiple-choice training questions. Reply with a JSON array only. \
Each element has: question (string), options (exactly 4 strings), correctAnswer (one of the options), \
explanation (string), difficulty (Low, Medium or Advanced).";

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct HttpAiClient {
    client: reqwest::Client,
    settings: AiSettings,
}

impl HttpAiClient {
    pub fn new(settings: AiSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

impl AiQuestionClient for HttpAiClient {
    fn generate_questions_json(&self, request: &GenerationRequest) -> BoxFuture<'static, anyhow::Result<String>> {
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let api_key = self.settings.api_key.clone();
        let mut prompt = format!(
            "Write {} questions for the exam \"{}\", module \"{}\", sub-topic \"{}\"",
            request.count.max(1),
            request.exam_title,
            request.module_title,
            request.sub_topic
        );
        if let Some(point) = &request.content_point {
            prompt.push_str(&format!(", focusing on \"{point}\""));
        }
        if let Some(difficulty) = request.difficulty {
            prompt.push_str(&format!(". Difficulty: {difficulty:?}"));
        }
        let body = json!({
            "model": self.settings.model,
            "temperature": 0.7,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ]
        });

        Box::pin(async move {
            let resp = client.post(&url).bearer_auth(api_key).json(&body).send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                anyhow::bail!("ai service returned {}: {}", status, text.trim());
            }
            let payload: serde_json::Value = resp.json().await?;
            let content = payload["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default();
            let cleaned = strip_code_fence(content);
            if cleaned.is_empty() {
                anyhow::bail!("ai service returned empty content");
            }
            Ok(cleaned)
        })
    }
}

/// Source of the remote content snapshot. `Ok(None)` means there is no
/// snapshot published.
pub trait RemoteSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'static, anyhow::Result<Option<String>>>;
}

pub struct HttpRemoteSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRemoteSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl RemoteSource for HttpRemoteSource {
    fn fetch(&self) -> BoxFuture<'static, anyhow::Result<Option<String>>> {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let resp = client.get(&url).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                anyhow::bail!("sync source returned {}", resp.status());
            }
            Ok(Some(resp.text().await?))
        })
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("question generator failed: {0}")]
    Upstream(anyhow::Error),

    #[error("{message}")]
    InvalidOutput {
        message: String,
        details: Vec<ErrorDetail>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicFailure {
    pub topic: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkGenerationReport {
    pub generated: Vec<(String, usize)>,
    pub failed: Vec<TopicFailure>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<Engine>>,
    pub ai_client: Arc<dyn AiQuestionClient>,
    pub remote: Option<Arc<dyn RemoteSource>>,
    pub sync_status: Arc<RwLock<SyncStatus>>,
    pub sync_gate: Arc<Mutex<()>>,
    pub question_schema: Arc<serde_json::Value>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn BlobStore>,
        ai_client: Arc<dyn AiQuestionClient>,
        remote: Option<Arc<dyn RemoteSource>>,
        question_schema: serde_json::Value,
    ) -> Self {
        let engine = Engine::load(store, config.unlock_codes());
        Self {
            engine: Arc::new(RwLock::new(engine)),
            ai_client,
            remote,
            sync_status: Arc::new(RwLock::new(SyncStatus::Idle)),
            sync_gate: Arc::new(Mutex::new(())),
            question_schema: Arc::new(question_schema),
            config: Arc::new(config),
        }
    }

    /// Decodes generator output and checks it against the question schema.
    pub fn parse_generated(&self, raw: &str) -> Result<Vec<QuestionDraft>, GenerationError> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| GenerationError::InvalidOutput {
            message: format!("generator output is not valid json: {e}"),
            details: Vec::new(),
        })?;
        let validator = jsonschema::draft202012::new(&self.question_schema).map_err(|e| {
            GenerationError::InvalidOutput {
                message: format!("question schema is invalid: {e}"),
                details: Vec::new(),
            }
        })?;
        if validator.validate(&value).is_err() {
            let details = validator
                .iter_errors(&value)
                .map(|e| ErrorDetail {
                    field: e.instance_path.to_string(),
                    issue: e.to_string(),
                })
                .collect();
            return Err(GenerationError::InvalidOutput {
                message: "generator output does not match schema".into(),
                details,
            });
        }
        serde_json::from_value(value).map_err(|e| GenerationError::InvalidOutput {
            message: format!("cannot decode generated questions: {e}"),
            details: Vec::new(),
        })
    }

    async fn generation_request(
        &self,
        module_id: i64,
        topic: &str,
        count: usize,
        difficulty: Option<Difficulty>,
    ) -> Result<GenerationRequest, EngineError> {
        let engine = self.engine.read().await;
        let exam = engine
            .exams()
            .iter()
            .find(|e| e.modules.iter().any(|m| m.id == module_id))
            .ok_or(EngineError::ModuleNotFound(module_id))?;
        let module = find_module(engine.exams(), module_id).ok_or(EngineError::ModuleNotFound(module_id))?;
        let id = TopicId::parse(topic);
        if module.sub_topic(&id.sub_topic).is_none() {
            return Err(EngineError::SubTopicNotFound(id.sub_topic));
        }
        Ok(GenerationRequest {
            exam_title: exam.title.clone(),
            module_title: module.title.clone(),
            sub_topic: id.sub_topic,
            content_point: id.content_point,
            count,
            difficulty,
        })
    }

    /// Generates questions for one topic and appends them. The engine lock is
    /// not held while the generator runs.
    pub async fn generate_for_topic(
        &self,
        module_id: i64,
        topic: &str,
        count: usize,
        difficulty: Option<Difficulty>,
    ) -> Result<usize, GenerationError> {
        let request = self.generation_request(module_id, topic, count, difficulty).await?;
        let raw = self
            .ai_client
            .generate_questions_json(&request)
            .await
            .map_err(GenerationError::Upstream)?;
        let drafts = self.parse_generated(&raw)?;
        let added = self.engine.write().await.append_questions(module_id, topic, drafts)?;
        info!("generated {} questions for {}/{}", added, module_id, topic);
        Ok(added)
    }

    /// Runs generation for every topic of a module, continuing past
    /// per-topic failures.
    pub async fn generate_for_module(
        &self,
        module_id: i64,
        count_per_topic: usize,
        difficulty: Option<Difficulty>,
    ) -> Result<BulkGenerationReport, EngineError> {
        let topics = self.engine.read().await.module(module_id)?.topic_ids();
        let mut report = BulkGenerationReport::default();
        for topic in topics {
            match self.generate_for_topic(module_id, &topic, count_per_topic, difficulty).await {
                Ok(added) => report.generated.push((topic, added)),
                Err(err) => {
                    warn!("generation for {}/{} failed: {}", module_id, topic, err);
                    report.failed.push(TopicFailure {
                        topic,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    struct FailingClient;

    impl AiQuestionClient for FailingClient {
        fn generate_questions_json(&self, request: &GenerationRequest) -> BoxFuture<'static, anyhow::Result<String>> {
            let fail = request.content_point.is_some();
            Box::pin(async move {
                if fail {
                    anyhow::bail!("quota exceeded");
                }
                MockAiClient
                    .generate_questions_json(&GenerationRequest {
                        exam_title: String::new(),
                        module_title: String::new(),
                        sub_topic: "x".into(),
                        content_point: None,
                        count: 1,
                        difficulty: None,
                    })
                    .await
            })
        }
    }

    fn state_with(client: Arc<dyn AiQuestionClient>) -> AppState {
        let schema = serde_json::from_str(include_str!("../contracts/generated_questions.schema.json")).unwrap();
        AppState::new(Config::default(), Arc::new(MemoryBlobStore::new()), client, None, schema)
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence(" [2] "), "[2]");
    }

    #[tokio::test]
    async fn mock_generation_appends_to_topic() {
        let state = state_with(Arc::new(MockAiClient));
        let added = state
            .generate_for_topic(1, "VPNs", 3, Some(Difficulty::Advanced))
            .await
            .unwrap();
        assert_eq!(added, 3);
        let engine = state.engine.read().await;
        let questions = engine.topic_questions(1, "VPNs");
        assert_eq!(questions.len(), 3);
        assert!(questions.iter().all(|q| q.options.contains(&q.correct_answer)));
    }

    #[tokio::test]
    async fn schema_rejects_three_options() {
        let state = state_with(Arc::new(MockAiClient));
        let raw = r#"[{"question":"q","options":["a","b","c"],"correctAnswer":"a"}]"#;
        assert!(matches!(
            state.parse_generated(raw),
            Err(GenerationError::InvalidOutput { .. })
        ));
    }

    #[tokio::test]
    async fn bulk_generation_continues_after_failures() {
        let state = state_with(Arc::new(FailingClient));
        let report = state.generate_for_module(1, 2, None).await.unwrap();
        // module 1: Firewalls(+2 points), VPNs(+2 points)
        assert_eq!(report.generated.len(), 2);
        assert_eq!(report.failed.len(), 4);
        assert!(report.failed.iter().all(|f| f.error.contains("quota")));
    }
}
