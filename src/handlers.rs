use crate::catalog::{build_catalog, ExamView};
use crate::engine::{CompletionOutcome, ModuleUpdate, QuizAttempt, ResourceKind, StudyResource};
use crate::error::{AppError, EngineError};
use crate::models::{Difficulty, ModuleIcon, Question, QuestionDraft};
use crate::progression::{ProgressionState, QuizCompletion, QuizMode, UnlockOutcome};
use crate::reconcile::{ImportDocument, ImportSummary};
use crate::selector::QuizConfig;
use crate::state::{AppState, BulkGenerationReport, GenerationError};
use crate::sync::SyncStatus;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::warn;

const ADMIN_HEADER: &str = "x-admin-secret";
const RATE_WINDOW: Duration = Duration::from_secs(60);
static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > RATE_WINDOW {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.retain(|_, (_, started)| now.duration_since(*started) <= RATE_WINDOW);
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn is_admin(headers: &HeaderMap, state: &AppState) -> bool {
    let Some(secret) = state.config.admin_secret.as_deref() else {
        return false;
    };
    headers
        .get(ADMIN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|v| v == secret)
        .unwrap_or(false)
}

/// Shared-secret gate for admin routes. Repeated failures from one address
/// are throttled.
fn ensure_admin(headers: &HeaderMap, state: &AppState) -> Result<String, AppError> {
    let req_id = request_id_from_headers(headers);
    if is_admin(headers, state) {
        return Ok(req_id);
    }
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local");
    if !check_rate_limit("admin_auth", ip, 20) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    warn!("rejected admin request from {}", ip);
    Err(AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "admin secret required", req_id))
}

fn engine_err(req_id: &str) -> impl Fn(EngineError) -> AppError + '_ {
    move |err| AppError::from_engine(err, req_id)
}

// ---- catalog ----

pub async fn catalog(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<ExamView>> {
    let include_hidden = is_admin(&headers, &state);
    let engine = state.engine.read().await;
    Json(build_catalog(
        engine.exams(),
        engine.bank(),
        engine.visibility(),
        engine.progression(),
        include_hidden,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExamPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdResponse {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}

pub async fn create_exam(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ExamPayload>,
) -> Result<(StatusCode, Json<IdResponse>), AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let id = state
        .engine
        .write()
        .await
        .add_exam(&payload.title, &payload.description)
        .map_err(engine_err(&req_id))?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

pub async fn update_exam(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<ExamPayload>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    state
        .engine
        .write()
        .await
        .update_exam(id, &payload.title, &payload.description)
        .map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_exam(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ConfirmQuery>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    state
        .engine
        .write()
        .await
        .delete_exam(id, query.confirm)
        .map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- modules ----

#[derive(Debug, Deserialize)]
pub struct CreateModulePayload {
    pub title: String,
    #[serde(default)]
    pub icon: ModuleIcon,
    #[serde(default)]
    pub color: String,
}

pub async fn create_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(exam_id): Path<i64>,
    Json(payload): Json<CreateModulePayload>,
) -> Result<(StatusCode, Json<IdResponse>), AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let id = state
        .engine
        .write()
        .await
        .add_module(exam_id, &payload.title, payload.icon, &payload.color)
        .map_err(engine_err(&req_id))?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

pub async fn update_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<ModuleUpdate>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    state
        .engine
        .write()
        .await
        .update_module(id, payload)
        .map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ConfirmQuery>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    state
        .engine
        .write()
        .await
        .delete_module(id, query.confirm)
        .map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- sub-topics and content points ----

/// Body shared by the structure-editing routes. Which fields are required
/// depends on the route.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructurePayload {
    #[serde(default)]
    pub sub_topic: String,
    #[serde(default)]
    pub content_point: Option<String>,
    #[serde(default)]
    pub new_title: Option<String>,
    #[serde(default)]
    pub confirm: bool,
}

pub async fn add_sub_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Json(payload): Json<StructurePayload>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let mut engine = state.engine.write().await;
    let result = match payload.content_point.as_deref() {
        Some(point) => engine.add_content_point(module_id, &payload.sub_topic, point),
        None => engine.add_sub_topic(module_id, &payload.sub_topic),
    };
    result.map_err(engine_err(&req_id))?;
    Ok(StatusCode::CREATED)
}

pub async fn rename_sub_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Json(payload): Json<StructurePayload>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let new_title = payload.new_title.as_deref().unwrap_or_default();
    let mut engine = state.engine.write().await;
    let result = match payload.content_point.as_deref() {
        Some(point) => engine.rename_content_point(module_id, &payload.sub_topic, point, new_title),
        None => engine.rename_sub_topic(module_id, &payload.sub_topic, new_title),
    };
    result.map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_sub_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Json(payload): Json<StructurePayload>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let mut engine = state.engine.write().await;
    let result = match payload.content_point.as_deref() {
        Some(point) => engine.delete_content_point(module_id, &payload.sub_topic, point, payload.confirm),
        None => engine.delete_sub_topic(module_id, &payload.sub_topic, payload.confirm),
    };
    result.map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- visibility ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglePayload {
    pub module_id: i64,
    pub sub_topic: Option<String>,
    pub content_point: Option<String>,
}

pub async fn toggle_visibility(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TogglePayload>,
) -> Result<Json<Value>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let mut engine = state.engine.write().await;
    let visible = match (payload.sub_topic.as_deref(), payload.content_point.as_deref()) {
        (None, _) => engine.toggle_module_visibility(payload.module_id),
        (Some(sub), None) => engine.toggle_sub_topic_visibility(payload.module_id, sub),
        (Some(sub), Some(point)) => engine.toggle_content_point_visibility(payload.module_id, sub, point),
    }
    .map_err(engine_err(&req_id))?;
    Ok(Json(json!({ "visible": visible })))
}

// ---- questions ----

#[derive(Debug, Deserialize)]
pub struct TopicQuery {
    pub topic: String,
}

pub async fn list_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Query(query): Query<TopicQuery>,
) -> Result<Json<Vec<Question>>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let engine = state.engine.read().await;
    engine.module(module_id).map_err(engine_err(&req_id))?;
    Ok(Json(engine.topic_questions(module_id, &query.topic)))
}

#[derive(Debug, Deserialize)]
pub struct QuestionPayload {
    pub topic: String,
    #[serde(flatten)]
    pub draft: QuestionDraft,
}

pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Json(payload): Json<QuestionPayload>,
) -> Result<(StatusCode, Json<Question>), AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let question = state
        .engine
        .write()
        .await
        .add_question(module_id, &payload.topic, payload.draft)
        .map_err(engine_err(&req_id))?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((module_id, question_id)): Path<(i64, String)>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<Question>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let question = state
        .engine
        .write()
        .await
        .update_question(module_id, &payload.topic, &question_id, payload.draft)
        .map_err(engine_err(&req_id))?;
    Ok(Json(question))
}

pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((module_id, question_id)): Path<(i64, String)>,
    Query(query): Query<TopicQuery>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    state
        .engine
        .write()
        .await
        .delete_question(module_id, &query.topic, &question_id)
        .map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- import / export ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    pub exam_id: Option<i64>,
}

pub async fn import_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ImportQuery>,
    Json(payload): Json<Value>,
) -> Result<Json<ImportSummary>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let summary = state
        .engine
        .write()
        .await
        .import_document(&payload, query.exam_id)
        .map_err(engine_err(&req_id))?;
    Ok(Json(summary))
}

pub async fn export_all(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<ImportDocument>, AppError> {
    ensure_admin(&headers, &state)?;
    Ok(Json(state.engine.read().await.export_all()))
}

pub async fn export_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Query(query): Query<TopicQuery>,
) -> Result<Json<Vec<Question>>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let questions = state
        .engine
        .read()
        .await
        .export_topic(module_id, &query.topic)
        .map_err(engine_err(&req_id))?;
    Ok(Json(questions))
}

pub async fn import_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Query(query): Query<TopicQuery>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let count = state
        .engine
        .write()
        .await
        .import_topic(module_id, &query.topic, &payload)
        .map_err(engine_err(&req_id))?;
    Ok(Json(json!({ "imported": count })))
}

// ---- quizzes and progression ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuizPayload {
    pub module_id: i64,
    pub topic: String,
    pub mode: QuizMode,
    #[serde(default)]
    pub count: Option<usize>,
    /// 1-based day for sequential selection.
    #[serde(default)]
    pub day: Option<usize>,
}

pub async fn start_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StartQuizPayload>,
) -> Result<Json<Vec<Question>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let config = match (payload.mode, payload.day) {
        (QuizMode::Exam, _) => QuizConfig::exam(),
        (QuizMode::Study, Some(day)) => QuizConfig::daily(day),
        (QuizMode::Study, None) => QuizConfig::study(payload.count.unwrap_or(10)),
    };
    let questions = state
        .engine
        .read()
        .await
        .start_quiz(payload.module_id, &payload.topic, &config)
        .map_err(engine_err(&req_id))?;
    Ok(Json(questions))
}

pub async fn complete_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QuizCompletion>,
) -> Result<Json<CompletionOutcome>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let outcome = state
        .engine
        .write()
        .await
        .complete_quiz(&payload)
        .map_err(engine_err(&req_id))?;
    Ok(Json(outcome))
}

pub async fn progress(State(state): State<AppState>) -> Json<ProgressionState> {
    Json(state.engine.read().await.progression().clone())
}

#[derive(Debug, Deserialize)]
pub struct UnlockPayload {
    pub code: String,
}

pub async fn unlock(State(state): State<AppState>, Json(payload): Json<UnlockPayload>) -> Json<UnlockOutcome> {
    Json(state.engine.write().await.apply_unlock_code(&payload.code))
}

pub async fn attempts(State(state): State<AppState>) -> Json<Vec<QuizAttempt>> {
    Json(state.engine.read().await.attempts().to_vec())
}

// ---- sync ----

pub async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.sync_status.read().await.clone())
}

pub async fn trigger_sync(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<SyncStatus>, AppError> {
    ensure_admin(&headers, &state)?;
    Ok(Json(state.run_sync().await))
}

// ---- AI generation ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayload {
    pub module_id: i64,
    pub topic: Option<String>,
    #[serde(default = "default_generate_count")]
    pub count: usize,
    pub difficulty: Option<Difficulty>,
}

fn default_generate_count() -> usize {
    5
}

fn generation_err(err: GenerationError, req_id: String) -> AppError {
    match err {
        GenerationError::Engine(err) => AppError::from_engine(err, req_id),
        GenerationError::Upstream(err) => AppError::new(
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_ERROR",
            format!("question generator failed: {err}"),
            req_id,
        ),
        GenerationError::InvalidOutput { message, details } => {
            AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message, req_id)
                .with_details(details)
        }
    }
}

pub async fn generate_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GeneratePayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let Some(topic) = payload.topic.as_deref() else {
        return Err(AppError::from_engine(EngineError::EmptyField("topic"), req_id));
    };
    let added = state
        .generate_for_topic(payload.module_id, topic, payload.count.max(1), payload.difficulty)
        .await
        .map_err(|e| generation_err(e, req_id.clone()))?;
    Ok((StatusCode::CREATED, Json(json!({ "added": added, "source": "ai" }))))
}

pub async fn generate_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GeneratePayload>,
) -> Result<Json<BulkGenerationReport>, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let report = state
        .generate_for_module(payload.module_id, payload.count.max(1), payload.difficulty)
        .await
        .map_err(engine_err(&req_id))?;
    Ok(Json(report))
}

// ---- study resources ----

#[derive(Debug, Deserialize)]
pub struct ResourcePayload {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub kind: ResourceKind,
}

pub async fn list_resources(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
) -> Result<Json<Vec<StudyResource>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let engine = state.engine.read().await;
    engine.module(module_id).map_err(engine_err(&req_id))?;
    Ok(Json(engine.resources_for(module_id)))
}

pub async fn create_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<i64>,
    Json(payload): Json<ResourcePayload>,
) -> Result<(StatusCode, Json<StudyResource>), AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    let resource = state
        .engine
        .write()
        .await
        .add_resource(module_id, &payload.title, &payload.url, payload.kind)
        .map_err(engine_err(&req_id))?;
    Ok((StatusCode::CREATED, Json(resource)))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let req_id = ensure_admin(&headers, &state)?;
    state
        .engine
        .write()
        .await
        .delete_resource(&id)
        .map_err(engine_err(&req_id))?;
    Ok(StatusCode::NO_CONTENT)
}
