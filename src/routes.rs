use crate::handlers;
use crate::state::AppState;
use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-admin-secret"),
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderName::from_static("x-forwarded-for"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/catalog", get(handlers::catalog))
        .route("/api/v1/exams", post(handlers::create_exam))
        .route(
            "/api/v1/exams/:id",
            put(handlers::update_exam).delete(handlers::delete_exam),
        )
        .route("/api/v1/exams/:id/modules", post(handlers::create_module))
        .route(
            "/api/v1/modules/:id",
            put(handlers::update_module).delete(handlers::delete_module),
        )
        .route("/api/v1/modules/:id/topics", post(handlers::add_sub_topic))
        .route("/api/v1/modules/:id/topics/rename", post(handlers::rename_sub_topic))
        .route("/api/v1/modules/:id/topics/delete", post(handlers::delete_sub_topic))
        .route(
            "/api/v1/modules/:id/questions",
            get(handlers::list_questions).post(handlers::create_question),
        )
        .route(
            "/api/v1/modules/:id/questions/:question_id",
            put(handlers::update_question).delete(handlers::delete_question),
        )
        .route(
            "/api/v1/modules/:id/topic-export",
            get(handlers::export_topic),
        )
        .route("/api/v1/modules/:id/topic-import", post(handlers::import_topic))
        .route(
            "/api/v1/modules/:id/resources",
            get(handlers::list_resources).post(handlers::create_resource),
        )
        .route("/api/v1/resources/:id", axum::routing::delete(handlers::delete_resource))
        .route("/api/v1/visibility/toggle", post(handlers::toggle_visibility))
        .route("/api/v1/import", post(handlers::import_document))
        .route("/api/v1/export", get(handlers::export_all))
        .route("/api/v1/quiz/start", post(handlers::start_quiz))
        .route("/api/v1/quiz/complete", post(handlers::complete_quiz))
        .route("/api/v1/progress", get(handlers::progress))
        .route("/api/v1/progress/unlock", post(handlers::unlock))
        .route("/api/v1/attempts", get(handlers::attempts))
        .route("/api/v1/sync", get(handlers::sync_status).post(handlers::trigger_sync))
        .route("/api/v1/ai/generate", post(handlers::generate_topic))
        .route("/api/v1/ai/generate-module", post(handlers::generate_module))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
