pub mod catalog;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod models;
pub mod progression;
pub mod reconcile;
pub mod routes;
pub mod selector;
pub mod state;
pub mod store;
pub mod sync;
pub mod visibility;

use std::sync::Arc;

pub fn build_state(config: config::Config) -> anyhow::Result<state::AppState> {
    let schema_raw = include_str!("../contracts/generated_questions.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_raw)?;

    let store: Arc<dyn store::BlobStore> = match &config.data_dir {
        Some(dir) => Arc::new(store::FileBlobStore::new(dir.clone())?),
        None => Arc::new(store::MemoryBlobStore::new()),
    };
    let ai_client: Arc<dyn state::AiQuestionClient> = match &config.ai {
        Some(settings) => Arc::new(state::HttpAiClient::new(settings.clone())?),
        None => Arc::new(state::MockAiClient),
    };
    let remote = config
        .sync_url
        .as_ref()
        .map(|url| Arc::new(state::HttpRemoteSource::new(url.clone())) as Arc<dyn state::RemoteSource>);

    Ok(state::AppState::new(config, store, ai_client, remote, schema))
}
