//! CLI subcommand implementations.

pub mod chat;
pub mod history;
pub mod onboard;
pub mod review;

use std::sync::Arc;

use crabdesk_config::AppConfig;
use crabdesk_core::event::EventBus;
use crabdesk_core::store::{LongTermStore, SessionStore};
use crabdesk_pipeline::SupportPipeline;
use crabdesk_providers::{PlaybookGenerator, RuleClassifier};
use crabdesk_store::{FileStore, InMemoryStore};

/// Wire the pipeline up from config: store backend, bundled capabilities,
/// and any suspended sessions revived from disk.
pub async fn build_pipeline(
    config: &AppConfig,
) -> Result<SupportPipeline, Box<dyn std::error::Error>> {
    let (store, sessions): (Arc<dyn LongTermStore>, Arc<dyn SessionStore>) =
        match config.store.backend.as_str() {
            "memory" => {
                let backend = Arc::new(InMemoryStore::new());
                (backend.clone(), backend)
            }
            _ => {
                let backend = Arc::new(FileStore::new(config.store.storage_dir()));
                (backend.clone(), backend)
            }
        };

    let pipeline = SupportPipeline::new(
        store,
        sessions,
        Arc::new(RuleClassifier::new()),
        Arc::new(PlaybookGenerator::new()),
        config.pipeline.clone(),
        Arc::new(EventBus::default()),
    );
    pipeline.restore_suspended().await?;

    Ok(pipeline)
}
