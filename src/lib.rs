//! Loomchat backend: a single-user HTTP daemon serving chat streaming, the
//! model supplier registry, the RAG knowledge pipeline, and the local model
//! manager to the desktop shell.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod i18n;
pub mod manager;
pub mod models;
pub mod rag;
pub mod registry;
pub mod services;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use api::{create_router, AppState};
pub use config::Config;

use chat::{ChatEngine, ChatSettings, ChatStore};
use error::AppError;
use manager::runtime::{HostDialog, RuntimeProcess};
use manager::ModelManager;
use rag::{RagService, RagSettings};
use registry::SupplierRegistry;
use services::WebSearch;
use storage::ObjectStore;

/// Timeout for the registry's configuration probes; deliberately shorter
/// than the chat/embedding timeout so a dead endpoint reports quickly.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire every subsystem the way the daemon runs it. Returns the application
/// state plus the parse-worker handle.
pub async fn build_app(
    config: Config,
    search: Arc<dyn WebSearch>,
    dialog: Arc<dyn HostDialog>,
) -> Result<(AppState, JoinHandle<()>), AppError> {
    let store = Arc::new(ObjectStore::new(&config.data_root)?);

    // The active language survives restarts via settings.json.
    let settings = store.read("settings.json").await;
    let language = settings
        .get("language")
        .and_then(|v| v.as_str())
        .unwrap_or(&config.language)
        .to_string();
    i18n::set_language(&language);

    let registry = Arc::new(SupplierRegistry::new(store.clone(), PROBE_TIMEOUT));

    let (rag, worker_rx) = RagService::open(
        store.clone(),
        registry.clone(),
        RagSettings {
            chunk_chars: config.chunk_chars,
            top_k: config.rag_top_k,
            global_limit: config.rag_global_limit,
            embed_timeout: config.upstream_timeout(),
        },
    )
    .await?;
    let worker = rag::worker::spawn(rag.clone(), worker_rx);

    let chats = Arc::new(ChatStore::new(store.clone()));
    let engine = Arc::new(ChatEngine::new(
        chats.clone(),
        registry.clone(),
        rag.clone(),
        search,
        ChatSettings {
            context_length: config.context_length,
            upstream_timeout: config.upstream_timeout(),
        },
    ));

    let runtime = Arc::new(RuntimeProcess::new(
        store.root().join("runtime"),
        config.runtime_port,
    ));
    let model_manager = Arc::new(ModelManager::new(
        store.clone(),
        registry.clone(),
        runtime,
        dialog,
        config.upstream_timeout(),
    ));

    let state = AppState {
        config: Arc::new(config),
        store,
        chats,
        engine,
        registry,
        rag,
        manager: model_manager,
    };
    Ok((state, worker))
}
