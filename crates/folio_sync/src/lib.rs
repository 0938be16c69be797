//! # Folio Sync Engine
//!
//! Client-side synchronization for long-running paper imports.
//!
//! ## Architecture
//!
//! - **Registry**: one live WebSocket channel per `(paper_id, version)`,
//!   last open wins
//! - **Protocol**: tagged envelope codec, one bad frame never kills a channel
//! - **State**: per-document import lifecycle with passive observers
//! - **Cache**: read-through metadata cache and cache-vs-remote document merge
//! - **Engine**: the facade consumers call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use folio_sync::{SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     folio_common::telemetry::init_tracing(false, false);
//!
//!     let config = SyncConfig {
//!         ws_base_url: "ws://localhost:8001/ws".to_string(),
//!         api_base_url: "http://localhost:8001/api".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let engine = SyncEngine::new(config)?;
//!     engine.request_import("2301.07041").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod state;
pub mod store;

pub use cache::{merge_document, PaperCache};
pub use config::{ReconnectPolicy, SyncConfig};
pub use engine::{DocumentUpdate, SyncEngine};
pub use protocol::{decode, DecodeError, Envelope, EnvelopePayload};
pub use registry::{ChannelRegistry, Transport, WebSocketTransport};
pub use remote::{FetchError, HttpPaperApi, ImportReceipt, PaperApi, StatusSnapshot};
pub use state::{ImportState, ImportTracker, SharedTracker, StateEvent, Transition};
pub use store::{MemoryStore, PaperStore};

/// Common result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Transport error: {detail}")]
    Transport { detail: String },

    #[error("WebSocket error: {0}")]
    WebSocketError(Box<tokio_tungstenite::tungstenite::Error>),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    RemoteFetch(#[from] FetchError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(#[from] folio_common::FolioError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocketError(Box::new(e))
    }
}
