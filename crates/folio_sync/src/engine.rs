//! Synchronization facade
//!
//! `SyncEngine` is the only entry point consumers use. It wires the channel
//! registry, the envelope codec, the import tracker, and the cache together;
//! it adds input validation and nothing else.

use crate::cache::PaperCache;
use crate::config::SyncConfig;
use crate::protocol::EnvelopePayload;
use crate::registry::{ChannelRegistry, ErrorHandler, Transport, WebSocketTransport};
use crate::remote::{HttpPaperApi, PaperApi};
use crate::state::{ImportState, ObserverId, SharedTracker, StateEvent, StateObserver};
use crate::store::{MemoryStore, PaperStore};
use crate::SyncError;
use folio_common::{DocumentKey, PaperDocument, PaperMetadata};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// One update delivered to an open channel's consumer
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub key: DocumentKey,

    /// Import state after this update was applied
    pub state: ImportState,

    /// Merged snapshot; populated once the document is ready
    pub document: Option<PaperDocument>,

    /// Local receipt time, unix millis
    pub received_at: i64,
}

impl DocumentUpdate {
    fn now(key: &DocumentKey, state: ImportState, document: Option<PaperDocument>) -> Self {
        Self {
            key: key.clone(),
            state,
            document,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Callback receiving merged snapshots on an open channel
pub type UpdateHandler = Arc<dyn Fn(DocumentUpdate) + Send + Sync>;

/// Composition root for the document synchronization layer
pub struct SyncEngine {
    registry: ChannelRegistry,
    tracker: SharedTracker,
    cache: Arc<PaperCache>,
    api: Arc<dyn PaperApi>,
    store: Arc<dyn PaperStore>,

    /// Paper ids with an import request currently awaiting its receipt;
    /// closes the idempotence gap before the tracker learns the key
    pending_imports: Mutex<HashSet<String>>,
}

impl SyncEngine {
    /// Build an engine against the real backend described by `config`
    pub fn new(config: SyncConfig) -> crate::Result<Self> {
        config.validate()?;
        let api = Arc::new(HttpPaperApi::new(&config)?);
        let transport = Arc::new(WebSocketTransport::new(config.ws_base_url.clone()));
        let store = Arc::new(MemoryStore::new());
        Ok(Self::with_collaborators(config, transport, api, store))
    }

    /// Build an engine with explicit collaborators; used by embedders that
    /// bring their own persisted store, and by tests
    pub fn with_collaborators(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        api: Arc<dyn PaperApi>,
        store: Arc<dyn PaperStore>,
    ) -> Self {
        Self {
            registry: ChannelRegistry::new(transport, config.reconnect.clone()),
            tracker: SharedTracker::new(),
            cache: Arc::new(PaperCache::new(store.clone(), api.clone())),
            api,
            store,
            pending_imports: Mutex::new(HashSet::new()),
        }
    }

    /// Request a server-side import of a paper.
    ///
    /// Idempotent while an import for the paper is in flight: no duplicate
    /// backend call is made and the known metadata (if any) is returned.
    /// After `Ready`/`Failed`, a new call starts a fresh import.
    pub async fn request_import(&self, arxiv_id: &str) -> crate::Result<Option<PaperMetadata>> {
        validate_paper_id(arxiv_id)?;

        if let Some(active) = self.tracker.active_for(arxiv_id) {
            tracing::debug!("Import of {arxiv_id} already active as {active}, skipping");
            return Ok(self
                .store
                .paper_data(arxiv_id)?
                .map(|entry| entry.metadata));
        }
        if !lock(&self.pending_imports).insert(arxiv_id.to_string()) {
            tracing::debug!("Import request for {arxiv_id} already awaiting receipt");
            return Ok(None);
        }

        let result = self.api.request_import(arxiv_id).await;
        lock(&self.pending_imports).remove(arxiv_id);
        let receipt = result.map_err(SyncError::RemoteFetch)?;

        if let Some(metadata) = &receipt.metadata {
            let key = DocumentKey::new(metadata.paper_id.clone(), metadata.version.clone());
            self.tracker.apply(&key, &StateEvent::ImportRequested);
            self.cache.upsert_metadata(metadata.clone());
            if let Some(error) = &receipt.error {
                self.tracker.apply(
                    &key,
                    &StateEvent::Status {
                        status: None,
                        error: Some(error.clone()),
                    },
                );
            }
        } else if let Some(error) = &receipt.error {
            return Err(SyncError::RemoteFetch(crate::FetchError {
                status: None,
                detail: error.clone(),
            }));
        }

        Ok(receipt.metadata)
    }

    /// Open (or replace) the live channel for a key.
    ///
    /// `on_update` fires once per envelope that moves or refreshes the
    /// document, in frame-arrival order; `on_error` receives decode errors
    /// (channel stays open) and the single transport error that closes it.
    pub fn open_channel(
        &self,
        key: DocumentKey,
        on_update: UpdateHandler,
        on_error: ErrorHandler,
    ) -> crate::Result<()> {
        validate_key(&key)?;

        let tracker = self.tracker.clone();
        let cache = self.cache.clone();
        let frame_key = key.clone();
        let frame_update = on_update.clone();
        let on_frame = Arc::new(move |envelope: crate::Envelope| {
            let key = &frame_key;
            match envelope.payload {
                EnvelopePayload::Status(body) => {
                    if let Some(metadata) = body.metadata.clone() {
                        cache.upsert_metadata(metadata);
                    }
                    let event = StateEvent::Status {
                        status: body.loading_status,
                        error: body.loading_error.clone(),
                    };
                    if let Some(state) = tracker.apply(key, &event) {
                        let document = match state {
                            ImportState::Ready => cache.merged_document(key),
                            _ => None,
                        };
                        frame_update(DocumentUpdate::now(key, state, document));
                    }
                }
                EnvelopePayload::Data(document) => {
                    cache.record_remote(key, *document);
                    let state = tracker
                        .apply(key, &StateEvent::DataReceived)
                        .unwrap_or_else(|| tracker.state(key));
                    // A repeat data frame is a content refresh, not a state
                    // transition; still worth delivering
                    frame_update(DocumentUpdate::now(key, state, cache.merged_document(key)));
                }
                EnvelopePayload::Error { message } => {
                    let event = StateEvent::Status {
                        status: None,
                        error: Some(message),
                    };
                    if let Some(state) = tracker.apply(key, &event) {
                        frame_update(DocumentUpdate::now(key, state, None));
                    }
                }
            }
        });

        let tracker = self.tracker.clone();
        let error_key = key.clone();
        let wrapped_error: ErrorHandler = Arc::new(move |error: SyncError| {
            if let SyncError::Transport { detail } = &error {
                let event = StateEvent::TransportFailed {
                    detail: detail.clone(),
                };
                if let Some(state) = tracker.apply(&error_key, &event) {
                    on_update(DocumentUpdate::now(&error_key, state, None));
                }
            }
            on_error(error);
        });

        self.registry.open(key, on_frame, wrapped_error);
        Ok(())
    }

    /// Point read of the import state.
    ///
    /// Falls back to one remote status poll when this engine has never seen
    /// the key, folding the snapshot into the tracker; an unknown document on
    /// the server stays `Unknown` here.
    pub async fn status(&self, key: &DocumentKey) -> crate::Result<ImportState> {
        validate_key(key)?;

        let local = self.tracker.state(key);
        if local != ImportState::Unknown {
            return Ok(local);
        }

        match self.api.fetch_status(key).await {
            Ok(snapshot) => {
                self.tracker.apply(
                    key,
                    &StateEvent::Status {
                        status: snapshot.loading_status,
                        error: snapshot.loading_error,
                    },
                );
                Ok(self.tracker.state(key))
            }
            Err(e) if e.is_not_found() => Ok(ImportState::Unknown),
            Err(e) => Err(SyncError::RemoteFetch(e)),
        }
    }

    /// Metadata for a paper, through the read-through cache
    pub async fn metadata(&self, paper_id: &str) -> crate::Result<PaperMetadata> {
        validate_paper_id(paper_id)?;
        self.cache.metadata(paper_id).await
    }

    /// Full merged document for a key.
    ///
    /// When the live import is `Ready` the last received payload is merged
    /// with the local entry; otherwise the canonical document is fetched,
    /// recorded, and merged the same way.
    pub async fn document(&self, key: &DocumentKey) -> crate::Result<PaperDocument> {
        validate_key(key)?;

        if self.tracker.state(key) == ImportState::Ready {
            if let Some(document) = self.cache.merged_document(key) {
                return Ok(document);
            }
        }

        let remote = self
            .api
            .fetch_document(key)
            .await
            .map_err(SyncError::RemoteFetch)?;
        self.cache.record_remote(key, remote);
        self.cache
            .merged_document(key)
            .ok_or_else(|| SyncError::Transport {
                detail: format!("document for {key} vanished after fetch"),
            })
    }

    /// All locally known papers, for gallery display
    pub fn paper_history(&self) -> crate::Result<Vec<PaperMetadata>> {
        Ok(self.store.paper_history()?)
    }

    /// Register a passive observer of a key's import state
    pub fn observe(&self, key: &DocumentKey, observer: StateObserver) -> ObserverId {
        self.tracker.observe(key, observer)
    }

    pub fn unobserve(&self, key: &DocumentKey, id: ObserverId) {
        self.tracker.unobserve(key, id)
    }

    /// Close one channel; no-op when none is open for the key
    pub fn close_channel(&self, key: &DocumentKey) {
        self.registry.close(key);
    }

    /// Close every channel; idempotent
    pub fn close_all(&self) {
        self.registry.close_all();
    }

    /// Number of currently open channels
    pub fn open_channels(&self) -> usize {
        self.registry.len()
    }

    pub fn channel_is_open(&self, key: &DocumentKey) -> bool {
        self.registry.is_open(key)
    }
}

fn validate_key(key: &DocumentKey) -> crate::Result<()> {
    if key.paper_id.is_empty() || key.version.is_empty() {
        return Err(SyncError::InvalidInput(
            "paper_id and version must be non-empty".to_string(),
        ));
    }
    Ok(())
}

// The backend enforces the same bound on id length
const MAX_PAPER_ID_LEN: usize = 20;

fn validate_paper_id(paper_id: &str) -> crate::Result<()> {
    if paper_id.is_empty() {
        return Err(SyncError::InvalidInput("paper_id must be non-empty".to_string()));
    }
    if paper_id.len() > MAX_PAPER_ID_LEN {
        return Err(SyncError::InvalidInput(format!(
            "paper_id exceeds {MAX_PAPER_ID_LEN} characters"
        )));
    }
    Ok(())
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
