//! Scripted transport and fake backend API
//!
//! `ScriptedTransport` answers each `connect` with the next script in its
//! queue, so a test can express "deliver these frames then drop" or "never
//! connect" per attempt. `CountingApi` returns configured responses and
//! counts calls, which is how duplicate-request tests assert zero extra
//! backend traffic.

use async_trait::async_trait;
use folio_common::{DocumentKey, PaperMetadata, RemoteDocument};
use folio_sync::registry::{FrameStream, Transport};
use folio_sync::remote::{FetchError, ImportReceipt, PaperApi, StatusSnapshot};
use folio_sync::SyncError;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What one `connect` call should yield
pub enum ConnectScript {
    /// Deliver these frames, then keep the stream open forever
    Frames(Vec<String>),

    /// Deliver these frames, then close cleanly (server-side close)
    FramesThenClose(Vec<String>),

    /// Deliver these frames, then fail the stream (mid-stream drop)
    FramesThenDrop(Vec<String>, String),

    /// Fail to establish the connection
    Fail(String),

    /// Frames pushed by hand through a [`FrameFeeder`]
    Manual(mpsc::UnboundedReceiver<Result<String, SyncError>>),

    /// Connect fine but never deliver anything
    Pending,
}

/// Transport whose connections follow a scripted queue
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<ConnectScript>>,
    connects: AtomicUsize,
}

pub fn scripted_transport() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport {
        scripts: Mutex::new(VecDeque::new()),
        connects: AtomicUsize::new(0),
    })
}

impl ScriptedTransport {
    pub fn push(&self, script: ConnectScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Queue a manually driven connection and return its feeder
    pub fn manual(&self) -> FrameFeeder {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(ConnectScript::Manual(rx));
        FrameFeeder { tx }
    }

    /// How many times `connect` was called
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _key: &DocumentKey) -> folio_sync::Result<FrameStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            None | Some(ConnectScript::Pending) => Ok(Box::pin(stream::pending())),
            Some(ConnectScript::Fail(detail)) => Err(SyncError::Transport { detail }),
            Some(ConnectScript::Frames(frames)) => Ok(Box::pin(
                stream::iter(frames.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Some(ConnectScript::FramesThenClose(frames)) => {
                Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
            }
            Some(ConnectScript::FramesThenDrop(frames, detail)) => {
                let mut items: Vec<folio_sync::Result<String>> =
                    frames.into_iter().map(Ok).collect();
                items.push(Err(SyncError::Transport { detail }));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(ConnectScript::Manual(rx)) => Ok(Box::pin(stream::unfold(
                rx,
                |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
            ))),
        }
    }
}

/// Hand-drives one manual connection. Dropping the feeder closes the stream
/// the way a server-side close would.
pub struct FrameFeeder {
    tx: mpsc::UnboundedSender<Result<String, SyncError>>,
}

impl FrameFeeder {
    pub fn frame(&self, raw: impl Into<String>) {
        let _ = self.tx.send(Ok(raw.into()));
    }

    pub fn transport_error(&self, detail: &str) {
        let _ = self.tx.send(Err(SyncError::Transport {
            detail: detail.to_string(),
        }));
    }
}

type Configured<T> = Mutex<Result<T, FetchError>>;

/// Fake backend API with per-endpoint call counters
pub struct CountingApi {
    import_calls: AtomicUsize,
    status_calls: AtomicUsize,
    document_calls: AtomicUsize,
    metadata_calls: AtomicUsize,

    import_receipt: Configured<ImportReceipt>,
    status_snapshot: Configured<StatusSnapshot>,
    document: Configured<RemoteDocument>,
    metadata: Configured<PaperMetadata>,

    /// Delay before answering metadata fetches, to let callers overlap
    metadata_delay: Mutex<Option<Duration>>,
}

fn not_found() -> FetchError {
    FetchError {
        status: Some(404),
        detail: "Document not found".to_string(),
    }
}

pub fn counting_api() -> Arc<CountingApi> {
    Arc::new(CountingApi {
        import_calls: AtomicUsize::new(0),
        status_calls: AtomicUsize::new(0),
        document_calls: AtomicUsize::new(0),
        metadata_calls: AtomicUsize::new(0),
        import_receipt: Mutex::new(Err(not_found())),
        status_snapshot: Mutex::new(Err(not_found())),
        document: Mutex::new(Err(not_found())),
        metadata: Mutex::new(Err(not_found())),
        metadata_delay: Mutex::new(None),
    })
}

impl CountingApi {
    pub fn set_import_receipt(&self, receipt: Result<ImportReceipt, FetchError>) {
        *self.import_receipt.lock().unwrap() = receipt;
    }

    pub fn set_status_snapshot(&self, snapshot: Result<StatusSnapshot, FetchError>) {
        *self.status_snapshot.lock().unwrap() = snapshot;
    }

    pub fn set_document(&self, document: Result<RemoteDocument, FetchError>) {
        *self.document.lock().unwrap() = document;
    }

    pub fn set_metadata(&self, metadata: Result<PaperMetadata, FetchError>) {
        *self.metadata.lock().unwrap() = metadata;
    }

    pub fn set_metadata_delay(&self, delay: Duration) {
        *self.metadata_delay.lock().unwrap() = Some(delay);
    }

    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaperApi for CountingApi {
    async fn request_import(&self, _arxiv_id: &str) -> Result<ImportReceipt, FetchError> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        self.import_receipt.lock().unwrap().clone()
    }

    async fn fetch_status(&self, _key: &DocumentKey) -> Result<StatusSnapshot, FetchError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_snapshot.lock().unwrap().clone()
    }

    async fn fetch_document(&self, _key: &DocumentKey) -> Result<RemoteDocument, FetchError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.document.lock().unwrap().clone()
    }

    async fn fetch_metadata(&self, _paper_id: &str) -> Result<PaperMetadata, FetchError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.metadata_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.metadata.lock().unwrap().clone()
    }
}
