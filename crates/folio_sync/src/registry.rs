//! Channel registry: one live update channel per document key
//!
//! The registry owns every channel. Opening a key that already has a channel
//! closes the old one first, silently; the replacement is the only channel
//! left for that key. Each channel runs as a task that connects through the
//! [`Transport`] seam, decodes frames, and routes them: good frames to
//! `on_frame`, decode errors to `on_error` without closing the channel,
//! transport errors through bounded reconnect and then a single `on_error`.

use crate::config::ReconnectPolicy;
use crate::protocol::{self, Envelope};
use crate::SyncError;
use async_trait::async_trait;
use folio_common::DocumentKey;
use futures_util::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Stream of raw text frames from one connection
pub type FrameStream = Pin<Box<dyn Stream<Item = crate::Result<String>> + Send>>;

/// Callback for each successfully decoded envelope
pub type FrameHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Callback for channel-scoped errors (decode failures, transport loss)
pub type ErrorHandler = Arc<dyn Fn(SyncError) + Send + Sync>;

/// Connection seam: how a channel reaches the backend
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, key: &DocumentKey) -> crate::Result<FrameStream>;
}

/// Production transport: one WebSocket per key at `{base}/{paper_id}/{version}`
pub struct WebSocketTransport {
    ws_base_url: String,
}

impl WebSocketTransport {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, key: &DocumentKey) -> crate::Result<FrameStream> {
        let url = format!(
            "{}/{}/{}",
            self.ws_base_url.trim_end_matches('/'),
            key.paper_id,
            key.version
        );
        tracing::info!("Connecting to {url}");

        let (ws_stream, _) = connect_async(&url).await?;

        // Read side only; binary and control frames are not part of the
        // protocol and are skipped.
        let frames = ws_stream.filter_map(|item| async move {
            match item {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::from(e))),
            }
        });

        Ok(Box::pin(frames))
    }
}

struct ChannelEntry {
    generation: u64,
    live: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl ChannelEntry {
    fn shutdown(&self) {
        // Flip the flag first so a frame mid-delivery is dropped rather than
        // delivered after close
        self.live.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

type ChannelMap = Arc<Mutex<HashMap<DocumentKey, ChannelEntry>>>;

/// Owner of all live channels
pub struct ChannelRegistry {
    transport: Arc<dyn Transport>,
    reconnect: ReconnectPolicy,
    channels: ChannelMap,
    generations: AtomicU64,
}

impl ChannelRegistry {
    pub fn new(transport: Arc<dyn Transport>, reconnect: ReconnectPolicy) -> Self {
        Self {
            transport,
            reconnect,
            channels: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Open a channel for the key, replacing any existing one.
    ///
    /// Returns immediately; connection establishment happens on the channel
    /// task. The replaced channel is closed without surfacing an error to
    /// anyone. Establishment failure reaches `on_error` exactly once and is
    /// not retried; re-opening is the consumer's call.
    pub fn open(&self, key: DocumentKey, on_frame: FrameHandler, on_error: ErrorHandler) {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let live = Arc::new(AtomicBool::new(true));

        // Hold the lock across the spawn so the new task cannot observe the
        // registry before its own entry is in place
        let mut channels = lock(&self.channels);
        if let Some(previous) = channels.remove(&key) {
            tracing::debug!("Replacing existing channel for {key}");
            previous.shutdown();
        }

        let task = tokio::spawn(run_channel(ChannelTask {
            transport: self.transport.clone(),
            key: key.clone(),
            reconnect: self.reconnect.clone(),
            live: live.clone(),
            channels: self.channels.clone(),
            generation,
            on_frame,
            on_error,
        }));

        channels.insert(
            key,
            ChannelEntry {
                generation,
                live,
                task,
            },
        );
    }

    /// Close and deregister one channel; no-op when absent
    pub fn close(&self, key: &DocumentKey) {
        if let Some(entry) = lock(&self.channels).remove(key) {
            tracing::info!("Closing channel for {key}");
            entry.shutdown();
        }
    }

    /// Close every channel and clear the registry; idempotent
    pub fn close_all(&self) {
        let mut channels = lock(&self.channels);
        if channels.is_empty() {
            return;
        }
        tracing::info!("Closing all {} channel(s)", channels.len());
        for (_, entry) in channels.drain() {
            entry.shutdown();
        }
    }

    pub fn is_open(&self, key: &DocumentKey) -> bool {
        lock(&self.channels).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

struct ChannelTask {
    transport: Arc<dyn Transport>,
    key: DocumentKey,
    reconnect: ReconnectPolicy,
    live: Arc<AtomicBool>,
    channels: ChannelMap,
    generation: u64,
    on_frame: FrameHandler,
    on_error: ErrorHandler,
}

async fn run_channel(task: ChannelTask) {
    let ChannelTask {
        transport,
        key,
        reconnect,
        live,
        channels,
        generation,
        on_frame,
        on_error,
    } = task;

    let mut attempt: u32 = 0;
    let mut established = false;

    loop {
        match transport.connect(&key).await {
            Ok(mut frames) => {
                established = true;
                attempt = 0;
                tracing::info!("Channel open for {key}");

                let mut dropped = None;
                while let Some(item) = frames.next().await {
                    if !live.load(Ordering::SeqCst) {
                        // Closed while this frame was in flight: drop it
                        return;
                    }
                    match item {
                        Ok(raw) => match protocol::decode(&raw, &key) {
                            Ok(envelope) => on_frame(envelope),
                            Err(e) => {
                                // One bad frame does not terminate the stream
                                tracing::warn!("Dropping bad frame on {key}: {e}");
                                on_error(SyncError::Decode(e));
                            }
                        },
                        Err(e) => {
                            dropped = Some(e);
                            break;
                        }
                    }
                }

                if !live.load(Ordering::SeqCst) {
                    return;
                }

                match dropped {
                    None => {
                        tracing::info!("Channel for {key} closed by server");
                        break;
                    }
                    Some(e) => tracing::warn!("Channel for {key} dropped: {e}"),
                }
            }
            Err(e) => {
                if !established {
                    tracing::warn!("Failed to establish channel for {key}: {e}");
                    // Channel-fatal errors always surface as Transport, no
                    // matter which error the transport produced
                    let detail = match &e {
                        SyncError::Transport { detail } => detail.clone(),
                        other => other.to_string(),
                    };
                    on_error(SyncError::Transport {
                        detail: format!("failed to establish channel for {key}: {detail}"),
                    });
                    break;
                }
                tracing::warn!("Reconnect attempt for {key} failed: {e}");
            }
        }

        if attempt >= reconnect.max_attempts {
            on_error(SyncError::Transport {
                detail: format!(
                    "connection for {key} lost after {} reconnect attempt(s)",
                    reconnect.max_attempts
                ),
            });
            break;
        }

        let delay = reconnect.delay_for(attempt);
        attempt += 1;
        tracing::info!("Reconnecting {key} in {delay:?} (attempt {attempt})");
        tokio::time::sleep(delay).await;

        if !live.load(Ordering::SeqCst) {
            return;
        }
    }

    // Deregister, unless a newer channel already took the slot
    let mut map = lock(&channels);
    if map.get(&key).map(|entry| entry.generation) == Some(generation) {
        map.remove(&key);
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
