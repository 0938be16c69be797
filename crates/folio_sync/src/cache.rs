//! Cache-vs-remote reconciliation
//!
//! Two jobs: a read-through metadata cache in front of the remote metadata
//! endpoint (with in-flight fetch de-duplication), and the merge that layers
//! user-local augmentation from the store on top of the latest canonical
//! payload received for a document.
//!
//! Merge precedence: canonical content (markdown, sections, summaries,
//! metadata, ...) always comes from the most recent remote payload; user
//! augmentation (`reading_history`, `annotations`) always comes from the
//! local store and survives any number of remote refreshes.

use crate::remote::{FetchError, PaperApi};
use crate::store::PaperStore;
use folio_common::{CachedPaper, DocumentKey, PaperDocument, PaperMetadata, RemoteDocument};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

type MetadataResult = Result<PaperMetadata, FetchError>;

/// Read-through cache and merge point for paper data
pub struct PaperCache {
    store: Arc<dyn PaperStore>,
    api: Arc<dyn PaperApi>,

    /// Waiters for metadata fetches currently in flight, keyed by paper id
    in_flight: Mutex<HashMap<String, Vec<oneshot::Sender<MetadataResult>>>>,

    /// Most recent canonical payload per key, fed by data envelopes
    last_remote: Mutex<HashMap<DocumentKey, RemoteDocument>>,
}

impl PaperCache {
    pub fn new(store: Arc<dyn PaperStore>, api: Arc<dyn PaperApi>) -> Self {
        Self {
            store,
            api,
            in_flight: Mutex::new(HashMap::new()),
            last_remote: Mutex::new(HashMap::new()),
        }
    }

    /// Metadata for a paper: local store hit wins; on a miss, one remote
    /// fetch runs no matter how many callers arrive while it is in flight,
    /// and every caller gets the same result. A failed fetch writes nothing,
    /// so the next call retries.
    pub async fn metadata(&self, paper_id: &str) -> crate::Result<PaperMetadata> {
        if let Some(entry) = self.store.paper_data(paper_id)? {
            tracing::debug!("Metadata cache hit for {paper_id}");
            return Ok(entry.metadata);
        }

        // Join an in-flight fetch, or claim the fetch for ourselves
        let waiter = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get_mut(paper_id) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    in_flight.insert(paper_id.to_string(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            tracing::debug!("Joining in-flight metadata fetch for {paper_id}");
            let result = rx.await.map_err(|_| crate::SyncError::Transport {
                detail: format!("metadata fetch for {paper_id} was abandoned"),
            })?;
            return result.map_err(crate::SyncError::RemoteFetch);
        }

        tracing::info!("Fetching metadata for {paper_id}");
        let result = self.api.fetch_metadata(paper_id).await;

        if let Ok(metadata) = &result {
            // Write-back failure degrades to an uncached read, nothing worse
            if let Err(e) = self
                .store
                .put_paper(&CachedPaper::from_metadata(metadata.clone()))
            {
                tracing::warn!("Failed to cache metadata for {paper_id}: {e}");
            }
        }

        let waiters = lock(&self.in_flight).remove(paper_id).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(result.clone());
        }

        result.map_err(crate::SyncError::RemoteFetch)
    }

    /// Record the latest canonical payload for a key and back-fill the local
    /// store's metadata from it.
    pub fn record_remote(&self, key: &DocumentKey, document: RemoteDocument) {
        if let Some(metadata) = document.metadata.clone() {
            self.upsert_metadata(metadata);
        }
        lock(&self.last_remote).insert(key.clone(), document);
    }

    /// Merge the last recorded payload for the key with the local entry.
    /// `None` until a data envelope (or document fetch) has been recorded.
    pub fn merged_document(&self, key: &DocumentKey) -> Option<PaperDocument> {
        let remote = lock(&self.last_remote).get(key).cloned()?;
        let cached = match self.store.paper_data(&key.paper_id) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Store read failed for {key}, merging without cache: {e}");
                None
            }
        };
        Some(merge_document(key, remote, cached.as_ref()))
    }

    /// Write canonical metadata into the store without touching augmentation.
    ///
    /// Cache wins on fields the remote omitted: a cached featured image is
    /// kept when the fresh metadata has none.
    pub fn upsert_metadata(&self, metadata: PaperMetadata) {
        let paper_id = metadata.paper_id.clone();
        let entry = match self.store.paper_data(&paper_id) {
            Ok(Some(mut existing)) => {
                let mut metadata = metadata;
                if metadata.featured_image.is_none() {
                    metadata.featured_image = existing.metadata.featured_image.take();
                }
                existing.metadata = metadata;
                existing
            }
            Ok(None) => CachedPaper::from_metadata(metadata),
            Err(e) => {
                tracing::warn!("Store read failed for {paper_id}, skipping back-fill: {e}");
                return;
            }
        };
        if let Err(e) = self.store.put_paper(&entry) {
            tracing::warn!("Failed to back-fill metadata for {paper_id}: {e}");
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Merge one remote payload with the local entry for the same paper.
///
/// Pure and idempotent: merging the same payload twice yields the same
/// document as merging it once.
pub fn merge_document(
    key: &DocumentKey,
    mut remote: RemoteDocument,
    cached: Option<&CachedPaper>,
) -> PaperDocument {
    match (&mut remote.metadata, cached) {
        (None, Some(entry)) => remote.metadata = Some(entry.metadata.clone()),
        (Some(metadata), Some(entry)) if metadata.featured_image.is_none() => {
            metadata.featured_image = entry.metadata.featured_image.clone();
        }
        _ => {}
    }

    PaperDocument {
        key: key.clone(),
        remote,
        reading_history: cached.and_then(|entry| entry.reading_history.clone()),
        annotations: cached.map(|entry| entry.annotations.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> DocumentKey {
        DocumentKey::new("2301.00001", "1")
    }

    fn metadata() -> PaperMetadata {
        PaperMetadata {
            paper_id: "2301.00001".to_string(),
            version: "1".to_string(),
            title: "A Paper".to_string(),
            authors: vec!["A. Author".to_string()],
            summary: "About things".to_string(),
            published_timestamp: None,
            updated_timestamp: None,
            featured_image: None,
        }
    }

    fn remote_doc() -> RemoteDocument {
        RemoteDocument {
            metadata: Some(metadata()),
            markdown: Some("# Canonical".to_string()),
            sections: vec![json!({"heading": "Intro"})],
            ..Default::default()
        }
    }

    fn cached_entry() -> CachedPaper {
        CachedPaper {
            metadata: metadata(),
            reading_history: Some(json!({"last_section": 3})),
            annotations: vec![json!({"text": "interesting", "section": 1})],
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let entry = cached_entry();
        let once = merge_document(&key(), remote_doc(), Some(&entry));
        let twice = merge_document(&key(), remote_doc(), Some(&entry));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_local_augmentation_survives_remote_refreshes() {
        let entry = cached_entry();

        let mut refreshed = remote_doc();
        refreshed.markdown = Some("# Canonical v2".to_string());
        let merged = merge_document(&key(), refreshed, Some(&entry));

        // Remote wins canonical content, cache wins augmentation
        assert_eq!(merged.remote.markdown.as_deref(), Some("# Canonical v2"));
        assert_eq!(merged.reading_history, Some(json!({"last_section": 3})));
        assert_eq!(merged.annotations.len(), 1);
    }

    #[test]
    fn test_cache_backfills_metadata_remote_omitted() {
        let mut remote = remote_doc();
        remote.metadata = None;
        let entry = cached_entry();

        let merged = merge_document(&key(), remote, Some(&entry));
        assert_eq!(merged.remote.metadata, Some(metadata()));
    }

    #[test]
    fn test_cached_featured_image_survives_remote_without_one() {
        let mut entry = cached_entry();
        entry.metadata.featured_image = Some(json!({"path": "figs/1.png"}));

        let merged = merge_document(&key(), remote_doc(), Some(&entry));
        assert_eq!(
            merged.remote.metadata.unwrap().featured_image,
            Some(json!({"path": "figs/1.png"}))
        );
    }

    #[test]
    fn test_merge_without_cache_entry() {
        let merged = merge_document(&key(), remote_doc(), None);
        assert!(merged.reading_history.is_none());
        assert!(merged.annotations.is_empty());
        assert_eq!(merged.remote.markdown.as_deref(), Some("# Canonical"));
    }
}
