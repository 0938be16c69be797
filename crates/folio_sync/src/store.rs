//! Local persisted paper store boundary
//!
//! The store holds previously imported papers plus user-local augmentation
//! (reading history, annotations). It is shared with other consumers of the
//! same keyspace, so the sync layer reads and writes through this trait and
//! never deletes entries.

use folio_common::{CachedPaper, PaperMetadata, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Interface to the shared local store of past papers
pub trait PaperStore: Send + Sync {
    /// All locally known papers, oldest first
    fn paper_history(&self) -> Result<Vec<PaperMetadata>>;

    /// Full local entry for one paper, if present
    fn paper_data(&self, paper_id: &str) -> Result<Option<CachedPaper>>;

    /// Insert or replace an entry. Implementations must not drop other
    /// entries as a side effect.
    fn put_paper(&self, paper: &CachedPaper) -> Result<()>;
}

/// In-memory store, keyed by paper id, insertion order preserved
#[derive(Default)]
pub struct MemoryStore {
    papers: Mutex<PaperMap>,
}

#[derive(Default)]
struct PaperMap {
    order: Vec<String>,
    entries: HashMap<String, CachedPaper>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperMap> {
        self.papers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PaperStore for MemoryStore {
    fn paper_history(&self) -> Result<Vec<PaperMetadata>> {
        let map = self.lock();
        Ok(map
            .order
            .iter()
            .filter_map(|id| map.entries.get(id))
            .map(|entry| entry.metadata.clone())
            .collect())
    }

    fn paper_data(&self, paper_id: &str) -> Result<Option<CachedPaper>> {
        Ok(self.lock().entries.get(paper_id).cloned())
    }

    fn put_paper(&self, paper: &CachedPaper) -> Result<()> {
        let mut map = self.lock();
        let id = paper.metadata.paper_id.clone();
        if !map.entries.contains_key(&id) {
            map.order.push(id.clone());
        }
        map.entries.insert(id, paper.clone());
        Ok(())
    }
}
