//! Polling helpers and callback collectors

use folio_sync::engine::{DocumentUpdate, UpdateHandler};
use folio_sync::registry::ErrorHandler;
use folio_sync::SyncError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Poll `cond` every 10ms until it holds or `timeout` elapses
pub async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collects every [`DocumentUpdate`] a channel delivers
#[derive(Clone, Default)]
pub struct UpdateLog {
    updates: Arc<Mutex<Vec<DocumentUpdate>>>,
}

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> UpdateHandler {
        let updates = self.updates.clone();
        Arc::new(move |update| {
            updates.lock().unwrap().push(update);
        })
    }

    pub fn count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<DocumentUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<DocumentUpdate> {
        self.updates.lock().unwrap().last().cloned()
    }
}

/// Collects every error a channel reports
#[derive(Clone, Default)]
pub struct ErrorLog {
    errors: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> ErrorHandler {
        let errors = self.errors.clone();
        Arc::new(move |error: SyncError| {
            errors.lock().unwrap().push(error.to_string());
        })
    }

    pub fn count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}
