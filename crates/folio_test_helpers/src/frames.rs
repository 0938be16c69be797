//! Builders for wire-format envelope frames

use folio_common::{DocumentKey, PaperMetadata};
use serde_json::{json, Value};

/// A `status` frame carrying only a loading status
pub fn status_frame(key: &DocumentKey, loading_status: &str) -> String {
    status_frame_with(key, json!({ "loading_status": loading_status }))
}

/// A `status` frame with an explicit data body
pub fn status_frame_with(key: &DocumentKey, data: Value) -> String {
    envelope(key, "status", data)
}

/// A `data` frame carrying a canonical document body
pub fn data_frame(key: &DocumentKey, data: Value) -> String {
    envelope(key, "data", data)
}

/// An `error` frame
pub fn error_frame(key: &DocumentKey, message: &str) -> String {
    envelope(key, "error", json!({ "message": message }))
}

fn envelope(key: &DocumentKey, kind: &str, data: Value) -> String {
    json!({
        "paper_id": key.paper_id,
        "version": key.version,
        "type": kind,
        "data": data,
    })
    .to_string()
}

/// Minimal plausible metadata for a paper
pub fn sample_metadata(paper_id: &str, version: &str) -> PaperMetadata {
    PaperMetadata {
        paper_id: paper_id.to_string(),
        version: version.to_string(),
        title: format!("Sample paper {paper_id}"),
        authors: vec!["A. Author".to_string(), "B. Author".to_string()],
        summary: "A sample abstract.".to_string(),
        published_timestamp: Some("2026-01-01T00:00:00Z".to_string()),
        updated_timestamp: Some("2026-01-02T00:00:00Z".to_string()),
        featured_image: None,
    }
}
