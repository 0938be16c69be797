//! Envelope codec for inbound channel frames
//!
//! Frames are JSON text with the outer shape
//! `{"paper_id": ..., "version": ..., "type": "status"|"data"|"error", "data": {...}}`.
//! The codec validates only the outer envelope and the status tag; payload
//! bodies stay opaque to the sync layer. `decode` is total: any malformed
//! frame comes back as a [`DecodeError`], never a panic or an early return
//! past this boundary.

use folio_common::{DocumentKey, PaperMetadata, RemoteDocument, RemoteStatus};
use serde::Deserialize;
use serde_json::Value;

/// Longest raw-frame snippet carried in a [`DecodeError`] for diagnostics
const MAX_RAW_SNIPPET: usize = 160;

/// A malformed frame, with the parse diagnostic and a snippet of the raw text
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed frame ({reason}): {raw}")]
pub struct DecodeError {
    pub reason: String,
    pub raw: String,
}

impl DecodeError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        let mut raw = raw.to_string();
        if raw.len() > MAX_RAW_SNIPPET {
            let mut cut = MAX_RAW_SNIPPET;
            while !raw.is_char_boundary(cut) {
                cut -= 1;
            }
            raw.truncate(cut);
            raw.push('…');
        }
        Self {
            reason: reason.into(),
            raw,
        }
    }
}

/// One decoded inbound message
#[derive(Debug, Clone)]
pub struct Envelope {
    pub key: DocumentKey,
    pub payload: EnvelopePayload,
}

/// Envelope payload, tagged by the frame's `type` field
#[derive(Debug, Clone)]
pub enum EnvelopePayload {
    /// Processing status update, sent while an import is in flight
    Status(StatusPayload),

    /// Canonical document payload; implies the import is done
    Data(Box<RemoteDocument>),

    /// Server-reported failure for this document
    Error { message: String },
}

/// Body of a `status` frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub loading_status: Option<RemoteStatus>,

    /// Human-readable progress line, e.g. "Processing LaTeX and PDF..."
    #[serde(default)]
    pub progress: Option<String>,

    #[serde(default)]
    pub loading_error: Option<String>,

    /// Metadata echoed while the import runs, for loading UIs
    #[serde(default)]
    pub metadata: Option<PaperMetadata>,

    #[serde(default)]
    pub updated_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    paper_id: String,
    version: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "detail", alias = "loading_error")]
    message: Option<String>,
}

/// Decode one raw frame for the channel bound to `expected`.
///
/// A frame whose `paper_id`/`version` do not match the channel's key is a
/// decode error: the transport is addressed per key, so a mismatch means a
/// routing bug on one side or the other, and the payload must not be
/// delivered as if it belonged to this document.
pub fn decode(raw: &str, expected: &DocumentKey) -> Result<Envelope, DecodeError> {
    let outer: RawEnvelope =
        serde_json::from_str(raw).map_err(|e| DecodeError::new(e.to_string(), raw))?;

    if outer.paper_id != expected.paper_id || outer.version != expected.version {
        return Err(DecodeError::new(
            format!(
                "key mismatch: frame addressed to {}_v{}, channel bound to {}",
                outer.paper_id,
                outer.version,
                expected.channel_key()
            ),
            raw,
        ));
    }

    let payload = match outer.kind.as_str() {
        "status" => {
            let body: StatusPayload = serde_json::from_value(outer.data)
                .map_err(|e| DecodeError::new(format!("bad status body: {e}"), raw))?;
            EnvelopePayload::Status(body)
        }
        "data" => {
            let body: RemoteDocument = serde_json::from_value(outer.data)
                .map_err(|e| DecodeError::new(format!("bad data body: {e}"), raw))?;
            EnvelopePayload::Data(Box::new(body))
        }
        "error" => {
            let body: ErrorBody = serde_json::from_value(outer.data)
                .map_err(|e| DecodeError::new(format!("bad error body: {e}"), raw))?;
            EnvelopePayload::Error {
                message: body
                    .message
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            }
        }
        other => {
            return Err(DecodeError::new(format!("unknown envelope type {other:?}"), raw));
        }
    };

    Ok(Envelope {
        key: expected.clone(),
        payload,
    })
}
