//! Channel registry behavior against a scripted transport

use folio_common::DocumentKey;
use folio_sync::protocol::Envelope;
use folio_sync::registry::ChannelRegistry;
use folio_sync::ReconnectPolicy;
use folio_test_helpers::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn key() -> DocumentKey {
    DocumentKey::new("2301.00001", "1")
}

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

/// Collects decoded envelopes from a channel
#[derive(Clone, Default)]
struct EnvelopeLog(Arc<Mutex<Vec<Envelope>>>);

impl EnvelopeLog {
    fn handler(&self) -> Arc<dyn Fn(Envelope) + Send + Sync> {
        let log = self.0.clone();
        Arc::new(move |envelope| log.lock().unwrap().push(envelope))
    }

    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[tokio::test]
async fn test_last_open_wins_and_predecessor_closes_silently() {
    init_test_logging();
    let transport = scripted_transport();
    let first_feeder = transport.manual();
    let second_feeder = transport.manual();
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(0));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();

    registry.open(key(), frames.handler(), errors.handler());
    assert!(wait_until(|| transport.connect_count() == 1, Duration::from_secs(1)).await);

    // Re-open the same key before any message arrives
    registry.open(key(), frames.handler(), errors.handler());
    assert!(wait_until(|| transport.connect_count() == 2, Duration::from_secs(1)).await);
    assert_eq!(registry.len(), 1, "exactly one channel per key");

    // Frames on the replaced connection never reach anyone
    first_feeder.frame(status_frame(&key(), "processing"));
    // Frames on the live connection still deliver
    second_feeder.frame(status_frame(&key(), "processing"));

    assert!(wait_until(|| frames.count() == 1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(frames.count(), 1, "replaced channel delivered a frame");
    assert_eq!(errors.count(), 0, "replacement surfaced an error");
}

#[tokio::test]
async fn test_malformed_frame_never_closes_a_healthy_channel() {
    init_test_logging();
    let transport = scripted_transport();
    transport.push(ConnectScript::Frames(vec![
        status_frame(&key(), "processing"),
        "{definitely not json".to_string(),
        status_frame(&key(), "ready"),
    ]));
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(0));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());

    assert!(wait_until(|| frames.count() == 2, Duration::from_secs(1)).await);
    assert_eq!(errors.count(), 1, "the bad frame reports exactly once");
    assert!(errors.snapshot()[0].contains("malformed frame"));
    assert!(registry.is_open(&key()), "channel survived the bad frame");
}

#[tokio::test]
async fn test_key_mismatched_frame_is_rejected_not_fatal() {
    init_test_logging();
    let transport = scripted_transport();
    transport.push(ConnectScript::Frames(vec![
        status_frame(&DocumentKey::new("9999.00000", "7"), "processing"),
        status_frame(&key(), "processing"),
    ]));
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(0));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());

    assert!(wait_until(|| frames.count() == 1, Duration::from_secs(1)).await);
    assert_eq!(errors.count(), 1);
    assert!(errors.snapshot()[0].contains("key mismatch"));
}

#[tokio::test]
async fn test_establishment_failure_reports_once_without_retry() {
    init_test_logging();
    let transport = scripted_transport();
    transport.push(ConnectScript::Fail("connection refused".to_string()));
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(3));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());

    assert!(wait_until(|| errors.count() == 1, Duration::from_secs(1)).await);
    assert!(
        wait_until(|| registry.is_empty(), Duration::from_secs(1)).await,
        "failed channel deregisters itself"
    );
    // Retry policy only covers streams that were open and dropped
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn test_midstream_drop_reconnects_and_resumes() {
    init_test_logging();
    let transport = scripted_transport();
    transport.push(ConnectScript::FramesThenDrop(
        vec![status_frame(&key(), "processing")],
        "network blip".to_string(),
    ));
    transport.push(ConnectScript::Frames(vec![status_frame(&key(), "ready")]));
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(3));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());

    assert!(wait_until(|| frames.count() == 2, Duration::from_secs(2)).await);
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(errors.count(), 0, "a recovered drop is not surfaced");
    assert!(registry.is_open(&key()));
}

#[tokio::test]
async fn test_reconnect_exhaustion_reports_once_and_deregisters() {
    init_test_logging();
    let transport = scripted_transport();
    transport.push(ConnectScript::FramesThenDrop(vec![], "network down".to_string()));
    transport.push(ConnectScript::Fail("still down".to_string()));
    transport.push(ConnectScript::Fail("still down".to_string()));
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(2));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());

    assert!(wait_until(|| errors.count() == 1, Duration::from_secs(2)).await);
    assert!(errors.snapshot()[0].contains("reconnect attempt"));
    assert!(wait_until(|| registry.is_empty(), Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_close_drops_frames_already_in_flight() {
    init_test_logging();
    let transport = scripted_transport();
    let feeder = transport.manual();
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(0));

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());
    assert!(wait_until(|| transport.connect_count() == 1, Duration::from_secs(1)).await);

    registry.close(&key());
    feeder.frame(status_frame(&key(), "processing"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(frames.count(), 0, "frame delivered after close");
    assert_eq!(errors.count(), 0);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_close_all_is_idempotent() {
    init_test_logging();
    let transport = scripted_transport();
    let registry = ChannelRegistry::new(transport.clone(), fast_policy(0));

    // Empty teardown is a no-op
    registry.close_all();
    assert!(registry.is_empty());

    let frames = EnvelopeLog::default();
    let errors = ErrorLog::new();
    registry.open(key(), frames.handler(), errors.handler());
    registry.open(DocumentKey::new("2301.00002", "1"), frames.handler(), errors.handler());
    assert_eq!(registry.len(), 2);

    registry.close_all();
    assert!(registry.is_empty());
    registry.close_all();
    assert!(registry.is_empty());
    assert_eq!(errors.count(), 0);
}

#[tokio::test]
async fn test_close_of_unknown_key_is_a_noop() {
    init_test_logging();
    let transport = scripted_transport();
    let registry = ChannelRegistry::new(transport, fast_policy(0));
    registry.close(&key());
    assert!(registry.is_empty());
}
