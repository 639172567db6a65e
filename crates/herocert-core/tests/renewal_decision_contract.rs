//! Contract Test: Renewal Decision & Preconditions
//!
//! Verifies that nothing touches the network when:
//! - The current certificate is outside the renewal window
//! - The configuration is invalid
//! - The responder does not match the configured challenge type
//!
//! If this test fails, scheduled runs burn CA rate limits or act on bad
//! configuration.

mod common;

use chrono::Duration as ChronoDuration;
use common::*;
use herocert_core::responder::{ChallengeSlot, DnsResponder, FileResponder};
use herocert_core::{EngineEvent, Error, IssuanceEngine, IssuanceOutcome};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn certificate_outside_window_is_not_renewed() {
    let log = CallLog::new();
    let expiry = fixed_now() + ChronoDuration::days(60);
    let config = file_config(&["example.com"]).with_cert_expires_at(expiry);

    let (engine, mut events) = IssuanceEngine::new(
        config,
        Box::new(FakeAcme::new(log.clone())),
        Arc::new(FileResponder::new(ChallengeSlot::new())),
        Arc::new(RecordingPlatform::new(log.clone())),
    )
    .unwrap();

    let outcome = engine.run(fixed_now()).await.unwrap();

    assert_eq!(
        outcome,
        IssuanceOutcome::NotDue {
            expires_at: Some(expiry)
        }
    );
    assert!(log.entries().is_empty(), "no call may be made: {:?}", log.entries());

    let mut saw_not_due = false;
    while let Ok(event) = events.try_recv() {
        saw_not_due |= matches!(event, EngineEvent::NotDue { .. });
    }
    assert!(saw_not_due);
}

#[tokio::test(start_paused = true)]
async fn certificate_at_window_boundary_is_renewed() {
    let log = CallLog::new();
    let config = file_config(&["example.com"])
        .with_renewal_window_days(30)
        .with_cert_expires_at(fixed_now() + ChronoDuration::days(30));

    let (engine, _events) = IssuanceEngine::new(
        config,
        Box::new(FakeAcme::new(log.clone())),
        Arc::new(FileResponder::new(ChallengeSlot::new())),
        Arc::new(RecordingPlatform::new(log.clone())),
    )
    .unwrap();

    let outcome = engine.run(fixed_now()).await.unwrap();

    assert!(matches!(outcome, IssuanceOutcome::Issued { .. }));
    assert!(log.contains("acme:create_order example.com"));
}

#[test]
fn invalid_configuration_is_rejected_before_any_call() {
    let log = CallLog::new();
    let mut config = file_config(&["example.com"]);
    config.email.clear();

    let result = IssuanceEngine::new(
        config,
        Box::new(FakeAcme::new(log.clone())),
        Arc::new(FileResponder::new(ChallengeSlot::new())),
        Arc::new(RecordingPlatform::new(log.clone())),
    );

    assert!(matches!(result, Err(Error::Config(_))));
    assert!(log.entries().is_empty());
}

#[test]
fn responder_must_match_challenge_type() {
    let log = CallLog::new();
    let provider = Arc::new(MockDnsProvider::new(log.clone()));

    let result = IssuanceEngine::new(
        file_config(&["example.com"]),
        Box::new(FakeAcme::new(log.clone())),
        Arc::new(DnsResponder::new(provider, Duration::ZERO)),
        Arc::new(RecordingPlatform::new(log.clone())),
    );

    assert!(matches!(result, Err(Error::Config(_))));
}
