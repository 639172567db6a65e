//! Verification poller
//!
//! Bounded polling of ACME statuses and of the published HTTP-01 artifact.
//! Every wait goes through `tokio::time`, so the loops run against a paused
//! clock in tests.
//!
//! Each loop follows the same shape: optional settle delay, then one query
//! per interval until the status is terminal or the timeout has elapsed.
//! A loop never issues more than `timeout / interval + 1` queries.

use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::traits::{AcmeService, Challenge, ChallengeProbe, ChallengeStatus, Order, OrderStatus};

/// Settle time before the first self-test fetch
const SELF_TEST_SETTLE: Duration = Duration::from_secs(2);
/// Interval between self-test fetches
const SELF_TEST_INTERVAL: Duration = Duration::from_secs(5);
/// Self-test gives up once this much time has passed
const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Interval between ACME status queries
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Timing of one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first attempt
    pub initial_delay: Duration,
    /// Wait between attempts
    pub interval: Duration,
    /// No further attempt is made once this much time has passed
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, interval: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            interval,
            timeout,
        }
    }

    /// Policy for fetching the published artifact ourselves
    pub fn self_test() -> Self {
        Self::new(SELF_TEST_SETTLE, SELF_TEST_INTERVAL, SELF_TEST_TIMEOUT)
    }

    /// Policy for waiting on challenge and authorization statuses
    pub fn verification(timeout: Duration) -> Self {
        Self::new(Duration::ZERO, STATUS_INTERVAL, timeout)
    }

    /// Policy for waiting on a finalized order
    pub fn finalization(timeout: Duration) -> Self {
        Self::new(Duration::ZERO, STATUS_INTERVAL, timeout)
    }
}

/// Wait until the ACME server has validated `challenge`
///
/// `invalid` and `expired` fail on the query that observes them.
pub async fn poll_challenge(
    acme: &dyn AcmeService,
    challenge: &Challenge,
    policy: RetryPolicy,
) -> Result<()> {
    let start = Instant::now();
    if !policy.initial_delay.is_zero() {
        sleep(policy.initial_delay).await;
    }

    loop {
        match acme.challenge_status(challenge).await? {
            ChallengeStatus::Valid => {
                debug!("Challenge for {} is valid", challenge.domain);
                return Ok(());
            }
            ChallengeStatus::Invalid => {
                return Err(Error::verification(
                    &challenge.domain,
                    "challenge was rejected by the ACME server",
                ));
            }
            ChallengeStatus::Expired => {
                return Err(Error::verification(
                    &challenge.domain,
                    "challenge expired before it was validated",
                ));
            }
            ChallengeStatus::Pending => {}
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(Error::VerificationTimeout {
                domain: challenge.domain.clone(),
                elapsed,
            });
        }
        sleep(policy.interval).await;
    }
}

/// Wait until every authorization of `order` is valid
///
/// Returns the status that ended the wait (`ready` or later).
pub async fn poll_order_ready(
    acme: &dyn AcmeService,
    order: &Order,
    policy: RetryPolicy,
) -> Result<OrderStatus> {
    let start = Instant::now();
    let domains = order.domains.join(",");
    if !policy.initial_delay.is_zero() {
        sleep(policy.initial_delay).await;
    }

    loop {
        match acme.order_status(order).await? {
            OrderStatus::Pending => {}
            OrderStatus::Invalid => {
                return Err(Error::verification(
                    domains,
                    "order became invalid during validation",
                ));
            }
            status => return Ok(status),
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(Error::VerificationTimeout {
                domain: domains,
                elapsed,
            });
        }
        sleep(policy.interval).await;
    }
}

/// Wait until a finalized order is `valid`
pub async fn poll_order(acme: &dyn AcmeService, order: &Order, policy: RetryPolicy) -> Result<()> {
    let start = Instant::now();
    if !policy.initial_delay.is_zero() {
        sleep(policy.initial_delay).await;
    }

    loop {
        match acme.order_status(order).await? {
            OrderStatus::Valid => return Ok(()),
            OrderStatus::Invalid => {
                return Err(Error::finalization(format!(
                    "order {} became invalid",
                    order.url
                )));
            }
            status => debug!("Order {} is {:?}", order.url, status),
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(Error::FinalizationTimeout { elapsed });
        }
        sleep(policy.interval).await;
    }
}

/// Fetch the published artifact until it answers with `expected`
///
/// Fetch failures (including redirects) and content mismatches are retried.
pub async fn self_test(
    probe: &dyn ChallengeProbe,
    url: &str,
    expected: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let start = Instant::now();
    if !policy.initial_delay.is_zero() {
        sleep(policy.initial_delay).await;
    }

    loop {
        let failure = match probe.fetch(url).await {
            Ok(body) if body.trim() == expected => {
                debug!("Challenge URL {} serves the expected content", url);
                return Ok(());
            }
            Ok(_) => "served unexpected content".to_string(),
            Err(e) => e.to_string(),
        };

        if start.elapsed() + policy.interval > policy.timeout {
            return Err(Error::challenge_url(url, failure));
        }
        warn!(
            "Challenge URL {} not ready ({}), retrying in {:?}",
            url, failure, policy.interval
        );
        sleep(policy.interval).await;
    }
}
