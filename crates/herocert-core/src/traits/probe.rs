// # Challenge Probe Trait
//
// Fetches a published HTTP-01 artifact over plain HTTP before the ACME server
// is asked to do the same. Catches hosts that redirect to HTTPS or never
// picked up the artifact without burning a validation attempt.

use async_trait::async_trait;

/// Trait for self-test fetchers
#[async_trait]
pub trait ChallengeProbe: Send + Sync {
    /// GET `url` and return the response body
    ///
    /// Non-success statuses and redirects are errors.
    async fn fetch(&self, url: &str) -> Result<String, crate::Error>;
}
