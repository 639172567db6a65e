// # Certificate Store Trait
//
// Parks an issued certificate between download and platform upload.
//
// A certificate that was issued but never reached the platform would
// otherwise be lost, and the next run would burn a fresh order against the
// CA's rate limits. With a store configured, the engine saves the
// certificate before uploading and clears it only after the upload
// succeeds; the next run uploads a parked certificate first.
//
// ## Implementations
//
// - In-memory: [`crate::store::MemoryCertificateStore`] (tests)
// - File-based: [`crate::store::FileCertificateStore`] (JSON, atomic writes)

use async_trait::async_trait;

use crate::traits::acme_service::Certificate;

/// Trait for pending-certificate stores
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Load the parked certificate, if any
    async fn load_pending(&self) -> Result<Option<Certificate>, crate::Error>;

    /// Park a certificate, replacing any previous one
    async fn save_pending(&self, certificate: &Certificate) -> Result<(), crate::Error>;

    /// Remove the parked certificate (no-op when empty)
    async fn clear_pending(&self) -> Result<(), crate::Error>;
}
