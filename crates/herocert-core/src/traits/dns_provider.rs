// # DNS Provider Trait
//
// Defines the interface for managing DNS-01 TXT records via provider APIs.
//
// ## Implementations
//
// - Cloudflare: `herocert-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use herocert_core::DnsProvider;
//
// let zone = provider.resolve_zone("app.example.com").await?;
// for stale in provider.list_txt_records(&zone, "_acme-challenge.app.example.com").await? {
//     provider.delete_record(&zone, &stale.id).await?;
// }
// provider
//     .create_txt_record(&zone, "_acme-challenge.app.example.com", "proof")
//     .await?;
// ```

use async_trait::async_trait;
use std::sync::Arc;

/// A DNS zone managed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsZone {
    /// Provider-specific zone ID
    pub id: String,
    /// Zone apex, e.g. `example.com`
    pub name: String,
}

/// A TXT record as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    /// Provider-specific record ID
    pub id: String,
    /// Fully qualified record name
    pub name: String,
    /// Record content
    pub content: String,
}

/// Trait for DNS provider implementations
///
/// Providers are isolated and stateless: no retries, no background tasks,
/// no caching across calls. A failed call returns [`crate::Error::DnsProvider`]; whether the attempt is retried is
/// decided by whoever runs the issuance flow.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Find the zone that owns `domain`
    ///
    /// For `app.example.com` this is typically the `example.com` zone.
    async fn resolve_zone(&self, domain: &str) -> Result<DnsZone, crate::Error>;

    /// List TXT records in `zone` whose name starts with `prefix`
    async fn list_txt_records(
        &self,
        zone: &DnsZone,
        prefix: &str,
    ) -> Result<Vec<TxtRecord>, crate::Error>;

    /// Delete a record by ID
    ///
    /// Deleting a record that no longer exists is not an error.
    async fn delete_record(&self, zone: &DnsZone, record_id: &str) -> Result<(), crate::Error>;

    /// Create a TXT record with the given fully qualified name
    async fn create_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
        content: &str,
    ) -> Result<TxtRecord, crate::Error>;

    /// Get the provider name (for logging/debugging)
    ///
    /// A static string identifying the provider (e.g., "cloudflare")
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    fn create(
        &self,
        config: &crate::config::DnsProviderConfig,
    ) -> Result<Arc<dyn DnsProvider>, crate::Error>;
}
