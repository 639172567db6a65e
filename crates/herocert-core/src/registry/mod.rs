//! Plugin-based DNS provider registry
//!
//! DNS-01 needs a provider API client, and which one is decided by
//! configuration. Provider crates register a factory under their type name;
//! the daemon asks the registry for whatever the configuration names.
//!
//! ## Registration
//!
//! ```rust,ignore
//! // In herocert-provider-cloudflare
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::DnsProviderConfig;
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of DNS provider factories keyed by provider type name
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive registration.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory under `name`
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        providers.insert(name.into(), factory);
    }

    /// Create a DNS provider from configuration
    ///
    /// Fails with a configuration error when no factory is registered for
    /// the configured provider type.
    pub fn create_provider(&self, config: &DnsProviderConfig) -> Result<Arc<dyn DnsProvider>> {
        let provider_type = config.type_name();
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());

        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown DNS provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// Names of all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        providers.contains_key(name)
    }
}
