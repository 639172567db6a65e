// # Certificate Platform Trait
//
// The hosting platform that runs the application and terminates TLS for it.
// The issuance engine hands it the finished certificate and uses its config
// vars to publish the HTTP-01 artifact to the web processes.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::traits::acme_service::Certificate;

/// Config var changes: `Some` sets a value, `None` removes the var
pub type ConfigVars = BTreeMap<String, Option<String>>;

/// Trait for hosting platform implementations
///
/// Every failure is reported as [`crate::Error::PlatformCert`].
#[async_trait]
pub trait CertificatePlatform: Send + Sync {
    /// Set or remove application config vars
    async fn set_config_vars(&self, vars: &ConfigVars) -> Result<(), crate::Error>;

    /// Install `certificate` as the application's TLS certificate
    ///
    /// Replaces the current certificate when one exists.
    async fn upload_certificate(&self, certificate: &Certificate) -> Result<(), crate::Error>;

    /// Public hostname the application answers on, if the platform knows one
    async fn primary_hostname(&self) -> Result<Option<String>, crate::Error>;

    /// Get the platform name (for logging/debugging)
    fn platform_name(&self) -> &'static str;
}
