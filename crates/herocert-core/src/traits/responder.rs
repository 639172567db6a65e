// # Challenge Responder Trait
//
// Makes a challenge proof visible where the ACME server will look for it,
// and takes it down again afterwards.
//
// ## Implementations
//
// - [`crate::responder::FileResponder`]: HTTP-01 via the in-process slot
//   and platform config vars
// - [`crate::responder::DnsResponder`]: DNS-01 via a [`crate::DnsProvider`]

use async_trait::async_trait;

use crate::config::ChallengeType;
use crate::traits::acme_service::Challenge;
use crate::traits::dns_provider::DnsZone;

/// What a responder needs to undo an activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderHandle {
    /// A file artifact served by the web process
    File {
        /// Domain the artifact was published for
        domain: String,
        /// Site-relative path of the artifact
        filename: String,
    },
    /// A TXT record created at the DNS provider
    Dns {
        /// Domain the record was published for
        domain: String,
        /// Zone the record lives in
        zone: DnsZone,
        /// Provider record ID
        record_id: String,
        /// Fully qualified record name
        record_name: String,
    },
}

/// Trait for challenge responders
///
/// `activate` must leave the proof fully published when it returns `Ok`;
/// callers request verification immediately afterwards.
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    /// Publish the proof for `challenge`
    async fn activate(&self, challenge: &Challenge) -> Result<ResponderHandle, crate::Error>;

    /// Remove a previously published proof
    async fn deactivate(&self, handle: ResponderHandle) -> Result<(), crate::Error>;

    /// The challenge type this responder answers
    fn strategy(&self) -> ChallengeType;
}
