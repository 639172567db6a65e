// # ACME Service Trait
//
// Defines the interface to the ACME certificate authority.
//
// Account keys, JWS signing and CSR construction live behind this trait;
// the engine only sequences calls and polls statuses. Statuses are pulled,
// never pushed.
//
// ## Implementations
//
// - instant-acme: `herocert-acme` crate

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{CHALLENGE_PATH_PREFIX, ChallengeType};

/// Prefix of every DNS-01 record name
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Status of a single domain-validation challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Waiting for the proof or for the server to check it
    Pending,
    /// The server accepted the proof
    Valid,
    /// The server rejected the proof
    Invalid,
    /// The authorization expired before validation completed
    Expired,
}

/// Status of an ACME order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Authorizations outstanding
    Pending,
    /// All authorizations valid, waiting for a CSR
    Ready,
    /// CSR submitted, certificate being issued
    Processing,
    /// Certificate issued
    Valid,
    /// The order failed
    Invalid,
}

/// One in-flight domain-validation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Strategy this challenge is answered with
    pub challenge_type: ChallengeType,
    /// Domain being validated
    pub domain: String,
    /// Challenge URL at the ACME server
    pub url: String,
    /// Where the proof goes: a site-relative path or a TXT record name
    pub target: String,
    /// Exact proof value expected by the server
    pub proof: String,
}

impl Challenge {
    /// HTTP-01 challenge served at `.well-known/acme-challenge/<token>`
    pub fn file(
        domain: impl Into<String>,
        url: impl Into<String>,
        token: &str,
        key_authorization: impl Into<String>,
    ) -> Self {
        Self {
            challenge_type: ChallengeType::File,
            domain: domain.into(),
            url: url.into(),
            target: format!("{}acme-challenge/{}", CHALLENGE_PATH_PREFIX, token),
            proof: key_authorization.into(),
        }
    }

    /// DNS-01 challenge published at `_acme-challenge.<domain>`
    pub fn dns(domain: &str, url: impl Into<String>, record_value: impl Into<String>) -> Self {
        Self {
            challenge_type: ChallengeType::Dns,
            domain: domain.to_string(),
            url: url.into(),
            target: challenge_record_name(domain),
            proof: record_value.into(),
        }
    }
}

/// An ACME issuance order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Order URL, unique per order
    pub url: String,
    /// Domains the order covers
    pub domains: Vec<String>,
}

/// An issued certificate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Domains the certificate covers
    pub domains: Vec<String>,
    /// PEM-encoded certificate chain, leaf first
    pub chain_pem: String,
    /// PEM-encoded private key
    pub private_key_pem: String,
    /// Expiry of the leaf certificate, when it could be parsed
    pub not_after: Option<DateTime<Utc>>,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("domains", &self.domains)
            .field("chain_pem_len", &self.chain_pem.len())
            .field("private_key_pem", &"<REDACTED>")
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// Build the full DNS-01 record name for a domain
///
/// Wildcards share the record of their base domain:
/// `*.example.com` and `example.com` both map to `_acme-challenge.example.com`.
pub fn challenge_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", ACME_CHALLENGE_RECORD, base)
}

/// Trait for ACME certificate authorities
///
/// Implementations perform exactly one protocol exchange per call. Polling,
/// timeouts and retries belong to the engine.
#[async_trait]
pub trait AcmeService: Send + Sync {
    /// Create a new order for the given domains
    async fn create_order(&self, domains: &[String]) -> Result<Order, crate::Error>;

    /// Fetch the pending challenges of an order for the given strategy
    ///
    /// Authorizations that are already valid produce no challenge.
    async fn challenges(
        &self,
        order: &Order,
        challenge_type: ChallengeType,
    ) -> Result<Vec<Challenge>, crate::Error>;

    /// Tell the server the proof is in place
    async fn request_verification(&self, challenge: &Challenge) -> Result<(), crate::Error>;

    /// Current status of a challenge
    async fn challenge_status(&self, challenge: &Challenge)
    -> Result<ChallengeStatus, crate::Error>;

    /// Current status of an order
    async fn order_status(&self, order: &Order) -> Result<OrderStatus, crate::Error>;

    /// Submit the CSR for a ready order
    async fn finalize_order(&self, order: &Order) -> Result<(), crate::Error>;

    /// Download the certificate of a valid order
    async fn certificate(&self, order: &Order) -> Result<Certificate, crate::Error>;
}
