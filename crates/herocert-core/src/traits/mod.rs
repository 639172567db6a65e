//! Core traits for the issuance system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`AcmeService`]: Talk to the ACME certificate authority
//! - [`DnsProvider`]: Manage DNS-01 TXT records via provider APIs
//! - [`CertificatePlatform`]: Config vars and certificate upload at the host
//! - [`ChallengeResponder`]: Publish and retract challenge proofs
//! - [`ChallengeProbe`]: Self-test a published HTTP-01 artifact
//! - [`CertificateStore`]: Park issued certificates until uploaded

pub mod acme_service;
pub mod certificate_store;
pub mod dns_provider;
pub mod platform;
pub mod probe;
pub mod responder;

pub use acme_service::{
    ACME_CHALLENGE_RECORD, AcmeService, Certificate, Challenge, ChallengeStatus, Order,
    OrderStatus, challenge_record_name,
};
pub use certificate_store::CertificateStore;
pub use dns_provider::{DnsProvider, DnsProviderFactory, DnsZone, TxtRecord};
pub use platform::{CertificatePlatform, ConfigVars};
pub use probe::ChallengeProbe;
pub use responder::{ChallengeResponder, ResponderHandle};
