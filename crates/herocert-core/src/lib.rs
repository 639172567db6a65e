// # herocert-core
//
// Core library for ACME certificate issuance on Heroku-style platforms.
//
// ## Architecture Overview
//
// - **AcmeService**: Trait for talking to the ACME certificate authority
// - **ChallengeResponder**: Publishes proofs, as a served file or a DNS TXT record
// - **DnsProvider**: Trait for managing TXT records via provider APIs
// - **CertificatePlatform**: Trait for config vars and certificate upload
// - **IssuanceEngine**: Runs the renewal check → order → validate → upload flow
// - **ProviderRegistry**: Plugin-based registry for DNS providers
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Protocol, DNS and platform access sit behind traits
// 2. **Bounded Waits**: Every poll loop has an explicit interval and timeout
// 3. **Plugin-Based**: DNS providers are registered dynamically
// 4. **Library-First**: The daemon is a thin shell around this crate
// 5. **Cleanup**: A published proof is always withdrawn

pub mod config;
pub mod engine;
pub mod error;
pub mod poller;
pub mod registry;
pub mod responder;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{AcmeConfig, ChallengeFile, ChallengeType, DnsProviderConfig, TimingConfig};
pub use engine::{EngineEvent, IssuanceEngine, IssuanceOutcome};
pub use error::{Error, ErrorKind, Result};
pub use poller::RetryPolicy;
pub use registry::ProviderRegistry;
pub use responder::{ChallengeSlot, DnsResponder, FileResponder};
pub use store::{FileCertificateStore, MemoryCertificateStore};
pub use traits::{
    AcmeService, Certificate, CertificatePlatform, CertificateStore, Challenge, ChallengeProbe,
    ChallengeResponder, DnsProvider,
};
