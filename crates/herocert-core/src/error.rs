//! Error types for certificate issuance
//!
//! Every failure an issuance attempt can hit is one variant of [`Error`].
//! Callers that only care about the failure class can use [`Error::kind`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias for issuance operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for certificate issuance
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is missing or malformed (never retried)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The file challenge could not be fetched from its public URL
    #[error("Challenge URL {url} not reachable: {message}")]
    ChallengeUrl {
        /// URL that was probed
        url: String,
        /// Last fetch error
        message: String,
    },

    /// The ACME server rejected a challenge
    #[error("Verification failed for '{domain}': {message}")]
    Verification {
        /// Domain the challenge belongs to
        domain: String,
        /// Reason reported by the ACME server
        message: String,
    },

    /// A challenge stayed pending past its timeout
    #[error("Verification timed out for '{domain}' after {elapsed:?}")]
    VerificationTimeout {
        /// Domain the challenge belongs to
        domain: String,
        /// Time spent polling
        elapsed: Duration,
    },

    /// The order became invalid while being finalized
    #[error("Finalization failed: {0}")]
    Finalization(String),

    /// The order did not reach a terminal state in time
    #[error("Finalization timed out after {elapsed:?}")]
    FinalizationTimeout {
        /// Time spent polling
        elapsed: Duration,
    },

    /// A DNS provider API call failed
    #[error("DNS provider error ({provider}): {message}")]
    DnsProvider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// The hosting platform rejected a config var or certificate update
    #[error("Platform certificate error: {0}")]
    PlatformCert(String),

    /// ACME transport or protocol failure outside of challenge validation
    #[error("ACME error: {0}")]
    Acme(String),

    /// Pending certificate store errors
    #[error("Certificate store error: {0}")]
    CertificateStore(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Failure class of an [`Error`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    ChallengeUrl,
    Verification,
    VerificationTimeout,
    Finalization,
    FinalizationTimeout,
    DnsProvider,
    PlatformCert,
    Acme,
    CertificateStore,
    Other,
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a challenge URL error
    pub fn challenge_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChallengeUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a verification error
    pub fn verification(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Verification {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Create a finalization error
    pub fn finalization(msg: impl Into<String>) -> Self {
        Self::Finalization(msg.into())
    }

    /// Create a DNS provider error
    pub fn dns_provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DnsProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a platform certificate error
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::PlatformCert(msg.into())
    }

    /// Create an ACME error
    pub fn acme(msg: impl Into<String>) -> Self {
        Self::Acme(msg.into())
    }

    /// Create a certificate store error
    pub fn certificate_store(msg: impl Into<String>) -> Self {
        Self::CertificateStore(msg.into())
    }

    /// The failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::ChallengeUrl { .. } => ErrorKind::ChallengeUrl,
            Error::Verification { .. } => ErrorKind::Verification,
            Error::VerificationTimeout { .. } => ErrorKind::VerificationTimeout,
            Error::Finalization(_) => ErrorKind::Finalization,
            Error::FinalizationTimeout { .. } => ErrorKind::FinalizationTimeout,
            Error::DnsProvider { .. } => ErrorKind::DnsProvider,
            Error::PlatformCert(_) => ErrorKind::PlatformCert,
            Error::Acme(_) => ErrorKind::Acme,
            Error::CertificateStore(_) => ErrorKind::CertificateStore,
            Error::Io(_) | Error::Json(_) | Error::Other(_) => ErrorKind::Other,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
