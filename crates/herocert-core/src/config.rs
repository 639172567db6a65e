//! Configuration types for certificate issuance
//!
//! The configuration is read once from an environment-style key-value source
//! and never mutated afterwards. [`AcmeConfig::validate`] must pass before any
//! network call is made.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Let's Encrypt production directory
pub const DEFAULT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Every file challenge is served below this path prefix
pub const CHALLENGE_PATH_PREFIX: &str = ".well-known/";

/// Environment keys recognized by [`AcmeConfig::from_lookup`]
pub mod keys {
    pub const PLATFORM_TOKEN: &str = "HEROKU_TOKEN";
    pub const PLATFORM_APP: &str = "HEROKU_APP";
    pub const EMAIL: &str = "ACME_EMAIL";
    pub const DOMAIN: &str = "ACME_DOMAIN";
    pub const ENDPOINT: &str = "ACME_ENDPOINT";
    pub const CHALLENGE: &str = "ACME_CHALLENGE";
    pub const TERMS_AGREED: &str = "ACME_TERMS_AGREED";
    pub const CERT_EXPIRES_AT: &str = "ACME_CERT_EXPIRES_AT";
    pub const RENEWAL_WINDOW_DAYS: &str = "ACME_RENEWAL_WINDOW_DAYS";
    pub const VERIFICATION_TIMEOUT_SECS: &str = "ACME_VERIFICATION_TIMEOUT_SECS";
    pub const FINALIZATION_TIMEOUT_SECS: &str = "ACME_FINALIZATION_TIMEOUT_SECS";
    pub const DNS_PROPAGATION_SECS: &str = "ACME_DNS_PROPAGATION_SECS";
    pub const CHALLENGE_FILENAME: &str = "ACME_CHALLENGE_FILENAME";
    pub const CHALLENGE_FILE_CONTENT: &str = "ACME_CHALLENGE_FILE_CONTENT";
    pub const CLOUDFLARE_API_TOKEN: &str = "CLOUDFLARE_API_TOKEN";
    pub const CLOUDFLARE_EMAIL: &str = "CLOUDFLARE_EMAIL";
    pub const CLOUDFLARE_API_KEY: &str = "CLOUDFLARE_API_KEY";
    pub const CLOUDFLARE_ZONE_ID: &str = "CLOUDFLARE_ZONE_ID";
    pub const STORE_PATH: &str = "HEROCERT_STORE_PATH";
}

/// Domain validation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    /// HTTP-01: serve the proof below `/.well-known/acme-challenge/`
    File,
    /// DNS-01: publish the proof as a `_acme-challenge` TXT record
    Dns,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::File => "file",
            ChallengeType::Dns => "dns",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" | "http" | "http-01" => Ok(ChallengeType::File),
            "dns" | "dns-01" => Ok(ChallengeType::Dns),
            other => Err(crate::Error::config(format!(
                "Unsupported challenge type '{}'. Supported types: file, dns",
                other
            ))),
        }
    }
}

/// Hosting platform identity
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform API token
    pub token: String,
    /// Application name on the platform
    pub app: String,
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("token", &"<REDACTED>")
            .field("app", &self.app)
            .finish()
    }
}

/// DNS provider configuration (DNS-01 only)
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DnsProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Scoped API token (preferred)
        api_token: Option<String>,
        /// Account email, used with the global API key
        email: Option<String>,
        /// Global API key
        api_key: Option<String>,
        /// Zone ID (optional, auto-detected otherwise)
        zone_id: Option<String>,
    },
}

impl DnsProviderConfig {
    /// Validate the provider credentials
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            DnsProviderConfig::Cloudflare {
                api_token,
                email,
                api_key,
                ..
            } => {
                if is_set(api_token) || (is_set(email) && is_set(api_key)) {
                    Ok(())
                } else {
                    Err(crate::Error::config(format!(
                        "DNS challenges need {} or both {} and {}",
                        keys::CLOUDFLARE_API_TOKEN,
                        keys::CLOUDFLARE_EMAIL,
                        keys::CLOUDFLARE_API_KEY
                    )))
                }
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            DnsProviderConfig::Cloudflare { .. } => "cloudflare",
        }
    }
}

impl fmt::Debug for DnsProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsProviderConfig::Cloudflare { email, zone_id, .. } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<REDACTED>")
                .field("email", email)
                .field("api_key", &"<REDACTED>")
                .field("zone_id", zone_id)
                .finish(),
        }
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// The HTTP-01 artifact a serving process exposes
///
/// Written by the issuing process through platform config vars; never set by
/// the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeFile {
    /// Path relative to the site root, e.g. `.well-known/acme-challenge/abc123`
    pub filename: String,
    /// Key authorization served verbatim
    pub content: String,
}

impl ChallengeFile {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Whether this artifact can be served
    pub fn is_servable(&self) -> bool {
        self.filename.starts_with(CHALLENGE_PATH_PREFIX) && !self.content.is_empty()
    }

    /// Request path this artifact answers on
    pub fn request_path(&self) -> String {
        format!("/{}", self.filename)
    }
}

/// Polling and propagation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long a challenge may stay pending
    #[serde(default = "default_verification_timeout_secs")]
    pub verification_timeout_secs: u64,

    /// How long finalization may take
    #[serde(default = "default_finalization_timeout_secs")]
    pub finalization_timeout_secs: u64,

    /// Delay after creating a TXT record before requesting verification
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,
}

impl TimingConfig {
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }

    pub fn finalization_timeout(&self) -> Duration {
        Duration::from_secs(self.finalization_timeout_secs)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            verification_timeout_secs: default_verification_timeout_secs(),
            finalization_timeout_secs: default_finalization_timeout_secs(),
            propagation_delay_secs: default_propagation_delay_secs(),
        }
    }
}

fn default_verification_timeout_secs() -> u64 {
    120
}

fn default_finalization_timeout_secs() -> u64 {
    120
}

fn default_propagation_delay_secs() -> u64 {
    60
}

fn default_renewal_window_days() -> u32 {
    30
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

/// Main issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Hosting platform identity
    pub platform: PlatformConfig,

    /// ACME account contact email
    pub email: String,

    /// Domains the certificate covers
    pub domains: Vec<String>,

    /// ACME directory URL
    #[serde(default = "default_directory_url")]
    pub directory_url: String,

    /// Challenge strategy; `None` when the configured value was not recognized
    pub challenge_type: Option<ChallengeType>,

    /// DNS provider credentials (DNS-01)
    pub dns_provider: Option<DnsProviderConfig>,

    /// HTTP-01 artifact published for the serving process
    pub challenge_file: Option<ChallengeFile>,

    /// Expiry of the currently installed certificate
    pub cert_expires_at: Option<DateTime<Utc>>,

    /// Days before expiry at which renewal becomes due
    #[serde(default = "default_renewal_window_days")]
    pub renewal_window_days: u32,

    /// Whether the ACME terms of service were agreed to
    #[serde(default)]
    pub terms_agreed: bool,

    /// Polling and propagation timing
    #[serde(default)]
    pub timing: TimingConfig,

    /// Where to park issued certificates until upload succeeds
    pub store_path: Option<String>,
}

impl AcmeConfig {
    /// Create a configuration with defaults for everything but identity
    pub fn new(
        platform_token: impl Into<String>,
        platform_app: impl Into<String>,
        email: impl Into<String>,
        domains: Vec<String>,
    ) -> Self {
        Self {
            platform: PlatformConfig {
                token: platform_token.into(),
                app: platform_app.into(),
            },
            email: email.into(),
            domains,
            directory_url: default_directory_url(),
            challenge_type: Some(ChallengeType::File),
            dns_provider: None,
            challenge_file: None,
            cert_expires_at: None,
            renewal_window_days: default_renewal_window_days(),
            terms_agreed: false,
            timing: TimingConfig::default(),
            store_path: None,
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, crate::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key-value source
    ///
    /// Malformed numbers or dates are rejected here; missing values are left
    /// for [`AcmeConfig::validate`] to report.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, crate::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let challenge_type = match get(keys::CHALLENGE) {
            None => Some(ChallengeType::File),
            Some(raw) => raw.parse().ok(),
        };

        let dns_provider = Some(DnsProviderConfig::Cloudflare {
            api_token: get(keys::CLOUDFLARE_API_TOKEN),
            email: get(keys::CLOUDFLARE_EMAIL),
            api_key: get(keys::CLOUDFLARE_API_KEY),
            zone_id: get(keys::CLOUDFLARE_ZONE_ID),
        });

        let challenge_file = match (
            get(keys::CHALLENGE_FILENAME),
            lookup(keys::CHALLENGE_FILE_CONTENT),
        ) {
            (Some(filename), Some(content)) => Some(ChallengeFile { filename, content }),
            _ => None,
        };

        let cert_expires_at = match get(keys::CERT_EXPIRES_AT) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| {
                        crate::Error::config(format!(
                            "{} must be an RFC 3339 timestamp. Got '{}': {}",
                            keys::CERT_EXPIRES_AT,
                            raw,
                            e
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let terms_agreed = get(keys::TERMS_AGREED)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            platform: PlatformConfig {
                token: get(keys::PLATFORM_TOKEN).unwrap_or_default(),
                app: get(keys::PLATFORM_APP).unwrap_or_default(),
            },
            email: get(keys::EMAIL).unwrap_or_default(),
            domains: get(keys::DOMAIN)
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            directory_url: get(keys::ENDPOINT).unwrap_or_else(default_directory_url),
            challenge_type,
            dns_provider,
            challenge_file,
            cert_expires_at,
            renewal_window_days: parse_number(
                &get,
                keys::RENEWAL_WINDOW_DAYS,
                default_renewal_window_days(),
            )?,
            terms_agreed,
            timing: TimingConfig {
                verification_timeout_secs: parse_number(
                    &get,
                    keys::VERIFICATION_TIMEOUT_SECS,
                    default_verification_timeout_secs(),
                )?,
                finalization_timeout_secs: parse_number(
                    &get,
                    keys::FINALIZATION_TIMEOUT_SECS,
                    default_finalization_timeout_secs(),
                )?,
                propagation_delay_secs: parse_number(
                    &get,
                    keys::DNS_PROPAGATION_SECS,
                    default_propagation_delay_secs(),
                )?,
            },
            store_path: get(keys::STORE_PATH),
        })
    }

    /// Validate the configuration
    ///
    /// Reports the first missing or malformed field.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.platform.token.is_empty() {
            return Err(crate::Error::config(format!(
                "{} is required",
                keys::PLATFORM_TOKEN
            )));
        }
        if self.platform.app.is_empty() {
            return Err(crate::Error::config(format!(
                "{} is required",
                keys::PLATFORM_APP
            )));
        }
        if self.email.is_empty() {
            return Err(crate::Error::config(format!("{} is required", keys::EMAIL)));
        }
        if self.domains.is_empty() {
            return Err(crate::Error::config(format!(
                "{} must contain at least one domain",
                keys::DOMAIN
            )));
        }
        if self.directory_url.is_empty() {
            return Err(crate::Error::config(format!(
                "{} cannot be empty",
                keys::ENDPOINT
            )));
        }

        match self.challenge_type {
            None => Err(crate::Error::config(format!(
                "{} must be 'file' or 'dns'",
                keys::CHALLENGE
            ))),
            Some(ChallengeType::Dns) => match &self.dns_provider {
                Some(provider) => provider.validate(),
                None => Err(crate::Error::config(
                    "DNS challenges need a DNS provider configuration",
                )),
            },
            Some(ChallengeType::File) => match &self.challenge_file {
                Some(file) if !file.filename.starts_with(CHALLENGE_PATH_PREFIX) => {
                    Err(crate::Error::config(format!(
                        "{} must start with '{}'. Got: {}",
                        keys::CHALLENGE_FILENAME,
                        CHALLENGE_PATH_PREFIX,
                        file.filename
                    )))
                }
                Some(file) if file.content.is_empty() => Err(crate::Error::config(format!(
                    "{} cannot be empty",
                    keys::CHALLENGE_FILE_CONTENT
                ))),
                _ => Ok(()),
            },
        }
    }

    /// Whether every field required by the selected challenge type is set
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Lead time before expiry at which renewal becomes due
    pub fn renewal_window(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.renewal_window_days))
    }

    /// Whether issuance should run at `now`
    ///
    /// True iff `expiry - renewal_window <= now`. Without a recorded expiry
    /// no certificate has been issued yet, so renewal is due. A window
    /// reaching past the earliest representable time is always due.
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        match self.cert_expires_at {
            Some(expiry) => expiry
                .checked_sub_signed(self.renewal_window())
                .is_none_or(|due| due <= now),
            None => true,
        }
    }

    /// The servable HTTP-01 artifact, if this process has one
    pub fn challenge_file(&self) -> Option<&ChallengeFile> {
        self.challenge_file.as_ref().filter(|f| f.is_servable())
    }

    /// Set the challenge type
    pub fn with_challenge_type(mut self, challenge_type: ChallengeType) -> Self {
        self.challenge_type = Some(challenge_type);
        self
    }

    /// Set the DNS provider
    pub fn with_dns_provider(mut self, provider: DnsProviderConfig) -> Self {
        self.dns_provider = Some(provider);
        self
    }

    /// Set the current certificate expiry
    pub fn with_cert_expires_at(mut self, expiry: DateTime<Utc>) -> Self {
        self.cert_expires_at = Some(expiry);
        self
    }

    /// Set the renewal window
    pub fn with_renewal_window_days(mut self, days: u32) -> Self {
        self.renewal_window_days = days;
        self
    }

    /// Set polling and propagation timing
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }
}

fn parse_number<T, G>(get: &G, key: &str, default: T) -> Result<T, crate::Error>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e| {
            crate::Error::config(format!("{} must be a number. Got '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
