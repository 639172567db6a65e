// # Cloudflare DNS Provider
//
// Cloudflare implementation of the DNS-01 `DnsProvider` trait.
//
// - Zone lookup by configured ID or by walking the domain's parent names
// - TXT record listing, creation and deletion through API v4
// - Status-specific error messages (401/403, 404, 429, 5xx)
// - Dry-run mode: lookups run, changes are only logged
//
// The provider does not retry, back off or cache. A failed call is returned
// to the issuance engine as `Error::DnsProvider`.
//
// ## Security Requirements
//
// - Credentials NEVER appear in logs or in Debug output
// - Credentials come from environment variables only
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=TXT&name.startswith=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use herocert_core::config::DnsProviderConfig;
use herocert_core::traits::{DnsProvider, DnsProviderFactory, DnsZone, TxtRecord};
use herocert_core::{Error, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Environment variable that switches the provider to dry-run mode
pub const DNS_MODE_ENV: &str = "HEROCERT_DNS_MODE";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL of challenge records, the lowest Cloudflare accepts
const CHALLENGE_RECORD_TTL: u32 = 60;

/// Page size for record listings
const LIST_PAGE_SIZE: u32 = 100;

const PROVIDER_NAME: &str = "cloudflare";

/// Cloudflare credentials
#[derive(Clone)]
pub enum CloudflareAuth {
    /// Scoped API token with Zone:DNS:Edit permission
    Token(String),
    /// Account email with the global API key
    GlobalKey { email: String, api_key: String },
}

impl CloudflareAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            CloudflareAuth::Token(token) => request.bearer_auth(token),
            CloudflareAuth::GlobalKey { email, api_key } => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", api_key),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            CloudflareAuth::Token(token) => token.trim().is_empty(),
            CloudflareAuth::GlobalKey { email, api_key } => {
                email.trim().is_empty() || api_key.trim().is_empty()
            }
        }
    }
}

impl std::fmt::Debug for CloudflareAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudflareAuth::Token(_) => f.write_str("Token(<REDACTED>)"),
            CloudflareAuth::GlobalKey { email, .. } => f
                .debug_struct("GlobalKey")
                .field("email", email)
                .field("api_key", &"<REDACTED>")
                .finish(),
        }
    }
}

/// Cloudflare DNS provider
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the provider will:
/// - Perform all GET requests (zone lookup, record listing)
/// - Log the intended POST and DELETE requests
/// - **NOT** change any DNS record
///
/// # Security
///
/// The Debug implementation does NOT expose credentials.
pub struct CloudflareProvider {
    auth: CloudflareAuth,
    /// Zone ID (optional, auto-detected from the domain otherwise)
    zone_id: Option<String>,
    base_url: String,
    client: reqwest::Client,
    dry_run: bool,
}

impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("auth", &self.auth)
            .field("zone_id", &self.zone_id)
            .field("base_url", &self.base_url)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// Fails when the credentials are empty or the HTTP client cannot be built.
    pub fn new(auth: CloudflareAuth, zone_id: Option<String>, dry_run: bool) -> Result<Self> {
        if auth.is_empty() {
            return Err(Error::config("Cloudflare credentials cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| provider_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            auth,
            zone_id: zone_id.filter(|id| !id.trim().is_empty()),
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client,
            dry_run,
        })
    }

    /// Point the provider at another API endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.auth
            .apply(self.client.request(method, url))
            .header("Content-Type", "application/json")
    }

    /// Send a request and unwrap the `result` field of the v4 envelope
    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| provider_error(format!("HTTP request failed: {}", e)))?;

        let response = check_status(response, action).await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| provider_error(format!("Failed to parse response: {}", e)))?;

        if json["success"].as_bool() == Some(false) {
            return Err(provider_error(format!(
                "{} failed: {}",
                action,
                api_errors(&json)
            )));
        }

        Ok(json["result"].clone())
    }

    async fn find_zone(&self, name: &str) -> Result<Option<DnsZone>> {
        tracing::debug!("Looking up zone: {}", name);

        let request = self
            .request(Method::GET, "/zones")
            .query(&[("name", name)]);
        let result = self.send(request, "Zone lookup").await?;

        let zones = result
            .as_array()
            .ok_or_else(|| provider_error("Invalid response format: result is not an array"))?;

        let Some(zone) = zones.first() else {
            return Ok(None);
        };

        let id = zone["id"]
            .as_str()
            .ok_or_else(|| provider_error("Invalid response format: zone.id is not a string"))?;

        Ok(Some(DnsZone {
            id: id.to_string(),
            name: zone["name"].as_str().unwrap_or(name).to_string(),
        }))
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    /// Resolve the zone owning `domain`
    ///
    /// Tries the domain itself, then each parent with at least two labels:
    /// `_acme-challenge.app.example.co.uk` is looked up as `app.example.co.uk`,
    /// `example.co.uk`, `co.uk`.
    async fn resolve_zone(&self, domain: &str) -> Result<DnsZone> {
        let domain = domain.trim_start_matches("*.").trim_end_matches('.');

        if let Some(zone_id) = &self.zone_id {
            tracing::debug!("Using pre-configured zone ID");
            return Ok(DnsZone {
                id: zone_id.clone(),
                name: domain.to_string(),
            });
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 {
            return Err(Error::config(format!("Invalid domain name: {}", domain)));
        }

        for start in 0..=labels.len() - 2 {
            let candidate = labels[start..].join(".");
            if let Some(zone) = self.find_zone(&candidate).await? {
                tracing::debug!("Found zone {} ({}) for {}", zone.name, zone.id, domain);
                return Ok(zone);
            }
        }

        Err(provider_error(format!("No Cloudflare zone found for {}", domain)))
    }

    async fn list_txt_records(&self, zone: &DnsZone, prefix: &str) -> Result<Vec<TxtRecord>> {
        let page_size = LIST_PAGE_SIZE.to_string();
        let request = self
            .request(Method::GET, &format!("/zones/{}/dns_records", zone.id))
            .query(&[
                ("type", "TXT"),
                ("name.startswith", prefix),
                ("per_page", page_size.as_str()),
            ]);
        let result = self.send(request, "Record listing").await?;

        let records = result
            .as_array()
            .ok_or_else(|| provider_error("Invalid response format: result is not an array"))?;

        let matching: Vec<TxtRecord> = records
            .iter()
            .filter_map(|record| {
                Some(TxtRecord {
                    id: record["id"].as_str()?.to_string(),
                    name: record["name"].as_str()?.to_string(),
                    content: record["content"]
                        .as_str()
                        .unwrap_or_default()
                        .trim_matches('"')
                        .to_string(),
                })
            })
            .filter(|record| record.name.starts_with(prefix))
            .collect();

        tracing::debug!("Found {} TXT record(s) under {}", matching.len(), prefix);
        Ok(matching)
    }

    async fn delete_record(&self, zone: &DnsZone, record_id: &str) -> Result<()> {
        let path = format!("/zones/{}/dns_records/{}", zone.id, record_id);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would send DELETE request to {}", path);
            return Ok(());
        }

        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| provider_error(format!("HTTP request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Record {} already gone", record_id);
            return Ok(());
        }

        check_status(response, "Record deletion").await?;
        tracing::debug!("Deleted record {}", record_id);
        Ok(())
    }

    async fn create_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
        content: &str,
    ) -> Result<TxtRecord> {
        let payload = serde_json::json!({
            "type": "TXT",
            "name": name,
            "content": content,
            "ttl": CHALLENGE_RECORD_TTL,
        });

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would create TXT record {} in zone {}",
                name,
                zone.name
            );
            return Ok(TxtRecord {
                id: "dry-run".to_string(),
                name: name.to_string(),
                content: content.to_string(),
            });
        }

        let request = self
            .request(Method::POST, &format!("/zones/{}/dns_records", zone.id))
            .json(&payload);
        let result = self.send(request, "Record creation").await?;

        let id = result["id"]
            .as_str()
            .ok_or_else(|| provider_error("Invalid response format: record.id is not a string"))?;

        tracing::info!("Created TXT record {} ({})", name, id);
        Ok(TxtRecord {
            id: id.to_string(),
            name: name.to_string(),
            content: content.to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

fn provider_error(message: impl Into<String>) -> Error {
    Error::dns_provider(PROVIDER_NAME, message)
}

/// Map a non-success status to a provider error
async fn check_status(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    let message = match status.as_u16() {
        401 | 403 => format!(
            "Authentication failed: invalid credentials or insufficient permissions. Status: {}",
            status
        ),
        404 => format!("{} failed: not found. Status: {}", action, status),
        429 => format!("Rate limit exceeded. Please retry later. Status: {}", status),
        500..=599 => format!(
            "Cloudflare server error (transient): {} - {}",
            status, error_text
        ),
        _ => format!("{} failed: {} - {}", action, status, error_text),
    };

    Err(provider_error(message))
}

/// Join the `errors[].message` entries of a v4 envelope
fn api_errors(json: &Value) -> String {
    let messages: Vec<String> = json["errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e["message"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        "unknown error".to_string()
    } else {
        messages.join("; ")
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &DnsProviderConfig) -> Result<Arc<dyn DnsProvider>> {
        config.validate()?;

        let DnsProviderConfig::Cloudflare {
            api_token,
            email,
            api_key,
            zone_id,
        } = config;

        let auth = match (api_token, email, api_key) {
            (Some(token), _, _) if !token.trim().is_empty() => CloudflareAuth::Token(token.clone()),
            (_, Some(email), Some(api_key)) => CloudflareAuth::GlobalKey {
                email: email.clone(),
                api_key: api_key.clone(),
            },
            _ => return Err(Error::config("Cloudflare credentials are required")),
        };

        let dry_run = std::env::var(DNS_MODE_ENV)
            .unwrap_or_default()
            .eq_ignore_ascii_case("dry-run");

        if dry_run {
            tracing::warn!("Cloudflare provider running in DRY-RUN mode - no changes will be made");
        }

        Ok(Arc::new(CloudflareProvider::new(auth, zone_id.clone(), dry_run)?))
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use herocert_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// herocert_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &herocert_core::ProviderRegistry) {
    registry.register_provider(PROVIDER_NAME, Box::new(CloudflareFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_config(token: &str) -> DnsProviderConfig {
        DnsProviderConfig::Cloudflare {
            api_token: Some(token.to_string()),
            email: None,
            api_key: None,
            zone_id: Some("zone123".to_string()),
        }
    }

    #[test]
    fn test_factory_creation() {
        assert!(CloudflareFactory.create(&token_config("test_token")).is_ok());
    }

    #[test]
    fn test_factory_accepts_global_key() {
        let config = DnsProviderConfig::Cloudflare {
            api_token: None,
            email: Some("ops@example.com".into()),
            api_key: Some("global-key".into()),
            zone_id: None,
        };
        assert!(CloudflareFactory.create(&config).is_ok());
    }

    #[test]
    fn test_factory_missing_credentials() {
        let err = CloudflareFactory.create(&token_config("")).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let result = CloudflareProvider::new(CloudflareAuth::Token(String::new()), None, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_name() {
        let provider =
            CloudflareProvider::new(CloudflareAuth::Token("token".into()), None, false).unwrap();
        assert_eq!(provider.provider_name(), "cloudflare");
    }

    #[test]
    fn test_credentials_not_exposed_in_debug() {
        let provider =
            CloudflareProvider::new(CloudflareAuth::Token("secret_token_12345".into()), None, false)
                .unwrap();
        let debug_str = format!("{:?}", provider);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("CloudflareProvider"));

        let auth = CloudflareAuth::GlobalKey {
            email: "ops@example.com".into(),
            api_key: "global_key_67890".into(),
        };
        assert!(!format!("{:?}", auth).contains("global_key_67890"));
    }

    #[tokio::test]
    async fn test_preconfigured_zone_skips_lookup() {
        // Unroutable base URL: any request would fail
        let provider = CloudflareProvider::new(
            CloudflareAuth::Token("token".into()),
            Some("zone123".into()),
            false,
        )
        .unwrap()
        .with_base_url("http://127.0.0.1:9");

        let zone = provider.resolve_zone("*.example.com").await.unwrap();
        assert_eq!(zone.id, "zone123");
        assert_eq!(zone.name, "example.com");
    }

    #[test]
    fn test_api_errors_joined() {
        let json = serde_json::json!({
            "success": false,
            "errors": [{"code": 81057, "message": "Record already exists."}, {"message": "second"}]
        });
        assert_eq!(api_errors(&json), "Record already exists.; second");
        assert_eq!(api_errors(&serde_json::json!({})), "unknown error");
    }
}
