// # Heroku Platform
//
// `CertificatePlatform` backed by the Heroku Platform API v3.
//
// ## API Reference
//
// - Update Config Vars: PATCH `/apps/:app/config-vars` (`null` removes a var)
// - List Domains: GET `/apps/:app/domains`
// - List SNI Endpoints: GET `/apps/:app/sni-endpoints`
// - Update SNI Endpoint: PATCH `/apps/:app/sni-endpoints/:id`
// - Create SNI Endpoint: POST `/apps/:app/sni-endpoints`
//
// Every request carries `Accept: application/vnd.heroku+json; version=3`
// and the API token as a bearer token.

use async_trait::async_trait;
use herocert_core::config::PlatformConfig;
use herocert_core::traits::{Certificate, CertificatePlatform, ConfigVars};
use herocert_core::{Error, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

/// Heroku Platform API base URL
pub const HEROKU_API_BASE: &str = "https://api.heroku.com";

const HEROKU_ACCEPT: &str = "application/vnd.heroku+json; version=3";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Heroku application as a certificate platform
pub struct HerokuPlatform {
    /// ⚠️ NEVER log this value
    token: String,
    app: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HerokuPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HerokuPlatform")
            .field("token", &"<REDACTED>")
            .field("app", &self.app)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HerokuPlatform {
    /// Create a client for `config.app`
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        if config.token.trim().is_empty() || config.app.trim().is_empty() {
            return Err(Error::config("Heroku token and app name are required"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::platform(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token: config.token.clone(),
            app: config.app.clone(),
            base_url: HEROKU_API_BASE.to_string(),
            client,
        })
    }

    /// Point the client at another API endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/apps/{}{}", self.base_url, self.app, path);
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", HEROKU_ACCEPT)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::platform(format!("{}: HTTP request failed: {}", action, e)))?;

        let response = check_status(response, action).await?;

        response
            .json()
            .await
            .map_err(|e| Error::platform(format!("{}: failed to parse response: {}", action, e)))
    }

    async fn sni_endpoint_id(&self) -> Result<Option<String>> {
        let endpoints = self
            .send(self.request(Method::GET, "/sni-endpoints"), "List SNI endpoints")
            .await?;

        let endpoints = endpoints.as_array().ok_or_else(|| {
            Error::platform("Invalid response format: sni-endpoints is not an array")
        })?;

        if endpoints.len() > 1 {
            tracing::warn!(
                "{} has {} SNI endpoints, updating the first",
                self.app,
                endpoints.len()
            );
        }

        Ok(endpoints
            .first()
            .and_then(|e| e["id"].as_str())
            .map(str::to_string))
    }
}

#[async_trait]
impl CertificatePlatform for HerokuPlatform {
    async fn set_config_vars(&self, vars: &ConfigVars) -> Result<()> {
        let names: Vec<&str> = vars.keys().map(String::as_str).collect();
        tracing::debug!("Updating config vars on {}: {}", self.app, names.join(", "));

        self.send(
            self.request(Method::PATCH, "/config-vars").json(vars),
            "Update config vars",
        )
        .await?;
        Ok(())
    }

    async fn upload_certificate(&self, certificate: &Certificate) -> Result<()> {
        let payload = serde_json::json!({
            "certificate_chain": certificate.chain_pem,
            "private_key": certificate.private_key_pem,
        });

        match self.sni_endpoint_id().await? {
            Some(id) => {
                tracing::info!("Updating SNI endpoint {} on {}", id, self.app);
                self.send(
                    self.request(Method::PATCH, &format!("/sni-endpoints/{}", id))
                        .json(&payload),
                    "Update SNI endpoint",
                )
                .await?;
            }
            None => {
                tracing::info!("Creating SNI endpoint on {}", self.app);
                self.send(
                    self.request(Method::POST, "/sni-endpoints").json(&payload),
                    "Create SNI endpoint",
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn primary_hostname(&self) -> Result<Option<String>> {
        let domains = self
            .send(self.request(Method::GET, "/domains"), "List domains")
            .await?;

        Ok(domains
            .as_array()
            .and_then(|list| list.first())
            .and_then(|d| d["hostname"].as_str())
            .map(str::to_string))
    }

    fn platform_name(&self) -> &'static str {
        "heroku"
    }
}

async fn check_status(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    // Heroku errors look like {"id": "forbidden", "message": "..."}
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or(body);

    let message = match status.as_u16() {
        401 | 403 => format!("{}: authentication failed ({}): {}", action, status, detail),
        404 => format!("{}: app not found ({}): {}", action, status, detail),
        422 => format!("{}: rejected ({}): {}", action, status, detail),
        429 => format!("{}: rate limit exceeded ({})", action, status),
        _ => format!("{}: {} - {}", action, status, detail),
    };

    Err(Error::platform(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_token_and_app() {
        let config = PlatformConfig {
            token: String::new(),
            app: "my-app".into(),
        };
        assert!(matches!(HerokuPlatform::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_token_not_exposed_in_debug() {
        let config = PlatformConfig {
            token: "heroku-secret-token".into(),
            app: "my-app".into(),
        };
        let platform = HerokuPlatform::new(&config).unwrap();
        let debug_str = format!("{:?}", platform);
        assert!(!debug_str.contains("heroku-secret-token"));
        assert!(debug_str.contains("my-app"));
    }
}
