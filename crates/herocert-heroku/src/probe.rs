// # HTTP Challenge Probe
//
// Fetches a published HTTP-01 artifact over plain HTTP. Redirects are not
// followed: the ACME server would see the same redirect, so a host that
// forces HTTPS before the responder has a chance to answer counts as a
// failed fetch.

use async_trait::async_trait;
use herocert_core::traits::ChallengeProbe;
use herocert_core::{Error, Result};
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest-backed challenge probe
#[derive(Debug, Clone)]
pub struct HttpChallengeProbe {
    client: reqwest::Client,
}

impl HttpChallengeProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ChallengeProbe for HttpChallengeProbe {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::challenge_url(url, format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("<none>");
            return Err(Error::challenge_url(
                url,
                format!("redirection forbidden ({} to {})", status, location),
            ));
        }
        if !status.is_success() {
            return Err(Error::challenge_url(url, format!("HTTP error: {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| Error::challenge_url(url, format!("Failed to read response: {}", e)))
    }
}
