//! HTTP-01 responder
//!
//! The proof lives in a [`ChallengeSlot`] shared with the request path of the
//! serving process. When a platform is attached the proof is also published
//! as config vars, so every web process of the app restarts with it and
//! serves it from its own slot.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{AcmeConfig, ChallengeFile, ChallengeType, keys};
use crate::error::{Error, Result};
use crate::traits::{CertificatePlatform, Challenge, ChallengeResponder, ResponderHandle};

/// Content type of every challenge response
pub const CHALLENGE_CONTENT_TYPE: &str = "text/plain";

/// Response for a request that hit the active challenge path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// The currently published HTTP-01 artifact
///
/// Written once per activation, read by every inbound request. Cloning
/// shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct ChallengeSlot {
    inner: Arc<RwLock<Option<ChallengeFile>>>,
}

impl ChallengeSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot pre-filled from the process configuration
    ///
    /// Only a servable artifact is loaded; anything else leaves the slot empty.
    pub fn from_config(config: &AcmeConfig) -> Self {
        let slot = Self::new();
        if let Some(file) = config.challenge_file() {
            slot.set(file.clone());
        }
        slot
    }

    /// Publish an artifact, replacing the previous one
    pub fn set(&self, file: ChallengeFile) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(file);
    }

    /// Remove the published artifact
    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// The published artifact, if any
    pub fn current(&self) -> Option<ChallengeFile> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Answer a request path
    ///
    /// Returns `None` for every path except the active artifact's, so the
    /// caller passes the request on unchanged.
    pub fn respond(&self, path: &str) -> Option<ChallengeResponse> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let file = guard.as_ref().filter(|f| f.is_servable())?;

        if path != file.request_path() {
            return None;
        }

        Some(ChallengeResponse {
            status: 200,
            content_type: CHALLENGE_CONTENT_TYPE,
            body: file.content.clone(),
        })
    }
}

/// File (HTTP-01) challenge responder
pub struct FileResponder {
    slot: ChallengeSlot,
    platform: Option<Arc<dyn CertificatePlatform>>,
}

impl FileResponder {
    /// Responder that only writes the local slot
    pub fn new(slot: ChallengeSlot) -> Self {
        Self {
            slot,
            platform: None,
        }
    }

    /// Also publish the artifact through platform config vars
    pub fn with_platform(mut self, platform: Arc<dyn CertificatePlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// The slot this responder writes
    pub fn slot(&self) -> &ChallengeSlot {
        &self.slot
    }

    async fn publish(&self, file: Option<&ChallengeFile>) -> Result<()> {
        let Some(platform) = &self.platform else {
            return Ok(());
        };

        let mut vars = BTreeMap::new();
        vars.insert(
            keys::CHALLENGE_FILENAME.to_string(),
            file.map(|f| f.filename.clone()),
        );
        vars.insert(
            keys::CHALLENGE_FILE_CONTENT.to_string(),
            file.map(|f| f.content.clone()),
        );

        debug!(
            "Updating challenge config vars on {}",
            platform.platform_name()
        );
        platform.set_config_vars(&vars).await
    }
}

#[async_trait]
impl ChallengeResponder for FileResponder {
    async fn activate(&self, challenge: &Challenge) -> Result<ResponderHandle> {
        let file = ChallengeFile::new(challenge.target.clone(), challenge.proof.clone());
        if !file.is_servable() {
            return Err(Error::config(format!(
                "Challenge path '{}' cannot be served",
                file.filename
            )));
        }

        if let Err(e) = self.publish(Some(&file)).await {
            if let Err(unset) = self.publish(None).await {
                warn!("Failed to withdraw challenge config vars: {}", unset);
            }
            return Err(e);
        }
        self.slot.set(file.clone());

        info!(
            "Serving challenge for {} at {}",
            challenge.domain,
            file.request_path()
        );

        Ok(ResponderHandle::File {
            domain: challenge.domain.clone(),
            filename: file.filename,
        })
    }

    async fn deactivate(&self, handle: ResponderHandle) -> Result<()> {
        let ResponderHandle::File { domain, filename } = handle else {
            return Err(Error::Other("File responder received a DNS handle".into()));
        };

        if self
            .slot
            .current()
            .is_some_and(|current| current.filename == filename)
        {
            self.slot.clear();
        }
        self.publish(None).await?;

        debug!("Challenge for {} withdrawn", domain);
        Ok(())
    }

    fn strategy(&self) -> ChallengeType {
        ChallengeType::File
    }
}
