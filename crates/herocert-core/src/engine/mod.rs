//! Issuance engine
//!
//! The IssuanceEngine runs one certificate issuance attempt end to end:
//! - Decides whether renewal is due
//! - Orders a certificate and answers its challenges
//! - Installs the certificate on the hosting platform
//!
//! ## Architecture
//!
//! ```text
//!                      ┌────────────────┐
//!                      │ IssuanceEngine │
//!                      └────────────────┘
//!                              │
//!     ┌──────────────┬─────────┼──────────────┬──────────────┐
//!     ▼              ▼         ▼              ▼              ▼
//! ┌────────┐  ┌───────────┐ ┌───────┐  ┌──────────┐  ┌─────────────┐
//! │  ACME  │  │ Responder │ │ Probe │  │ Platform │  │   Events    │
//! │ server │  │ file/dns  │ │(file) │  │ (upload) │  │  (notify)   │
//! └────────┘  └───────────┘ └───────┘  └──────────┘  └─────────────┘
//! ```
//!
//! ## Flow
//!
//! 1. Renewal check (no network when not due)
//! 2. Upload a certificate left over from an earlier run, if any
//! 3. Create order, fetch challenges for the configured type
//! 4. Per challenge: publish proof, self-test (file), request verification,
//!    poll, withdraw proof
//! 5. Wait for the order to be ready, finalize, wait for it to be valid
//! 6. Download, park, upload, record the new expiry
//!
//! Any failure aborts the remaining steps. A proof that was published is
//! always withdrawn, whether its challenge succeeded or not.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{AcmeConfig, ChallengeType, keys};
use crate::error::{Error, ErrorKind, Result};
use crate::poller::{self, RetryPolicy};
use crate::traits::{
    AcmeService, Certificate, CertificatePlatform, CertificateStore, Challenge, ChallengeProbe,
    ChallengeResponder, OrderStatus,
};

/// Capacity of the engine event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by the IssuanceEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Run started
    Started { domains: Vec<String> },

    /// Current certificate is outside the renewal window
    NotDue { expires_at: Option<DateTime<Utc>> },

    /// ACME order created
    OrderCreated { order_url: String },

    /// Proof published for a challenge
    ChallengeActivated {
        domain: String,
        challenge_type: ChallengeType,
    },

    /// ACME server validated a challenge
    ChallengeValidated { domain: String },

    /// Certificate downloaded
    CertificateIssued {
        domains: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    },

    /// Certificate installed on the platform
    CertificateUploaded { domains: Vec<String> },

    /// Run failed
    Failed { kind: ErrorKind, error: String },
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceOutcome {
    /// Renewal not due, nothing was done
    NotDue { expires_at: Option<DateTime<Utc>> },
    /// A certificate parked by an earlier run was uploaded
    Recovered {
        domains: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// A new certificate was issued and uploaded
    Issued {
        domains: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Certificate issuance engine
///
/// ## Lifecycle
///
/// 1. Create with [`IssuanceEngine::new()`]
/// 2. Optionally attach a probe and a certificate store
/// 3. Call [`IssuanceEngine::run()`] once per scheduled invocation
///
/// ## Threading
///
/// One run is a strictly sequential chain of awaited calls. Nothing is
/// spawned; dropping the future abandons the run.
pub struct IssuanceEngine {
    config: AcmeConfig,
    acme: Box<dyn AcmeService>,
    responder: Arc<dyn ChallengeResponder>,
    platform: Arc<dyn CertificatePlatform>,
    probe: Option<Box<dyn ChallengeProbe>>,
    store: Option<Box<dyn CertificateStore>>,
    /// Primary hostname, looked up once per engine
    hostname: OnceCell<Option<String>>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl IssuanceEngine {
    /// Create a new issuance engine
    ///
    /// Fails with [`Error::Config`] when the configuration is invalid or the
    /// responder does not answer the configured challenge type.
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        config: AcmeConfig,
        acme: Box<dyn AcmeService>,
        responder: Arc<dyn ChallengeResponder>,
        platform: Arc<dyn CertificatePlatform>,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let Some(challenge_type) = config.challenge_type else {
            return Err(Error::config(format!("{} is not recognized", keys::CHALLENGE)));
        };
        if responder.strategy() != challenge_type {
            return Err(Error::config(format!(
                "Responder answers {} challenges but {} is configured",
                responder.strategy(),
                challenge_type
            )));
        }

        if !config.terms_agreed {
            warn!(
                "{} is not set; account registration implies agreeing to the CA's terms of service",
                keys::TERMS_AGREED
            );
        }

        let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);

        let engine = Self {
            config,
            acme,
            responder,
            platform,
            probe: None,
            store: None,
            hostname: OnceCell::new(),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Self-test file challenges with this probe before requesting verification
    pub fn with_probe(mut self, probe: Box<dyn ChallengeProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Park issued certificates in this store until they are uploaded
    pub fn with_store(mut self, store: Box<dyn CertificateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one issuance attempt at the current time
    pub async fn run_now(&self) -> Result<IssuanceOutcome> {
        self.run(Utc::now()).await
    }

    /// Run one issuance attempt as of `now`
    pub async fn run(&self, now: DateTime<Utc>) -> Result<IssuanceOutcome> {
        let result = self.run_internal(now).await;
        if let Err(e) = &result {
            error!("Issuance for {} failed: {}", self.config.domains.join(","), e);
            self.emit_event(EngineEvent::Failed {
                kind: e.kind(),
                error: e.to_string(),
            });
        }
        result
    }

    async fn run_internal(&self, now: DateTime<Utc>) -> Result<IssuanceOutcome> {
        let domains = self.config.domains.clone();
        self.emit_event(EngineEvent::Started {
            domains: domains.clone(),
        });

        if !self.config.needs_renewal(now) {
            let expires_at = self.config.cert_expires_at;
            info!(
                "Certificate for {} valid until {:?}, renewal not due",
                domains.join(","),
                expires_at
            );
            self.emit_event(EngineEvent::NotDue { expires_at });
            return Ok(IssuanceOutcome::NotDue { expires_at });
        }

        if let Some(certificate) = self.take_parked_certificate().await? {
            info!(
                "Uploading certificate for {} left over from an earlier run",
                certificate.domains.join(",")
            );
            self.install(&certificate).await?;
            return Ok(IssuanceOutcome::Recovered {
                domains: certificate.domains,
                expires_at: certificate.not_after,
            });
        }

        let certificate = self.issue().await?;
        self.park(&certificate).await;
        self.install(&certificate).await?;

        Ok(IssuanceOutcome::Issued {
            domains: certificate.domains,
            expires_at: certificate.not_after,
        })
    }

    /// Order, validate and download a new certificate
    async fn issue(&self) -> Result<Certificate> {
        let timing = &self.config.timing;
        let challenge_type = self.responder.strategy();

        let order = self.acme.create_order(&self.config.domains).await?;
        info!("Created order {} for {}", order.url, order.domains.join(","));
        self.emit_event(EngineEvent::OrderCreated {
            order_url: order.url.clone(),
        });

        let challenges = self.acme.challenges(&order, challenge_type).await?;
        debug!("{} challenge(s) to answer", challenges.len());

        for challenge in &challenges {
            self.answer(challenge).await?;
        }

        let status = poller::poll_order_ready(
            self.acme.as_ref(),
            &order,
            RetryPolicy::verification(timing.verification_timeout()),
        )
        .await?;

        if status == OrderStatus::Ready {
            self.acme.finalize_order(&order).await?;
        }
        poller::poll_order(
            self.acme.as_ref(),
            &order,
            RetryPolicy::finalization(timing.finalization_timeout()),
        )
        .await?;

        let certificate = self.acme.certificate(&order).await?;
        info!(
            "Certificate issued for {}, expires {:?}",
            certificate.domains.join(","),
            certificate.not_after
        );
        self.emit_event(EngineEvent::CertificateIssued {
            domains: certificate.domains.clone(),
            expires_at: certificate.not_after,
        });

        Ok(certificate)
    }

    /// Publish the proof for one challenge, get it validated, withdraw it
    async fn answer(&self, challenge: &Challenge) -> Result<()> {
        let handle = self.responder.activate(challenge).await?;
        self.emit_event(EngineEvent::ChallengeActivated {
            domain: challenge.domain.clone(),
            challenge_type: challenge.challenge_type,
        });

        let result = self.validate(challenge).await;

        if let Err(e) = self.responder.deactivate(handle).await {
            warn!("Failed to withdraw challenge for {}: {}", challenge.domain, e);
        }

        if result.is_ok() {
            self.emit_event(EngineEvent::ChallengeValidated {
                domain: challenge.domain.clone(),
            });
        }
        result
    }

    async fn validate(&self, challenge: &Challenge) -> Result<()> {
        if challenge.challenge_type == ChallengeType::File
            && let Some(probe) = &self.probe
        {
            let host = self.self_test_host(challenge).await;
            let url = format!("http://{}/{}", host, challenge.target);
            poller::self_test(probe.as_ref(), &url, &challenge.proof, RetryPolicy::self_test())
                .await?;
        }

        self.acme.request_verification(challenge).await?;
        poller::poll_challenge(
            self.acme.as_ref(),
            challenge,
            RetryPolicy::verification(self.config.timing.verification_timeout()),
        )
        .await
    }

    /// Host the self-test fetches from: the platform's hostname, else the domain
    async fn self_test_host(&self, challenge: &Challenge) -> String {
        let hostname = self
            .hostname
            .get_or_init(|| async {
                match self.platform.primary_hostname().await {
                    Ok(hostname) => hostname,
                    Err(e) => {
                        warn!("Could not look up primary hostname: {}", e);
                        None
                    }
                }
            })
            .await;

        hostname
            .clone()
            .unwrap_or_else(|| challenge.domain.trim_start_matches("*.").to_string())
    }

    /// Parked certificate for the configured domains, if any
    async fn take_parked_certificate(&self) -> Result<Option<Certificate>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let Some(certificate) = store.load_pending().await? else {
            return Ok(None);
        };

        if certificate.domains != self.config.domains {
            warn!(
                "Discarding parked certificate for {} (configured: {})",
                certificate.domains.join(","),
                self.config.domains.join(",")
            );
            store.clear_pending().await?;
            return Ok(None);
        }

        Ok(Some(certificate))
    }

    async fn park(&self, certificate: &Certificate) {
        if let Some(store) = &self.store
            && let Err(e) = store.save_pending(certificate).await
        {
            warn!("Failed to park certificate before upload: {}", e);
        }
    }

    /// Upload, record the expiry, then drop the parked copy
    async fn install(&self, certificate: &Certificate) -> Result<()> {
        self.platform.upload_certificate(certificate).await?;
        info!(
            "Certificate for {} installed on {}",
            certificate.domains.join(","),
            self.platform.platform_name()
        );
        self.emit_event(EngineEvent::CertificateUploaded {
            domains: certificate.domains.clone(),
        });

        match certificate.not_after {
            Some(expiry) => {
                let mut vars = BTreeMap::new();
                vars.insert(keys::CERT_EXPIRES_AT.to_string(), Some(expiry.to_rfc3339()));
                if let Err(e) = self.platform.set_config_vars(&vars).await {
                    warn!("Failed to record certificate expiry: {}", e);
                }
            }
            None => warn!("Certificate expiry unknown, next run will renew"),
        }

        if let Some(store) = &self.store
            && let Err(e) = store.clear_pending().await
        {
            warn!("Certificate installed but parked copy not cleared: {}", e);
        }
        Ok(())
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!("Event channel full, dropping event");
        }
    }
}
