//! DNS-01 responder
//!
//! Publishes the proof as a TXT record at `_acme-challenge.<domain>` through
//! a [`DnsProvider`]. Every `_acme-challenge*` TXT record left in the zone is
//! removed first so the ACME server only ever sees the current proof.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ChallengeType;
use crate::error::{Error, Result};
use crate::traits::{
    ACME_CHALLENGE_RECORD, Challenge, ChallengeResponder, DnsProvider, ResponderHandle,
};

/// DNS (DNS-01) challenge responder
pub struct DnsResponder {
    provider: Arc<dyn DnsProvider>,
    propagation_delay: Duration,
    /// Records created by this responder; never treated as stale
    created: Mutex<HashSet<String>>,
}

impl DnsResponder {
    pub fn new(provider: Arc<dyn DnsProvider>, propagation_delay: Duration) -> Self {
        Self {
            provider,
            propagation_delay,
            created: Mutex::new(HashSet::new()),
        }
    }

    fn is_own_record(&self, record_id: &str) -> bool {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(record_id)
    }

    fn remember(&self, record_id: &str) {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record_id.to_string());
    }

    fn forget(&self, record_id: &str) {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(record_id);
    }

    /// Normalize any provider failure into a DNS provider error
    fn provider_error(&self, err: Error) -> Error {
        match err {
            Error::DnsProvider { .. } => err,
            other => Error::dns_provider(self.provider.provider_name(), other.to_string()),
        }
    }
}

#[async_trait]
impl ChallengeResponder for DnsResponder {
    async fn activate(&self, challenge: &Challenge) -> Result<ResponderHandle> {
        let provider_name = self.provider.provider_name();
        let record_name = challenge.target.clone();

        let zone = self
            .provider
            .resolve_zone(&challenge.domain)
            .await
            .map_err(|e| self.provider_error(e))?;
        debug!("Resolved zone {} ({}) for {}", zone.name, zone.id, challenge.domain);

        let existing = self
            .provider
            .list_txt_records(&zone, ACME_CHALLENGE_RECORD)
            .await
            .map_err(|e| self.provider_error(e))?;

        for stale in existing.iter().filter(|r| !self.is_own_record(&r.id)) {
            match self.provider.delete_record(&zone, &stale.id).await {
                Ok(()) => debug!("Deleted stale record {} ({})", stale.name, stale.id),
                Err(e) => warn!(
                    "Failed to delete stale record {} ({}) via {}: {}",
                    stale.name, stale.id, provider_name, e
                ),
            }
        }

        let record = self
            .provider
            .create_txt_record(&zone, &record_name, &challenge.proof)
            .await
            .map_err(|e| self.provider_error(e))?;
        self.remember(&record.id);

        info!(
            "Created {} via {}, waiting {:?} for propagation",
            record_name, provider_name, self.propagation_delay
        );
        if !self.propagation_delay.is_zero() {
            tokio::time::sleep(self.propagation_delay).await;
        }

        Ok(ResponderHandle::Dns {
            domain: challenge.domain.clone(),
            zone,
            record_id: record.id,
            record_name,
        })
    }

    async fn deactivate(&self, handle: ResponderHandle) -> Result<()> {
        let ResponderHandle::Dns {
            zone,
            record_id,
            record_name,
            ..
        } = handle
        else {
            return Err(Error::Other("DNS responder received a file handle".into()));
        };

        self.forget(&record_id);
        self.provider
            .delete_record(&zone, &record_id)
            .await
            .map_err(|e| self.provider_error(e))?;

        debug!("Removed challenge record {} ({})", record_name, record_id);
        Ok(())
    }

    fn strategy(&self) -> ChallengeType {
        ChallengeType::Dns
    }
}
