// # Memory Certificate Store
//
// Volatile store for tests and for runs without `HEROCERT_STORE_PATH`.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::{Certificate, CertificateStore};

/// In-memory pending-certificate store
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    pending: RwLock<Option<Certificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that starts with a parked certificate
    pub fn with_pending(certificate: Certificate) -> Self {
        Self {
            pending: RwLock::new(Some(certificate)),
        }
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn load_pending(&self) -> Result<Option<Certificate>, Error> {
        Ok(self.pending.read().await.clone())
    }

    async fn save_pending(&self, certificate: &Certificate) -> Result<(), Error> {
        *self.pending.write().await = Some(certificate.clone());
        Ok(())
    }

    async fn clear_pending(&self) -> Result<(), Error> {
        *self.pending.write().await = None;
        Ok(())
    }
}
