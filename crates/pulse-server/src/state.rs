use pulse_common::types::AuditEntry;
use pulse_storage::MetricStore;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn MetricStore>,
    /// Shared HMAC key; empty disables verification and response signing.
    pub hash_key: Arc<String>,
    /// Private half of the envelope key pair; `None` disables decryption.
    pub private_key: Option<Arc<RsaPrivateKey>>,
    pub audit: mpsc::Sender<AuditEntry>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn MetricStore>,
        hash_key: String,
        private_key: Option<RsaPrivateKey>,
        audit: mpsc::Sender<AuditEntry>,
    ) -> Self {
        Self {
            storage,
            hash_key: Arc::new(hash_key),
            private_key: private_key.map(Arc::new),
            audit,
        }
    }
}
