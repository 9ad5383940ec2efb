use async_trait::async_trait;

use crate::records::{PendingClaim, Sale};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid e-mail address: {0}")]
    InvalidAddress(String),
    #[error("Message could not be built: {0}")]
    Build(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Buyer notifications. Callers treat delivery as best-effort: a failure is
/// logged and never undoes the sale or release that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, sale: &Sale) -> Result<(), NotifyError>;

    async fn send_rejection(&self, claim: &PendingClaim) -> Result<(), NotifyError>;
}
