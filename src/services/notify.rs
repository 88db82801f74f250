use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::GatewayError;

/// Outbound message delivery, e.g. email
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), GatewayError>;
}

/// Writes notifications to the tracing log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), GatewayError> {
        info!(recipient, subject, "{}", body);
        Ok(())
    }
}

/// Sends in the background; failures are logged and go nowhere else
pub fn notify_detached(
    notifier: Arc<dyn Notifier>,
    recipient: String,
    subject: String,
    body: String,
) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&recipient, &subject, &body).await {
            warn!(recipient, subject, "Failed to send notification: {}", e);
        }
    });
}
