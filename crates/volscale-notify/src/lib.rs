//! volscale-notify — scaling report emails.
//!
//! Notification is strictly best-effort: a failed send is logged and the
//! scaling work it reports on stands. One email is sent per tick covering
//! every volume scaled in that tick plus every attempt that concluded in
//! failure, addressed from the instance that did the scaling (instance id
//! via the metadata service, `unknown` when it cannot be reached).

pub mod imds;
pub mod render;
pub mod transport;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use volscale_core::config::NotificationConfig;

pub use render::{FailedVolume, ScaledVolume};
pub use transport::{NotifyTransport, SesCliTransport};

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("command failed: {0}")]
    Exec(#[from] volscale_core::CmdError),
}

/// Sends one scaling report per batch. Does nothing when notifications
/// are disabled in config.
pub struct Notifier {
    transport: Arc<dyn NotifyTransport>,
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotifyTransport>, config: NotificationConfig) -> Self {
        Self { transport, config }
    }

    /// Report a batch of scaled volumes and failed attempts. Failures to
    /// send are logged, never propagated.
    pub async fn notify(
        &self,
        instance_id: &str,
        scaled: &[ScaledVolume],
        failed: &[FailedVolume],
    ) {
        if !self.config.enabled || (scaled.is_empty() && failed.is_empty()) {
            return;
        }

        let subject = render::subject(instance_id);
        let body = render::body(instance_id, scaled, failed);

        match self
            .transport
            .send_html(&self.config.sender, &self.config.recipients, &subject, &body)
            .await
        {
            Ok(()) => info!(
                scaled = scaled.len(),
                failed = failed.len(),
                recipients = self.config.recipients.len(),
                "scaling notification sent"
            ),
            Err(e) => warn!(error = %e, "scaling notification failed"),
        }
    }
}
