mod notifier;
pub mod templates;
mod transport;

use std::sync::Arc;

use tracing::info;

use crate::config::MailConfig;

pub use notifier::{probe_transport, Notifier, RetryPolicy};
pub use transport::{DeliveryError, LogMailer, Mailer, OutboundEmail, SmtpMailer};

/// Picks the SMTP transport when configured, the logging one otherwise.
pub fn build_mailer(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match &cfg.smtp {
        Some(smtp) => {
            let mailer = SmtpMailer::new(smtp, &cfg.from)?;
            info!(host = %smtp.host, port = smtp.port, from = %cfg.from, "smtp mail transport configured");
            Ok(Arc::new(mailer))
        }
        None => {
            info!("SMTP_HOST not set; outgoing mail will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}
