use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{SmtpConfig, SmtpTls};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("could not build message: {0}")]
    Message(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transport did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail capability.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError>;

    /// Checks that the transport is reachable and accepts our credentials.
    async fn verify(&self) -> Result<(), DeliveryError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, from: &str) -> Result<Self, DeliveryError> {
        let builder = match cfg.tls {
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host),
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host),
        }
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let transport = builder
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        let from = from
            .parse::<Mailbox>()
            .map_err(|_| DeliveryError::Address(from.to_string()))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|_| DeliveryError::Address(email.to.clone()))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| DeliveryError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        debug!(to = %email.to, subject = %email.subject, "smtp message accepted");
        Ok(())
    }

    async fn verify(&self) -> Result<(), DeliveryError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DeliveryError::Transport("server refused connection test".into())),
            Err(e) => Err(DeliveryError::Transport(e.to_string())),
        }
    }
}

/// Used when no SMTP server is configured: messages only go to the log.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError> {
        info!(to = %email.to, subject = %email.subject, "mail transport disabled; message logged only");
        Ok(())
    }

    async fn verify(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}
