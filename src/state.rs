use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    auth::{
        jwt::JwtKeys,
        password::CredentialHasher,
        repo::{MemoryUserStore, PgUserStore, UserStore},
        revocation::RevocationList,
    },
    config::AppConfig,
    db,
    mail::{self, Mailer, Notifier, RetryPolicy},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub hasher: CredentialHasher,
    pub keys: Arc<JwtKeys>,
    pub revocations: Arc<RevocationList>,
    pub notifier: Notifier,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, config.database_max_connections).await?;
                db::migrate(&pool).await?;
                Arc::new(PgUserStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory user store, data is lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        let mailer = mail::build_mailer(&config.mail)?;
        mail::probe_transport(mailer.as_ref(), config.mail.probe_timeout).await;

        let state = Self::from_parts(config, users, mailer)?;
        state.revocations.spawn_purge_task();
        info!(token_ttl = ?state.keys.ttl(), "application state ready");
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let hasher = CredentialHasher::new(&config.hasher).context("configure password hasher")?;
        let keys = Arc::new(JwtKeys::new(&config.jwt));
        let (notifier, _worker) = Notifier::spawn(
            mailer,
            config.mail.queue_capacity,
            RetryPolicy::from(&config.mail),
        );
        Ok(Self {
            config,
            users,
            hasher,
            keys,
            revocations: RevocationList::new(),
            notifier,
        })
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory store, cheap hashing, and a mailer that records what it sends.
    pub fn fake() -> Self {
        Self::fake_with_mailer(Arc::new(mail::testing::RecordingMailer::default()))
    }

    pub fn fake_with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        use crate::config::{HasherConfig, JwtConfig, MailConfig, PasswordPolicy};
        use std::time::Duration;

        let config = Arc::new(AppConfig {
            app_name: "authgate-test".into(),
            host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 0,
            database_url: None,
            database_max_connections: 1,
            jwt: JwtConfig {
                secret: "test-secret-test-secret-test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                leeway_seconds: 0,
            },
            password: PasswordPolicy::default(),
            hasher: HasherConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            mail: MailConfig {
                max_attempts: 2,
                retry_backoff: Duration::from_millis(1),
                send_timeout: Duration::from_millis(500),
                ..MailConfig::default()
            },
        });
        Self::from_parts(config, Arc::new(MemoryUserStore::new()), mailer)
            .expect("fake state should build")
    }
}
