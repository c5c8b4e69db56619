use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub leeway_seconds: i64,
}

/// Rules a new password must satisfy at sign-up.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_lowercase: true,
            require_uppercase: false,
            require_digit: true,
            require_symbol: false,
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// TLS from the first byte (port 465).
    Implicit,
    /// Plain connection upgraded with STARTTLS (port 587).
    Starttls,
}

impl FromStr for SmtpTls {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "ssl" | "tls" => Ok(Self::Implicit),
            "starttls" => Ok(Self::Starttls),
            other => anyhow::bail!("unknown SMTP TLS mode '{other}'"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: SmtpTls,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// `None` means messages are only logged.
    pub smtp: Option<SmtpConfig>,
    pub from: String,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub send_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            from: "no-reply@localhost".into(),
            queue_capacity: 256,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            send_timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub host: IpAddr,
    pub port: u16,
    /// Postgres URL; the in-memory user store is used when absent.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub password: PasswordPolicy,
    pub hasher: HasherConfig,
    pub mail: MailConfig,
}

const MIN_SECRET_LEN: usize = 32;
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;
const MAX_LEEWAY_SECONDS: i64 = 60 * 60;

impl AppConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let secret = env
            .string("JWT_SECRET")
            .context("JWT_SECRET must be set")?;
        anyhow::ensure!(
            secret.len() >= MIN_SECRET_LEN,
            "JWT_SECRET must be at least {MIN_SECRET_LEN} bytes"
        );
        let jwt = JwtConfig {
            secret,
            issuer: env.string("JWT_ISSUER").unwrap_or_else(|| "authgate".into()),
            audience: env
                .string("JWT_AUDIENCE")
                .unwrap_or_else(|| "authgate-users".into()),
            ttl_minutes: env.parse_or("JWT_TTL_MINUTES", 60 * 24)?,
            leeway_seconds: env.parse_or("JWT_LEEWAY_SECONDS", 30)?,
        };
        anyhow::ensure!(
            (1..=MAX_TTL_MINUTES).contains(&jwt.ttl_minutes),
            "JWT_TTL_MINUTES must be between 1 and {MAX_TTL_MINUTES}"
        );
        anyhow::ensure!(
            (0..=MAX_LEEWAY_SECONDS).contains(&jwt.leeway_seconds),
            "JWT_LEEWAY_SECONDS must be between 0 and {MAX_LEEWAY_SECONDS}"
        );

        let defaults = PasswordPolicy::default();
        let password = PasswordPolicy {
            min_length: env.parse_or("PASSWORD_MIN_LENGTH", defaults.min_length)?,
            max_length: env.parse_or("PASSWORD_MAX_LENGTH", defaults.max_length)?,
            require_lowercase: env
                .parse_or("PASSWORD_REQUIRE_LOWERCASE", defaults.require_lowercase)?,
            require_uppercase: env
                .parse_or("PASSWORD_REQUIRE_UPPERCASE", defaults.require_uppercase)?,
            require_digit: env.parse_or("PASSWORD_REQUIRE_DIGIT", defaults.require_digit)?,
            require_symbol: env.parse_or("PASSWORD_REQUIRE_SYMBOL", defaults.require_symbol)?,
        };
        anyhow::ensure!(
            password.min_length <= password.max_length,
            "PASSWORD_MIN_LENGTH must not exceed PASSWORD_MAX_LENGTH"
        );

        let defaults = HasherConfig::default();
        let hasher = HasherConfig {
            memory_kib: env.parse_or("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: env.parse_or("ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: env.parse_or("ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        let smtp = match env.string("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: env.parse_or("SMTP_PORT", 465)?,
                username: env
                    .string("SMTP_USERNAME")
                    .context("SMTP_USERNAME must be set when SMTP_HOST is")?,
                password: env
                    .string("SMTP_PASSWORD")
                    .context("SMTP_PASSWORD must be set when SMTP_HOST is")?,
                tls: env.parse_or("SMTP_TLS", SmtpTls::Implicit)?,
            }),
            None => None,
        };
        let defaults = MailConfig::default();
        let from = env
            .string("MAIL_FROM")
            .or_else(|| smtp.as_ref().map(|s| s.username.clone()))
            .unwrap_or(defaults.from);
        let mail = MailConfig {
            smtp,
            from,
            queue_capacity: env.parse_or("MAIL_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_attempts: env.parse_or("MAIL_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_backoff: Duration::from_millis(env.parse_or("MAIL_RETRY_BACKOFF_MS", 500u64)?),
            send_timeout: Duration::from_secs(env.parse_or("MAIL_SEND_TIMEOUT_SECS", 15u64)?),
            probe_timeout: Duration::from_secs(env.parse_or("MAIL_PROBE_TIMEOUT_SECS", 5u64)?),
        };
        anyhow::ensure!(mail.queue_capacity > 0, "MAIL_QUEUE_CAPACITY must be positive");
        anyhow::ensure!(mail.max_attempts > 0, "MAIL_MAX_ATTEMPTS must be positive");

        Ok(Self {
            app_name: env.string("APP_NAME").unwrap_or_else(|| "authgate".into()),
            host: env.parse_or("APP_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: env.parse_or("APP_PORT", 8080)?,
            database_url: env.string("DATABASE_URL"),
            database_max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            password,
            hasher,
            mail,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of `key`.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
            None => Ok(default),
        }
    }
}
