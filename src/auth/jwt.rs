use anyhow::Context;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::config::JwtConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no session token presented")]
    Missing,
    #[error("token is expired or not yet valid")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has been revoked")]
    Revoked,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Signing and verification keys, built once at startup and shared read-only.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    leeway: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
            leeway: Duration::seconds(cfg.leeway_seconds),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<IssuedToken> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn issue_at(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<IssuedToken> {
        let expires_at = now
            .checked_add(self.ttl)
            .context("token expiry out of range")?;
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, jti = %claims.jti, "jwt signed");
        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    /// Checks signature, issuer and audience, then the `[iat - leeway, exp)` window at `now`.
    pub fn validate_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss", "aud"]);
        // expiry is checked below against `now` with exact bounds
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            let kind = classify(e.kind());
            debug!(error = %e, ?kind, "jwt rejected");
            kind
        })?;
        let claims = data.claims;

        let now = now.unix_timestamp();
        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed);
        }
        if now >= claims.exp || now < claims.iat.saturating_sub(self.leeway.whole_seconds()) {
            debug!(user_id = %claims.sub, jti = %claims.jti, "jwt outside validity window");
            return Err(TokenError::Expired);
        }
        debug!(user_id = %claims.sub, jti = %claims.jti, "jwt verified");
        Ok(claims)
    }
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::BadSignature,
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}
