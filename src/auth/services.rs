use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AuthResponse, PublicUser, SignInRequest, SignUpRequest},
        jwt::TokenError,
        repo::StoreError,
        repo_types::NewUser,
    },
    config::PasswordPolicy,
    error::AuthError,
    mail::templates,
    state::AppState,
};

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

/// Lists every rule the password breaks; empty means acceptable.
pub(crate) fn password_violations(password: &str, policy: &PasswordPolicy) -> Vec<String> {
    let mut out = Vec::new();
    let len = password.chars().count();
    if len < policy.min_length {
        out.push(format!("password must be at least {} characters", policy.min_length));
    }
    if len > policy.max_length {
        out.push(format!("password must be at most {} characters", policy.max_length));
    }
    if policy.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
        out.push("password must contain a lowercase letter".into());
    }
    if policy.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
        out.push("password must contain an uppercase letter".into());
    }
    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        out.push("password must contain a digit".into());
    }
    if policy.require_symbol && !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        out.push("password must contain a symbol".into());
    }
    out
}

fn validate_sign_up(req: &SignUpRequest, policy: &PasswordPolicy) -> Result<(), AuthError> {
    let mut problems = Vec::new();
    if !is_valid_email(&req.email) {
        problems.push("email is not a valid address".to_string());
    }
    let name_len = req.name.chars().count();
    if name_len == 0 || name_len > MAX_NAME_LEN {
        problems.push(format!("name must be 1 to {MAX_NAME_LEN} characters"));
    }
    problems.extend(password_violations(&req.password, policy));

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AuthError::InvalidInput(problems.join("; ")))
    }
}

fn issue_response(state: &AppState, user: PublicUser) -> Result<AuthResponse, AuthError> {
    let issued = state
        .keys
        .issue(user.id)
        .context("sign session token")?;
    debug!(user_id = %user.id, jti = %issued.jti, "session issued");
    Ok(AuthResponse {
        user,
        token: issued.token,
        expires_at: issued.expires_at,
    })
}

/// Registers a user and returns the public projection with a fresh session token.
///
/// The welcome email is queued, never awaited; its failure does not undo the account.
pub async fn sign_up(state: &AppState, mut req: SignUpRequest) -> Result<AuthResponse, AuthError> {
    req.email = normalize_email(&req.email);
    req.name = req.name.trim().to_string();

    if let Err(e) = validate_sign_up(&req, &state.config.password) {
        warn!(email = %req.email, "sign-up rejected by validation");
        return Err(e);
    }

    let hasher = state.hasher.clone();
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .context("join password hashing task")??;

    let user = state
        .users
        .create_user(NewUser {
            email: req.email,
            name: req.name,
            password_hash,
        })
        .await
        .map_err(|e| {
            match &e {
                StoreError::DuplicateEmail => warn!("sign-up for already registered email"),
                other => error!(error = %other, "create user failed"),
            }
            AuthError::from(e)
        })?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    state.notifier.enqueue(templates::welcome(
        &user.email,
        &user.name,
        &state.config.app_name,
    ));

    issue_response(state, user.into())
}

/// Authenticates by email and password.
///
/// Unknown email and wrong password return the same `InvalidCredentials`.
pub async fn sign_in(state: &AppState, req: SignInRequest) -> Result<AuthResponse, AuthError> {
    let email = normalize_email(&req.email);

    let user = match state.users.find_by_email(&email).await {
        Ok(user) => Some(user),
        Err(StoreError::NotFound) => None,
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(e.into());
        }
    };

    let hasher = state.hasher.clone();
    let password = req.password;
    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
    let verified = tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => hasher.verify(&password, &hash),
        None => {
            hasher.verify_dummy(&password);
            Ok(false)
        }
    })
    .await
    .context("join password verification task")?;

    let user = match (user, verified) {
        (Some(user), Ok(true)) => user,
        (Some(user), Ok(false)) => {
            warn!(user_id = %user.id, "sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        (None, _) => {
            warn!("sign-in for unknown email");
            return Err(AuthError::InvalidCredentials);
        }
        (Some(user), Err(e)) => {
            error!(user_id = %user.id, error = %e, "stored password hash is unreadable");
            return Err(e.into());
        }
    };

    info!(user_id = %user.id, "user signed in");
    issue_response(state, user.into())
}

/// Revokes the session behind `token`. Always succeeds: absent, invalid or
/// expired tokens have nothing left to revoke.
pub async fn sign_out(state: &AppState, token: Option<&str>) {
    let Some(token) = token else {
        debug!("sign-out without token");
        return;
    };
    match state.keys.validate(token) {
        Ok(claims) => {
            state.revocations.revoke(claims.jti, claims.exp).await;
            info!(user_id = %claims.sub, jti = %claims.jti, "session revoked");
        }
        Err(reason) => debug!(%reason, "sign-out with unusable token; nothing to revoke"),
    }
}

/// Resolves a presented token to its user id, rejecting revoked sessions.
pub async fn authorize(state: &AppState, token: &str) -> Result<Uuid, AuthError> {
    let claims = state.keys.validate(token)?;
    if state.revocations.is_revoked(claims.jti).await {
        return Err(TokenError::Revoked.into());
    }
    Ok(claims.sub)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mail::testing::{FlakyMailer, RecordingMailer};

    fn sign_up_req(email: &str, password: &str, name: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.into(),
            password: password.into(),
            name: name.into(),
        }
    }

    fn sign_in_req(email: &str, password: &str) -> SignInRequest {
        SignInRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("not an email"));
        assert!(!is_valid_email(&format!("{}@x.com", "a".repeat(260))));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn password_policy_reports_each_violation() {
        let policy = PasswordPolicy {
            require_uppercase: true,
            require_symbol: true,
            ..PasswordPolicy::default()
        };
        assert!(password_violations("Secret123!", &policy).is_empty());

        let problems = password_violations("abc", &policy);
        assert_eq!(problems.len(), 4);
        assert!(problems[0].contains("at least 8"));

        let lax = PasswordPolicy::default();
        assert!(password_violations("secret123", &lax).is_empty());
        assert_eq!(password_violations("secretsecret", &lax).len(), 1);
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_then_authorize() {
        let state = AppState::fake();
        let created = sign_up(&state, sign_up_req(" A@X.com", "Secret123!", " A "))
            .await
            .unwrap();
        assert_eq!(created.user.email, "a@x.com");
        assert_eq!(created.user.name, "A");

        let signed_in = sign_in(&state, sign_in_req("a@x.com", "Secret123!"))
            .await
            .unwrap();
        assert_eq!(signed_in.user.id, created.user.id);
        assert_ne!(signed_in.token, created.token);

        let resolved = authorize(&state, &signed_in.token).await.unwrap();
        assert_eq!(resolved, created.user.id);
        assert_eq!(authorize(&state, &created.token).await.unwrap(), created.user.id);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_anything_is_stored() {
        let state = AppState::fake();
        let err = sign_up(&state, sign_up_req("nope", "short", ""))
            .await
            .unwrap_err();
        let AuthError::InvalidInput(msg) = err else {
            panic!("expected InvalidInput, got {err:?}");
        };
        assert!(msg.contains("email"));
        assert!(msg.contains("name"));
        assert!(msg.contains("password"));
        assert!(state.users.find_by_email("nope").await.is_err());
    }

    #[tokio::test]
    async fn second_sign_up_is_email_taken_and_keeps_original() {
        let state = AppState::fake();
        let first = sign_up(&state, sign_up_req("a@x.com", "Secret123!", "A"))
            .await
            .unwrap();
        let err = sign_up(&state, sign_up_req("A@x.com", "Other456!", "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));

        let stored = state.users.find_by_email("a@x.com").await.unwrap();
        assert_eq!(stored.id, first.user.id);
        assert_eq!(stored.name, "A");
        assert!(sign_in(&state, sign_in_req("a@x.com", "Secret123!")).await.is_ok());
        assert!(sign_in(&state, sign_in_req("a@x.com", "Other456!")).await.is_err());
    }

    #[tokio::test]
    async fn wrong_password_matches_unknown_email() {
        let state = AppState::fake();
        sign_up(&state, sign_up_req("a@x.com", "Secret123!", "A"))
            .await
            .unwrap();

        let wrong = sign_in(&state, sign_in_req("a@x.com", "wrong")).await.unwrap_err();
        let unknown = sign_in(&state, sign_in_req("ghost@x.com", "Secret123!"))
            .await
            .unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));

        let (a, b) = (wrong.body(), unknown.body());
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn corrupt_stored_hash_is_not_invalid_credentials() {
        let state = AppState::fake();
        state
            .users
            .create_user(NewUser {
                email: "broken@x.com".into(),
                name: "B".into(),
                password_hash: "garbage".into(),
            })
            .await
            .unwrap();
        let err = sign_in(&state, sign_in_req("broken@x.com", "Secret123!"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CorruptCredential));
    }

    #[tokio::test]
    async fn sign_up_queues_welcome_email() {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::fake_with_mailer(mailer.clone());
        sign_up(&state, sign_up_req("a@x.com", "Secret123!", "Ada"))
            .await
            .unwrap();
        let sent = mailer.wait_for(1).await;
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].body.contains("Ada"));
    }

    #[tokio::test]
    async fn failed_delivery_keeps_the_account() {
        let state = AppState::fake_with_mailer(Arc::new(FlakyMailer::failing_first(u32::MAX)));
        let created = sign_up(&state, sign_up_req("a@x.com", "Secret123!", "A"))
            .await
            .unwrap();
        let signed_in = sign_in(&state, sign_in_req("a@x.com", "Secret123!"))
            .await
            .unwrap();
        assert_eq!(signed_in.user.id, created.user.id);
    }

    #[tokio::test]
    async fn sign_out_revokes_and_is_idempotent() {
        let state = AppState::fake();
        let created = sign_up(&state, sign_up_req("a@x.com", "Secret123!", "A"))
            .await
            .unwrap();

        sign_out(&state, Some(&created.token)).await;
        sign_out(&state, Some(&created.token)).await;
        sign_out(&state, Some("not-a-token")).await;
        sign_out(&state, None).await;

        let err = authorize(&state, &created.token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(TokenError::Revoked)));
        assert_eq!(state.revocations.len().await, 1);
    }

    #[tokio::test]
    async fn sign_out_with_expired_token_succeeds() {
        let state = AppState::fake();
        let past = time::OffsetDateTime::now_utc() - state.keys.ttl() - time::Duration::minutes(1);
        let expired = state.keys.issue_at(Uuid::new_v4(), past).unwrap();

        sign_out(&state, Some(&expired.token)).await;
        assert_eq!(state.revocations.len().await, 0);
        assert!(matches!(
            authorize(&state, &expired.token).await.unwrap_err(),
            AuthError::Unauthorized(TokenError::Expired)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sign_ups_admit_exactly_one() {
        let state = AppState::fake();
        let mut handles = Vec::new();
        for i in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                sign_up(&state, sign_up_req("race@x.com", "Secret123!", &format!("n{i}"))).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AuthError::EmailTaken) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!(ok, 1);
    }
}
