use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use pasetors::{
    claims::{Claims, ClaimsValidationRules},
    local,
    token::UntrustedToken,
    version4::V4,
    Local,
};

use strand_core::UserId;

use super::{
    auth_repository::{AuthPersistence, AuthRepository},
    core::{AppState, ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_SECRET_BYTES},
    errors::AuthFailure,
    hasher::{generate_token, CredentialHasher},
};

pub(crate) const MAX_REFRESH_TOKEN_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub(crate) user_id: UserId,
    pub(crate) username: String,
}

/// Fresh refresh-token material: the bearer value handed to the client and
/// the (hash, salt) pair that is all the session record ever stores.
pub(crate) struct RefreshTokenMaterial {
    pub(crate) token: String,
    pub(crate) hash: String,
    pub(crate) salt: String,
}

pub(crate) fn validate_password(value: &str) -> Result<(), AuthFailure> {
    let len = value.len();
    if (12..=128).contains(&len) {
        Ok(())
    } else {
        Err(AuthFailure::InvalidRequest)
    }
}

pub(crate) fn issue_access_token(
    state: &AppState,
    user_id: UserId,
    username: &str,
) -> anyhow::Result<String> {
    let ttl = u64::try_from(ACCESS_TOKEN_TTL_SECS).unwrap_or_default();
    let mut claims = Claims::new_expires_in(&Duration::from_secs(ttl))
        .map_err(|e| anyhow!("claims init failed: {e}"))?;
    claims
        .subject(&user_id.to_string())
        .map_err(|e| anyhow!("claim sub failed: {e}"))?;
    claims
        .add_additional("username", username)
        .map_err(|e| anyhow!("claim username failed: {e}"))?;

    local::encrypt(&state.token_key, &claims, None, None)
        .map_err(|e| anyhow!("access token mint failed: {e}"))
}

pub(crate) fn verify_access_token(state: &AppState, token: &str) -> anyhow::Result<Claims> {
    let untrusted = UntrustedToken::<Local, V4>::try_from(token).map_err(|e| anyhow!("{e}"))?;
    let validation_rules = ClaimsValidationRules::new();
    let trusted = local::decrypt(&state.token_key, &untrusted, &validation_rules, None, None)
        .map_err(|e| anyhow!("token decrypt failed: {e}"))?;
    trusted
        .payload_claims()
        .cloned()
        .ok_or_else(|| anyhow!("token claims missing"))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    header.strip_prefix("Bearer ")
}

/// The stable subject id for partitioning, when the request carries a valid
/// access token. No repository lookup: admission control runs before any
/// business logic and only needs the claim.
pub(crate) fn request_subject(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let token = bearer_token(headers)?;
    let claims = verify_access_token(state, token).ok()?;
    claims
        .get_claim("sub")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
}

pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthFailure> {
    let access_token = bearer_token(headers).ok_or(AuthFailure::Unauthorized)?;
    let claims = verify_access_token(state, access_token).map_err(|_| AuthFailure::Unauthorized)?;
    let subject = claims
        .get_claim("sub")
        .and_then(serde_json::Value::as_str)
        .ok_or(AuthFailure::Unauthorized)?;
    let user_id = UserId::try_from(subject.to_owned()).map_err(|_| AuthFailure::Unauthorized)?;
    let repository = AuthRepository::from_state(state);
    let username = repository
        .find_username_by_id(user_id)
        .await
        .ok_or(AuthFailure::Unauthorized)?;
    Ok(AuthContext { user_id, username })
}

pub(crate) fn mint_refresh_token(
    hasher: &CredentialHasher,
    user_id: UserId,
) -> Result<RefreshTokenMaterial, AuthFailure> {
    let secret = generate_token(REFRESH_TOKEN_SECRET_BYTES);
    let token = format!("{user_id}.{secret}");
    let (hash, salt) = hasher.hash(&token).map_err(|_| AuthFailure::Internal)?;
    Ok(RefreshTokenMaterial { token, hash, salt })
}

/// The user-id locator prefix of a presented refresh token. Verification is
/// still solely against the stored hash of the full token string.
pub(crate) fn parse_refresh_user_id(token: &str) -> Option<UserId> {
    let (prefix, secret) = token.split_once('.')?;
    if secret.is_empty() {
        return None;
    }
    UserId::try_from(prefix.to_owned()).ok()
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

pub(crate) fn now_unix_millis() -> i64 {
    let now = SystemTime::now();
    let millis = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
