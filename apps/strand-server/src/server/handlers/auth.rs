use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

use strand_core::{ContactAddress, Username};

use crate::server::{
    auth::{
        authenticate, issue_access_token, mint_refresh_token, now_unix, parse_refresh_user_id,
        validate_password, MAX_REFRESH_TOKEN_CHARS,
    },
    auth_repository::{refresh_session_expiry_unix, AuthPersistence, AuthRepository},
    core::{AppState, ACCESS_TOKEN_TTL_SECS, VERIFICATION_TOKEN_BYTES},
    errors::AuthFailure,
    hasher::generate_token,
    mail::MailMessage,
    partition::PartitionKey,
    types::{
        AuthResponse, LoginRequest, MeResponse, RefreshRequest, RegisterRequest, RegisterResponse,
        VerifyContactRequest, VerifyContactResponse,
    },
};

pub(crate) async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AuthFailure> {
    let username = Username::try_from(payload.username).map_err(|_| AuthFailure::InvalidRequest)?;
    validate_password(&payload.password)?;
    let contact =
        ContactAddress::try_from(payload.contact).map_err(|_| AuthFailure::InvalidRequest)?;

    let (password_hash, password_salt) = state
        .hasher
        .hash(&payload.password)
        .map_err(|_| AuthFailure::Internal)?;
    let verification_token = generate_token(VERIFICATION_TOKEN_BYTES);
    let (token_hash, token_salt) = state
        .hasher
        .hash(&verification_token)
        .map_err(|_| AuthFailure::Internal)?;

    let repository = AuthRepository::from_state(&state);
    let created = repository
        .create_user_if_missing(
            &username,
            contact.as_str(),
            &password_hash,
            &password_salt,
            &token_hash,
            &token_salt,
        )
        .await?;

    match created {
        Some(user_id) => {
            let message = MailMessage {
                to_contact: contact.as_str().to_owned(),
                template: "verify_contact",
                payload_json: json!({
                    "username": username.as_str(),
                    "token": verification_token,
                })
                .to_string(),
            };
            if let Err(error) = state.mail.send(&message) {
                tracing::warn!(event = "auth.register", outcome = "mail_failed", error = %error);
            }
            tracing::info!(event = "auth.register", outcome = "created", user_id = %user_id);
        }
        None => {
            // Same acceptance response either way to avoid registration-time
            // enumeration.
            tracing::info!(event = "auth.register", outcome = "existing_user");
        }
    }

    Ok(Json(RegisterResponse { accepted: true }))
}

pub(crate) async fn verify_contact(
    State(state): State<AppState>,
    Json(payload): Json<VerifyContactRequest>,
) -> Result<Json<VerifyContactResponse>, AuthFailure> {
    let username = Username::try_from(payload.username).map_err(|_| AuthFailure::Unauthorized)?;
    if payload.token.is_empty() || payload.token.len() > 128 {
        return Err(AuthFailure::Unauthorized);
    }

    let repository = AuthRepository::from_state(&state);
    repository.verify_contact(&username, &payload.token).await?;
    tracing::info!(event = "auth.verify_contact", outcome = "verified", username = %username.as_str());

    Ok(Json(VerifyContactResponse { verified: true }))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    partition: Option<Extension<PartitionKey>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthFailure> {
    let username = Username::try_from(payload.username).map_err(|_| AuthFailure::Unauthorized)?;
    validate_password(&payload.password).map_err(|_| AuthFailure::Unauthorized)?;
    let origin = partition
        .map(|Extension(key)| key.as_str().to_owned())
        .unwrap_or_else(|| String::from("unknown"));
    let now = now_unix();

    let repository = AuthRepository::from_state(&state);
    let user_id = repository
        .authenticate(&username, &payload.password, &origin, now)
        .await
        .map_err(|failure| {
            tracing::warn!(event = "auth.login", outcome = %failure);
            failure
        })?;

    let access_token =
        issue_access_token(&state, user_id, username.as_str()).map_err(|_| AuthFailure::Internal)?;
    let refresh = mint_refresh_token(&state.hasher, user_id)?;
    repository
        .upsert_session(
            user_id,
            &refresh.hash,
            &refresh.salt,
            refresh_session_expiry_unix(now),
            now,
        )
        .await?;

    tracing::info!(event = "auth.login", outcome = "success", user_id = %user_id);

    Ok(Json(AuthResponse {
        access_token,
        refresh_token: refresh.token,
        expires_in_secs: ACCESS_TOKEN_TTL_SECS,
    }))
}

pub(crate) async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthFailure> {
    if payload.refresh_token.is_empty() || payload.refresh_token.len() > MAX_REFRESH_TOKEN_CHARS {
        tracing::warn!(event = "auth.refresh", outcome = "invalid_token_format");
        return Err(AuthFailure::Unauthorized);
    }
    let user_id = parse_refresh_user_id(&payload.refresh_token).ok_or(AuthFailure::Unauthorized)?;

    let repository = AuthRepository::from_state(&state);
    let username = repository
        .find_username_by_id(user_id)
        .await
        .ok_or(AuthFailure::Unauthorized)?;

    let now = now_unix();
    let next = mint_refresh_token(&state.hasher, user_id)?;
    repository
        .rotate_refresh_token(
            user_id,
            &payload.refresh_token,
            &next.hash,
            &next.salt,
            refresh_session_expiry_unix(now),
            now,
        )
        .await
        .map_err(|failure| {
            tracing::warn!(event = "auth.refresh", outcome = "rejected", user_id = %user_id);
            failure
        })?;

    let access_token =
        issue_access_token(&state, user_id, &username).map_err(|_| AuthFailure::Internal)?;
    tracing::info!(event = "auth.refresh", outcome = "success", user_id = %user_id);

    Ok(Json(AuthResponse {
        access_token,
        refresh_token: next.token,
        expires_in_secs: ACCESS_TOKEN_TTL_SECS,
    }))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AuthFailure> {
    if payload.refresh_token.is_empty() || payload.refresh_token.len() > MAX_REFRESH_TOKEN_CHARS {
        tracing::warn!(event = "auth.logout", outcome = "invalid_token_format");
        return Err(AuthFailure::Unauthorized);
    }
    let user_id = parse_refresh_user_id(&payload.refresh_token).ok_or(AuthFailure::Unauthorized)?;

    let repository = AuthRepository::from_state(&state);
    repository
        .close_session(user_id, &payload.refresh_token, now_unix())
        .await
        .map_err(|_| {
            tracing::warn!(event = "auth.logout", outcome = "hash_mismatch", user_id = %user_id);
            AuthFailure::Unauthorized
        })?;

    tracing::info!(event = "auth.logout", outcome = "success", user_id = %user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;

    Ok(Json(MeResponse {
        user_id: auth.user_id.to_string(),
        username: auth.username,
    }))
}
