use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{delete, patch},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    account::lifecycle::{self, RequestMeta},
    auth::{
        dto::{ChangePasswordRequest, DeleteAccountRequest, MessageResponse},
        jwt::AuthUser,
        password,
        repo::User,
    },
    error::AppError,
    ratelimit::{client_ip, HOUR_MS, MINUTE_MS},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/account/password", patch(change_password))
        .route("/account", delete(delete_account))
}

#[instrument(skip(state, payload, headers))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    let limits = &state.config.rate_limits;
    state
        .limiter
        .check(
            "change-password",
            &headers,
            MINUTE_MS,
            limits.password_max_per_minute,
        )
        .await?;

    if payload.new_password != payload.confirm_password {
        return Err(AppError::Validation("Passwords do not match".into()));
    }

    let Some(user) = User::find_by_id(&state.db, user_id).await? else {
        // Valid token for an account that no longer exists.
        return Err(AppError::Unauthorized);
    };
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(AppError::Validation(
            "Password login is not enabled for this account".into(),
        ));
    };
    if !password::verify_password(&payload.current_password, hash) {
        warn!(user_id = %user.id, "change password with wrong current password");
        return Err(AppError::Validation("Current password is incorrect".into()));
    }

    let report = password::evaluate(&payload.new_password);
    if !report.is_valid {
        return Err(AppError::WeakPassword(report.errors));
    }

    let new_hash = password::hash_password(&payload.new_password)?;
    User::update_password_hash(&state.db, user.id, &new_hash).await?;

    info!(user_id = %user.id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload, headers))]
pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(payload): Json<DeleteAccountRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let limits = &state.config.rate_limits;
    state
        .limiter
        .check(
            "delete-account",
            &headers,
            HOUR_MS,
            limits.deletion_max_per_hour,
        )
        .await?;

    let meta = RequestMeta {
        ip: client_ip(&headers),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string(),
    };

    lifecycle::delete_account(&state, user_id, payload.user_id, &payload.confirm_email, &meta)
        .await?;

    Ok(Json(MessageResponse {
        message: "Account deleted".to_string(),
    }))
}
