use axum::{
    extract::{FromRef, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
            ResetPasswordRequest, SignupRequest,
        },
        jwt::JwtKeys,
        password, repo,
        repo::User,
        reset,
    },
    error::AppError,
    mailer::MailMessage,
    ratelimit::MINUTE_MS,
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

/// Internal credential check used by login. Returns `None` for unknown
/// email, deleted account, passwordless (identity-provider-only) account, or
/// a wrong password, without distinguishing.
pub async fn authorize(db: &PgPool, email: &str, plain: &str) -> anyhow::Result<Option<User>> {
    let Some(user) = User::find_by_email(db, email).await? else {
        return Ok(None);
    };
    let Some(hash) = user.password_hash.as_deref() else {
        return Ok(None);
    };
    if !password::verify_password(plain, hash) {
        return Ok(None);
    }
    Ok(Some(user))
}

#[instrument(skip(state, payload, headers))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let limits = &state.config.rate_limits;
    state
        .limiter
        .check("signup", &headers, MINUTE_MS, limits.login_max_per_minute)
        .await?;

    payload.email = payload.email.trim().to_lowercase();
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }

    let report = password::evaluate(&payload.password);
    if !report.is_valid {
        return Err(AppError::WeakPassword(report.errors));
    }

    // Uniqueness check comes before any hashing work.
    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let hash = password::hash_password(&payload.password)?;
    // A concurrent signup can still win the race between the check above and
    // this INSERT; the partial unique index reports it as a duplicate.
    let user = match User::create(&state.db, &payload.email, &hash, payload.name.trim()).await {
        Ok(user) => user,
        Err(e) if repo::is_unique_violation(&e) => {
            warn!(email = %payload.email, "email registered concurrently");
            return Err(AppError::Conflict("Email already registered".into()));
        }
        Err(e) => return Err(e.into()),
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id)?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok(Json(AuthResponse {
        token,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state, payload, headers))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let limits = &state.config.rate_limits;
    state
        .limiter
        .check("login", &headers, MINUTE_MS, limits.login_max_per_minute)
        .await?;

    payload.email = payload.email.trim().to_lowercase();
    if !is_valid_email(&payload.email) {
        return Err(AppError::Validation("Invalid email".into()));
    }

    let Some(user) = authorize(&state.db, &payload.email, &payload.password).await? else {
        warn!(email = %payload.email, "login failed");
        return Err(AppError::Unauthorized);
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        token,
        user: PublicUser::from(user),
    }))
}

/// Human wording for the reset-link lifetime, derived from the configured
/// TTL so the mail never contradicts the actual deadline.
fn ttl_phrase(ttl_secs: i64) -> String {
    if ttl_secs >= 3600 && ttl_secs % 3600 == 0 {
        let hours = ttl_secs / 3600;
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{hours} hours")
        }
    } else {
        let minutes = (ttl_secs / 60).max(1);
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    }
}

/// One byte-identical success body regardless of whether the email exists,
/// has no password credential, or the mail send failed. Anti-enumeration
/// takes priority over delivery confirmation.
const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that address, a password reset link has been sent.";

#[instrument(skip(state, payload, headers))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let limits = &state.config.rate_limits;
    state
        .limiter
        .check("forgot-password", &headers, MINUTE_MS, limits.login_max_per_minute)
        .await?;

    payload.email = payload.email.trim().to_lowercase();
    if !is_valid_email(&payload.email) {
        return Err(AppError::Validation("Invalid email".into()));
    }

    let user = User::find_by_email(&state.db, &payload.email).await?;
    if let Some(user) = user.filter(|u| u.password_hash.is_some()) {
        let token = reset::generate_token();
        reset::save(
            &state.db,
            &user.email,
            &token,
            state.config.reset_token_ttl_secs,
        )
        .await?;

        let link = format!("{}/reset-password?token={token}", state.config.public_base_url);
        let expiry = ttl_phrase(state.config.reset_token_ttl_secs);
        let mail = MailMessage {
            to: user.email.clone(),
            subject: "Reset your password".into(),
            text: format!(
                "Reset your password using this link: {link}\nThe link expires in {expiry}."
            ),
            html: format!(
                "<p>Reset your password using <a href=\"{link}\">this link</a>.</p>\
                 <p>The link expires in {expiry}.</p>"
            ),
        };
        if let Err(e) = state.mailer.send(mail).await {
            // Logged only; the response below stays identical.
            warn!(error = %e, user_id = %user.id, "reset mail send failed");
        } else {
            info!(user_id = %user.id, "reset mail sent");
        }
    }

    Ok(Json(MessageResponse {
        message: FORGOT_PASSWORD_MESSAGE.to_string(),
    }))
}

#[instrument(skip(state, payload, headers))]
pub async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let limits = &state.config.rate_limits;
    state
        .limiter
        .check("reset-password", &headers, MINUTE_MS, limits.login_max_per_minute)
        .await?;

    // Absent, used, and expired collapse into one caller-visible error.
    let Some(email) = reset::verify(&state.db, &payload.token).await? else {
        return Err(AppError::Validation("Invalid or expired reset link".into()));
    };

    let report = password::evaluate(&payload.password);
    if !report.is_valid {
        return Err(AppError::WeakPassword(report.errors));
    }

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Err(AppError::NotFound("Account not found".into()));
    };

    let hash = password::hash_password(&payload.password)?;

    // Password mutation and token consumption commit together; the
    // conditional mark_used serializes concurrent resets on the same token.
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    User::update_password_hash(&mut *tx, user.id, &hash).await?;
    if !reset::mark_used(&mut *tx, &payload.token).await? {
        warn!(user_id = %user.id, "reset token lost the consumption race");
        return Err(AppError::Validation("Invalid or expired reset link".into()));
    }
    tx.commit().await.map_err(anyhow::Error::from)?;

    info!(user_id = %user.id, "password reset completed");
    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn ttl_phrase_follows_configured_lifetime() {
        assert_eq!(ttl_phrase(3600), "1 hour");
        assert_eq!(ttl_phrase(7200), "2 hours");
        assert_eq!(ttl_phrase(900), "15 minutes");
        assert_eq!(ttl_phrase(60), "1 minute");
        // Sub-minute lifetimes round up rather than claiming zero.
        assert_eq!(ttl_phrase(30), "1 minute");
    }

    #[test]
    fn forgot_password_message_is_fixed() {
        // The anti-enumeration body must never vary by branch; it is a
        // single constant used on every path.
        let body = serde_json::to_string(&MessageResponse {
            message: FORGOT_PASSWORD_MESSAGE.to_string(),
        })
        .unwrap();
        assert!(body.contains("If an account exists"));
    }
}
