use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Single-use, time-boxed capability proving control of an email address.
/// State machine per token: issued -> consumed | expired. Expiry is decided
/// at verification time; nothing transitions tokens in the background except
/// the bulk sweep for rows long past their deadline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResetToken {
    pub token: String,
    pub email: String,
    pub expires_at: OffsetDateTime,
    pub used: bool,
    pub created_at: OffsetDateTime,
    pub used_at: Option<OffsetDateTime>,
}

impl ResetToken {
    /// A token may be consumed iff it has never been consumed and its
    /// deadline has not passed. Consumption is permanent: once `used` is
    /// set the token fails this check forever, including immediately after.
    pub fn is_consumable(&self, now: OffsetDateTime) -> bool {
        !self.used && now < self.expires_at
    }
}

/// 256 bits from the OS RNG, rendered as 64 lowercase hex characters.
/// Uniqueness rests on entropy alone.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub async fn save(db: &PgPool, email: &str, token: &str, ttl_secs: i64) -> anyhow::Result<()> {
    let expires_at = OffsetDateTime::now_utc() + Duration::seconds(ttl_secs);
    sqlx::query(
        r#"
        INSERT INTO reset_tokens (token, email, expires_at, used, created_at)
        VALUES ($1, $2, $3, FALSE, now())
        "#,
    )
    .bind(token)
    .bind(email)
    .bind(expires_at)
    .execute(db)
    .await?;
    Ok(())
}

/// Resolves a token to the email it was issued for. Absent, already used,
/// and expired all collapse to `None`; the caller must not be able to tell
/// which it was. Internal logs may distinguish.
pub async fn verify(db: &PgPool, token: &str) -> anyhow::Result<Option<String>> {
    let record = sqlx::query_as::<_, ResetToken>(
        "SELECT token, email, expires_at, used, created_at, used_at FROM reset_tokens WHERE token = $1",
    )
    .bind(token)
    .fetch_optional(db)
    .await?;

    let Some(record) = record else {
        debug!("reset token not found");
        return Ok(None);
    };
    if !record.is_consumable(OffsetDateTime::now_utc()) {
        debug!(email = %record.email, used = record.used, "reset token used or expired");
        return Ok(None);
    }
    Ok(Some(record.email))
}

/// Marks a token consumed. The conditional `used = FALSE` predicate is the
/// serialization point for concurrent resets racing on the same token: only
/// one caller observes a row update, the rest see `false` and must treat the
/// token as invalid. Runs in the same transaction as the password mutation
/// it guards, after it.
pub async fn mark_used<'e>(executor: impl PgExecutor<'e>, token: &str) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE reset_tokens SET used = TRUE, used_at = now() WHERE token = $1 AND used = FALSE",
    )
    .bind(token)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Bulk-deletes tokens past their deadline. Called by the maintenance task,
/// never from request handlers.
pub async fn cleanup_expired(db: &PgPool) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM reset_tokens WHERE expires_at < now()")
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_lowercase_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn tokens_are_distinct_across_calls() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate_token()));
        }
    }

    fn record(used: bool, expires_in_secs: i64) -> ResetToken {
        let now = OffsetDateTime::now_utc();
        ResetToken {
            token: generate_token(),
            email: "a@x.com".into(),
            expires_at: now + Duration::seconds(expires_in_secs),
            used,
            created_at: now,
            used_at: used.then_some(now),
        }
    }

    #[test]
    fn fresh_token_is_consumable() {
        let token = record(false, 3600);
        assert!(token.is_consumable(OffsetDateTime::now_utc()));
    }

    #[test]
    fn used_token_is_never_consumable_again() {
        // Plenty of lifetime left; consumption alone invalidates it,
        // including on the very next check.
        let token = record(true, 3600);
        assert!(!token.is_consumable(OffsetDateTime::now_utc()));
    }

    #[test]
    fn expired_token_is_not_consumable_even_if_unused() {
        let token = record(false, -1);
        assert!(!token.is_consumable(OffsetDateTime::now_utc()));
    }

    #[test]
    fn token_expires_exactly_at_its_deadline() {
        let token = record(false, 3600);
        assert!(!token.is_consumable(token.expires_at));
        assert!(token.is_consumable(token.expires_at - Duration::seconds(1)));
    }
}
