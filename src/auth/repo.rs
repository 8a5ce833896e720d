use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Membership tier. Only the membership reconciler writes this after
/// account creation (which always writes `free`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "membership", rename_all = "lowercase")]
pub enum Membership {
    Free,
    Paid,
}

/// User record. Soft-deleted rows keep their id but lose credentials, name,
/// and the original email (rewritten so it can never collide with a live
/// signup); every lookup here filters them out.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub membership: Membership,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub payment_status: Option<String>,
    pub membership_updated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

const USER_COLUMNS: &str = r#"
    id, email, password_hash, name, membership,
    stripe_customer_id, stripe_subscription_id, payment_status,
    membership_updated_at, created_at, deleted_at
"#;

impl User {
    /// Find an active user by normalized email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_stripe_customer(
        db: &PgPool,
        customer_id: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE stripe_customer_id = $1 AND deleted_at IS NULL"
        ))
        .bind(customer_id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new free-tier user with a hashed password. Email uniqueness
    /// among active users is checked by the caller first and enforced again
    /// by the partial unique index.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        name: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, membership, created_at)
            VALUES ($1, $2, $3, $4, 'free', now())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn update_password_hash<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        password_hash: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Logical deletion: stamps `deleted_at`, scrubs credentials and name,
    /// rewrites the email to a masked value. Runs inside the account
    /// deletion transaction.
    pub async fn soft_delete<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        masked_email: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = now(), password_hash = NULL, name = NULL, email = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(masked_email)
        .execute(executor)
        .await?;
        Ok(())
    }
}

/// Masked replacement email for soft-deleted accounts. Namespaced under a
/// reserved TLD so it can never be claimed by a real signup.
pub fn masked_email(id: Uuid) -> String {
    format!("deleted-{id}@deleted.invalid")
}

/// True when the database rejected a write for violating a unique
/// constraint. Two concurrent signups for the same email can both pass the
/// pre-check; the loser's INSERT trips the partial unique index and must
/// read as a duplicate, not as an internal failure.
pub fn is_unique_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db))
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}
