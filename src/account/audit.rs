use sqlx::PgPool;
use uuid::Uuid;

/// Append-only audit record. Writing one must never roll back the operation
/// it describes; callers log and continue on failure.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub user_id: Uuid,
    pub masked_email: String,
    pub ip: String,
    pub user_agent: String,
    pub outcome: String,
}

pub async fn append(db: &PgPool, entry: &AuditEntry) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, action, user_id, masked_email, ip, user_agent, outcome, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&entry.action)
    .bind(entry.user_id)
    .bind(&entry.masked_email)
    .bind(&entry.ip)
    .bind(&entry.user_agent)
    .bind(&entry.outcome)
    .execute(db)
    .await?;
    Ok(())
}
