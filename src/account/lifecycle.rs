use tracing::{error, info};
use uuid::Uuid;

use crate::{
    account::audit::{self, AuditEntry},
    auth::repo::{masked_email, User},
    error::AppError,
    membership::reconciler,
    state::AppState,
};

/// Request-level metadata carried into the audit trail.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
}

/// No cross-account deletion, ever.
fn ensure_self(requester: Uuid, target: Uuid) -> Result<(), AppError> {
    if requester != target {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// The confirmation email must equal the account email case-sensitively;
/// this guards against a forged request body, not against typos.
fn ensure_confirmation(confirm_email: &str, account_email: &str) -> Result<(), AppError> {
    if confirm_email != account_email {
        return Err(AppError::Validation(
            "Confirmation email does not match".into(),
        ));
    }
    Ok(())
}

/// Deletes an account: best-effort subscription cancellation, then one
/// transaction removing linked-identity rows and soft-deleting the user,
/// then an audit append that never rolls the deletion back.
pub async fn delete_account(
    state: &AppState,
    requester: Uuid,
    target: Uuid,
    confirm_email: &str,
    meta: &RequestMeta,
) -> Result<(), AppError> {
    ensure_self(requester, target)?;

    let Some(user) = User::find_by_id(&state.db, target).await? else {
        return Err(AppError::NotFound("Account not found".into()));
    };
    ensure_confirmation(confirm_email, &user.email)?;

    // Provider failure is tolerated; the user's data still gets deleted.
    reconciler::cancel_for_deletion(state.payments.as_ref(), &user).await;

    let masked = masked_email(user.id);
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    sqlx::query("DELETE FROM linked_accounts WHERE user_id = $1")
        .bind(user.id)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;
    User::soft_delete(&mut *tx, user.id, &masked).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    let entry = AuditEntry {
        action: "account.delete".into(),
        user_id: user.id,
        masked_email: masked,
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
        outcome: "deleted".into(),
    };
    if let Err(e) = audit::append(&state.db, &entry).await {
        error!(error = %e, user_id = %user.id, "audit append failed after deletion");
    }

    info!(user_id = %user.id, "account deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cross_account_deletion() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(matches!(ensure_self(a, b), Err(AppError::Forbidden)));
        assert!(ensure_self(a, a).is_ok());
    }

    #[test]
    fn confirmation_email_is_case_sensitive() {
        assert!(ensure_confirmation("a@x.com", "a@x.com").is_ok());
        assert!(matches!(
            ensure_confirmation("A@x.com", "a@x.com"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ensure_confirmation("other@x.com", "a@x.com"),
            Err(AppError::Validation(_))
        ));
    }
}
