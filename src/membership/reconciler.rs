use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::repo::{Membership, User},
    membership::stripe::PaymentProvider,
};

/// Provider-side subscription status as delivered by webhooks. Unrecognized
/// values deserialize to `Unknown` rather than failing the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unknown => "unknown",
        }
    }

    /// The tier a status maps to. `None` means the event carries no tier
    /// decision and is ignored (e.g. an incomplete first payment).
    pub fn tier(&self) -> Option<Membership> {
        match self {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => Some(Membership::Paid),
            SubscriptionStatus::Canceled
            | SubscriptionStatus::Unpaid
            | SubscriptionStatus::IncompleteExpired => Some(Membership::Free),
            SubscriptionStatus::PastDue
            | SubscriptionStatus::Incomplete
            | SubscriptionStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub event_type: String,
    pub customer_id: String,
    pub subscription_id: String,
    pub status: SubscriptionStatus,
}

/// Records which provider customer belongs to a user, written when a
/// checkout session completes carrying the user's id as its client
/// reference. Subscription webhooks can only be attributed to a user once
/// this linkage exists. Idempotent: relinking the same pair is a no-op.
pub async fn link_customer(db: &PgPool, user_id: Uuid, customer_id: &str) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE users SET stripe_customer_id = $2 WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .bind(customer_id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        warn!(%user_id, customer_id, "checkout completed for unknown or deleted user");
    } else {
        info!(%user_id, customer_id, "stripe customer linked");
    }
    Ok(())
}

/// Applies one provider webhook event to the membership state. This module
/// is the only writer of `membership`, `stripe_*`, and `payment_status`
/// after account creation. The provider is the source of truth, so replayed
/// events are last-write-wins no-ops.
pub async fn apply_event(db: &PgPool, event: &SubscriptionEvent) -> anyhow::Result<()> {
    let Some(user) = User::find_by_stripe_customer(db, &event.customer_id).await? else {
        // A customer we never saw; acknowledge so the provider stops
        // retrying an undeliverable event.
        warn!(customer_id = %event.customer_id, event_type = %event.event_type,
              "webhook for unknown customer");
        return Ok(());
    };

    match event.status.tier() {
        Some(Membership::Paid) => {
            sqlx::query(
                r#"
                UPDATE users
                SET membership = 'paid',
                    stripe_subscription_id = $2,
                    payment_status = $3,
                    membership_updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(user.id)
            .bind(&event.subscription_id)
            .bind(event.status.as_str())
            .execute(db)
            .await?;
            info!(user_id = %user.id, status = event.status.as_str(), "membership set to paid");
        }
        Some(Membership::Free) => {
            // Keep the customer id: the record is reusable for a future
            // resubscription.
            sqlx::query(
                r#"
                UPDATE users
                SET membership = 'free',
                    stripe_subscription_id = NULL,
                    payment_status = $2,
                    membership_updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(user.id)
            .bind(event.status.as_str())
            .execute(db)
            .await?;
            info!(user_id = %user.id, status = event.status.as_str(), "membership set to free");
        }
        None => {
            debug!(user_id = %user.id, status = event.status.as_str(),
                   "subscription status carries no tier decision, ignored");
        }
    }
    Ok(())
}

/// Best-effort immediate cancellation during account deletion, no prorated
/// refund. A provider failure is logged and swallowed: the user's right to
/// delete their data is not blocked by a third party's availability.
pub async fn cancel_for_deletion(provider: &dyn PaymentProvider, user: &User) {
    let Some(subscription_id) = user.stripe_subscription_id.as_deref() else {
        return;
    };
    match provider.cancel_subscription(subscription_id, false).await {
        Ok(()) => {
            info!(user_id = %user.id, subscription_id, "subscription canceled for deletion");
        }
        Err(e) => {
            error!(error = %e, user_id = %user.id, subscription_id,
                   "subscription cancel failed, deletion proceeds");
        }
    }
}
