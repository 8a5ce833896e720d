use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    membership::reconciler::{self, SubscriptionEvent, SubscriptionStatus},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    pub id: String,
    pub customer: Option<String>,
    pub status: Option<SubscriptionStatus>,
    /// Checkout sessions echo back the user id we passed when creating them.
    pub client_reference_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(stripe_webhook))
}

/// Customer linkage carried by a completed checkout session: the user id we
/// handed to the provider at checkout time plus the customer it created.
fn linkage_of(payload: &WebhookPayload) -> Option<(Uuid, &str)> {
    if payload.event_type != "checkout.session.completed" {
        return None;
    }
    let customer = payload.data.object.customer.as_deref()?;
    let reference = payload.data.object.client_reference_id.as_deref()?;
    match Uuid::parse_str(reference) {
        Ok(user_id) => Some((user_id, customer)),
        Err(_) => {
            warn!(reference, "checkout session with unparseable client reference");
            None
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some((user_id, customer_id)) = linkage_of(&payload) {
        reconciler::link_customer(&state.db, user_id, customer_id).await?;
        return Ok(Json(json!({ "received": true })));
    }

    if !payload.event_type.starts_with("customer.subscription.") {
        debug!(event_type = %payload.event_type, "webhook event ignored");
        return Ok(Json(json!({ "received": true })));
    }

    let (Some(customer_id), Some(status)) = (payload.data.object.customer, payload.data.object.status)
    else {
        debug!(event_type = %payload.event_type, "subscription event without customer or status");
        return Ok(Json(json!({ "received": true })));
    };

    let event = SubscriptionEvent {
        event_type: payload.event_type,
        customer_id,
        subscription_id: payload.data.object.id,
        status,
    };
    reconciler::apply_event(&state.db, &event).await?;

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stripe_subscription_payload() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "type": "customer.subscription.updated",
            "data": {
                "object": {
                    "id": "sub_123",
                    "customer": "cus_456",
                    "status": "active",
                    "unrelated_field": 42
                }
            }
        }))
        .unwrap();
        assert_eq!(payload.event_type, "customer.subscription.updated");
        assert_eq!(payload.data.object.id, "sub_123");
        assert_eq!(payload.data.object.customer.as_deref(), Some("cus_456"));
        assert_eq!(payload.data.object.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn checkout_completion_yields_customer_linkage() {
        let user_id = Uuid::new_v4();
        let payload: WebhookPayload = serde_json::from_value(json!({
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_123",
                    "customer": "cus_456",
                    "client_reference_id": user_id.to_string()
                }
            }
        }))
        .unwrap();
        assert_eq!(linkage_of(&payload), Some((user_id, "cus_456")));
    }

    #[test]
    fn subscription_events_yield_no_linkage() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "type": "customer.subscription.updated",
            "data": {
                "object": { "id": "sub_123", "customer": "cus_456", "status": "active" }
            }
        }))
        .unwrap();
        assert_eq!(linkage_of(&payload), None);
    }

    #[test]
    fn unparseable_client_reference_yields_no_linkage() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_123",
                    "customer": "cus_456",
                    "client_reference_id": "not-a-uuid"
                }
            }
        }))
        .unwrap();
        assert_eq!(linkage_of(&payload), None);
    }

    #[test]
    fn tolerates_non_subscription_objects() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "type": "invoice.paid",
            "data": { "object": { "id": "in_789" } }
        }))
        .unwrap();
        assert!(payload.data.object.customer.is_none());
        assert!(payload.data.object.status.is_none());
    }
}
