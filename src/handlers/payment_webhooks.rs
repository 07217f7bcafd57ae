use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    events::Event,
    services::checkout::Address,
    services::orders::PaidOrderInput,
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

/// POST /api/v1/payments/webhook
///
/// Authenticates the raw body against the shared secret before any parsing,
/// then acknowledges immediately; order creation runs after the response so
/// the gateway is never made to retry on slow or failing persistence.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            ServiceError::WebhookAuthentication("missing signature header".to_string())
        })?;

    if !verify_signature(
        signature,
        &body,
        &state.config.payment_webhook_secret,
        state.config.payment_webhook_tolerance_secs,
    ) {
        warn!("payment webhook signature verification failed");
        return Err(ServiceError::WebhookAuthentication(
            "invalid signature".to_string(),
        ));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid event payload: {e}")))?;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let input = extract_completed_checkout(&event.data.object)?;
            let session_id = input.session_id.clone();
            let orders = state.services.orders.clone();
            tokio::spawn(async move {
                match orders.create_order_with_payment(input).await {
                    Ok(outcome) if outcome.is_existing => {
                        info!(
                            order_id = %outcome.order.id,
                            %session_id,
                            "duplicate callback; order already exists"
                        );
                    }
                    Ok(outcome) => {
                        info!(
                            order_id = %outcome.order.id,
                            %session_id,
                            email_sent = outcome.email_sent,
                            "order created from completion callback"
                        );
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            %session_id,
                            "order creation failed; relying on gateway retry"
                        );
                    }
                }
            });
        }
        "payment_intent.succeeded" => {
            let reference = object_id(&event.data.object).unwrap_or(event.id);
            info!(%reference, "payment succeeded");
            if let Err(e) = state
                .event_sender
                .send(Event::PaymentSucceeded { reference })
                .await
            {
                warn!(error = %e, "failed to publish payment event");
            }
        }
        "payment_intent.payment_failed" => {
            let reference = object_id(&event.data.object).unwrap_or(event.id);
            warn!(%reference, "payment failed");
            if let Err(e) = state
                .event_sender
                .send(Event::PaymentFailed { reference })
                .await
            {
                warn!(error = %e, "failed to publish payment event");
            }
        }
        other => {
            info!(event_type = other, "ignoring unhandled webhook event");
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({"received": true, "success": true})),
    ))
}

/// Event envelope as delivered by the gateway.
#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: Value,
}

fn object_id(object: &Value) -> Option<String> {
    object
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Pulls the order-creation input out of a completed checkout session.
/// Every value crossed the asynchronous gap as text in the session metadata;
/// anything missing or undeserializable is a malformed upstream event.
fn extract_completed_checkout(object: &Value) -> Result<PaidOrderInput, ServiceError> {
    let session_id = object_id(object)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::BadRequest("event object missing session id".to_string()))?;

    let metadata = object
        .get("metadata")
        .and_then(|v| v.as_object())
        .ok_or_else(|| ServiceError::BadRequest("event object missing metadata".to_string()))?;

    let user_id = metadata
        .get("userId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            ServiceError::BadRequest("metadata userId missing or invalid".to_string())
        })?;

    let cart_id = metadata
        .get("cartid")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            ServiceError::BadRequest("metadata cartid missing or invalid".to_string())
        })?;

    let shipping_address: Address = metadata
        .get("address")
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .ok_or_else(|| {
            ServiceError::BadRequest("metadata address missing or undeserializable".to_string())
        })?;

    let customer_email = object
        .get("customer_details")
        .and_then(|details| details.get("email"))
        .and_then(|v| v.as_str())
        .or_else(|| object.get("customer_email").and_then(|v| v.as_str()))
        .map(|s| s.to_string());

    Ok(PaidOrderInput {
        user_id,
        cart_id,
        shipping_address,
        status: OrderStatus::Processing,
        session_id,
        customer_email,
    })
}

/// Verifies a `t=<ts>,v1=<hex>` signature header: HMAC-SHA256 over
/// `"{t}.{payload}"` with the shared secret, constant-time comparison, and a
/// bounded timestamp age.
pub fn verify_signature(
    signature: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let mut timestamp = "";
    let mut candidate = "";
    for part in signature.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => candidate = value,
            _ => {}
        }
    }

    if timestamp.is_empty() || candidate.is_empty() {
        return false;
    }

    match timestamp.parse::<i64>() {
        Ok(ts) => {
            let now = chrono::Utc::now().timestamp();
            if (now - ts).unsigned_abs() > tolerance_secs {
                return false;
            }
        }
        Err(_) => return false,
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, candidate)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign("whsec_test", chrono::Utc::now().timestamp(), payload);
        assert!(verify_signature(&header, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign("whsec_other", chrono::Utc::now().timestamp(), payload);
        assert!(!verify_signature(&header, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = sign(
            "whsec_test",
            chrono::Utc::now().timestamp(),
            br#"{"id":"evt_1"}"#,
        );
        assert!(!verify_signature(
            &header,
            br#"{"id":"evt_2"}"#,
            "whsec_test",
            300
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = br#"{"id":"evt_1"}"#;
        let stale = chrono::Utc::now().timestamp() - 3600;
        let header = sign("whsec_test", stale, payload);
        assert!(!verify_signature(&header, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_signature("v1=abc", b"{}", "whsec_test", 300));
        assert!(!verify_signature("t=notanumber,v1=abc", b"{}", "whsec_test", 300));
        assert!(!verify_signature("", b"{}", "whsec_test", 300));
    }

    #[test]
    fn extract_requires_complete_metadata() {
        let object = serde_json::json!({
            "id": "cs_test_1",
            "metadata": {
                "userId": Uuid::new_v4().to_string(),
                // cartid intentionally absent
                "address": "{}"
            }
        });

        let err = extract_completed_checkout(&object).unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn extract_reads_metadata_and_email() {
        let user_id = Uuid::new_v4();
        let cart_id = Uuid::new_v4();
        let address = serde_json::json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "address_line_1": "1 Analytical Way",
            "city": "London",
            "province": "LDN",
            "country_code": "GB",
            "postal_code": "N1 7AA"
        });
        let object = serde_json::json!({
            "id": "cs_test_1",
            "customer_details": {"email": "ada@example.com"},
            "metadata": {
                "userId": user_id.to_string(),
                "cartid": cart_id.to_string(),
                "address": address.to_string()
            }
        });

        let input = extract_completed_checkout(&object).unwrap();
        assert_eq!(input.user_id, user_id);
        assert_eq!(input.cart_id, cart_id);
        assert_eq!(input.session_id, "cs_test_1");
        assert_eq!(input.customer_email.as_deref(), Some("ada@example.com"));
        assert_eq!(input.shipping_address.city, "London");
        assert_eq!(input.status, OrderStatus::Processing);
    }
}
