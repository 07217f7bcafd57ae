use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;

/// One display line of a hosted checkout page.
#[derive(Debug, Clone, Serialize)]
pub struct SessionLineItem {
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// Context attached to the checkout session and read back verbatim when the
/// completion callback arrives. The metadata channel only carries text, so
/// the shipping address travels pre-serialized.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub shipping_address: String,
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub line_items: Vec<SessionLineItem>,
    pub currency: String,
    pub metadata: SessionMetadata,
    pub customer_email: String,
    pub client_reference_id: String,
}

/// Freshly created hosted checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    pub url: String,
}

/// Session state returned by the status-polling call.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    pub status: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_total: Option<i64>,
    pub customer_email: Option<String>,
    pub customer_details: Option<serde_json::Value>,
    pub metadata: HashMap<String, String>,
    pub client_reference_id: Option<String>,
}

/// Seam over the third-party payment API.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError>;
}

/// REST client for the gateway's hosted checkout API. Requests are
/// form-encoded; the secret key rides as HTTP basic auth.
#[derive(Clone)]
pub struct HostedCheckoutClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    success_url: String,
    cancel_url: String,
}

impl HostedCheckoutClient {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }
}

/// Raw session payload as the gateway returns it.
#[derive(Debug, Deserialize)]
struct SessionPayload {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_intent: Option<serde_json::Value>,
    amount_total: Option<i64>,
    customer_email: Option<String>,
    customer_details: Option<serde_json::Value>,
    metadata: Option<HashMap<String, String>>,
    client_reference_id: Option<String>,
}

#[async_trait]
impl PaymentGateway for HostedCheckoutClient {
    #[instrument(skip(self, request), fields(cart_id = %request.metadata.cart_id))]
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.success_url.clone()),
            ("cancel_url".into(), self.cancel_url.clone()),
            (
                "client_reference_id".into(),
                request.client_reference_id.clone(),
            ),
            ("customer_email".into(), request.customer_email.clone()),
            (
                "metadata[userId]".into(),
                request.metadata.user_id.to_string(),
            ),
            (
                "metadata[cartid]".into(),
                request.metadata.cart_id.to_string(),
            ),
            (
                "metadata[address]".into(),
                request.metadata.shipping_address.clone(),
            ),
        ];

        let currency = request.currency.to_ascii_lowercase();
        for (i, item) in request.line_items.iter().enumerate() {
            form.push((
                format!("line_items[{i}][price_data][currency]"),
                currency.clone(),
            ));
            form.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                minor_units(item.unit_price)?.to_string(),
            ));
            form.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(description) = &item.description {
                form.push((
                    format!("line_items[{i}][price_data][product_data][description]"),
                    description.clone(),
                ));
            }
            form.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        let response = self
            .http
            .post(self.sessions_url())
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "checkout session request failed");
                ServiceError::ExternalServiceError(format!("checkout session create failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, body, "gateway rejected checkout session create");
            return Err(ServiceError::ExternalServiceError(format!(
                "checkout session create failed with status {status}"
            )));
        }

        let payload: SessionPayload = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid gateway response: {e}"))
        })?;

        let url = payload.url.ok_or_else(|| {
            ServiceError::ExternalServiceError("checkout session missing url".to_string())
        })?;

        Ok(GatewaySession {
            id: payload.id,
            url,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError> {
        let response = self
            .http
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("session retrieve failed: {e}"))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "checkout session {session_id} not found"
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::ExternalServiceError(format!(
                "session retrieve failed with status {status}"
            )));
        }

        let payload: SessionPayload = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid gateway response: {e}"))
        })?;

        Ok(SessionDetails {
            status: payload.status,
            payment_intent_id: payload.payment_intent.as_ref().and_then(intent_id),
            amount_total: payload.amount_total,
            customer_email: payload.customer_email,
            customer_details: payload.customer_details,
            metadata: payload.metadata.unwrap_or_default(),
            client_reference_id: payload.client_reference_id,
        })
    }
}

/// The payment-intent reference arrives either as a bare id or as an
/// expanded object.
fn intent_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Object(obj) => obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Converts a decimal amount to the gateway's integer minor units.
fn minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!("amount {amount} not representable in minor units"))
        })
}
