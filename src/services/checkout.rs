use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::payment_gateway::{
        CreateSessionRequest, PaymentGateway, SessionLineItem, SessionMetadata,
    },
};

/// Structured shipping address, snapshotted onto the order and carried
/// through session metadata as serialized JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub address_line_1: String,
    #[serde(default)]
    pub address_line_2: Option<String>,
    pub city: String,
    pub province: String,
    pub country_code: String,
    pub postal_code: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Inbound checkout request. Outer keys are camelCase; cart items keep the
/// store's snake_case column names.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, message = "cartItems must not be empty"))]
    pub cart_items: Vec<CheckoutItem>,
    #[validate(email(message = "userEmail must be a valid email address"))]
    pub user_email: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub shipping_address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    pub cart_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub delivery_option: Option<String>,
    #[serde(default)]
    pub selected_color: Option<String>,
    #[serde(default)]
    pub selected_size: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub session_id: String,
    pub session_url: String,
    pub order_id: String,
    pub total_amount: Decimal,
    pub orders: Vec<CheckoutItem>,
}

/// Payment-status query response for a checkout session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub status: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_total: Option<i64>,
    pub customer_email: Option<String>,
    pub customer_details: Option<serde_json::Value>,
    pub metadata: std::collections::HashMap<String, String>,
    pub client_reference_id: Option<String>,
}

/// Converts validated cart lines into a hosted checkout session.
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            event_sender,
            currency: currency.into(),
        }
    }

    /// Validates the request, builds gateway line items, and opens a hosted
    /// checkout session carrying `{userId, cartid, address}` metadata.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn begin_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;

        if request.user_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "userId is required".to_string(),
            ));
        }

        // All lines must belong to one cart; trusting the first item's cart
        // id silently would mis-clear carts at callback time.
        let cart_id = request.cart_items[0].cart_id;
        for item in &request.cart_items {
            if item.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity must be positive for product {}",
                    item.product_id
                )));
            }
            if item.price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "price must be non-negative for product {}",
                    item.product_id
                )));
            }
            if item.cart_id != cart_id {
                return Err(ServiceError::ValidationError(
                    "cart items must all belong to one cart".to_string(),
                ));
            }
        }

        let total_amount: Decimal = request
            .cart_items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum();

        let line_items = request
            .cart_items
            .iter()
            .map(|item| SessionLineItem {
                name: item
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Item {}", item.product_id)),
                description: option_summary(item),
                unit_price: item.price,
                quantity: item.quantity as u32,
            })
            .collect();

        let reference = order_reference(&request.user_email, request.user_id);
        let shipping_address = serde_json::to_string(&request.shipping_address)?;

        let session = self
            .gateway
            .create_checkout_session(CreateSessionRequest {
                line_items,
                currency: self.currency.clone(),
                metadata: SessionMetadata {
                    user_id: request.user_id,
                    cart_id,
                    shipping_address,
                },
                customer_email: request.user_email.clone(),
                client_reference_id: reference.clone(),
            })
            .await?;

        info!(
            session_id = %session.id,
            %cart_id,
            %total_amount,
            "checkout session opened"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutSessionCreated {
                cart_id,
                session_id: session.id.clone(),
            })
            .await
        {
            warn!(error = %e, "failed to publish checkout event");
        }

        Ok(CheckoutResponse {
            success: true,
            session_id: session.id,
            session_url: session.url,
            order_id: reference,
            total_amount,
            orders: request.cart_items,
        })
    }

    /// Polls the gateway for the current state of a checkout session.
    #[instrument(skip(self))]
    pub async fn payment_status(
        &self,
        session_id: &str,
    ) -> Result<PaymentStatusResponse, ServiceError> {
        let details = self.gateway.retrieve_session(session_id).await?;

        Ok(PaymentStatusResponse {
            status: details.status,
            payment_intent_id: details.payment_intent_id,
            amount_total: details.amount_total,
            customer_email: details.customer_email,
            customer_details: details.customer_details,
            metadata: details.metadata,
            client_reference_id: details.client_reference_id,
        })
    }
}

/// Deterministic order reference derived from the customer email and user id.
pub fn order_reference(user_email: &str, user_id: Uuid) -> String {
    let digest = Sha256::digest(
        format!("{}:{}", user_email.trim().to_ascii_lowercase(), user_id).as_bytes(),
    );
    format!("ORD-{}", hex::encode(&digest[..6]).to_ascii_uppercase())
}

fn option_summary(item: &CheckoutItem) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(color) = &item.selected_color {
        parts.push(format!("color: {color}"));
    }
    if let Some(size) = &item.selected_size {
        parts.push(format!("size: {size}"));
    }
    if let Some(delivery) = &item.delivery_option {
        parts.push(format!("delivery: {delivery}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
