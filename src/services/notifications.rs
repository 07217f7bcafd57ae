use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// Data handed to the message renderer for a confirmation email.
#[derive(Debug, Clone, Serialize)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub lines: Vec<ConfirmationLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationLine {
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Outcome of a confirmation dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailDispatch {
    /// Message accepted by the email provider
    Sent,
    /// Email delivery is not configured; nothing was sent
    Disabled,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("email request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("email API returned status {status}")]
    Api { status: u16, body: String },
}

/// Trait for confirmation-message delivery. Failure is always non-fatal to
/// the caller; implementations must not panic.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<EmailDispatch, NotificationError>;
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    html: String,
}

/// Sends confirmation email through a transactional email HTTP API.
#[derive(Clone)]
pub struct HttpEmailNotifier {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailNotifier {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    fn render(confirmation: &OrderConfirmation) -> String {
        let mut html = format!(
            "<h1>Thanks for your order!</h1><p>Order <strong>{}</strong> is confirmed.</p><ul>",
            confirmation.order_id
        );
        for line in &confirmation.lines {
            html.push_str(&format!(
                "<li>{} &times; {} @ {} {}</li>",
                line.quantity,
                line.name,
                line.unit_price,
                confirmation.currency.to_uppercase()
            ));
        }
        html.push_str(&format!(
            "</ul><p>Total: {} {}</p>",
            confirmation.total_amount,
            confirmation.currency.to_uppercase()
        ));
        html
    }
}

#[async_trait]
impl NotificationService for HttpEmailNotifier {
    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id))]
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<EmailDispatch, NotificationError> {
        let request = EmailRequest {
            from: &self.from,
            to: [to],
            subject: format!("Order confirmation {}", confirmation.order_id),
            html: Self::render(confirmation),
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Api { status, body });
        }

        info!("order confirmation email accepted");
        Ok(EmailDispatch::Sent)
    }
}

/// No-op sender used when no email API key is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl NotificationService for DisabledNotifier {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<EmailDispatch, NotificationError> {
        info!(
            to,
            order_id = %confirmation.order_id,
            "email delivery disabled; skipping order confirmation"
        );
        Ok(EmailDispatch::Disabled)
    }
}
