pub mod checkout;
pub mod common;
pub mod health;
pub mod payment_webhooks;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    checkout::CheckoutService, notifications::NotificationService, orders::OrderService,
    payment_gateway::PaymentGateway,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationService>,
        event_sender: Arc<EventSender>,
        currency: &str,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db,
            notifier,
            Some(event_sender.clone()),
        ));
        let checkout = Arc::new(CheckoutService::new(gateway, event_sender, currency));

        Self { checkout, orders }
    }
}
