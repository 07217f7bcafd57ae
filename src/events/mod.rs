use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the checkout and order pipeline. Consumed by the
/// in-process event task; delivery is best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutSessionCreated {
        cart_id: Uuid,
        session_id: String,
    },
    OrderCreated(Uuid),
    CartCleared {
        cart_id: Uuid,
        items_removed: u64,
    },
    InventoryAdjusted {
        product_id: Uuid,
        quantity: i32,
    },
    PaymentSucceeded {
        reference: String,
    },
    PaymentFailed {
        reference: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::CheckoutSessionCreated {
                cart_id,
                session_id,
            } => {
                info!(%cart_id, %session_id, "checkout session created");
            }
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::CartCleared {
                cart_id,
                items_removed,
            } => {
                info!(%cart_id, items_removed, "cart cleared");
            }
            Event::InventoryAdjusted {
                product_id,
                quantity,
            } => {
                info!(%product_id, quantity, "inventory adjusted");
            }
            Event::PaymentSucceeded { reference } => {
                info!(%reference, "payment succeeded");
            }
            Event::PaymentFailed { reference } => {
                warn!(%reference, "payment failed");
            }
        }
    }
}
