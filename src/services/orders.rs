use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        cart_item::{self, Entity as CartItemEntity},
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::checkout::Address,
    services::notifications::{
        ConfirmationLine, EmailDispatch, NotificationService, OrderConfirmation,
    },
};

/// Input extracted from a payment-confirmation callback.
#[derive(Debug, Clone)]
pub struct PaidOrderInput {
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub shipping_address: Address,
    pub status: OrderStatus,
    pub session_id: String,
    pub customer_email: Option<String>,
}

/// Cart items deleted after a successful order creation, reported so a
/// client-side cache can reconcile.
#[derive(Debug, Clone, Serialize)]
pub struct ClearedCart {
    pub count: u64,
    pub item_ids: Vec<Uuid>,
}

/// Result of one engine invocation. Both idempotency branches (the upfront
/// read and the unique-constraint fallback) produce this same shape with
/// `is_existing = true`.
#[derive(Debug, Serialize)]
pub struct PaidOrderOutcome {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub is_existing: bool,
    pub cart_cleared: Option<ClearedCart>,
    pub email_sent: bool,
}

struct PricedLine {
    item: cart_item::Model,
    product: product::Model,
    unit_price: Decimal,
}

/// Order Creation Engine. Owns the `absent -> created` lifecycle of an order
/// keyed by its checkout-session id; later status transitions belong to
/// other collaborators.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn NotificationService>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn NotificationService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            notifier,
            event_sender,
        }
    }

    /// Idempotently materializes an order from a paid checkout session:
    /// order row and item rows are hard-fail, inventory counters, cart
    /// clearing, and confirmation email are best-effort.
    #[instrument(skip(self, input), fields(session_id = %input.session_id, cart_id = %input.cart_id))]
    pub async fn create_order_with_payment(
        &self,
        input: PaidOrderInput,
    ) -> Result<PaidOrderOutcome, ServiceError> {
        if input.session_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "sessionId is required".to_string(),
            ));
        }
        if input.user_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "userId is required".to_string(),
            ));
        }
        if input.cart_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "cartId is required".to_string(),
            ));
        }

        // Upfront duplicate check. This is an optimization only; the unique
        // constraint on stripe_session_id remains the authoritative guard.
        if let Some(existing) = self.find_by_session_id(&input.session_id).await? {
            info!(order_id = %existing.id, "order already exists for session");
            return self.existing_outcome(existing).await;
        }

        let lines = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(input.cart_id))
            .find_also_related(ProductEntity)
            .all(&*self.db)
            .await?;

        if lines.is_empty() {
            // Distinct from the duplicate case: the session has no order yet
            // but its cart is gone or was never populated.
            return Err(ServiceError::InvalidOperation(format!(
                "no cart items for cart {}",
                input.cart_id
            )));
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut total_amount = Decimal::ZERO;
        let mut currency: Option<String> = None;
        for (item, maybe_product) in lines {
            let product = maybe_product.ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "product {} missing for cart item {}",
                    item.product_id, item.id
                ))
            })?;

            match &currency {
                None => currency = Some(product.currency.clone()),
                Some(existing) if *existing != product.currency => {
                    return Err(ServiceError::InvalidOperation(format!(
                        "cart {} mixes currencies {} and {}",
                        input.cart_id, existing, product.currency
                    )));
                }
                Some(_) => {}
            }

            let unit_price = product.effective_price();
            total_amount += unit_price * Decimal::from(item.quantity);
            priced.push(PricedLine {
                item,
                product,
                unit_price,
            });
        }
        let currency = currency.unwrap_or_else(|| "usd".to_string());

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_active = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(input.user_id),
            stripe_session_id: Set(input.session_id.clone()),
            total_amount: Set(total_amount),
            currency: Set(currency.clone()),
            status: Set(input.status),
            shipping_address: Set(serde_json::to_string(&input.shipping_address)?),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let order = match order_active.insert(&*self.db).await {
            Ok(order) => order,
            Err(err) => {
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    // A concurrent delivery of the same callback won the
                    // insert; resolve to its order.
                    warn!("lost order-insert race; returning existing order");
                    let existing =
                        self.find_by_session_id(&input.session_id)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::InternalError(format!(
                                    "order for session {} vanished after conflict",
                                    input.session_id
                                ))
                            })?;
                    return self.existing_outcome(existing).await;
                }
                error!(error = %err, "failed to insert order");
                return Err(ServiceError::DatabaseError(err));
            }
        };

        let mut item_models = Vec::with_capacity(priced.len());
        let mut item_actives = Vec::with_capacity(priced.len());
        for line in &priced {
            let model = order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: line.item.product_id,
                name: line.product.name.clone(),
                quantity: line.item.quantity,
                price: line.unit_price,
                selected_color: line.item.selected_color.clone(),
                selected_size: line.item.selected_size.clone(),
                delivery_option: line.item.delivery_option.clone(),
                status: "pending".to_string(),
                created_at: now,
                updated_at: Some(now),
            };
            item_actives.push(order_item::ActiveModel {
                id: Set(model.id),
                order_id: Set(model.order_id),
                product_id: Set(model.product_id),
                name: Set(model.name.clone()),
                quantity: Set(model.quantity),
                price: Set(model.price),
                selected_color: Set(model.selected_color.clone()),
                selected_size: Set(model.selected_size.clone()),
                delivery_option: Set(model.delivery_option.clone()),
                status: Set(model.status.clone()),
                created_at: Set(model.created_at),
                updated_at: Set(model.updated_at),
            });
            item_models.push(model);
        }

        // Hard-fail boundary: the order row exists, its items must too.
        OrderItemEntity::insert_many(item_actives)
            .exec(&*self.db)
            .await
            .map_err(|err| {
                error!(error = %err, %order_id, "failed to insert order items");
                ServiceError::DatabaseError(err)
            })?;

        info!(%order_id, %total_amount, items = item_models.len(), "order created");
        self.emit(Event::OrderCreated(order_id)).await;

        // Everything below is best-effort bookkeeping relative to the
        // durable order.
        self.bump_sold_counters(&priced).await;

        let cart_cleared = match self.clear_cart(input.cart_id).await {
            Ok(cleared) => Some(cleared),
            Err(err) => {
                warn!(error = %err, cart_id = %input.cart_id, "failed to clear cart after order creation");
                None
            }
        };

        let email_sent = self.send_confirmation(&input, &order, &item_models).await;

        Ok(PaidOrderOutcome {
            order,
            items: item_models,
            is_existing: false,
            cart_cleared,
            email_sent,
        })
    }

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::StripeSessionId.eq(session_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Short-circuit shape shared by both idempotency branches.
    async fn existing_outcome(
        &self,
        order: order::Model,
    ) -> Result<PaidOrderOutcome, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        Ok(PaidOrderOutcome {
            order,
            items,
            is_existing: true,
            cart_cleared: None,
            email_sent: false,
        })
    }

    /// Increments sold counters by the ordered quantity, once per distinct
    /// product. Failures are logged and swallowed.
    async fn bump_sold_counters(&self, priced: &[PricedLine]) {
        let mut per_product: HashMap<Uuid, i32> = HashMap::new();
        for line in priced {
            *per_product.entry(line.product.id).or_insert(0) += line.item.quantity;
        }

        for (product_id, quantity) in per_product {
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::SoldItems,
                    Expr::col(product::Column::SoldItems).add(quantity),
                )
                .filter(product::Column::Id.eq(product_id))
                .exec(&*self.db)
                .await;

            match result {
                Ok(res) if res.rows_affected == 0 => {
                    warn!(%product_id, "product disappeared before inventory update");
                }
                Ok(_) => {
                    self.emit(Event::InventoryAdjusted {
                        product_id,
                        quantity,
                    })
                    .await;
                }
                Err(err) => {
                    warn!(error = %err, %product_id, "inventory update failed; order stands");
                }
            }
        }
    }

    async fn clear_cart(&self, cart_id: Uuid) -> Result<ClearedCart, ServiceError> {
        let item_ids: Vec<Uuid> = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let deleted = CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&*self.db)
            .await?;

        self.emit(Event::CartCleared {
            cart_id,
            items_removed: deleted.rows_affected,
        })
        .await;

        Ok(ClearedCart {
            count: deleted.rows_affected,
            item_ids,
        })
    }

    async fn send_confirmation(
        &self,
        input: &PaidOrderInput,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> bool {
        let Some(email) = input.customer_email.as_deref() else {
            info!(order_id = %order.id, "no customer email on session; skipping confirmation");
            return false;
        };

        let confirmation = OrderConfirmation {
            order_id: order.id,
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            lines: items
                .iter()
                .map(|item| ConfirmationLine {
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.price,
                })
                .collect(),
        };

        match self.notifier.send_order_confirmation(email, &confirmation).await {
            Ok(EmailDispatch::Sent) => true,
            Ok(EmailDispatch::Disabled) => false,
            Err(err) => {
                warn!(error = %err, order_id = %order.id, "confirmation email failed; order stands");
                false
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to publish event");
            }
        }
    }
}
