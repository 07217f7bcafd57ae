use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Product entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Product name
    #[validate(length(
        min = 1,
        max = 255,
        message = "Product name must be between 1 and 255 characters"
    ))]
    pub name: String,

    /// SKU (Stock Keeping Unit)
    #[validate(length(
        min = 1,
        max = 100,
        message = "SKU must be between 1 and 100 characters"
    ))]
    pub sku: String,

    /// List price. Required: a line with no resolvable price fails the
    /// order instead of silently billing zero.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,

    /// Discounted price; preferred over `price` when present.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub sale_price: Option<Decimal>,

    /// Currency for the price (e.g., USD, EUR)
    #[validate(length(min = 3, max = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,

    /// Units sold. Monotonically increasing, bumped by exactly the ordered
    /// quantity once per order.
    pub sold_items: i32,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Effective unit price: sale price when present, else list price.
    pub fn effective_price(&self) -> Decimal {
        self.sale_price.unwrap_or(self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, sale_price: Option<Decimal>) -> Model {
        Model {
            id: Uuid::new_v4(),
            name: "Test Product".to_string(),
            sku: "TEST-SKU".to_string(),
            price,
            sale_price,
            currency: "USD".to_string(),
            sold_items: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn sale_price_wins_when_present() {
        let p = product(dec!(100), Some(dec!(80)));
        assert_eq!(p.effective_price(), dec!(80));
    }

    #[test]
    fn list_price_used_when_no_sale() {
        let p = product(dec!(50), None);
        assert_eq!(p.effective_price(), dec!(50));
    }
}
