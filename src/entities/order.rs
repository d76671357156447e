use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted order, created exactly once per completed payment.
///
/// `payment_intent_id` carries a unique index and is the idempotency key for
/// the whole reconciliation pipeline.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_method: String,
    #[sea_orm(unique)]
    pub payment_intent_id: String,
    pub order_type: OrderType,
    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<Json>,
    pub is_anonymous_order: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle status. Orders are never updated after creation except to
/// flag a reconciliation gap (`ItemsMissing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "items_missing")]
    ItemsMissing,
}

/// Discriminator controlling line-item shape and notification template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderType {
    #[sea_orm(string_value = "cart")]
    Cart,
    #[sea_orm(string_value = "service_package")]
    ServicePackage,
}
