//! Delivery catalog lookup.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;

use crate::entities::delivery_option::{self, Model as DeliveryOptionModel};
use crate::entities::DeliveryOption;
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct DeliveryService {
    db: Arc<DatabaseConnection>,
}

impl DeliveryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists the closed catalog, default option first.
    pub async fn list_options(&self) -> Result<Vec<DeliveryOptionModel>, ServiceError> {
        Ok(DeliveryOption::find()
            .order_by_desc(delivery_option::Column::IsDefault)
            .order_by_asc(delivery_option::Column::DeliveryPrice)
            .all(&*self.db)
            .await?)
    }

    /// The catalog's default option. The seed guarantees one exists.
    pub async fn default_option(&self) -> Result<DeliveryOptionModel, ServiceError> {
        DeliveryOption::find()
            .filter(delivery_option::Column::IsDefault.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError("delivery catalog has no default option".to_string())
            })
    }
}
