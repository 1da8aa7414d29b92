use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::stock_balance::{self, Entity as StockBalanceEntity},
    errors::ServiceError,
};

/// Read access to the external stock ledger.
///
/// The ledger is an external system of record; this core consults it and
/// never mutates it. Readings are point-in-time estimates, not reservations,
/// and may be stale.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Current on-hand quantity for a material. With no location, on-hand
    /// is summed across all locations.
    async fn get_on_hand(
        &self,
        material_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Decimal, ServiceError>;
}

/// Stock ledger backed by the `stock_balances` snapshot table.
#[derive(Clone)]
pub struct DbStockLedger {
    db: Arc<DbPool>,
}

impl DbStockLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StockLedger for DbStockLedger {
    async fn get_on_hand(
        &self,
        material_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Decimal, ServiceError> {
        let mut query =
            StockBalanceEntity::find().filter(stock_balance::Column::MaterialId.eq(material_id));

        if let Some(location_id) = location_id {
            query = query.filter(stock_balance::Column::LocationId.eq(location_id));
        }

        let balances = query.all(self.db.as_ref()).await?;

        Ok(balances
            .iter()
            .fold(Decimal::ZERO, |acc, row| acc + row.quantity_on_hand))
    }
}
