use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        bom::{self, BomStatus, Entity as BomEntity},
        bom_line::{self, Entity as BomLineEntity},
        production_order::Entity as ProductionOrderEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_ledger::StockLedger,
};

/// Requirement for one leaf material after full BOM expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementLine {
    pub material_id: Uuid,
    pub required: Decimal,
    pub on_hand: Decimal,
    pub shortage: Decimal,
    pub insufficient: bool,
}

impl RequirementLine {
    /// Computes the shortage view of one leaf material. Shortage is floored
    /// at zero; a positive shortage marks the line insufficient.
    pub fn evaluate(material_id: Uuid, required: Decimal, on_hand: Decimal) -> Self {
        let shortage = (required - on_hand).max(Decimal::ZERO);
        Self {
            material_id,
            required,
            on_hand,
            shortage,
            insufficient: shortage > Decimal::ZERO,
        }
    }
}

/// Shortage report for a product at a target quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsReport {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub lines: Vec<RequirementLine>,
    /// Whether issuance may proceed: no insufficient line, unless the
    /// caller explicitly allows partial issuance.
    pub can_proceed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CalculationOptions {
    pub location_id: Option<Uuid>,
    pub allow_partial: bool,
}

/// Expands bills of materials against stock snapshots into shortage reports.
///
/// Pure read-and-compute; stock rows are never locked, so the report is a
/// point-in-time estimate rather than a reservation.
#[derive(Clone)]
pub struct MaterialRequirementsService {
    db: Arc<DbPool>,
    stock_ledger: Arc<dyn StockLedger>,
    event_sender: Arc<EventSender>,
    max_depth: u32,
}

impl MaterialRequirementsService {
    pub fn new(
        db: Arc<DbPool>,
        stock_ledger: Arc<dyn StockLedger>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            stock_ledger,
            event_sender,
            max_depth: config.bom.max_depth,
        }
    }

    /// Computes the full shortage report for a product at a target quantity.
    #[instrument(skip(self))]
    pub async fn calculate(
        &self,
        product_id: Uuid,
        quantity: Decimal,
        options: &CalculationOptions,
    ) -> Result<RequirementsReport, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Target quantity must be positive, got: {}",
                quantity
            )));
        }

        let requirements = self.explode_requirements(product_id, quantity).await?;

        let mut lines = Vec::with_capacity(requirements.len());
        for (material_id, required) in requirements {
            let on_hand = self
                .stock_ledger
                .get_on_hand(material_id, options.location_id)
                .await?;
            let line = RequirementLine::evaluate(material_id, required, on_hand);

            if line.insufficient {
                warn!(
                    material_id = %line.material_id,
                    required = %line.required,
                    on_hand = %line.on_hand,
                    "material shortage detected"
                );
                self.event_sender
                    .send_or_log(Event::MaterialShortageDetected {
                        material_id: line.material_id,
                        required: line.required,
                        on_hand: line.on_hand,
                        shortage: line.shortage,
                    })
                    .await;
            }

            lines.push(line);
        }

        let can_proceed = options.allow_partial || lines.iter().all(|line| !line.insufficient);

        counter!("mes.requirements.calculated", 1);

        self.event_sender
            .send_or_log(Event::RequirementsCalculated {
                product_id,
                line_count: lines.len(),
                can_proceed,
            })
            .await;

        Ok(RequirementsReport {
            product_id,
            quantity,
            lines,
            can_proceed,
        })
    }

    /// Runs the calculation for an order's product and planned quantity and
    /// stamps the order as requirement-checked, which gates its
    /// draft -> preparing transition. Re-running is the caller's
    /// responsibility; freshness is not tracked.
    #[instrument(skip(self))]
    pub async fn calculate_for_order(
        &self,
        order_id: Uuid,
        options: &CalculationOptions,
    ) -> Result<RequirementsReport, ServiceError> {
        let order = ProductionOrderEntity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })?;

        let report = self
            .calculate(order.product_id, order.planned_quantity, options)
            .await?;

        let mut active = order.into_active_model();
        active.requirements_checked_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;

        Ok(report)
    }

    /// Expands the product's active BOM into required quantities per leaf
    /// material. Quantities for a leaf reached through multiple paths are
    /// summed.
    pub async fn explode_requirements(
        &self,
        product_id: Uuid,
        quantity: Decimal,
    ) -> Result<BTreeMap<Uuid, Decimal>, ServiceError> {
        let bom = self
            .find_active_bom(product_id)
            .await?
            .ok_or(ServiceError::NoActiveBom(product_id))?;

        let mut accumulated = BTreeMap::new();
        let mut path = vec![product_id];
        self.explode_bom(&bom, quantity, 1, &mut path, &mut accumulated)
            .await?;

        Ok(accumulated)
    }

    async fn find_active_bom(&self, product_id: Uuid) -> Result<Option<bom::Model>, ServiceError> {
        BomEntity::find()
            .filter(bom::Column::ProductId.eq(product_id))
            .filter(bom::Column::Status.eq(BomStatus::Active))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::from)
    }

    /// Recursive expansion. `path` holds the assemblies on the current
    /// branch; revisiting one, or exceeding the configured depth, is
    /// reported as a suspected cycle and surfaced to the operator.
    async fn explode_bom(
        &self,
        bom: &bom::Model,
        required: Decimal,
        depth: u32,
        path: &mut Vec<Uuid>,
        accumulated: &mut BTreeMap<Uuid, Decimal>,
    ) -> Result<(), ServiceError> {
        if depth > self.max_depth {
            error!(
                product_id = %bom.product_id,
                depth,
                "BOM expansion exceeded maximum depth; data integrity suspect"
            );
            return Err(ServiceError::BomCycleSuspected {
                product_id: bom.product_id,
                depth,
            });
        }

        let lines = BomLineEntity::find()
            .filter(bom_line::Column::BomId.eq(bom.id))
            .order_by_asc(bom_line::Column::Position)
            .all(self.db.as_ref())
            .await?;

        for line in lines {
            let scrap = line.scrap_factor.unwrap_or(Decimal::ZERO);
            let child_required = required * line.quantity_per * (Decimal::ONE + scrap);

            match self.find_active_bom(line.material_id).await? {
                Some(child_bom) => {
                    if path.contains(&line.material_id) {
                        error!(
                            product_id = %line.material_id,
                            depth,
                            "BOM cycle detected; data integrity suspect"
                        );
                        return Err(ServiceError::BomCycleSuspected {
                            product_id: line.material_id,
                            depth,
                        });
                    }

                    path.push(line.material_id);
                    Box::pin(self.explode_bom(
                        &child_bom,
                        child_required,
                        depth + 1,
                        path,
                        accumulated,
                    ))
                    .await?;
                    path.pop();
                }
                None => {
                    *accumulated
                        .entry(line.material_id)
                        .or_insert(Decimal::ZERO) += child_required;
                }
            }
        }

        Ok(())
    }
}
