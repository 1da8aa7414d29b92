use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        production_order::{
            self, Entity as ProductionOrderEntity, OrderPriority, ProductionOrderStatus,
        },
        quality_inspection::{self, Entity as QualityInspectionEntity, InspectionType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        material_requirements::MaterialRequirementsService,
        quality_inspections::{
            CreateInspectionInput, CreateInspectionItemInput, QualityInspectionService,
        },
    },
};

/// Input payload for creating a production order
#[derive(Debug, Clone)]
pub struct CreateProductionOrderInput {
    pub order_number: String,
    pub product_id: Uuid,
    pub planned_quantity: Decimal,
    pub planned_start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub priority: Option<OrderPriority>,
    pub remarks: Option<String>,
}

/// Input payload for updating descriptive order fields. Status and
/// quantities only change through the transition operations.
#[derive(Debug, Clone, Default)]
pub struct UpdateProductionOrderInput {
    pub planned_start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub priority: Option<OrderPriority>,
    pub remarks: Option<String>,
}

/// Issued quantity for one material, as confirmed by the warehouse
#[derive(Debug, Clone)]
pub struct MaterialIssue {
    pub material_id: Uuid,
    pub quantity: Decimal,
}

/// Input payload for moving a completed order into inspection
#[derive(Debug, Clone)]
pub struct BeginInspectionInput {
    pub inspection_type: InspectionType,
    pub batch_number: String,
    pub planned_date: Option<DateTime<Utc>>,
    pub inspector: Option<String>,
    pub standard: Option<String>,
    pub items: Vec<CreateInspectionItemInput>,
}

/// Service governing the production order lifecycle.
///
/// Every transition validates against the current persisted status through a
/// conditional update; a concurrent writer that loses the race observes
/// `InvalidTransition` rather than silently overwriting the winner.
#[derive(Clone)]
pub struct ProductionOrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    requirements: Arc<MaterialRequirementsService>,
    inspections: Arc<QualityInspectionService>,
}

impl ProductionOrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        requirements: Arc<MaterialRequirementsService>,
        inspections: Arc<QualityInspectionService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            requirements,
            inspections,
        }
    }

    /// Creates a production order in draft status.
    #[instrument(skip(self, input))]
    pub async fn create_order(
        &self,
        input: CreateProductionOrderInput,
    ) -> Result<production_order::Model, ServiceError> {
        if input.order_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Order number cannot be empty".to_string(),
            ));
        }

        if input.planned_quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Planned quantity must be positive, got: {}",
                input.planned_quantity
            )));
        }

        if let (Some(start), Some(end)) = (input.planned_start_date, input.planned_end_date) {
            if end < start {
                return Err(ServiceError::ValidationError(format!(
                    "Planned end date ({}) cannot be before planned start date ({})",
                    end, start
                )));
            }
        }

        let existing = ProductionOrderEntity::find()
            .filter(production_order::Column::OrderNumber.eq(input.order_number.clone()))
            .one(self.db.as_ref())
            .await?;

        if existing.is_some() {
            return Err(ServiceError::DuplicateReference(format!(
                "Production order number {} already exists",
                input.order_number
            )));
        }

        let order = production_order::ActiveModel {
            order_number: Set(input.order_number),
            product_id: Set(input.product_id),
            planned_quantity: Set(input.planned_quantity),
            planned_start_date: Set(input.planned_start_date),
            planned_end_date: Set(input.planned_end_date),
            priority: Set(input.priority.unwrap_or(OrderPriority::Normal)),
            remarks: Set(input.remarks),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        counter!("mes.production_orders.created", 1);
        self.event_sender
            .send_or_log(Event::ProductionOrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
            })
            .await;

        info!(order_id = %order.id, order_number = %order.order_number, "production order created");

        Ok(order)
    }

    /// Fetches an order by identifier.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError> {
        ProductionOrderEntity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::from)
    }

    /// Returns paginated orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<production_order::Model>, u64), ServiceError> {
        let limit = limit.max(1);
        let page = page.max(1) - 1;
        let paginator = ProductionOrderEntity::find()
            .order_by_desc(production_order::Column::CreatedAt)
            .paginate(self.db.as_ref(), limit);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page).await?;

        Ok((orders, total))
    }

    /// Applies updates to descriptive fields only.
    #[instrument(skip(self, input))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        input: UpdateProductionOrderInput,
    ) -> Result<production_order::Model, ServiceError> {
        let order = self.load_order(order_id).await?;

        let mut active = order.into_active_model();
        if input.planned_start_date.is_some() {
            active.planned_start_date = Set(input.planned_start_date);
        }
        if input.planned_end_date.is_some() {
            active.planned_end_date = Set(input.planned_end_date);
        }
        if let Some(priority) = input.priority {
            active.priority = Set(priority);
        }
        if input.remarks.is_some() {
            active.remarks = Set(input.remarks);
        }

        let updated = active.update(self.db.as_ref()).await?;
        Ok(updated)
    }

    /// Deletes an order. Disallowed once the order has left draft, since
    /// downstream inspection and inventory records may reference it.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = self.load_order(order_id).await?;

        if order.status != ProductionOrderStatus::Draft {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is {}, only draft orders can be deleted",
                order.order_number, order.status
            )));
        }

        order.delete(self.db.as_ref()).await?;

        self.event_sender
            .send_or_log(Event::ProductionOrderDeleted(order_id))
            .await;

        Ok(())
    }

    /// Draft -> preparing. Requires the material requirement calculation to
    /// have been run for the order at least once; freshness is not tracked.
    #[instrument(skip(self))]
    pub async fn begin_preparation(
        &self,
        order_id: Uuid,
    ) -> Result<production_order::Model, ServiceError> {
        let order = self.load_order(order_id).await?;

        if order.status != ProductionOrderStatus::Draft {
            return Err(ServiceError::invalid_transition(
                order.status,
                ProductionOrderStatus::Preparing,
            ));
        }

        if order.requirements_checked_at.is_none() {
            return Err(ServiceError::ValidationError(format!(
                "Material requirements have not been calculated for order {}",
                order.order_number
            )));
        }

        self.transition(
            order,
            ProductionOrderStatus::Preparing,
            Vec::new(),
        )
        .await
    }

    /// Preparing -> materials issued. Every BOM-line requirement must be
    /// covered by the issued quantity.
    #[instrument(skip(self, issues))]
    pub async fn confirm_material_issue(
        &self,
        order_id: Uuid,
        issues: Vec<MaterialIssue>,
    ) -> Result<production_order::Model, ServiceError> {
        for issue in &issues {
            if issue.quantity <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Issued quantity for material {} must be positive, got: {}",
                    issue.material_id, issue.quantity
                )));
            }
        }

        let order = self.load_order(order_id).await?;

        if order.status != ProductionOrderStatus::Preparing {
            return Err(ServiceError::invalid_transition(
                order.status,
                ProductionOrderStatus::MaterialsIssued,
            ));
        }

        let required = self
            .requirements
            .explode_requirements(order.product_id, order.planned_quantity)
            .await?;

        let mut issued: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        for issue in issues {
            *issued.entry(issue.material_id).or_insert(Decimal::ZERO) += issue.quantity;
        }

        let short: Vec<String> = required
            .iter()
            .filter(|(material_id, required_qty)| {
                issued.get(material_id).copied().unwrap_or(Decimal::ZERO) < **required_qty
            })
            .map(|(material_id, required_qty)| {
                let got = issued.get(material_id).copied().unwrap_or(Decimal::ZERO);
                format!("{} (required {}, issued {})", material_id, required_qty, got)
            })
            .collect();

        if !short.is_empty() {
            warn!(order_id = %order_id, "material issue below requirement");
            return Err(ServiceError::InsufficientIssue(format!(
                "Order {} is short on: {}",
                order.order_number,
                short.join(", ")
            )));
        }

        self.transition(
            order,
            ProductionOrderStatus::MaterialsIssued,
            Vec::new(),
        )
        .await
    }

    /// Materials issued -> in progress. Unconditional once issuance is
    /// confirmed; stamps the actual start.
    #[instrument(skip(self))]
    pub async fn start_production(
        &self,
        order_id: Uuid,
    ) -> Result<production_order::Model, ServiceError> {
        let order = self.load_order(order_id).await?;

        if order.status != ProductionOrderStatus::MaterialsIssued {
            return Err(ServiceError::invalid_transition(
                order.status,
                ProductionOrderStatus::InProgress,
            ));
        }

        self.transition(
            order,
            ProductionOrderStatus::InProgress,
            vec![(
                production_order::Column::ActualStartDate,
                Expr::value(Some(Utc::now())),
            )],
        )
        .await
    }

    /// In progress -> completed. Partial completion (actual below planned)
    /// is recorded, not rejected.
    #[instrument(skip(self))]
    pub async fn report_completion(
        &self,
        order_id: Uuid,
        actual_quantity: Decimal,
    ) -> Result<production_order::Model, ServiceError> {
        if actual_quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Actual quantity must be positive, got: {}",
                actual_quantity
            )));
        }

        let order = self.load_order(order_id).await?;

        if order.status != ProductionOrderStatus::InProgress {
            return Err(ServiceError::invalid_transition(
                order.status,
                ProductionOrderStatus::Completed,
            ));
        }

        if actual_quantity < order.planned_quantity {
            info!(
                order_id = %order_id,
                actual = %actual_quantity,
                planned = %order.planned_quantity,
                "partial completion recorded"
            );
        }

        self.transition(
            order,
            ProductionOrderStatus::Completed,
            vec![
                (
                    production_order::Column::ActualQuantity,
                    Expr::value(actual_quantity),
                ),
                (
                    production_order::Column::ActualEndDate,
                    Expr::value(Some(Utc::now())),
                ),
            ],
        )
        .await
    }

    /// Completed -> inspection. Creates a process/final inspection for the
    /// order, or reuses the linked one when it is still open. Exactly one of
    /// two concurrent callers creates the link; the other observes it.
    #[instrument(skip(self, input))]
    pub async fn begin_inspection(
        &self,
        order_id: Uuid,
        input: BeginInspectionInput,
    ) -> Result<(production_order::Model, quality_inspection::Model), ServiceError> {
        if input.inspection_type == InspectionType::Incoming {
            return Err(ServiceError::ValidationError(
                "Production orders take process or final inspections".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let order = ProductionOrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })?;

        // A caller arriving after the transition observes the existing link
        // instead of failing.
        if order.status == ProductionOrderStatus::Inspection {
            if let Some(linked_id) = order.quality_inspection_id {
                let inspection = QualityInspectionEntity::find_by_id(linked_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "Order {} links missing inspection {}",
                            order.order_number, linked_id
                        ))
                    })?;
                txn.commit().await?;
                return Ok((order, inspection));
            }
        }

        if order.status != ProductionOrderStatus::Completed {
            return Err(ServiceError::invalid_transition(
                order.status,
                ProductionOrderStatus::Inspection,
            ));
        }

        let mut created_new = false;
        let inspection = match order.quality_inspection_id {
            Some(linked_id) => {
                let linked = QualityInspectionEntity::find_by_id(linked_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "Order {} links missing inspection {}",
                            order.order_number, linked_id
                        ))
                    })?;
                if linked.status.is_terminal() {
                    created_new = true;
                    self.create_linked_inspection(&txn, &order, input).await?
                } else {
                    linked
                }
            }
            None => {
                created_new = true;
                self.create_linked_inspection(&txn, &order, input).await?
            }
        };

        let old_status = order.status;
        let updated = ProductionOrderEntity::update_many()
            .col_expr(
                production_order::Column::Status,
                Expr::value(ProductionOrderStatus::Inspection),
            )
            .col_expr(
                production_order::Column::QualityInspectionId,
                Expr::value(Some(inspection.id)),
            )
            .col_expr(production_order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(production_order::Column::Id.eq(order_id))
            .filter(production_order::Column::Status.eq(ProductionOrderStatus::Completed))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            // Lost the race; discard the tentative inspection and observe
            // the winner's link.
            txn.rollback().await?;

            let current = self.load_order(order_id).await?;
            if current.status == ProductionOrderStatus::Inspection {
                if let Some(linked_id) = current.quality_inspection_id {
                    if let Some(inspection) = QualityInspectionEntity::find_by_id(linked_id)
                        .one(self.db.as_ref())
                        .await?
                    {
                        return Ok((current, inspection));
                    }
                }
            }
            return Err(ServiceError::invalid_transition(
                current.status,
                ProductionOrderStatus::Inspection,
            ));
        }

        let order = ProductionOrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Production order {} vanished during transition",
                    order_id
                ))
            })?;

        txn.commit().await?;

        counter!("mes.production_orders.transitions", 1);
        self.emit_status_change(&order, old_status).await;
        if created_new {
            self.event_sender
                .send_or_log(Event::InspectionCreated {
                    inspection_id: inspection.id,
                    inspection_number: inspection.inspection_number.clone(),
                })
                .await;
        }

        Ok((order, inspection))
    }

    /// Inspection -> warehousing. The linked inspection must have released
    /// the order (passed or conditional); a failed inspection blocks here
    /// until the operator resolves it.
    #[instrument(skip(self))]
    pub async fn move_to_warehousing(
        &self,
        order_id: Uuid,
    ) -> Result<production_order::Model, ServiceError> {
        let order = self.load_order(order_id).await?;

        if order.status != ProductionOrderStatus::Inspection {
            return Err(ServiceError::invalid_transition(
                order.status,
                ProductionOrderStatus::Warehousing,
            ));
        }

        let linked_id = order.quality_inspection_id.ok_or_else(|| {
            ServiceError::InvalidState(format!(
                "Order {} has no linked inspection",
                order.order_number
            ))
        })?;

        let inspection = QualityInspectionEntity::find_by_id(linked_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Order {} links missing inspection {}",
                    order.order_number, linked_id
                ))
            })?;

        if !inspection.status.releases_order() {
            return Err(ServiceError::InvalidState(format!(
                "Inspection {} is {}; order {} cannot move to warehousing",
                inspection.inspection_number, inspection.status, order.order_number
            )));
        }

        self.transition(order, ProductionOrderStatus::Warehousing, Vec::new())
            .await
    }

    /// Cancels an order from any status short of warehousing. Cancellation
    /// is absorbing; there is no way back.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
    ) -> Result<production_order::Model, ServiceError> {
        let order = self.load_order(order_id).await?;

        match order.status {
            ProductionOrderStatus::Warehousing => {
                return Err(ServiceError::AlreadyFinal(order_id));
            }
            ProductionOrderStatus::Cancelled => {
                return Err(ServiceError::invalid_transition(
                    ProductionOrderStatus::Cancelled,
                    ProductionOrderStatus::Cancelled,
                ));
            }
            _ => {}
        }

        let cancelled = self
            .transition(order, ProductionOrderStatus::Cancelled, Vec::new())
            .await?;

        self.event_sender
            .send_or_log(Event::ProductionOrderCancelled(order_id))
            .await;

        Ok(cancelled)
    }

    async fn load_order(&self, order_id: Uuid) -> Result<production_order::Model, ServiceError> {
        ProductionOrderEntity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })
    }

    /// Applies a status transition through a conditional update keyed on the
    /// expected source status. A concurrent writer that commits first makes
    /// the update match zero rows; the caller then observes the actual
    /// current status in the error.
    async fn transition(
        &self,
        order: production_order::Model,
        target: ProductionOrderStatus,
        stamps: Vec<(production_order::Column, sea_orm::sea_query::SimpleExpr)>,
    ) -> Result<production_order::Model, ServiceError> {
        let source = order.status;
        let order_id = order.id;

        let mut update = ProductionOrderEntity::update_many()
            .col_expr(production_order::Column::Status, Expr::value(target))
            .col_expr(production_order::Column::UpdatedAt, Expr::value(Utc::now()));

        for (column, value) in stamps {
            update = update.col_expr(column, value);
        }

        let result = update
            .filter(production_order::Column::Id.eq(order_id))
            .filter(production_order::Column::Status.eq(source))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            let current = self.load_order(order_id).await?;
            return Err(ServiceError::invalid_transition(current.status, target));
        }

        let updated = self.load_order(order_id).await?;

        counter!("mes.production_orders.transitions", 1);
        self.emit_status_change(&updated, source).await;

        info!(
            order_id = %order_id,
            from = %source,
            to = %updated.status,
            "production order transitioned"
        );

        Ok(updated)
    }

    async fn create_linked_inspection<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        order: &production_order::Model,
        input: BeginInspectionInput,
    ) -> Result<quality_inspection::Model, ServiceError> {
        self.inspections
            .create_inspection_on(
                conn,
                CreateInspectionInput {
                    inspection_type: input.inspection_type,
                    reference_number: order.order_number.clone(),
                    batch_number: input.batch_number,
                    material_id: order.product_id,
                    quantity: order.actual_quantity,
                    planned_date: input.planned_date,
                    inspector: input.inspector,
                    standard: input.standard,
                    items: input.items,
                },
            )
            .await
    }

    async fn emit_status_change(
        &self,
        order: &production_order::Model,
        old_status: ProductionOrderStatus,
    ) {
        self.event_sender
            .send_or_log(Event::ProductionOrderStatusChanged {
                order_id: order.id,
                old_status: old_status.to_string(),
                new_status: order.status.to_string(),
            })
            .await;
    }
}
