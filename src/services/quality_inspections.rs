use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    config::InspectionConfig,
    db::DbPool,
    entities::{
        inspection_item::{self, Entity as InspectionItemEntity},
        quality_inspection::{
            self, Entity as QualityInspectionEntity, InspectionStatus, InspectionType,
        },
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Summary view returned when listing inspections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionSummary {
    pub id: Uuid,
    pub inspection_number: String,
    pub inspection_type: InspectionType,
    pub reference_number: String,
    pub batch_number: String,
    pub status: InspectionStatus,
    pub created_at: DateTime<Utc>,
}

/// Item view included in the inspection detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionItemView {
    pub id: Uuid,
    pub position: i32,
    pub item_name: String,
    pub standard_text: String,
    pub method: Option<String>,
    pub result: Option<String>,
    pub passed: Option<bool>,
    pub remark: Option<String>,
}

/// Detailed inspection view including its items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionDetail {
    pub id: Uuid,
    pub inspection_number: String,
    pub inspection_type: InspectionType,
    pub reference_number: String,
    pub batch_number: String,
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub status: InspectionStatus,
    pub planned_date: Option<DateTime<Utc>>,
    pub actual_date: Option<DateTime<Utc>>,
    pub inspector: Option<String>,
    pub standard: Option<String>,
    pub items: Vec<InspectionItemView>,
}

/// Input payload for creating an inspection with its initial items
#[derive(Debug, Clone)]
pub struct CreateInspectionInput {
    pub inspection_type: InspectionType,
    pub reference_number: String,
    pub batch_number: String,
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub planned_date: Option<DateTime<Utc>>,
    pub inspector: Option<String>,
    pub standard: Option<String>,
    pub items: Vec<CreateInspectionItemInput>,
}

#[derive(Debug, Clone)]
pub struct CreateInspectionItemInput {
    pub item_name: String,
    pub standard_text: String,
    pub method: Option<String>,
    pub remark: Option<String>,
}

/// Composes an inspection number from its parts: type prefix, YYYYMMDD date
/// stamp, and the zero-padded per-day sequence.
pub(crate) fn compose_inspection_number(
    prefix: &str,
    date: &str,
    sequence: u32,
    width: usize,
) -> String {
    format!("{}{}{:0width$}", prefix, date, sequence, width = width)
}

/// Aggregates item pass/fail flags into the inspection outcome. Callers
/// must reject undecided items first.
fn aggregate_status(items: &[inspection_item::Model]) -> InspectionStatus {
    let passed = items
        .iter()
        .filter(|item| item.passed == Some(true))
        .count();

    if passed == items.len() {
        InspectionStatus::Passed
    } else if passed == 0 {
        InspectionStatus::Failed
    } else {
        InspectionStatus::Partial
    }
}

/// Service governing the lifecycle of quality inspections and their items.
#[derive(Clone)]
pub struct QualityInspectionService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    numbering: InspectionConfig,
}

impl QualityInspectionService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, numbering: InspectionConfig) -> Self {
        Self {
            db,
            event_sender,
            numbering,
        }
    }

    /// Creates an inspection and its item rows in one atomic unit.
    #[instrument(skip(self, input))]
    pub async fn create_inspection(
        &self,
        input: CreateInspectionInput,
    ) -> Result<quality_inspection::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let inspection = self.create_inspection_on(&txn, input).await?;
        txn.commit().await?;

        counter!("mes.inspections.created", 1);
        self.event_sender
            .send_or_log(Event::InspectionCreated {
                inspection_id: inspection.id,
                inspection_number: inspection.inspection_number.clone(),
            })
            .await;

        info!(
            inspection_id = %inspection.id,
            inspection_number = %inspection.inspection_number,
            "inspection created"
        );

        Ok(inspection)
    }

    /// Transaction-scoped creation, shared with the production order service
    /// so an order transition can create its linked inspection atomically.
    /// Emits no events; the owning operation emits them after commit.
    pub(crate) async fn create_inspection_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: CreateInspectionInput,
    ) -> Result<quality_inspection::Model, ServiceError> {
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Inspection quantity must be positive, got: {}",
                input.quantity
            )));
        }
        if input.reference_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Reference number cannot be empty".to_string(),
            ));
        }
        if input.batch_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Batch number cannot be empty".to_string(),
            ));
        }

        let open = QualityInspectionEntity::find()
            .filter(quality_inspection::Column::ReferenceNumber.eq(input.reference_number.clone()))
            .filter(quality_inspection::Column::BatchNumber.eq(input.batch_number.clone()))
            .filter(quality_inspection::Column::Status.is_in([
                InspectionStatus::Pending,
                InspectionStatus::Partial,
                InspectionStatus::Rework,
                InspectionStatus::Conditional,
            ]))
            .one(conn)
            .await?;

        if let Some(existing) = open {
            return Err(ServiceError::DuplicateReference(format!(
                "Open inspection {} already exists for reference {} batch {}",
                existing.inspection_number, input.reference_number, input.batch_number
            )));
        }

        let inspection_number = self.next_inspection_number(conn, input.inspection_type).await?;

        let inspection = quality_inspection::ActiveModel {
            inspection_number: Set(inspection_number),
            inspection_type: Set(input.inspection_type),
            reference_number: Set(input.reference_number),
            batch_number: Set(input.batch_number),
            material_id: Set(input.material_id),
            quantity: Set(input.quantity),
            status: Set(InspectionStatus::Pending),
            planned_date: Set(input.planned_date),
            actual_date: Set(None),
            inspector: Set(input.inspector),
            standard: Set(input.standard),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        for (index, item) in input.items.into_iter().enumerate() {
            inspection_item::ActiveModel {
                inspection_id: Set(inspection.id),
                position: Set(index as i32 + 1),
                item_name: Set(item.item_name),
                standard_text: Set(item.standard_text),
                method: Set(item.method),
                result: Set(None),
                passed: Set(None),
                remark: Set(item.remark),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }

        Ok(inspection)
    }

    /// Generates the next `<prefix><YYYYMMDD><sequence>` number for the type,
    /// counting the sequence per type per day.
    async fn next_inspection_number<C: ConnectionTrait>(
        &self,
        conn: &C,
        inspection_type: InspectionType,
    ) -> Result<String, ServiceError> {
        let date = Utc::now().format("%Y%m%d").to_string();
        let prefix = format!("{}{}", self.numbering.prefix(inspection_type), date);

        let latest = QualityInspectionEntity::find()
            .filter(quality_inspection::Column::InspectionNumber.starts_with(prefix.as_str()))
            .order_by_desc(quality_inspection::Column::InspectionNumber)
            .one(conn)
            .await?;

        let sequence = latest
            .and_then(|model| {
                model
                    .inspection_number
                    .get(prefix.len()..)
                    .and_then(|tail| tail.parse::<u32>().ok())
            })
            .unwrap_or(0)
            + 1;

        Ok(compose_inspection_number(
            self.numbering.prefix(inspection_type),
            &date,
            sequence,
            self.numbering.sequence_width,
        ))
    }

    /// Appends an item to a pending inspection.
    #[instrument(skip(self, input))]
    pub async fn add_item(
        &self,
        inspection_id: Uuid,
        input: CreateInspectionItemInput,
    ) -> Result<inspection_item::Model, ServiceError> {
        let inspection = QualityInspectionEntity::find_by_id(inspection_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inspection {} not found", inspection_id))
            })?;

        if inspection.status != InspectionStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "Inspection {} is {}, items can only be added while pending",
                inspection.inspection_number, inspection.status
            )));
        }

        let existing = InspectionItemEntity::find()
            .filter(inspection_item::Column::InspectionId.eq(inspection_id))
            .all(self.db.as_ref())
            .await?;
        let position = existing.iter().map(|item| item.position).max().unwrap_or(0) + 1;

        let created = inspection_item::ActiveModel {
            inspection_id: Set(inspection_id),
            position: Set(position),
            item_name: Set(input.item_name),
            standard_text: Set(input.standard_text),
            method: Set(input.method),
            result: Set(None),
            passed: Set(None),
            remark: Set(input.remark),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        Ok(created)
    }

    /// Records the inspector's result for one item. Valid only while the
    /// parent inspection is pending.
    #[instrument(skip(self, result))]
    pub async fn record_item_result(
        &self,
        item_id: Uuid,
        result: String,
        passed: bool,
        remark: Option<String>,
    ) -> Result<inspection_item::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let item = InspectionItemEntity::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inspection item {} not found", item_id))
            })?;

        let inspection = QualityInspectionEntity::find_by_id(item.inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Inspection item {} has no parent inspection",
                    item_id
                ))
            })?;

        if inspection.status != InspectionStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "Inspection {} is {}, results can only be recorded while pending",
                inspection.inspection_number, inspection.status
            )));
        }

        let mut active = item.into_active_model();
        active.result = Set(Some(result));
        active.passed = Set(Some(passed));
        if remark.is_some() {
            active.remark = Set(remark);
        }
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::InspectionItemRecorded {
                inspection_id: inspection.id,
                item_id: updated.id,
                passed,
            })
            .await;

        Ok(updated)
    }

    /// Computes the aggregate outcome from item flags and finalizes the
    /// inspection: all pass -> passed, all fail -> failed, mixed -> partial.
    /// Escalation past partial is an explicit operator override.
    #[instrument(skip(self))]
    pub async fn finalize(
        &self,
        inspection_id: Uuid,
    ) -> Result<quality_inspection::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let inspection = QualityInspectionEntity::find_by_id(inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inspection {} not found", inspection_id))
            })?;

        if inspection.status != InspectionStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "Inspection {} is {}, only pending inspections can be finalized",
                inspection.inspection_number, inspection.status
            )));
        }

        let items = inspection
            .find_related(InspectionItemEntity)
            .order_by_asc(inspection_item::Column::Position)
            .all(&txn)
            .await?;

        if items.is_empty() {
            return Err(ServiceError::NoItems(inspection_id));
        }

        if items.iter().any(|item| item.passed.is_none()) {
            return Err(ServiceError::ValidationError(format!(
                "Inspection {} has undecided items",
                inspection.inspection_number
            )));
        }

        let outcome = aggregate_status(&items);
        let now = Utc::now();

        let updated = QualityInspectionEntity::update_many()
            .col_expr(quality_inspection::Column::Status, Expr::value(outcome))
            .col_expr(quality_inspection::Column::ActualDate, Expr::value(Some(now)))
            .col_expr(quality_inspection::Column::UpdatedAt, Expr::value(now))
            .filter(quality_inspection::Column::Id.eq(inspection_id))
            .filter(quality_inspection::Column::Status.eq(InspectionStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::invalid_transition(
                InspectionStatus::Pending,
                outcome,
            ));
        }

        let finalized = QualityInspectionEntity::find_by_id(inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Inspection {} vanished during finalization",
                    inspection_id
                ))
            })?;

        txn.commit().await?;

        counter!("mes.inspections.finalized", 1);
        self.event_sender
            .send_or_log(Event::InspectionFinalized {
                inspection_id,
                status: finalized.status.to_string(),
            })
            .await;

        info!(
            inspection_id = %inspection_id,
            status = %finalized.status,
            "inspection finalized"
        );

        Ok(finalized)
    }

    /// Operator escalation of a partial outcome to rework or conditional
    /// acceptance. The aggregation rule never produces these states.
    #[instrument(skip(self))]
    pub async fn override_status(
        &self,
        inspection_id: Uuid,
        target: InspectionStatus,
    ) -> Result<quality_inspection::Model, ServiceError> {
        if !matches!(target, InspectionStatus::Rework | InspectionStatus::Conditional) {
            return Err(ServiceError::ValidationError(format!(
                "Override target must be rework or conditional, got: {}",
                target
            )));
        }

        let txn = self.db.begin().await?;

        let inspection = QualityInspectionEntity::find_by_id(inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inspection {} not found", inspection_id))
            })?;

        if inspection.status != InspectionStatus::Partial {
            return Err(ServiceError::InvalidState(format!(
                "Inspection {} is {}, only partial outcomes can be overridden",
                inspection.inspection_number, inspection.status
            )));
        }

        let updated = QualityInspectionEntity::update_many()
            .col_expr(quality_inspection::Column::Status, Expr::value(target))
            .col_expr(quality_inspection::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(quality_inspection::Column::Id.eq(inspection_id))
            .filter(quality_inspection::Column::Status.eq(InspectionStatus::Partial))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::invalid_transition(
                InspectionStatus::Partial,
                target,
            ));
        }

        let overridden = QualityInspectionEntity::find_by_id(inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Inspection {} vanished during override",
                    inspection_id
                ))
            })?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::InspectionStatusOverridden {
                inspection_id,
                status: overridden.status.to_string(),
            })
            .await;

        Ok(overridden)
    }

    /// Returns an unresolved inspection to pending for re-inspection.
    /// Item results already decided as passing are retained; failed items
    /// are cleared so only the unresolved portion is re-recorded.
    #[instrument(skip(self))]
    pub async fn resubmit(
        &self,
        inspection_id: Uuid,
    ) -> Result<quality_inspection::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let inspection = QualityInspectionEntity::find_by_id(inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inspection {} not found", inspection_id))
            })?;

        if !inspection.status.can_resubmit() {
            return Err(ServiceError::InvalidState(format!(
                "Inspection {} is {}, only partial/rework/conditional outcomes can be resubmitted",
                inspection.inspection_number, inspection.status
            )));
        }

        let source = inspection.status;
        let now = Utc::now();

        let updated = QualityInspectionEntity::update_many()
            .col_expr(
                quality_inspection::Column::Status,
                Expr::value(InspectionStatus::Pending),
            )
            .col_expr(
                quality_inspection::Column::ActualDate,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(quality_inspection::Column::UpdatedAt, Expr::value(now))
            .filter(quality_inspection::Column::Id.eq(inspection_id))
            .filter(quality_inspection::Column::Status.eq(source))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::invalid_transition(
                source,
                InspectionStatus::Pending,
            ));
        }

        InspectionItemEntity::update_many()
            .col_expr(inspection_item::Column::Passed, Expr::value(None::<bool>))
            .col_expr(inspection_item::Column::Result, Expr::value(None::<String>))
            .col_expr(inspection_item::Column::UpdatedAt, Expr::value(now))
            .filter(inspection_item::Column::InspectionId.eq(inspection_id))
            .filter(inspection_item::Column::Passed.eq(false))
            .exec(&txn)
            .await?;

        let reopened = QualityInspectionEntity::find_by_id(inspection_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Inspection {} vanished during resubmission",
                    inspection_id
                ))
            })?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::InspectionResubmitted(inspection_id))
            .await;

        Ok(reopened)
    }

    /// Fetches an inspection and its items by identifier.
    #[instrument(skip(self))]
    pub async fn get_inspection(
        &self,
        inspection_id: Uuid,
    ) -> Result<Option<InspectionDetail>, ServiceError> {
        let inspection = QualityInspectionEntity::find_by_id(inspection_id)
            .one(self.db.as_ref())
            .await?;

        let Some(model) = inspection else {
            return Ok(None);
        };

        let items = model
            .find_related(InspectionItemEntity)
            .order_by_asc(inspection_item::Column::Position)
            .all(self.db.as_ref())
            .await?;

        Ok(Some(InspectionDetail {
            id: model.id,
            inspection_number: model.inspection_number,
            inspection_type: model.inspection_type,
            reference_number: model.reference_number,
            batch_number: model.batch_number,
            material_id: model.material_id,
            quantity: model.quantity,
            status: model.status,
            planned_date: model.planned_date,
            actual_date: model.actual_date,
            inspector: model.inspector,
            standard: model.standard,
            items: items
                .into_iter()
                .map(|item| InspectionItemView {
                    id: item.id,
                    position: item.position,
                    item_name: item.item_name,
                    standard_text: item.standard_text,
                    method: item.method,
                    result: item.result,
                    passed: item.passed,
                    remark: item.remark,
                })
                .collect(),
        }))
    }

    /// Returns paginated inspection summaries, newest first.
    #[instrument(skip(self))]
    pub async fn list_inspections(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<InspectionSummary>, u64), ServiceError> {
        let limit = limit.max(1);
        let page = page.max(1) - 1;
        let paginator = QualityInspectionEntity::find()
            .order_by_desc(quality_inspection::Column::CreatedAt)
            .paginate(self.db.as_ref(), limit);

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page).await?;

        let summaries = models
            .into_iter()
            .map(|model| InspectionSummary {
                id: model.id,
                inspection_number: model.inspection_number,
                inspection_type: model.inspection_type,
                reference_number: model.reference_number,
                batch_number: model.batch_number,
                status: model.status,
                created_at: model.created_at,
            })
            .collect();

        Ok((summaries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(passed: Option<bool>) -> inspection_item::Model {
        inspection_item::Model {
            id: Uuid::new_v4(),
            inspection_id: Uuid::new_v4(),
            position: 1,
            item_name: "dimension".to_string(),
            standard_text: "10mm +/- 0.1".to_string(),
            method: None,
            result: None,
            passed,
            remark: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn aggregation_follows_item_flags() {
        assert_eq!(
            aggregate_status(&[item(Some(true)), item(Some(true))]),
            InspectionStatus::Passed
        );
        assert_eq!(
            aggregate_status(&[item(Some(true)), item(Some(false))]),
            InspectionStatus::Partial
        );
        assert_eq!(
            aggregate_status(&[item(Some(false)), item(Some(false))]),
            InspectionStatus::Failed
        );
    }

    #[test]
    fn number_composition_zero_pads_the_sequence() {
        assert_eq!(
            compose_inspection_number("PQC", "20260807", 7, 4),
            "PQC202608070007"
        );
        assert_eq!(
            compose_inspection_number("IQC", "20260807", 10000, 4),
            "IQC2026080710000"
        );
    }
}
