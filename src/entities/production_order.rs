use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Production order lifecycle status.
///
/// Orders move strictly forward along the declared chain; `Cancelled` is an
/// absorbing state reachable from every status except `Warehousing`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "production_order_status")]
#[strum(serialize_all = "snake_case")]
pub enum ProductionOrderStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "materials_issued")]
    MaterialsIssued,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "inspection")]
    Inspection,
    #[sea_orm(string_value = "warehousing")]
    Warehousing,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ProductionOrderStatus {
    /// The single forward successor in the declared chain, if any.
    pub fn next_forward(self) -> Option<Self> {
        match self {
            Self::Draft => Some(Self::Preparing),
            Self::Preparing => Some(Self::MaterialsIssued),
            Self::MaterialsIssued => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => Some(Self::Inspection),
            Self::Inspection => Some(Self::Warehousing),
            Self::Warehousing | Self::Cancelled => None,
        }
    }

    /// Closed transition table: forward steps never skip, cancellation is
    /// allowed from any status that has not reached warehousing.
    pub fn can_transition_to(self, target: Self) -> bool {
        if target == Self::Cancelled {
            return !matches!(self, Self::Warehousing | Self::Cancelled);
        }
        self.next_forward() == Some(target)
    }

    /// No further forward transition is defined from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Warehousing | Self::Cancelled)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[strum(serialize_all = "snake_case")]
pub enum OrderPriority {
    #[sea_orm(num_value = 1)]
    Low,
    #[sea_orm(num_value = 2)]
    Normal,
    #[sea_orm(num_value = 3)]
    High,
    #[sea_orm(num_value = 4)]
    Urgent,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-assigned, unique
    pub order_number: String,
    pub product_id: Uuid,
    pub planned_quantity: Decimal,
    pub actual_quantity: Decimal,
    pub planned_start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub actual_start_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub status: ProductionOrderStatus,
    pub priority: OrderPriority,
    pub remarks: Option<String>,
    /// Stamped by the material requirement calculator; gates draft -> preparing.
    /// Freshness is not tracked.
    pub requirements_checked_at: Option<DateTime<Utc>>,
    /// Optional 1:1 link to the process/final quality inspection
    pub quality_inspection_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::quality_inspection::Entity",
        from = "Column::QualityInspectionId",
        to = "super::quality_inspection::Column::Id"
    )]
    QualityInspection,
}

impl Related<super::quality_inspection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QualityInspection.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = self.id {
                self.id = ActiveValue::Set(Uuid::new_v4());
            }

            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
        }

        if let ActiveValue::NotSet = self.status {
            self.status = ActiveValue::Set(ProductionOrderStatus::Draft);
        }

        if let ActiveValue::NotSet = self.priority {
            self.priority = ActiveValue::Set(OrderPriority::Normal);
        }

        if let ActiveValue::NotSet = self.actual_quantity {
            self.actual_quantity = ActiveValue::Set(Decimal::ZERO);
        }

        self.updated_at = ActiveValue::Set(now);

        Ok(self)
    }
}
