use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "inspection_type")]
#[strum(serialize_all = "snake_case")]
pub enum InspectionType {
    #[sea_orm(string_value = "incoming")]
    Incoming,
    #[sea_orm(string_value = "process")]
    Process,
    #[sea_orm(string_value = "final")]
    Final,
}

/// Inspection lifecycle status.
///
/// `Pending` is the sole initial state. `Passed` and `Failed` are terminal.
/// `Partial`, `Rework` and `Conditional` are intermediate: they must be
/// re-submitted (re-entering `Pending`) to eventually reach a terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "inspection_status")]
#[strum(serialize_all = "snake_case")]
pub enum InspectionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "passed")]
    Passed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "rework")]
    Rework,
    #[sea_orm(string_value = "conditional")]
    Conditional,
}

impl InspectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    /// Intermediate outcomes that may be re-submitted for inspection.
    pub fn can_resubmit(self) -> bool {
        matches!(self, Self::Partial | Self::Rework | Self::Conditional)
    }

    /// Whether a production order linked to this inspection may move on to
    /// warehousing. A failed inspection blocks the order.
    pub fn releases_order(self) -> bool {
        matches!(self, Self::Passed | Self::Conditional)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quality_inspections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Generated `<type-prefix><YYYYMMDD><sequence>`, unique
    pub inspection_number: String,
    pub inspection_type: InspectionType,
    /// Originating document number (purchase or production order); opaque here
    pub reference_number: String,
    pub batch_number: String,
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub status: InspectionStatus,
    pub planned_date: Option<DateTime<Utc>>,
    /// Stamped when the inspection is finalized
    pub actual_date: Option<DateTime<Utc>>,
    pub inspector: Option<String>,
    /// Applicable inspection standard
    pub standard: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::inspection_item::Entity")]
    Items,
}

impl Related<super::inspection_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
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
            self.status = ActiveValue::Set(InspectionStatus::Pending);
        }

        self.updated_at = ActiveValue::Set(now);

        Ok(self)
    }
}
