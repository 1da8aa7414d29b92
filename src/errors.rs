use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

/// Business and infrastructure errors surfaced by the core services.
///
/// Every variant is recoverable at the caller; the core never terminates the
/// process on a business-rule violation. Conflicts lost to a concurrent
/// transition surface as `InvalidTransition`, never as a silent overwrite.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Insufficient issue: {0}")]
    InsufficientIssue(String),

    #[error("No active BOM for product {0}")]
    NoActiveBom(Uuid),

    #[error("BOM cycle suspected at product {product_id} (depth {depth})")]
    BomCycleSuspected { product_id: Uuid, depth: u32 },

    #[error("Order {0} has already reached a final state")]
    AlreadyFinal(Uuid),

    #[error("Inspection {0} has no items to aggregate")]
    NoItems(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Builds an `InvalidTransition` from anything status-like.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        ServiceError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True when the error is a business-rule rejection rather than an
    /// infrastructure failure.
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_)
        )
    }
}
