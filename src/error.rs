use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EarningsError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid period '{0}', expected YYYY-MM")]
    InvalidPeriod(String),
    #[error("Period {0} has not started yet")]
    FuturePeriod(String),
    #[error("Payout amount must be a positive number of whole cents, got {0}")]
    InvalidAmount(Decimal),
    #[error("No available earnings to pay out")]
    NoAvailableEarnings,
    #[error(
        "Insufficient balance: requested {requested}, available {available}, short by {shortfall}"
    )]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },
    #[error("Unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },
    #[error("User {user_id} is already enrolled in course {course_id}")]
    AlreadyEnrolled { user_id: Uuid, course_id: Uuid },
    #[error("Payout {id} is already {status}")]
    PayoutAlreadySettled { id: Uuid, status: String },
    #[error("Not found: {0}")]
    NotFound(String),
}

impl EarningsError {
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        EarningsError::UnknownValue {
            kind,
            value: value.into(),
        }
    }
}
