use thiserror::Error;
use uuid::Uuid;

use crate::domain::{LoanError, MoneyError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Loan not found: {0}")]
    LoanNotFound(Uuid),

    #[error("A loan already exists for user: {0}")]
    LoanAlreadyExists(Uuid),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Business rule violation from the state machine. Never retried.
    #[error(transparent)]
    Loan(#[from] LoanError),

    /// The idempotency key was already consumed: a client retry of an
    /// already-applied request. A definite outcome, never retried.
    #[error("Duplicate transaction detected (idempotency key already used)")]
    DuplicateIdempotencyKey,

    /// Write conflicts persisted through the whole retry budget.
    #[error("Loan was concurrently modified; gave up after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::InvalidAmount(input) => AppError::InvalidAmount(input),
        }
    }
}
