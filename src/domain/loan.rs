use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    /// Originated but not yet disbursed
    Pending,
    /// Funds disbursed, accepting repayments
    Active,
    /// Borrower in default; the loan still accepts repayments
    Defaulted,
    /// Balance reached zero. Terminal.
    Closed,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Defaulted => "DEFAULTED",
            LoanStatus::Closed => "CLOSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(LoanStatus::Pending),
            "ACTIVE" => Some(LoanStatus::Active),
            "DEFAULTED" => Some(LoanStatus::Defaulted),
            "CLOSED" => Some(LoanStatus::Closed),
            _ => None,
        }
    }

    /// Returns true if the loan can accept repayments in this status.
    pub fn accepts_repayments(&self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Defaulted)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One borrower's loan at a point in time. Acts as the state machine and
/// consistency boundary for the ledger.
///
/// All transitions are pure: they take the snapshot by value and return a new
/// one, so concurrency control can be layered entirely outside the state
/// machine. `version` is the optimistic-concurrency fencing token; it is
/// advanced only by the store on commit, never by in-memory transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanAggregate {
    pub user_id: UserId,
    pub principal_amount: Money,
    pub current_balance: Money,
    pub status: LoanStatus,
    pub version: i64,
}

impl LoanAggregate {
    /// Factory for initial creation: a PENDING loan owing its full principal.
    pub fn create_new(user_id: UserId, principal: Money) -> Self {
        LoanAggregate {
            user_id,
            principal_amount: principal,
            current_balance: principal,
            status: LoanStatus::Pending,
            version: 1,
        }
    }

    /// PENDING -> ACTIVE. The moment funds are disbursed.
    pub fn activate(self) -> Result<Self, LoanError> {
        if self.status != LoanStatus::Pending {
            return Err(LoanError::IllegalStateTransition {
                action: "activate",
                status: self.status,
            });
        }
        Ok(LoanAggregate {
            status: LoanStatus::Active,
            ..self
        })
    }

    /// Reduce the outstanding balance. A balance of exactly zero forces
    /// CLOSED, whether the loan was ACTIVE or DEFAULTED.
    pub fn apply_repayment(self, amount: Money) -> Result<Self, LoanError> {
        if !self.status.accepts_repayments() {
            return Err(LoanError::IllegalStateTransition {
                action: "repay",
                status: self.status,
            });
        }
        if !amount.is_positive() {
            return Err(LoanError::InvalidRepaymentAmount { requested: amount });
        }
        if amount > self.current_balance {
            return Err(LoanError::RepaymentExceedsBalance {
                balance: self.current_balance,
                requested: amount,
            });
        }

        let new_balance = self.current_balance.subtract(amount);
        let next_status = if new_balance.is_zero() {
            LoanStatus::Closed
        } else {
            self.status
        };

        Ok(LoanAggregate {
            current_balance: new_balance,
            status: next_status,
            ..self
        })
    }

    /// ACTIVE -> DEFAULTED.
    pub fn mark_as_defaulted(self) -> Result<Self, LoanError> {
        if self.status != LoanStatus::Active {
            return Err(LoanError::IllegalStateTransition {
                action: "default",
                status: self.status,
            });
        }
        Ok(LoanAggregate {
            status: LoanStatus::Defaulted,
            ..self
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanError {
    InvalidRepaymentAmount {
        requested: Money,
    },
    RepaymentExceedsBalance {
        balance: Money,
        requested: Money,
    },
    IllegalStateTransition {
        action: &'static str,
        status: LoanStatus,
    },
}

impl std::fmt::Display for LoanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanError::InvalidRepaymentAmount { requested } => {
                write!(f, "repayment amount must be positive, got {}", requested)
            }
            LoanError::RepaymentExceedsBalance { balance, requested } => {
                write!(
                    f,
                    "repayment of {} exceeds outstanding balance of {}",
                    requested, balance
                )
            }
            LoanError::IllegalStateTransition { action, status } => {
                write!(f, "cannot {} loan in status {}", action, status)
            }
        }
    }
}

impl std::error::Error for LoanError {}
