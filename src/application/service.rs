use tracing::{debug, info, warn};

use crate::domain::{
    build_integrity_report, EntryType, IdempotencyKey, IntegrityReport, LedgerEntry,
    LoanAggregate, Money, UserId,
};
use crate::storage::{LedgerStore, Repository, StoreError};

use super::{AppError, RetryPolicy};

/// Application service providing the loan operations: origination, repayment,
/// defaulting, reads and audit. This is the primary interface for any client
/// (CLI, API, ...).
///
/// Every mutation is a read-modify-write cycle: load the snapshot, apply a
/// pure state transition, submit the result together with a signed delta and
/// an idempotency key as one atomic store operation. A stale write is
/// rejected by the store's version check and the whole cycle is retried,
/// never a partial step.
pub struct LoanService<S = Repository> {
    store: S,
    retry: RetryPolicy,
}

impl LoanService<Repository> {
    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }
}

impl<S: LedgerStore> LoanService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Originate a loan: create the aggregate, activate it immediately
    /// (funds are disbursed in the same operation), and persist snapshot
    /// plus DISBURSEMENT entry atomically.
    pub async fn originate_loan(
        &self,
        user_id: UserId,
        amount: Money,
        idempotency_key: IdempotencyKey,
    ) -> Result<LoanAggregate, AppError> {
        if !amount.is_positive() {
            return Err(AppError::InvalidAmount(format!(
                "principal must be positive, got {}",
                amount
            )));
        }

        let loan = LoanAggregate::create_new(user_id, amount).activate()?;

        match self.store.create_initial_loan(&loan, idempotency_key).await {
            Ok(()) => {
                info!(user_id = %user_id, principal = %amount, "loan originated");
                Ok(loan)
            }
            Err(StoreError::DuplicateIdempotencyKey) => Err(AppError::DuplicateIdempotencyKey),
            Err(StoreError::LoanAlreadyExists) => Err(AppError::LoanAlreadyExists(user_id)),
            Err(err) => Err(AppError::Database(err.into())),
        }
    }

    /// Process a repayment against the borrower's loan.
    ///
    /// On a write conflict the entire read-apply-write cycle re-runs with
    /// exponential backoff, up to the policy's attempt bound; exhaustion
    /// surfaces as a terminal error rather than being silently dropped.
    /// Validation and state errors are the caller's and are never retried.
    pub async fn process_repayment(
        &self,
        user_id: UserId,
        amount: Money,
        idempotency_key: IdempotencyKey,
    ) -> Result<LoanAggregate, AppError> {
        let mut attempt: u32 = 1;
        loop {
            let loan = self
                .find_loan(user_id)
                .await?
                .ok_or(AppError::LoanNotFound(user_id))?;

            let updated = loan.apply_repayment(amount)?;

            match self
                .store
                .record_transaction(&updated, amount.negate(), EntryType::Repayment, idempotency_key)
                .await
            {
                Ok(()) => {
                    info!(
                        user_id = %user_id,
                        amount = %amount,
                        balance = %updated.current_balance,
                        status = %updated.status,
                        "repayment recorded"
                    );
                    // The committed snapshot carries the bumped version
                    return Ok(LoanAggregate {
                        version: updated.version + 1,
                        ..updated
                    });
                }
                Err(StoreError::DuplicateIdempotencyKey) => {
                    return Err(AppError::DuplicateIdempotencyKey);
                }
                Err(StoreError::OptimisticLockConflict) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(user_id = %user_id, attempts = attempt, "write conflict persisted, giving up");
                        return Err(AppError::ConflictRetriesExhausted { attempts: attempt });
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(user_id = %user_id, attempt, ?delay, "write conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(AppError::Database(err.into())),
            }
        }
    }

    /// Mark an active loan as defaulted. Changes no balance, so it writes no
    /// ledger entry; the snapshot update goes through the same version gate
    /// and conflict-retry loop as repayments.
    pub async fn mark_as_defaulted(&self, user_id: UserId) -> Result<LoanAggregate, AppError> {
        let mut attempt: u32 = 1;
        loop {
            let loan = self
                .find_loan(user_id)
                .await?
                .ok_or(AppError::LoanNotFound(user_id))?;

            let updated = loan.mark_as_defaulted()?;

            match self.store.update_snapshot(&updated).await {
                Ok(()) => {
                    warn!(user_id = %user_id, balance = %updated.current_balance, "loan marked as defaulted");
                    return Ok(LoanAggregate {
                        version: updated.version + 1,
                        ..updated
                    });
                }
                Err(StoreError::OptimisticLockConflict) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(AppError::ConflictRetriesExhausted { attempts: attempt });
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(user_id = %user_id, attempt, ?delay, "write conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(AppError::Database(err.into())),
            }
        }
    }

    /// Plain read-through to the store.
    pub async fn get_loan_details(&self, user_id: UserId) -> Result<Option<LoanAggregate>, AppError> {
        self.find_loan(user_id).await
    }

    /// The loan's audit trail, oldest entry first.
    pub async fn list_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, AppError> {
        if self.find_loan(user_id).await?.is_none() {
            return Err(AppError::LoanNotFound(user_id));
        }
        self.store
            .list_entries_for_user(user_id)
            .await
            .map_err(|err| AppError::Database(err.into()))
    }

    /// Every entry in the log, for export.
    pub async fn list_all_entries(&self) -> Result<Vec<LedgerEntry>, AppError> {
        self.store
            .list_all_entries()
            .await
            .map_err(|err| AppError::Database(err.into()))
    }

    /// Verify every snapshot against the append-only log it caches.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let loans = self
            .store
            .list_loans()
            .await
            .map_err(|err| AppError::Database(err.into()))?;
        let entries = self
            .store
            .list_all_entries()
            .await
            .map_err(|err| AppError::Database(err.into()))?;
        Ok(build_integrity_report(&loans, &entries))
    }

    async fn find_loan(&self, user_id: UserId) -> Result<Option<LoanAggregate>, AppError> {
        self.store
            .find_by_user_id(user_id)
            .await
            .map_err(|err| AppError::Database(err.into()))
    }
}
