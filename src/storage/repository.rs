use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    EntryType, IdempotencyKey, LedgerEntry, LoanAggregate, LoanStatus, Money, UserId,
};

use super::MIGRATION_001_INITIAL;

/// Failure modes of the write protocol, typed so the orchestration layer can
/// distinguish "retry" from "fail now" deterministically.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The idempotency key was already consumed by a committed entry.
    /// Retrying can never succeed; surfaced immediately.
    #[error("idempotency key already used")]
    DuplicateIdempotencyKey,

    /// Another writer committed between our read and our write. Transient;
    /// the caller retries from a fresh read.
    #[error("loan was modified by another writer")]
    OptimisticLockConflict,

    /// A snapshot row already exists for this borrower.
    #[error("a loan already exists for this user")]
    LoanAlreadyExists,

    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// Persistence port for the ledger: atomic, idempotent transaction recording
/// and snapshot retrieval. Satisfiable by any backend with transactional
/// atomicity and a uniqueness constraint on the idempotency key.
#[allow(async_fn_in_trait)]
pub trait LedgerStore {
    /// Point-in-time read of the latest committed snapshot.
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<LoanAggregate>, StoreError>;

    /// Atomically write the first snapshot row and its DISBURSEMENT entry.
    /// Fails whole, with no partial effect, on key reuse or an existing loan.
    async fn create_initial_loan(
        &self,
        loan: &LoanAggregate,
        idempotency_key: IdempotencyKey,
    ) -> Result<(), StoreError>;

    /// The core write protocol, one atomic unit: insert the ledger entry
    /// (unique key violation aborts all with `DuplicateIdempotencyKey`), then
    /// conditionally update the snapshot, incrementing `version` by one only
    /// if the stored version still equals the version the caller observed
    /// (zero affected rows aborts all with `OptimisticLockConflict`).
    async fn record_transaction(
        &self,
        loan: &LoanAggregate,
        delta: Money,
        entry_type: EntryType,
        idempotency_key: IdempotencyKey,
    ) -> Result<(), StoreError>;

    /// Version-gated snapshot update with no ledger entry, for transitions
    /// that change no balance (marking a loan defaulted).
    async fn update_snapshot(&self, loan: &LoanAggregate) -> Result<(), StoreError>;

    /// A loan's entries, oldest first.
    async fn list_entries_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Every entry in the log, oldest first.
    async fn list_all_entries(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Every loan snapshot.
    async fn list_loans(&self) -> Result<Vec<LoanAggregate>, StoreError>;
}

/// SQLite-backed [`LedgerStore`].
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    /// WAL journaling plus a busy timeout lets concurrent writers queue on
    /// the store's write lock instead of failing spuriously.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    fn row_to_loan(row: &SqliteRow) -> Result<LoanAggregate> {
        let user_id_str: String = row.get("user_id");
        let principal_str: String = row.get("principal_amount");
        let balance_str: String = row.get("current_balance");
        let status_str: String = row.get("status");

        Ok(LoanAggregate {
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            // Values read back from storage pass through the same normalizing
            // constructor as every other Money
            principal_amount: Money::from_str(&principal_str)
                .context("Invalid principal amount")?,
            current_balance: Money::from_str(&balance_str).context("Invalid current balance")?,
            status: LoanStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid loan status: {}", status_str))?,
            version: row.get("version"),
        })
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let delta_str: String = row.get("amount_delta");
        let entry_type_str: String = row.get("entry_type");
        let key_str: String = row.get("idempotency_key");
        let created_at_str: String = row.get("created_at");

        Ok(LedgerEntry {
            id: Uuid::parse_str(&id_str).context("Invalid entry ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            amount_delta: Money::from_str(&delta_str).context("Invalid amount delta")?,
            entry_type: EntryType::from_str(&entry_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid entry type: {}", entry_type_str))?,
            idempotency_key: Uuid::parse_str(&key_str).context("Invalid idempotency key")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    async fn insert_entry(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, user_id, amount_delta, entry_type, idempotency_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.amount_delta.to_string())
        .bind(entry.entry_type.as_str())
        .bind(entry.idempotency_key.to_string())
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::DuplicateIdempotencyKey
            } else {
                StoreError::Database(
                    anyhow::Error::new(err).context("Failed to insert ledger entry"),
                )
            }
        })?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl LedgerStore for Repository {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<LoanAggregate>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, principal_amount, current_balance, status, version
            FROM loans
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch loan")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_loan(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_initial_loan(
        &self,
        loan: &LoanAggregate,
        idempotency_key: IdempotencyKey,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO loans (user_id, principal_amount, current_balance, status, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(loan.user_id.to_string())
        .bind(loan.principal_amount.to_string())
        .bind(loan.current_balance.to_string())
        .bind(loan.status.as_str())
        .bind(loan.version)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::LoanAlreadyExists
            } else {
                StoreError::Database(anyhow::Error::new(err).context("Failed to insert loan"))
            }
        })?;

        let entry = LedgerEntry::new(
            loan.user_id,
            loan.principal_amount,
            EntryType::Disbursement,
            idempotency_key,
        );
        Self::insert_entry(&mut tx, &entry).await?;

        tx.commit().await.context("Failed to commit origination")?;
        Ok(())
    }

    async fn record_transaction(
        &self,
        loan: &LoanAggregate,
        delta: Money,
        entry_type: EntryType,
        idempotency_key: IdempotencyKey,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let entry = LedgerEntry::new(loan.user_id, delta, entry_type, idempotency_key);
        Self::insert_entry(&mut tx, &entry).await?;

        // Version-gated snapshot update. Zero affected rows means another
        // writer committed between our read and this write; dropping the
        // transaction rolls the entry insert back with it.
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET current_balance = ?, status = ?, version = version + 1, updated_at = ?
            WHERE user_id = ? AND version = ?
            "#,
        )
        .bind(loan.current_balance.to_string())
        .bind(loan.status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(loan.user_id.to_string())
        .bind(loan.version)
        .execute(&mut *tx)
        .await
        .context("Failed to update loan snapshot")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OptimisticLockConflict);
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }

    async fn update_snapshot(&self, loan: &LoanAggregate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET current_balance = ?, status = ?, version = version + 1, updated_at = ?
            WHERE user_id = ? AND version = ?
            "#,
        )
        .bind(loan.current_balance.to_string())
        .bind(loan.status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(loan.user_id.to_string())
        .bind(loan.version)
        .execute(&self.pool)
        .await
        .context("Failed to update loan snapshot")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OptimisticLockConflict);
        }
        Ok(())
    }

    async fn list_entries_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount_delta, entry_type, idempotency_key, created_at
            FROM ledger_entries
            WHERE user_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger entries")?;

        Ok(rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn list_all_entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount_delta, entry_type, idempotency_key, created_at
            FROM ledger_entries
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger entries")?;

        Ok(rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn list_loans(&self) -> Result<Vec<LoanAggregate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, principal_amount, current_balance, status, version
            FROM loans
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loans")?;

        Ok(rows
            .iter()
            .map(Self::row_to_loan)
            .collect::<Result<Vec<_>>>()?)
    }
}
