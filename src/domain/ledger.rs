use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LoanAggregate, LoanStatus, Money, UserId};

pub type EntryId = Uuid;
pub type IdempotencyKey = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Funds paid out to the borrower; positive delta
    Disbursement,
    /// Funds paid back by the borrower; negative delta
    Repayment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Disbursement => "DISBURSEMENT",
            EntryType::Repayment => "REPAYMENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DISBURSEMENT" => Some(EntryType::Disbursement),
            "REPAYMENT" => Some(EntryType::Repayment),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable, append-only record of a balance-changing event. The log is
/// the source of truth for audit; the loan snapshot is a materialized cache
/// of the sum of entries to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub amount_delta: Money,
    pub entry_type: EntryType,
    pub idempotency_key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        user_id: UserId,
        amount_delta: Money,
        entry_type: EntryType,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount_delta,
            entry_type,
            idempotency_key,
            created_at: Utc::now(),
        }
    }
}

/// Replay a loan's balance from its ledger entries.
/// Balance = sum of signed deltas (disbursements positive, repayments negative).
pub fn replay_balance(entries: &[LedgerEntry]) -> Money {
    entries
        .iter()
        .fold(Money::zero(), |balance, entry| balance.add(entry.amount_delta))
}

/// A snapshot whose balance disagrees with the replayed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub user_id: UserId,
    pub snapshot_balance: Money,
    pub replayed_balance: Money,
}

/// Result of verifying the snapshots against the append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub loan_count: usize,
    pub entry_count: usize,
    pub balance_mismatches: Vec<BalanceMismatch>,
    /// Entries referencing a user with no loan snapshot
    pub orphaned_entries: usize,
    /// Loans violating "CLOSED if and only if balance is zero"
    pub status_violations: Vec<UserId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.balance_mismatches.is_empty()
            && self.orphaned_entries == 0
            && self.status_violations.is_empty()
    }
}

/// Verify every loan snapshot against the log it caches.
pub fn build_integrity_report(
    loans: &[LoanAggregate],
    entries: &[LedgerEntry],
) -> IntegrityReport {
    let mut entries_by_user: HashMap<UserId, Vec<LedgerEntry>> = HashMap::new();
    for entry in entries {
        entries_by_user
            .entry(entry.user_id)
            .or_default()
            .push(entry.clone());
    }

    let known_users: HashSet<UserId> = loans.iter().map(|l| l.user_id).collect();
    let orphaned_entries = entries
        .iter()
        .filter(|e| !known_users.contains(&e.user_id))
        .count();

    let mut balance_mismatches = Vec::new();
    let mut status_violations = Vec::new();

    for loan in loans {
        let replayed = entries_by_user
            .get(&loan.user_id)
            .map(|e| replay_balance(e))
            .unwrap_or_else(Money::zero);

        if replayed != loan.current_balance {
            balance_mismatches.push(BalanceMismatch {
                user_id: loan.user_id,
                snapshot_balance: loan.current_balance,
                replayed_balance: replayed,
            });
        }

        if loan.current_balance.is_zero() != (loan.status == LoanStatus::Closed) {
            status_violations.push(loan.user_id);
        }
    }

    IntegrityReport {
        loan_count: loans.len(),
        entry_count: entries.len(),
        balance_mismatches,
        orphaned_entries,
        status_violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn entry(user: UserId, delta: &str, entry_type: EntryType) -> LedgerEntry {
        LedgerEntry::new(user, money(delta), entry_type, Uuid::new_v4())
    }

    fn loan(user: UserId, balance: &str, status: LoanStatus) -> LoanAggregate {
        LoanAggregate {
            user_id: user,
            principal_amount: money("1000.00"),
            current_balance: money(balance),
            status,
            version: 1,
        }
    }

    #[test]
    fn test_replay_balance_empty() {
        assert_eq!(replay_balance(&[]), Money::zero());
    }

    #[test]
    fn test_replay_balance_sums_signed_deltas() {
        let user = Uuid::new_v4();
        let entries = vec![
            entry(user, "1000.00", EntryType::Disbursement),
            entry(user, "-400.00", EntryType::Repayment),
            entry(user, "-100.00", EntryType::Repayment),
        ];
        assert_eq!(replay_balance(&entries), money("500.00"));
    }

    #[test]
    fn test_integrity_report_clean() {
        let user = Uuid::new_v4();
        let loans = vec![loan(user, "600.00", LoanStatus::Active)];
        let entries = vec![
            entry(user, "1000.00", EntryType::Disbursement),
            entry(user, "-400.00", EntryType::Repayment),
        ];

        let report = build_integrity_report(&loans, &entries);
        assert!(report.is_clean());
        assert_eq!(report.loan_count, 1);
        assert_eq!(report.entry_count, 2);
    }

    #[test]
    fn test_integrity_report_detects_balance_mismatch() {
        let user = Uuid::new_v4();
        let loans = vec![loan(user, "999.00", LoanStatus::Active)];
        let entries = vec![
            entry(user, "1000.00", EntryType::Disbursement),
            entry(user, "-400.00", EntryType::Repayment),
        ];

        let report = build_integrity_report(&loans, &entries);
        assert!(!report.is_clean());
        assert_eq!(report.balance_mismatches.len(), 1);
        assert_eq!(report.balance_mismatches[0].snapshot_balance, money("999.00"));
        assert_eq!(report.balance_mismatches[0].replayed_balance, money("600.00"));
    }

    #[test]
    fn test_integrity_report_detects_orphaned_entries() {
        let entries = vec![entry(Uuid::new_v4(), "1000.00", EntryType::Disbursement)];
        let report = build_integrity_report(&[], &entries);
        assert_eq!(report.orphaned_entries, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_integrity_report_detects_status_violations() {
        let paid_but_active = Uuid::new_v4();
        let closed_but_owing = Uuid::new_v4();
        let loans = vec![
            loan(paid_but_active, "0.00", LoanStatus::Active),
            loan(closed_but_owing, "10.00", LoanStatus::Closed),
        ];
        let entries = vec![
            entry(paid_but_active, "1000.00", EntryType::Disbursement),
            entry(paid_but_active, "-1000.00", EntryType::Repayment),
        ];

        let report = build_integrity_report(&loans, &entries);
        assert!(report.status_violations.contains(&paid_but_active));
        assert!(report.status_violations.contains(&closed_but_owing));
    }

    #[test]
    fn test_entry_type_roundtrip() {
        for t in [EntryType::Disbursement, EntryType::Repayment] {
            assert_eq!(EntryType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(EntryType::from_str("bogus"), None);
    }
}
