mod common;

use anyhow::Result;
use common::{db_path, money, test_service};
use loanledger::application::AppError;
use loanledger::domain::{EntryType, LoanAggregate, LoanStatus};
use loanledger::storage::{LedgerStore, Repository, StoreError};
use uuid::Uuid;

#[tokio::test]
async fn test_duplicate_repayment_key_is_inert() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user_id = Uuid::new_v4();
    let payment_key = Uuid::new_v4();

    service
        .originate_loan(user_id, money("1000.00"), Uuid::new_v4())
        .await?;
    service
        .process_repayment(user_id, money("400.00"), payment_key)
        .await?;

    // A client retry reuses the same key; it must not double-apply
    let result = service
        .process_repayment(user_id, money("400.00"), payment_key)
        .await;
    assert!(matches!(result, Err(AppError::DuplicateIdempotencyKey)));

    let loan = service.get_loan_details(user_id).await?.unwrap();
    assert_eq!(loan.current_balance, money("600.00"));
    assert_eq!(loan.version, 2);
    assert_eq!(service.list_entries(user_id).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_origination_key_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let first_user = Uuid::new_v4();
    let second_user = Uuid::new_v4();
    let key = Uuid::new_v4();

    service
        .originate_loan(first_user, money("100.00"), key)
        .await?;

    let result = service
        .originate_loan(second_user, money("100.00"), key)
        .await;
    assert!(matches!(result, Err(AppError::DuplicateIdempotencyKey)));

    // The failed origination left no partial state behind
    assert!(service.get_loan_details(second_user).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_one_loan_per_user() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user_id = Uuid::new_v4();

    service
        .originate_loan(user_id, money("100.00"), Uuid::new_v4())
        .await?;

    let result = service
        .originate_loan(user_id, money("200.00"), Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(AppError::LoanAlreadyExists(id)) if id == user_id));

    let loan = service.get_loan_details(user_id).await?.unwrap();
    assert_eq!(loan.principal_amount, money("100.00"));
    assert_eq!(service.list_entries(user_id).await?.len(), 1);

    Ok(())
}

// Store-level tests of the atomic write protocol itself.

async fn test_repository() -> Result<(Repository, tempfile::TempDir)> {
    let (_, temp) = test_service().await?;
    let repo = Repository::connect(&format!("sqlite:{}", db_path(&temp))).await?;
    Ok((repo, temp))
}

#[tokio::test]
async fn test_record_transaction_commits_exactly_once_per_key() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let user_id = Uuid::new_v4();
    let key = Uuid::new_v4();

    let loan = LoanAggregate::create_new(user_id, money("100.00"))
        .activate()
        .unwrap();
    repo.create_initial_loan(&loan, Uuid::new_v4()).await?;

    let updated = loan.apply_repayment(money("40.00")).unwrap();
    repo.record_transaction(&updated, money("-40.00"), EntryType::Repayment, key)
        .await?;

    // Same key again: the whole operation aborts, snapshot untouched
    let fresh = repo.find_by_user_id(user_id).await?.unwrap();
    let again = fresh.apply_repayment(money("40.00")).unwrap();
    let result = repo
        .record_transaction(&again, money("-40.00"), EntryType::Repayment, key)
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateIdempotencyKey)));

    let after = repo.find_by_user_id(user_id).await?.unwrap();
    assert_eq!(after.current_balance, money("60.00"));
    assert_eq!(after.version, 2);
    assert_eq!(repo.list_entries_for_user(user_id).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_stale_version_write_retains_no_entry() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let user_id = Uuid::new_v4();

    let loan = LoanAggregate::create_new(user_id, money("100.00"))
        .activate()
        .unwrap();
    repo.create_initial_loan(&loan, Uuid::new_v4()).await?;

    // Two writers observe version 1
    let first = loan.apply_repayment(money("10.00")).unwrap();
    let second = loan.apply_repayment(money("20.00")).unwrap();

    repo.record_transaction(&first, money("-10.00"), EntryType::Repayment, Uuid::new_v4())
        .await?;

    // The second writer's view is stale; its entry insert must roll back
    // together with the rejected snapshot update
    let result = repo
        .record_transaction(&second, money("-20.00"), EntryType::Repayment, Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(StoreError::OptimisticLockConflict)));

    let after = repo.find_by_user_id(user_id).await?.unwrap();
    assert_eq!(after.current_balance, money("90.00"));
    assert_eq!(after.version, 2);
    assert_eq!(repo.list_entries_for_user(user_id).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_create_initial_loan_has_no_partial_effect() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let user_id = Uuid::new_v4();
    let key = Uuid::new_v4();

    let loan = LoanAggregate::create_new(user_id, money("100.00"))
        .activate()
        .unwrap();
    repo.create_initial_loan(&loan, key).await?;

    // Reusing the key for another user writes neither snapshot nor entry
    let other_user = Uuid::new_v4();
    let other = LoanAggregate::create_new(other_user, money("50.00"))
        .activate()
        .unwrap();
    let result = repo.create_initial_loan(&other, key).await;
    assert!(matches!(result, Err(StoreError::DuplicateIdempotencyKey)));

    assert!(repo.find_by_user_id(other_user).await?.is_none());
    assert!(repo.list_entries_for_user(other_user).await?.is_empty());

    let original = repo.find_by_user_id(user_id).await?.unwrap();
    assert_eq!(original.status, LoanStatus::Active);
    assert_eq!(original.version, 1);

    Ok(())
}
