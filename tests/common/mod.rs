// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use loanledger::application::LoanService;
use loanledger::domain::Money;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LoanService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LoanService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Path of the database file created by `test_service`
pub fn db_path(temp_dir: &TempDir) -> String {
    temp_dir
        .path()
        .join("test.db")
        .to_str()
        .unwrap()
        .to_string()
}

/// Helper to parse a decimal string into Money
pub fn money(s: &str) -> Money {
    s.parse().unwrap()
}
