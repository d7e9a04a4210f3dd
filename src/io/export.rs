use std::io::Write;

use anyhow::Result;

use crate::application::LoanService;
use crate::domain::{LedgerEntry, UserId};
use crate::storage::LedgerStore;

/// Exporter for extracting the audit log in machine-readable formats.
pub struct Exporter<'a, S> {
    service: &'a LoanService<S>,
}

impl<'a, S: LedgerStore> Exporter<'a, S> {
    pub fn new(service: &'a LoanService<S>) -> Self {
        Self { service }
    }

    async fn fetch_entries(&self, user_id: Option<UserId>) -> Result<Vec<LedgerEntry>> {
        let entries = match user_id {
            Some(user_id) => self.service.list_entries(user_id).await?,
            None => self.service.list_all_entries().await?,
        };
        Ok(entries)
    }

    /// Export ledger entries to CSV format.
    /// Returns the number of entries written.
    pub async fn export_entries_csv<W: Write>(
        &self,
        user_id: Option<UserId>,
        writer: W,
    ) -> Result<usize> {
        let entries = self.fetch_entries(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "user_id",
            "amount_delta",
            "entry_type",
            "idempotency_key",
            "created_at",
        ])?;

        for entry in &entries {
            csv_writer.write_record([
                entry.id.to_string(),
                entry.user_id.to_string(),
                entry.amount_delta.to_string(),
                entry.entry_type.to_string(),
                entry.idempotency_key.to_string(),
                entry.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export ledger entries to JSON format.
    /// Returns the number of entries written.
    pub async fn export_entries_json<W: Write>(
        &self,
        user_id: Option<UserId>,
        mut writer: W,
    ) -> Result<usize> {
        let entries = self.fetch_entries(user_id).await?;
        serde_json::to_writer_pretty(&mut writer, &entries)?;
        writeln!(writer)?;
        Ok(entries.len())
    }
}
