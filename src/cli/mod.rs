use std::fs::File;
use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::LoanService;
use crate::domain::{LoanAggregate, Money, UserId};
use crate::io::Exporter;

/// Loanledger - auditable loan ledger
#[derive(Parser)]
#[command(name = "loanledger")]
#[command(about = "An auditable loan ledger with an append-only transaction log")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "loanledger.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Originate a loan for a borrower (disbursed immediately)
    Originate {
        /// Borrower ID (UUID)
        user_id: String,

        /// Principal amount (e.g., "1000.00")
        amount: String,

        /// Idempotency key (UUID); generated and printed if omitted.
        /// Clients retrying a request must resend the same key.
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Record a repayment against a borrower's loan
    Repay {
        /// Borrower ID (UUID)
        user_id: String,

        /// Repayment amount (e.g., "400.00")
        amount: String,

        /// Idempotency key (UUID); generated and printed if omitted
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Mark an active loan as defaulted
    Default {
        /// Borrower ID (UUID)
        user_id: String,
    },

    /// Show a borrower's loan
    Show {
        /// Borrower ID (UUID)
        user_id: String,
    },

    /// List a borrower's ledger entries
    Entries {
        /// Borrower ID (UUID)
        user_id: String,
    },

    /// Verify that every loan snapshot matches its ledger entries
    Check,

    /// Export ledger entries to CSV or JSON
    Export {
        /// Restrict to one borrower (omit for the full log)
        #[arg(long)]
        user_id: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },
}

fn parse_user_id(input: &str) -> Result<UserId> {
    Uuid::parse_str(input).context("Invalid user ID format (expected UUID)")
}

fn parse_amount(input: &str) -> Result<Money> {
    input
        .parse()
        .context("Invalid amount format. Use '1000.00' or '1000'")
}

/// Parse a caller-supplied idempotency key, or mint a fresh one.
/// Returns the key and whether it was generated.
fn parse_or_generate_key(key: Option<String>) -> Result<(Uuid, bool)> {
    match key {
        Some(key) => {
            let key = Uuid::parse_str(&key).context("Invalid idempotency key (expected UUID)")?;
            Ok((key, false))
        }
        None => Ok((Uuid::new_v4(), true)),
    }
}

fn print_loan(loan: &LoanAggregate) {
    println!("Loan for user {}", loan.user_id);
    println!("  Principal: {}", loan.principal_amount);
    println!("  Balance:   {}", loan.current_balance);
    println!("  Status:    {}", loan.status);
    println!("  Version:   {}", loan.version);
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LoanService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Originate {
                user_id,
                amount,
                key,
            } => {
                let service = LoanService::connect(&self.database).await?;
                let user_id = parse_user_id(&user_id)?;
                let amount = parse_amount(&amount)?;
                let (key, generated) = parse_or_generate_key(key)?;

                let loan = service.originate_loan(user_id, amount, key).await?;

                println!(
                    "Originated loan of {} for user {} (status {})",
                    loan.principal_amount, loan.user_id, loan.status
                );
                if generated {
                    println!("Idempotency key: {}", key);
                }
            }

            Commands::Repay {
                user_id,
                amount,
                key,
            } => {
                let service = LoanService::connect(&self.database).await?;
                let user_id = parse_user_id(&user_id)?;
                let amount = parse_amount(&amount)?;
                let (key, generated) = parse_or_generate_key(key)?;

                let loan = service.process_repayment(user_id, amount, key).await?;

                println!(
                    "Recorded repayment of {}: balance {} ({})",
                    amount, loan.current_balance, loan.status
                );
                if generated {
                    println!("Idempotency key: {}", key);
                }
            }

            Commands::Default { user_id } => {
                let service = LoanService::connect(&self.database).await?;
                let user_id = parse_user_id(&user_id)?;

                let loan = service.mark_as_defaulted(user_id).await?;

                println!(
                    "Marked loan for user {} as defaulted (balance {})",
                    loan.user_id, loan.current_balance
                );
            }

            Commands::Show { user_id } => {
                let service = LoanService::connect(&self.database).await?;
                let user_id = parse_user_id(&user_id)?;

                match service.get_loan_details(user_id).await? {
                    Some(loan) => print_loan(&loan),
                    None => println!("No loan found for user {}", user_id),
                }
            }

            Commands::Entries { user_id } => {
                let service = LoanService::connect(&self.database).await?;
                let user_id = parse_user_id(&user_id)?;

                let entries = service.list_entries(user_id).await?;
                println!("{} entries for user {}", entries.len(), user_id);
                for entry in entries {
                    println!(
                        "  {} {:>12} {:<12} key {}",
                        entry.created_at.to_rfc3339(),
                        entry.amount_delta.to_string(),
                        entry.entry_type,
                        entry.idempotency_key
                    );
                }
            }

            Commands::Check => {
                let service = LoanService::connect(&self.database).await?;
                let report = service.check_integrity().await?;

                println!(
                    "Checked {} loans against {} ledger entries",
                    report.loan_count, report.entry_count
                );
                if report.is_clean() {
                    println!("OK: every snapshot matches its ledger");
                } else {
                    for mismatch in &report.balance_mismatches {
                        println!(
                            "MISMATCH user {}: snapshot {} but ledger replays to {}",
                            mismatch.user_id, mismatch.snapshot_balance, mismatch.replayed_balance
                        );
                    }
                    for user_id in &report.status_violations {
                        println!("STATUS user {}: CLOSED does not match zero balance", user_id);
                    }
                    if report.orphaned_entries > 0 {
                        println!("ORPHANED: {} entries without a loan", report.orphaned_entries);
                    }
                    anyhow::bail!("ledger integrity check failed");
                }
            }

            Commands::Export {
                user_id,
                output,
                format,
            } => {
                let service = LoanService::connect(&self.database).await?;
                let user_id = user_id.as_deref().map(parse_user_id).transpose()?;
                let exporter = Exporter::new(&service);

                let count = match (format.as_str(), output) {
                    ("csv", Some(path)) => {
                        let file = File::create(&path).context("Failed to create output file")?;
                        exporter.export_entries_csv(user_id, file).await?
                    }
                    ("csv", None) => exporter.export_entries_csv(user_id, io::stdout()).await?,
                    ("json", Some(path)) => {
                        let file = File::create(&path).context("Failed to create output file")?;
                        exporter.export_entries_json(user_id, file).await?
                    }
                    ("json", None) => exporter.export_entries_json(user_id, io::stdout()).await?,
                    (other, _) => anyhow::bail!("Unknown export format: {other} (use csv or json)"),
                };

                eprintln!("Exported {} entries", count);
            }
        }

        Ok(())
    }
}
