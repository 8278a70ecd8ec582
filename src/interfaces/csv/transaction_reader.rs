use crate::config;
use crate::domain::money::Amount;
use crate::domain::transaction::{LocalizedText, TransactionRecord, TransactionStatus};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of the seed file. Only the parties and the amount are required;
/// status defaults to completed, currency to INR.
#[derive(Debug, Deserialize)]
struct SeedRow {
    id: String,
    order_id: String,
    buyer_id: String,
    vendor_id: String,
    amount: Decimal,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    status: Option<TransactionStatus>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    description: Option<String>,
}

impl SeedRow {
    fn into_record(self, now: DateTime<Utc>) -> Result<TransactionRecord> {
        let amount = Amount::new(self.amount).map_err(|_| {
            SettlementError::Validation(format!(
                "transaction {}: amount {} must be positive with at most 2 decimal places",
                self.id, self.amount
            ))
        })?;
        let status = self.status.unwrap_or(TransactionStatus::Completed);
        let completed_at = match status {
            TransactionStatus::Pending => self.completed_at,
            _ => self.completed_at.or(Some(now)),
        };
        let mut description = LocalizedText::new();
        if let Some(text) = self.description.filter(|t| !t.is_empty()) {
            description.insert(config::DEFAULT_LANGUAGE.to_string(), text);
        }
        Ok(TransactionRecord {
            id: self.id,
            order_id: self.order_id,
            buyer_id: self.buyer_id,
            vendor_id: self.vendor_id,
            amount: amount.value(),
            currency: self
                .currency
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| config::DEFAULT_CURRENCY.to_string()),
            status,
            completed_at,
            description,
            created_at: completed_at.unwrap_or(now),
            escrow_id: None,
            escrow_conditions: None,
            credit_terms_id: None,
        })
    }
}

/// Reads seed transactions from a CSV source.
///
/// Wraps `csv::Reader` and yields `Result<TransactionRecord>` lazily, so
/// large seed files stream without loading the whole set into memory.
/// Whitespace is trimmed and short rows are tolerated.
pub struct TransactionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransactionReader<R> {
    /// Creates a reader from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads, validates and converts rows.
    /// Rows with a non-positive or over-precise amount come out as
    /// validation errors rather than records.
    pub fn records(self, now: DateTime<Utc>) -> impl Iterator<Item = Result<TransactionRecord>> {
        self.reader.into_deserialize().map(move |row| {
            row.map_err(SettlementError::from)
                .and_then(|seed: SeedRow| seed.into_record(now))
        })
    }
}
