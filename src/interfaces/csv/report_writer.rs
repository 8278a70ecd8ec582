use crate::domain::credit::{CreditStatus, CreditTermsRecord};
use crate::domain::escrow::{EscrowRecord, EscrowStatus};
use crate::domain::refund::{RefundRequestRecord, RefundStatus};
use crate::domain::transaction::{TransactionRecord, TransactionStatus};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One settlement summary line: a transaction joined with whatever escrow,
/// credit and refund state it accumulated.
#[derive(Debug, Serialize)]
pub struct ReportRow {
    pub transaction_id: String,
    pub order_id: String,
    pub buyer_id: String,
    pub vendor_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub escrow_status: Option<EscrowStatus>,
    pub escrow_released: Option<Decimal>,
    pub escrow_remaining: Option<Decimal>,
    pub credit_status: Option<CreditStatus>,
    pub credit_paid: Option<Decimal>,
    pub credit_remaining: Option<Decimal>,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: Option<Decimal>,
}

/// Joins ledger contents into report rows, ordered by transaction id so
/// output is stable across runs. When a transaction has several escrows,
/// credit records or refund requests, the most recently created one wins.
pub fn assemble_rows(
    mut transactions: Vec<TransactionRecord>,
    escrows: &[EscrowRecord],
    credits: &[CreditTermsRecord],
    refunds: &[RefundRequestRecord],
) -> Vec<ReportRow> {
    transactions.sort_by(|a, b| a.id.cmp(&b.id));
    transactions
        .into_iter()
        .map(|tx| {
            let escrow = escrows
                .iter()
                .filter(|e| e.transaction_id == tx.id)
                .max_by_key(|e| e.created_at);
            let credit = credits
                .iter()
                .filter(|c| c.transaction_id == tx.id)
                .max_by_key(|c| c.created_at);
            let refund = refunds
                .iter()
                .filter(|r| r.transaction_id == tx.id)
                .max_by_key(|r| r.created_at);
            ReportRow {
                transaction_id: tx.id,
                order_id: tx.order_id,
                buyer_id: tx.buyer_id,
                vendor_id: tx.vendor_id,
                amount: tx.amount,
                currency: tx.currency,
                status: tx.status,
                escrow_status: escrow.map(|e| e.status),
                escrow_released: escrow.map(|e| e.released_amount),
                escrow_remaining: escrow.map(|e| e.remaining_amount),
                credit_status: credit.map(|c| c.status),
                credit_paid: credit.map(|c| c.paid_amount),
                credit_remaining: credit.map(|c| c.remaining_amount),
                refund_status: refund.map(|r| r.status),
                refund_amount: refund.map(|r| r.amount),
            }
        })
        .collect()
}

/// Writes settlement summary rows as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    /// Creates a writer over any `Write` sink (e.g., Stdout, File).
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: Vec<ReportRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
