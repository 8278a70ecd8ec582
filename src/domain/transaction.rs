use crate::domain::escrow::ReleaseCondition;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Text keyed by language code, e.g. `{"en": "...", "hi": "..."}`.
pub type LocalizedText = HashMap<String, String>;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Refunded,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// A captured marketplace payment.
///
/// Produced by the payment-capture flow outside this engine; escrow, credit
/// terms and refunds all anchor to one of these. `amount` is immutable once
/// the record exists: every downstream money movement derives from it and
/// nothing ever writes it back.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub order_id: String,
    pub buyer_id: String,
    pub vendor_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: LocalizedText,
    pub created_at: DateTime<Utc>,
    /// Back-references maintained by the managers. The authoritative links
    /// are the foreign keys on the escrow and credit records; these exist so
    /// platform reads need not scan by transaction.
    #[serde(default)]
    pub escrow_id: Option<String>,
    #[serde(default)]
    pub escrow_conditions: Option<Vec<ReleaseCondition>>,
    #[serde(default)]
    pub credit_terms_id: Option<String>,
}

impl TransactionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Role of `party` in this transaction, if any.
    pub fn role_of(&self, party: &str) -> Option<PartyRole> {
        if party == self.buyer_id {
            Some(PartyRole::Buyer)
        } else if party == self.vendor_id {
            Some(PartyRole::Vendor)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Buyer,
    Vendor,
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartyRole::Buyer => f.write_str("buyer"),
            PartyRole::Vendor => f.write_str("vendor"),
        }
    }
}
