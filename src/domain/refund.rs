use crate::domain::ids;
use crate::domain::transaction::{LocalizedText, PartyRole, TransactionRecord};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundReason {
    OrderCancelled,
    QualityIssue,
    DamagedGoods,
    NotDelivered,
    WrongItem,
    Other,
}

impl RefundReason {
    /// Reasons tied to product condition carry no return window; the buyer
    /// could not have discovered them earlier.
    pub fn is_condition_based(&self) -> bool {
        matches!(
            self,
            RefundReason::QualityIssue
                | RefundReason::DamagedGoods
                | RefundReason::NotDelivered
                | RefundReason::WrongItem
        )
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Processed,
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::Approved => "APPROVED",
            RefundStatus::Rejected => "REJECTED",
            RefundStatus::Processed => "PROCESSED",
        };
        f.write_str(s)
    }
}

/// An adjudicated refund request. This record is a decision artifact: it
/// never moves money, it only captures the request, the policy evaluation
/// and the reviewer's verdict.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RefundRequestRecord {
    pub id: String,
    pub transaction_id: String,
    pub requester_id: String,
    pub requester_role: PartyRole,
    pub amount: Decimal,
    pub reason: RefundReason,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub documents: Vec<String>,
    pub status: RefundStatus,
    pub policy_compliant: bool,
    pub policy_violations: Vec<String>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_notes: Option<String>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refund_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefundRequestRecord {
    /// Builds a PENDING request. The requester must be a party to the
    /// transaction and the amount must not exceed it; both are hard
    /// failures. Policy violations are soft: they mark the request
    /// non-compliant but never block its creation.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        transaction: &TransactionRecord,
        requester_id: &str,
        amount: Decimal,
        reason: RefundReason,
        description: LocalizedText,
        documents: Vec<String>,
        policy_violations: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let requester_role = transaction.role_of(requester_id).ok_or_else(|| {
            SettlementError::Validation(format!(
                "{requester_id} is not a party to transaction {}",
                transaction.id
            ))
        })?;
        if amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "refund amount {amount} must be positive"
            )));
        }
        if amount > transaction.amount {
            return Err(SettlementError::Validation(format!(
                "refund amount {amount} exceeds transaction amount {}",
                transaction.amount
            )));
        }
        Ok(Self {
            id: ids::prefixed_id(ids::REFUND_PREFIX),
            transaction_id: transaction.id.clone(),
            requester_id: requester_id.to_string(),
            requester_role,
            amount,
            reason,
            description,
            documents,
            status: RefundStatus::Pending,
            policy_compliant: policy_violations.is_empty(),
            policy_violations,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            processed_at: None,
            refund_transaction_id: None,
            created_at: now,
        })
    }

    fn record_review(&mut self, reviewer: &str, notes: Option<&str>, now: DateTime<Utc>) {
        self.reviewed_by = Some(reviewer.to_string());
        self.reviewed_at = Some(now);
        self.review_notes = notes.map(str::to_string);
    }

    pub fn approve(&mut self, reviewer: &str, notes: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        if self.status != RefundStatus::Pending {
            return Err(SettlementError::StateConflict(format!(
                "refund request {} is {}, only pending requests can be approved",
                self.id, self.status
            )));
        }
        self.record_review(reviewer, notes, now);
        self.status = RefundStatus::Approved;
        Ok(())
    }

    pub fn reject(&mut self, reviewer: &str, notes: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        if self.status != RefundStatus::Pending {
            return Err(SettlementError::StateConflict(format!(
                "refund request {} is {}, only pending requests can be rejected",
                self.id, self.status
            )));
        }
        self.record_review(reviewer, notes, now);
        self.status = RefundStatus::Rejected;
        Ok(())
    }

    /// Records the externally produced refund transaction. Approved
    /// requests only.
    pub fn mark_processed(
        &mut self,
        refund_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != RefundStatus::Approved {
            return Err(SettlementError::StateConflict(format!(
                "refund request {} is {}, only approved requests can be processed",
                self.id, self.status
            )));
        }
        self.refund_transaction_id = Some(refund_transaction_id.to_string());
        self.processed_at = Some(now);
        self.status = RefundStatus::Processed;
        Ok(())
    }
}
