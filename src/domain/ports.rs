use super::credit::CreditTermsRecord;
use super::escrow::EscrowRecord;
use super::refund::RefundRequestRecord;
use super::reminder::{DeliveryStatus, ReminderRecord};
use super::transaction::TransactionRecord;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Closure applied inside a store's atomic read-modify-write.
///
/// It receives the freshly read record and must re-validate invariants
/// against that state, never against a stale copy. Returning an error
/// leaves the stored record untouched.
pub type UpdateFn<T> = Box<dyn FnOnce(&mut T) -> Result<()> + Send>;

/// The ledger store guarantees per-record atomicity for `update`; there are
/// no multi-record transactions. `update` fails NotFound when the id is
/// absent and otherwise returns the record as written.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, record: TransactionRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>>;
    async fn all(&self) -> Result<Vec<TransactionRecord>>;
    async fn update(&self, id: &str, apply: UpdateFn<TransactionRecord>)
        -> Result<TransactionRecord>;
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn insert(&self, record: EscrowRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<EscrowRecord>>;
    async fn all(&self) -> Result<Vec<EscrowRecord>>;
    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<EscrowRecord>>;
    /// Escrows still holding funds (ACTIVE or PARTIALLY_RELEASED).
    async fn find_live(&self) -> Result<Vec<EscrowRecord>>;
    async fn update(&self, id: &str, apply: UpdateFn<EscrowRecord>) -> Result<EscrowRecord>;
}

#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn insert(&self, record: CreditTermsRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<CreditTermsRecord>>;
    async fn all(&self) -> Result<Vec<CreditTermsRecord>>;
    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<CreditTermsRecord>>;
    async fn find_by_buyer(&self, buyer_id: &str) -> Result<Vec<CreditTermsRecord>>;
    /// Records that can still change state (ACTIVE or OVERDUE).
    async fn find_live(&self) -> Result<Vec<CreditTermsRecord>>;
    async fn update(&self, id: &str, apply: UpdateFn<CreditTermsRecord>)
        -> Result<CreditTermsRecord>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn insert(&self, record: ReminderRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ReminderRecord>>;
    async fn all(&self) -> Result<Vec<ReminderRecord>>;
    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<ReminderRecord>>;
    /// Unsent reminders whose scheduled time has arrived.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>>;
    async fn update(&self, id: &str, apply: UpdateFn<ReminderRecord>) -> Result<ReminderRecord>;
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn insert(&self, record: RefundRequestRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<RefundRequestRecord>>;
    async fn all(&self) -> Result<Vec<RefundRequestRecord>>;
    async fn find_by_transaction(&self, transaction_id: &str)
        -> Result<Vec<RefundRequestRecord>>;
    async fn update(&self, id: &str, apply: UpdateFn<RefundRequestRecord>)
        -> Result<RefundRequestRecord>;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Completed,
    Queued,
    Failed,
}

/// Result of one payout call.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub processed_at: DateTime<Utc>,
}

/// Moves settled funds to a vendor. External; a call that fails or times
/// out must never be treated as a money-state change.
#[async_trait]
pub trait PayoutService: Send + Sync {
    async fn transfer(
        &self,
        recipient_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<TransferReceipt>;
}

/// Supplies the trading-relationship inputs for credit eligibility.
#[async_trait]
pub trait RelationshipHistory: Send + Sync {
    async fn duration_months(&self, buyer_id: &str, vendor_id: &str) -> Result<u32>;
    async fn credit_score(&self, buyer_id: &str) -> Result<f64>;
}

/// Performs the actual reminder send over the record's channel.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn deliver(&self, reminder: &ReminderRecord) -> Result<DeliveryStatus>;
}

pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type EscrowStoreBox = Box<dyn EscrowStore>;
pub type CreditStoreBox = Box<dyn CreditStore>;
pub type ReminderStoreBox = Box<dyn ReminderStore>;
pub type RefundStoreBox = Box<dyn RefundStore>;
pub type PayoutServiceBox = Box<dyn PayoutService>;
pub type RelationshipHistoryBox = Box<dyn RelationshipHistory>;
pub type NotificationDeliveryBox = Box<dyn NotificationDelivery>;
