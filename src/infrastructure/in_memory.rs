use crate::domain::credit::CreditTermsRecord;
use crate::domain::escrow::EscrowRecord;
use crate::domain::ports::{
    CreditStore, EscrowStore, RefundStore, ReminderStore, TransactionStore, UpdateFn,
};
use crate::domain::refund::RefundRequestRecord;
use crate::domain::reminder::ReminderRecord;
use crate::domain::transaction::TransactionRecord;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Shelf<T> = Arc<RwLock<HashMap<String, T>>>;

async fn insert_into<T>(shelf: &Shelf<T>, kind: &str, id: String, record: T) -> Result<()> {
    let mut map = shelf.write().await;
    if map.contains_key(&id) {
        return Err(SettlementError::Storage(format!("duplicate {kind} id {id}")));
    }
    map.insert(id, record);
    Ok(())
}

async fn get_from<T: Clone>(shelf: &Shelf<T>, id: &str) -> Result<Option<T>> {
    Ok(shelf.read().await.get(id).cloned())
}

async fn all_from<T: Clone>(shelf: &Shelf<T>) -> Result<Vec<T>> {
    Ok(shelf.read().await.values().cloned().collect())
}

/// Applies the closure to a copy and writes it back only on success, so a
/// rejected update leaves the stored record untouched. The shelf's write
/// lock is held for the whole read-modify-write.
async fn update_in<T: Clone>(
    shelf: &Shelf<T>,
    kind: &str,
    id: &str,
    apply: UpdateFn<T>,
) -> Result<T> {
    let mut map = shelf.write().await;
    let current = map
        .get(id)
        .ok_or_else(|| SettlementError::not_found(kind, id))?;
    let mut next = current.clone();
    apply(&mut next)?;
    map.insert(id.to_string(), next.clone());
    Ok(next)
}

/// A thread-safe in-memory ledger holding every settlement record type.
///
/// Clones share state, so one ledger can back several boxed ports at once.
/// Suited to tests and single-run batch processing; the RocksDB ledger
/// covers persistence across runs.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    transactions: Shelf<TransactionRecord>,
    escrows: Shelf<EscrowRecord>,
    credits: Shelf<CreditTermsRecord>,
    reminders: Shelf<ReminderRecord>,
    refunds: Shelf<RefundRequestRecord>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_transaction(&self, record: TransactionRecord) -> Result<()> {
        TransactionStore::insert(self, record).await
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Option<TransactionRecord>> {
        TransactionStore::get(self, id).await
    }

    pub async fn get_escrow(&self, id: &str) -> Result<Option<EscrowRecord>> {
        EscrowStore::get(self, id).await
    }
}

#[async_trait]
impl TransactionStore for InMemoryLedger {
    async fn insert(&self, record: TransactionRecord) -> Result<()> {
        insert_into(&self.transactions, "transaction", record.id.clone(), record).await
    }

    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>> {
        get_from(&self.transactions, id).await
    }

    async fn all(&self) -> Result<Vec<TransactionRecord>> {
        all_from(&self.transactions).await
    }

    async fn update(
        &self,
        id: &str,
        apply: UpdateFn<TransactionRecord>,
    ) -> Result<TransactionRecord> {
        update_in(&self.transactions, "transaction", id, apply).await
    }
}

#[async_trait]
impl EscrowStore for InMemoryLedger {
    async fn insert(&self, record: EscrowRecord) -> Result<()> {
        insert_into(&self.escrows, "escrow", record.id.clone(), record).await
    }

    async fn get(&self, id: &str) -> Result<Option<EscrowRecord>> {
        get_from(&self.escrows, id).await
    }

    async fn all(&self) -> Result<Vec<EscrowRecord>> {
        all_from(&self.escrows).await
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<EscrowRecord>> {
        let map = self.escrows.read().await;
        Ok(map
            .values()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_live(&self) -> Result<Vec<EscrowRecord>> {
        let map = self.escrows.read().await;
        Ok(map
            .values()
            .filter(|e| e.status.is_live())
            .cloned()
            .collect())
    }

    async fn update(&self, id: &str, apply: UpdateFn<EscrowRecord>) -> Result<EscrowRecord> {
        update_in(&self.escrows, "escrow", id, apply).await
    }
}

#[async_trait]
impl CreditStore for InMemoryLedger {
    async fn insert(&self, record: CreditTermsRecord) -> Result<()> {
        insert_into(&self.credits, "credit terms", record.id.clone(), record).await
    }

    async fn get(&self, id: &str) -> Result<Option<CreditTermsRecord>> {
        get_from(&self.credits, id).await
    }

    async fn all(&self) -> Result<Vec<CreditTermsRecord>> {
        all_from(&self.credits).await
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<CreditTermsRecord>> {
        let map = self.credits.read().await;
        Ok(map
            .values()
            .filter(|c| c.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_by_buyer(&self, buyer_id: &str) -> Result<Vec<CreditTermsRecord>> {
        let map = self.credits.read().await;
        Ok(map
            .values()
            .filter(|c| c.buyer_id == buyer_id)
            .cloned()
            .collect())
    }

    async fn find_live(&self) -> Result<Vec<CreditTermsRecord>> {
        let map = self.credits.read().await;
        Ok(map
            .values()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: &str,
        apply: UpdateFn<CreditTermsRecord>,
    ) -> Result<CreditTermsRecord> {
        update_in(&self.credits, "credit terms", id, apply).await
    }
}

#[async_trait]
impl ReminderStore for InMemoryLedger {
    async fn insert(&self, record: ReminderRecord) -> Result<()> {
        insert_into(&self.reminders, "reminder", record.id.clone(), record).await
    }

    async fn get(&self, id: &str) -> Result<Option<ReminderRecord>> {
        get_from(&self.reminders, id).await
    }

    async fn all(&self) -> Result<Vec<ReminderRecord>> {
        all_from(&self.reminders).await
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<ReminderRecord>> {
        let map = self.reminders.read().await;
        Ok(map
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>> {
        let map = self.reminders.read().await;
        Ok(map.values().filter(|r| r.is_due(now)).cloned().collect())
    }

    async fn update(&self, id: &str, apply: UpdateFn<ReminderRecord>) -> Result<ReminderRecord> {
        update_in(&self.reminders, "reminder", id, apply).await
    }
}

#[async_trait]
impl RefundStore for InMemoryLedger {
    async fn insert(&self, record: RefundRequestRecord) -> Result<()> {
        insert_into(&self.refunds, "refund request", record.id.clone(), record).await
    }

    async fn get(&self, id: &str) -> Result<Option<RefundRequestRecord>> {
        get_from(&self.refunds, id).await
    }

    async fn all(&self) -> Result<Vec<RefundRequestRecord>> {
        all_from(&self.refunds).await
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<RefundRequestRecord>> {
        let map = self.refunds.read().await;
        Ok(map
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: &str,
        apply: UpdateFn<RefundRequestRecord>,
    ) -> Result<RefundRequestRecord> {
        update_in(&self.refunds, "refund request", id, apply).await
    }
}
