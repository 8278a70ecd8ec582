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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_ESCROWS: &str = "escrows";
pub const CF_CREDIT_TERMS: &str = "credit_terms";
pub const CF_REMINDERS: &str = "reminders";
pub const CF_REFUNDS: &str = "refunds";

const ALL_CFS: [&str; 5] = [
    CF_TRANSACTIONS,
    CF_ESCROWS,
    CF_CREDIT_TERMS,
    CF_REMINDERS,
    CF_REFUNDS,
];

/// Persistent ledger over RocksDB, one column family per record type,
/// values stored as JSON.
///
/// RocksDB has no compare-and-swap, so `write_gate` serializes every
/// insert and read-modify-write. Clones share the database handle and the
/// gate.
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates the database at `path` with every column family
    /// the ledger needs.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SettlementError::Storage(format!("column family {name} missing")))
    }

    fn read_one<T: DeserializeOwned>(&self, cf: &str, id: &str) -> Result<Option<T>> {
        let handle = self.handle(cf)?;
        match self.db.get_cf(handle, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.handle(cf)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn write_one<T: Serialize>(&self, cf: &str, id: &str, record: &T) -> Result<()> {
        let handle = self.handle(cf)?;
        let bytes = serde_json::to_vec(record)?;
        self.db.put_cf(handle, id.as_bytes(), bytes)?;
        Ok(())
    }

    async fn insert_record<T: Serialize>(
        &self,
        cf: &str,
        kind: &str,
        id: &str,
        record: &T,
    ) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let handle = self.handle(cf)?;
        if self.db.get_pinned_cf(handle, id.as_bytes())?.is_some() {
            return Err(SettlementError::Storage(format!("duplicate {kind} id {id}")));
        }
        self.write_one(cf, id, record)
    }

    /// Read-modify-write under the gate; a failing closure writes nothing.
    async fn update_record<T: Serialize + DeserializeOwned>(
        &self,
        cf: &str,
        kind: &str,
        id: &str,
        apply: UpdateFn<T>,
    ) -> Result<T> {
        let _gate = self.write_gate.lock().await;
        let mut record: T = self
            .read_one(cf, id)?
            .ok_or_else(|| SettlementError::not_found(kind, id))?;
        apply(&mut record)?;
        self.write_one(cf, id, &record)?;
        Ok(record)
    }
}

#[async_trait]
impl TransactionStore for RocksDbLedger {
    async fn insert(&self, record: TransactionRecord) -> Result<()> {
        self.insert_record(CF_TRANSACTIONS, "transaction", &record.id, &record)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>> {
        self.read_one(CF_TRANSACTIONS, id)
    }

    async fn all(&self) -> Result<Vec<TransactionRecord>> {
        self.read_all(CF_TRANSACTIONS)
    }

    async fn update(
        &self,
        id: &str,
        apply: UpdateFn<TransactionRecord>,
    ) -> Result<TransactionRecord> {
        self.update_record(CF_TRANSACTIONS, "transaction", id, apply)
            .await
    }
}

#[async_trait]
impl EscrowStore for RocksDbLedger {
    async fn insert(&self, record: EscrowRecord) -> Result<()> {
        self.insert_record(CF_ESCROWS, "escrow", &record.id, &record)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<EscrowRecord>> {
        self.read_one(CF_ESCROWS, id)
    }

    async fn all(&self) -> Result<Vec<EscrowRecord>> {
        self.read_all(CF_ESCROWS)
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<EscrowRecord>> {
        let records: Vec<EscrowRecord> = self.read_all(CF_ESCROWS)?;
        Ok(records
            .into_iter()
            .filter(|e| e.transaction_id == transaction_id)
            .collect())
    }

    async fn find_live(&self) -> Result<Vec<EscrowRecord>> {
        let records: Vec<EscrowRecord> = self.read_all(CF_ESCROWS)?;
        Ok(records.into_iter().filter(|e| e.status.is_live()).collect())
    }

    async fn update(&self, id: &str, apply: UpdateFn<EscrowRecord>) -> Result<EscrowRecord> {
        self.update_record(CF_ESCROWS, "escrow", id, apply).await
    }
}

#[async_trait]
impl CreditStore for RocksDbLedger {
    async fn insert(&self, record: CreditTermsRecord) -> Result<()> {
        self.insert_record(CF_CREDIT_TERMS, "credit terms", &record.id, &record)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<CreditTermsRecord>> {
        self.read_one(CF_CREDIT_TERMS, id)
    }

    async fn all(&self) -> Result<Vec<CreditTermsRecord>> {
        self.read_all(CF_CREDIT_TERMS)
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<CreditTermsRecord>> {
        let records: Vec<CreditTermsRecord> = self.read_all(CF_CREDIT_TERMS)?;
        Ok(records
            .into_iter()
            .filter(|c| c.transaction_id == transaction_id)
            .collect())
    }

    async fn find_by_buyer(&self, buyer_id: &str) -> Result<Vec<CreditTermsRecord>> {
        let records: Vec<CreditTermsRecord> = self.read_all(CF_CREDIT_TERMS)?;
        Ok(records
            .into_iter()
            .filter(|c| c.buyer_id == buyer_id)
            .collect())
    }

    async fn find_live(&self) -> Result<Vec<CreditTermsRecord>> {
        let records: Vec<CreditTermsRecord> = self.read_all(CF_CREDIT_TERMS)?;
        Ok(records
            .into_iter()
            .filter(|c| !c.status.is_terminal())
            .collect())
    }

    async fn update(
        &self,
        id: &str,
        apply: UpdateFn<CreditTermsRecord>,
    ) -> Result<CreditTermsRecord> {
        self.update_record(CF_CREDIT_TERMS, "credit terms", id, apply)
            .await
    }
}

#[async_trait]
impl ReminderStore for RocksDbLedger {
    async fn insert(&self, record: ReminderRecord) -> Result<()> {
        self.insert_record(CF_REMINDERS, "reminder", &record.id, &record)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<ReminderRecord>> {
        self.read_one(CF_REMINDERS, id)
    }

    async fn all(&self) -> Result<Vec<ReminderRecord>> {
        self.read_all(CF_REMINDERS)
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Vec<ReminderRecord>> {
        let records: Vec<ReminderRecord> = self.read_all(CF_REMINDERS)?;
        Ok(records
            .into_iter()
            .filter(|r| r.transaction_id == transaction_id)
            .collect())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>> {
        let records: Vec<ReminderRecord> = self.read_all(CF_REMINDERS)?;
        Ok(records.into_iter().filter(|r| r.is_due(now)).collect())
    }

    async fn update(&self, id: &str, apply: UpdateFn<ReminderRecord>) -> Result<ReminderRecord> {
        self.update_record(CF_REMINDERS, "reminder", id, apply).await
    }
}

#[async_trait]
impl RefundStore for RocksDbLedger {
    async fn insert(&self, record: RefundRequestRecord) -> Result<()> {
        self.insert_record(CF_REFUNDS, "refund request", &record.id, &record)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<RefundRequestRecord>> {
        self.read_one(CF_REFUNDS, id)
    }

    async fn all(&self) -> Result<Vec<RefundRequestRecord>> {
        self.read_all(CF_REFUNDS)
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<RefundRequestRecord>> {
        let records: Vec<RefundRequestRecord> = self.read_all(CF_REFUNDS)?;
        Ok(records
            .into_iter()
            .filter(|r| r.transaction_id == transaction_id)
            .collect())
    }

    async fn update(
        &self,
        id: &str,
        apply: UpdateFn<RefundRequestRecord>,
    ) -> Result<RefundRequestRecord> {
        self.update_record(CF_REFUNDS, "refund request", id, apply)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::escrow::{FeePayer, ReleaseCondition};
    use crate::domain::transaction::{LocalizedText, TransactionStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn transaction(id: &str) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            order_id: "ORD-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            vendor_id: "vendor-1".to_string(),
            amount: dec!(50000.00),
            currency: "INR".to_string(),
            status: TransactionStatus::Completed,
            completed_at: Some(Utc::now()),
            description: LocalizedText::new(),
            created_at: Utc::now(),
            escrow_id: None,
            escrow_conditions: None,
            credit_terms_id: None,
        }
    }

    fn escrow(tx: &TransactionRecord) -> EscrowRecord {
        EscrowRecord::open(
            tx,
            vec![ReleaseCondition::DeliveryConfirmation],
            None,
            14,
            dec!(1.0),
            FeePayer::Buyer,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let ledger = RocksDbLedger::open(dir.path()).unwrap();
        for name in ALL_CFS {
            assert!(ledger.db.cf_handle(name).is_some(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_duplicate_rejection() {
        let dir = tempdir().unwrap();
        let ledger = RocksDbLedger::open(dir.path()).unwrap();

        let tx = transaction("TXN_000000000001");
        TransactionStore::insert(&ledger, tx.clone()).await.unwrap();
        let stored = TransactionStore::get(&ledger, &tx.id).await.unwrap().unwrap();
        assert_eq!(stored, tx);

        let err = TransactionStore::insert(&ledger, tx).await.unwrap_err();
        assert!(matches!(err, SettlementError::Storage(_)));
        assert!(
            TransactionStore::get(&ledger, "TXN_nope")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_survives_reopen() {
        let dir = tempdir().unwrap();
        let tx = transaction("TXN_000000000001");
        let esc = escrow(&tx);
        let escrow_id = esc.id.clone();

        {
            let ledger = RocksDbLedger::open(dir.path()).unwrap();
            EscrowStore::insert(&ledger, esc).await.unwrap();
            EscrowStore::update(
                &ledger,
                &escrow_id,
                Box::new(|e| e.raise_dispute("buyer-1", "goods damaged", 14, Utc::now())),
            )
            .await
            .unwrap();
        }

        let reopened = RocksDbLedger::open(dir.path()).unwrap();
        let stored = EscrowStore::get(&reopened, &escrow_id).await.unwrap().unwrap();
        assert!(stored.dispute.is_some());

        let live = EscrowStore::find_live(&reopened).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_writes_nothing() {
        let dir = tempdir().unwrap();
        let ledger = RocksDbLedger::open(dir.path()).unwrap();
        let tx = transaction("TXN_000000000001");
        let esc = escrow(&tx);
        EscrowStore::insert(&ledger, esc.clone()).await.unwrap();

        let err = EscrowStore::update(
            &ledger,
            &esc.id,
            Box::new(|e| {
                e.released_amount = dec!(999.00);
                Err(SettlementError::Validation("rejected".to_string()))
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        let stored = EscrowStore::get(&ledger, &esc.id).await.unwrap().unwrap();
        assert_eq!(stored.released_amount, Decimal::ZERO);
    }
}
