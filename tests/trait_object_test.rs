use chrono::Utc;
use mandipay::domain::escrow::{EscrowRecord, FeePayer, ReleaseCondition};
use mandipay::domain::ports::{EscrowStoreBox, TransactionStoreBox};
use mandipay::domain::transaction::{LocalizedText, TransactionRecord, TransactionStatus};
use mandipay::infrastructure::in_memory::InMemoryLedger;
use rust_decimal_macros::dec;

fn transaction() -> TransactionRecord {
    TransactionRecord {
        id: "TXN_000000000001".to_string(),
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

#[tokio::test]
async fn test_stores_as_trait_objects() {
    let ledger = InMemoryLedger::new();
    let transaction_store: TransactionStoreBox = Box::new(ledger.clone());
    let escrow_store: EscrowStoreBox = Box::new(ledger.clone());

    let tx = transaction();
    let escrow = EscrowRecord::open(
        &tx,
        vec![ReleaseCondition::DeliveryConfirmation],
        None,
        14,
        dec!(1.5),
        FeePayer::Buyer,
        Utc::now(),
    )
    .unwrap();
    let escrow_id = escrow.id.clone();

    // Verify Send + Sync by driving both boxes from spawned tasks.
    let tx_handle = tokio::spawn(async move {
        transaction_store.insert(tx).await.unwrap();
        transaction_store
            .get("TXN_000000000001")
            .await
            .unwrap()
            .unwrap()
    });
    let escrow_handle = tokio::spawn(async move {
        escrow_store.insert(escrow).await.unwrap();
        escrow_store.get(&escrow_id).await.unwrap().unwrap()
    });

    let stored_tx = tx_handle.await.unwrap();
    assert_eq!(stored_tx.id, "TXN_000000000001");

    let stored_escrow = escrow_handle.await.unwrap();
    assert_eq!(stored_escrow.transaction_id, "TXN_000000000001");
    assert_eq!(stored_escrow.remaining_amount, dec!(50000.00));
}
