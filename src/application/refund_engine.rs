use crate::config::RefundPolicy;
use crate::domain::money::Amount;
use crate::domain::ports::{EscrowStoreBox, RefundStoreBox, TransactionStoreBox};
use crate::domain::refund::{RefundReason, RefundRequestRecord};
use crate::domain::transaction::{LocalizedText, TransactionStatus};
use crate::error::{Result, SettlementError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CreateRefundRequest {
    pub transaction_id: String,
    pub requester_id: String,
    pub amount: Decimal,
    pub reason: RefundReason,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub documents: Vec<String>,
}

/// Adjudicates refund requests against transaction state, amount bounds and
/// return-policy rules. Decisions are recorded; money moves elsewhere.
///
/// Policy checks are soft: a violating request is still created in PENDING
/// with its violations listed, so a reviewer can overrule. The two hard
/// gates (requester must be a party, amount must not exceed the
/// transaction) reject outright.
pub struct RefundEngine {
    transactions: TransactionStoreBox,
    escrows: EscrowStoreBox,
    refunds: RefundStoreBox,
    policy: RefundPolicy,
}

impl RefundEngine {
    pub fn new(
        transactions: TransactionStoreBox,
        escrows: EscrowStoreBox,
        refunds: RefundStoreBox,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            transactions,
            escrows,
            refunds,
            policy,
        }
    }

    pub async fn create_refund_request(
        &self,
        request: CreateRefundRequest,
    ) -> Result<RefundRequestRecord> {
        let transaction = self
            .transactions
            .get(&request.transaction_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("transaction", &request.transaction_id))?;
        let amount = Amount::new(request.amount)?.value();

        let now = Utc::now();
        let mut violations = Vec::new();
        if request.reason == RefundReason::OrderCancelled {
            let age_days = (now - transaction.created_at).num_days();
            if age_days > self.policy.cancellation_window_days {
                violations.push(format!(
                    "cancellation requested {age_days} days after the transaction, outside the {} day return window",
                    self.policy.cancellation_window_days
                ));
            }
        }
        if let Some(live) = self
            .escrows
            .find_by_transaction(&transaction.id)
            .await?
            .into_iter()
            .find(|e| !e.status.is_terminal())
        {
            violations.push(format!(
                "transaction funds are held in escrow {}; use the escrow dispute process",
                live.id
            ));
        }

        let record = RefundRequestRecord::submit(
            &transaction,
            &request.requester_id,
            amount,
            request.reason,
            request.description,
            request.documents,
            violations,
            now,
        )?;
        self.refunds.insert(record.clone()).await?;
        tracing::info!(
            refund_id = %record.id,
            transaction_id = %transaction.id,
            amount = %record.amount,
            compliant = record.policy_compliant,
            "refund request created"
        );
        Ok(record)
    }

    pub async fn get_refund_request(&self, request_id: &str) -> Result<RefundRequestRecord> {
        self.refunds
            .get(request_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("refund request", request_id))
    }

    pub async fn refunds_for_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<RefundRequestRecord>> {
        self.refunds.find_by_transaction(transaction_id).await
    }

    pub async fn approve_refund(
        &self,
        request_id: &str,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<RefundRequestRecord> {
        let reviewer = reviewer.to_string();
        let notes = notes.map(str::to_string);
        let record = self
            .refunds
            .update(
                request_id,
                Box::new(move |request| request.approve(&reviewer, notes.as_deref(), Utc::now())),
            )
            .await?;
        tracing::info!(refund_id = %record.id, reviewer = ?record.reviewed_by, "refund approved");
        Ok(record)
    }

    pub async fn reject_refund(
        &self,
        request_id: &str,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<RefundRequestRecord> {
        let reviewer = reviewer.to_string();
        let notes = notes.map(str::to_string);
        let record = self
            .refunds
            .update(
                request_id,
                Box::new(move |request| request.reject(&reviewer, notes.as_deref(), Utc::now())),
            )
            .await?;
        tracing::info!(refund_id = %record.id, reviewer = ?record.reviewed_by, "refund rejected");
        Ok(record)
    }

    /// Records the refund transaction produced by the external payment flow
    /// against an approved request. Hard-blocked while the transaction
    /// still has a live escrow; that money must come back through the
    /// escrow dispute process instead.
    pub async fn process_refund(
        &self,
        request_id: &str,
        refund_transaction_id: &str,
    ) -> Result<RefundRequestRecord> {
        let request = self.get_refund_request(request_id).await?;
        if let Some(live) = self
            .escrows
            .find_by_transaction(&request.transaction_id)
            .await?
            .into_iter()
            .find(|e| !e.status.is_terminal())
        {
            return Err(SettlementError::StateConflict(format!(
                "transaction {} is held in escrow {}; resolve the escrow before processing a refund",
                request.transaction_id, live.id
            )));
        }

        let refund_tx = refund_transaction_id.to_string();
        let record = self
            .refunds
            .update(
                request_id,
                Box::new(move |request| request.mark_processed(&refund_tx, Utc::now())),
            )
            .await?;

        // Best-effort: the refund record is authoritative, the transaction
        // status is a derived flag.
        if let Err(error) = self
            .transactions
            .update(
                &record.transaction_id,
                Box::new(|tx| {
                    tx.status = TransactionStatus::Refunded;
                    Ok(())
                }),
            )
            .await
        {
            tracing::warn!(
                transaction_id = %record.transaction_id,
                %error,
                "failed to flag transaction as refunded"
            );
        }

        tracing::info!(
            refund_id = %record.id,
            refund_transaction_id,
            "refund processed"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::escrow_manager::{CreateEscrowRequest, EscrowManager};
    use crate::config::EscrowPolicy;
    use crate::domain::escrow::{FeePayer, ReleaseCondition};
    use crate::domain::refund::RefundStatus;
    use crate::domain::transaction::TransactionRecord;
    use crate::infrastructure::collaborators::RecordingPayout;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn transaction(id: &str, age_days: i64) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            order_id: format!("ORD-{id}"),
            buyer_id: "buyer-1".to_string(),
            vendor_id: "vendor-1".to_string(),
            amount: dec!(25000.00),
            currency: "INR".to_string(),
            status: TransactionStatus::Completed,
            completed_at: Some(Utc::now() - Duration::days(age_days)),
            description: LocalizedText::new(),
            created_at: Utc::now() - Duration::days(age_days),
            escrow_id: None,
            escrow_conditions: None,
            credit_terms_id: None,
        }
    }

    async fn engine_with(transactions: &[TransactionRecord]) -> (RefundEngine, InMemoryLedger) {
        let ledger = InMemoryLedger::new();
        for tx in transactions {
            ledger.insert_transaction(tx.clone()).await.unwrap();
        }
        let engine = RefundEngine::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            RefundPolicy::default(),
        );
        (engine, ledger)
    }

    fn request(transaction_id: &str, reason: RefundReason) -> CreateRefundRequest {
        CreateRefundRequest {
            transaction_id: transaction_id.to_string(),
            requester_id: "buyer-1".to_string(),
            amount: dec!(25000.00),
            reason,
            description: LocalizedText::new(),
            documents: vec![],
        }
    }

    #[tokio::test]
    async fn test_quality_issue_has_no_return_window() {
        let tx = transaction("TXN_000000000001", 30);
        let (engine, _) = engine_with(std::slice::from_ref(&tx)).await;

        let record = engine
            .create_refund_request(request(&tx.id, RefundReason::QualityIssue))
            .await
            .unwrap();
        assert!(record.policy_compliant);
        assert_eq!(record.status, RefundStatus::Pending);
    }

    #[tokio::test]
    async fn test_late_cancellation_flagged_not_rejected() {
        let tx = transaction("TXN_000000000002", 10);
        let (engine, _) = engine_with(std::slice::from_ref(&tx)).await;

        let record = engine
            .create_refund_request(request(&tx.id, RefundReason::OrderCancelled))
            .await
            .unwrap();
        assert!(!record.policy_compliant);
        assert_eq!(record.status, RefundStatus::Pending);
        assert!(record.policy_violations[0].contains("return window"));
    }

    #[tokio::test]
    async fn test_timely_cancellation_compliant() {
        let tx = transaction("TXN_000000000003", 2);
        let (engine, _) = engine_with(std::slice::from_ref(&tx)).await;

        let record = engine
            .create_refund_request(request(&tx.id, RefundReason::OrderCancelled))
            .await
            .unwrap();
        assert!(record.policy_compliant);
    }

    #[tokio::test]
    async fn test_amount_above_transaction_rejected() {
        let tx = transaction("TXN_000000000004", 1);
        let (engine, _) = engine_with(std::slice::from_ref(&tx)).await;

        let mut req = request(&tx.id, RefundReason::Other);
        req.amount = dec!(25000.01);
        let err = engine.create_refund_request(req).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn test_escrowed_transaction_directed_to_dispute() {
        let tx = transaction("TXN_000000000005", 1);
        let (engine, ledger) = engine_with(std::slice::from_ref(&tx)).await;
        let escrow_manager = EscrowManager::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(RecordingPayout::new()),
            EscrowPolicy::default(),
        );
        escrow_manager
            .create_escrow(CreateEscrowRequest {
                transaction_id: tx.id.clone(),
                conditions: vec![ReleaseCondition::DeliveryConfirmation],
                milestones: None,
                auto_release_days: 14,
                fee_percentage: dec!(1.0),
                fee_payer: FeePayer::Buyer,
            })
            .await
            .unwrap();

        let record = engine
            .create_refund_request(request(&tx.id, RefundReason::QualityIssue))
            .await
            .unwrap();
        assert!(!record.policy_compliant);
        assert!(record.policy_violations[0].contains("escrow dispute process"));

        // Approval is still a human call; processing is hard-blocked.
        engine
            .approve_refund(&record.id, "admin-1", None)
            .await
            .unwrap();
        let err = engine
            .process_refund(&record.id, "TXN_ffeeddccbbaa")
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_full_refund_lifecycle() {
        let tx = transaction("TXN_000000000006", 1);
        let (engine, ledger) = engine_with(std::slice::from_ref(&tx)).await;

        let record = engine
            .create_refund_request(request(&tx.id, RefundReason::DamagedGoods))
            .await
            .unwrap();
        engine
            .approve_refund(&record.id, "admin-1", Some("photos verified"))
            .await
            .unwrap();
        let processed = engine
            .process_refund(&record.id, "TXN_ffeeddccbbaa")
            .await
            .unwrap();
        assert_eq!(processed.status, RefundStatus::Processed);
        assert_eq!(
            processed.refund_transaction_id.as_deref(),
            Some("TXN_ffeeddccbbaa")
        );

        let stored_tx = ledger.get_transaction(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored_tx.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn test_rejected_request_cannot_be_processed() {
        let tx = transaction("TXN_000000000007", 1);
        let (engine, _) = engine_with(std::slice::from_ref(&tx)).await;

        let record = engine
            .create_refund_request(request(&tx.id, RefundReason::Other))
            .await
            .unwrap();
        engine
            .reject_refund(&record.id, "admin-1", Some("no supporting documents"))
            .await
            .unwrap();
        let err = engine
            .process_refund(&record.id, "TXN_ffeeddccbbaa")
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::StateConflict(_)));
    }
}
