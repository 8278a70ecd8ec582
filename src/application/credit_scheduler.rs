use crate::config::CreditPolicy;
use crate::domain::credit::{self, CreditTermsRecord};
use crate::domain::money::Amount;
use crate::domain::ports::{CreditStoreBox, RelationshipHistoryBox, TransactionStoreBox};
use crate::domain::transaction::TransactionStatus;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone)]
pub struct CreateCreditTermsRequest {
    pub transaction_id: String,
    pub credit_period_days: u32,
    pub installment_count: u32,
    #[serde(default)]
    pub interest_rate: Option<Decimal>,
    #[serde(default)]
    pub late_fee_rate: Option<Decimal>,
}

/// Tally of one overdue sweep pass.
#[derive(Debug, Default, Serialize, PartialEq, Eq, Clone)]
pub struct OverdueSweepOutcome {
    pub examined: u32,
    pub marked_overdue: u32,
    pub defaulted: u32,
}

/// Evaluates credit eligibility, generates installment schedules and tracks
/// payment and overdue state.
///
/// Eligibility inputs come from the relationship-history collaborator and
/// are snapshotted onto the record at creation; later score changes never
/// rewrite an existing arrangement.
pub struct CreditScheduler {
    transactions: TransactionStoreBox,
    credits: CreditStoreBox,
    relationships: RelationshipHistoryBox,
    policy: CreditPolicy,
}

impl CreditScheduler {
    pub fn new(
        transactions: TransactionStoreBox,
        credits: CreditStoreBox,
        relationships: RelationshipHistoryBox,
        policy: CreditPolicy,
    ) -> Self {
        Self {
            transactions,
            credits,
            relationships,
            policy,
        }
    }

    pub async fn create_credit_terms(
        &self,
        request: CreateCreditTermsRequest,
    ) -> Result<CreditTermsRecord> {
        let transaction = self
            .transactions
            .get(&request.transaction_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("transaction", &request.transaction_id))?;
        if transaction.status == TransactionStatus::Refunded {
            return Err(SettlementError::StateConflict(format!(
                "transaction {} was refunded",
                transaction.id
            )));
        }
        let existing = self.credits.find_by_transaction(&transaction.id).await?;
        if let Some(live) = existing.iter().find(|c| !c.status.is_terminal()) {
            return Err(SettlementError::StateConflict(format!(
                "transaction {} already has credit terms {} in status {}",
                transaction.id, live.id, live.status
            )));
        }

        let months = self
            .relationships
            .duration_months(&transaction.buyer_id, &transaction.vendor_id)
            .await?;
        if months < self.policy.min_relationship_months {
            return Err(SettlementError::Eligibility(format!(
                "insufficient trading history: {months} months with this vendor, minimum is {}",
                self.policy.min_relationship_months
            )));
        }
        let score = self
            .relationships
            .credit_score(&transaction.buyer_id)
            .await?;
        if score < self.policy.min_credit_score {
            return Err(SettlementError::Eligibility(format!(
                "credit score {score:.2} below minimum {:.2}",
                self.policy.min_credit_score
            )));
        }

        let record = CreditTermsRecord::open(
            &transaction,
            request.credit_period_days,
            request.installment_count,
            request.interest_rate,
            request.late_fee_rate,
            months,
            score,
            Utc::now(),
        )?;
        self.credits.insert(record.clone()).await?;

        // The credit write is authoritative; the back-reference on the
        // transaction is best-effort and reconcilable later.
        let credit_id = record.id.clone();
        if let Err(error) = self
            .transactions
            .update(
                &transaction.id,
                Box::new(move |tx| {
                    tx.credit_terms_id = Some(credit_id);
                    Ok(())
                }),
            )
            .await
        {
            tracing::warn!(
                transaction_id = %transaction.id,
                %error,
                "failed to back-reference credit terms on transaction"
            );
        }

        tracing::info!(
            credit_id = %record.id,
            transaction_id = %transaction.id,
            total = %record.total_due(),
            installments = record.installment_count,
            "credit terms created"
        );
        Ok(record)
    }

    pub async fn get_credit_terms(&self, credit_id: &str) -> Result<CreditTermsRecord> {
        self.credits
            .get(credit_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("credit terms", credit_id))
    }

    /// The credit terms currently anchored to a transaction: the live one
    /// if any, otherwise the most recently created.
    pub async fn credit_for_transaction(&self, transaction_id: &str) -> Result<CreditTermsRecord> {
        let mut found = self.credits.find_by_transaction(transaction_id).await?;
        if let Some(live) = found.iter().find(|c| !c.status.is_terminal()) {
            return Ok(live.clone());
        }
        found.sort_by_key(|c| c.created_at);
        found.pop().ok_or_else(|| {
            SettlementError::not_found("credit terms for transaction", transaction_id)
        })
    }

    pub async fn record_payment(
        &self,
        credit_id: &str,
        installment_number: u32,
        amount: Decimal,
        paid_at: DateTime<Utc>,
    ) -> Result<CreditTermsRecord> {
        let amount = Amount::new(amount)?.value();
        let record = self
            .credits
            .update(
                credit_id,
                Box::new(move |credit| {
                    credit
                        .apply_payment(installment_number, amount, paid_at)
                        .map(drop)
                }),
            )
            .await?;
        tracing::info!(
            credit_id = %record.id,
            installment_number,
            %amount,
            remaining = %record.remaining_amount,
            status = %record.status,
            "installment paid"
        );
        Ok(record)
    }

    pub async fn recompute_overdue(
        &self,
        credit_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CreditTermsRecord> {
        let grace = self.policy.overdue_grace_days;
        let default_after = self.policy.default_after_days;
        let record = self
            .credits
            .update(
                credit_id,
                Box::new(move |credit| credit.refresh_overdue(now, grace, default_after)),
            )
            .await?;
        Ok(record)
    }

    /// Recomputes overdue state across every live record. Driven by an
    /// external scheduler; idempotent and safe to run alongside payments.
    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> Result<OverdueSweepOutcome> {
        let mut outcome = OverdueSweepOutcome::default();
        for record in self.credits.find_live().await? {
            outcome.examined += 1;
            let before = record.status;
            match self.recompute_overdue(&record.id, now).await {
                Ok(updated) => {
                    if updated.status != before {
                        match updated.status {
                            credit::CreditStatus::Overdue => {
                                tracing::warn!(
                                    credit_id = %updated.id,
                                    overdue = %updated.overdue_amount,
                                    days = updated.overdue_days,
                                    "credit terms overdue"
                                );
                                outcome.marked_overdue += 1;
                            }
                            credit::CreditStatus::Defaulted => {
                                tracing::warn!(
                                    credit_id = %updated.id,
                                    overdue = %updated.overdue_amount,
                                    days = updated.overdue_days,
                                    "credit terms defaulted"
                                );
                                outcome.defaulted += 1;
                            }
                            _ => {}
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(credit_id = %record.id, %error, "overdue recompute errored");
                }
            }
        }
        tracing::info!(
            examined = outcome.examined,
            marked_overdue = outcome.marked_overdue,
            defaulted = outcome.defaulted,
            "overdue sweep complete"
        );
        Ok(outcome)
    }

    pub async fn cancel_credit_terms(&self, credit_id: &str, actor: &str) -> Result<CreditTermsRecord> {
        let record = self
            .credits
            .update(credit_id, Box::new(|credit| credit.cancel(Utc::now())))
            .await?;
        tracing::info!(credit_id = %record.id, actor, "credit terms cancelled");
        Ok(record)
    }

    /// Score a buyer from their stored credit history. Purely derived;
    /// nothing is written back.
    pub async fn score_buyer(&self, buyer_id: &str) -> Result<f64> {
        let history = self.credits.find_by_buyer(buyer_id).await?;
        Ok(credit::derive_credit_score(&history))
    }
}
