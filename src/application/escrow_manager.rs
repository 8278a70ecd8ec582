use crate::config::EscrowPolicy;
use crate::domain::escrow::{
    EscrowRecord, EscrowStatus, FeePayer, Milestone, ReleaseCondition,
};
use crate::domain::money::Amount;
use crate::domain::ports::{
    EscrowStoreBox, PayoutServiceBox, TransactionStoreBox, TransferReceipt, TransferStatus,
    UpdateFn,
};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone)]
pub struct CreateEscrowRequest {
    pub transaction_id: String,
    #[serde(default)]
    pub conditions: Vec<ReleaseCondition>,
    #[serde(default)]
    pub milestones: Option<Vec<Milestone>>,
    pub auto_release_days: u32,
    pub fee_percentage: Decimal,
    pub fee_payer: FeePayer,
}

/// What a completed release looks like to the caller. The payout receipt is
/// embedded so the transfer is auditable alongside the ledger change.
#[derive(Debug, Serialize, Clone)]
pub struct ReleaseOutcome {
    pub escrow_id: String,
    pub amount_released: Decimal,
    pub remaining_amount: Decimal,
    pub new_status: EscrowStatus,
    pub transfer: TransferReceipt,
}

/// Tally of one auto-release sweep pass.
#[derive(Debug, Default, Serialize, PartialEq, Eq, Clone)]
pub struct SweepOutcome {
    pub released: u32,
    pub expired: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Creates and mutates escrow holds over transaction funds.
///
/// Releases are two-phase: an atomic reservation on the escrow record, then
/// the payout call, then an atomic commit. The ledger only records moved
/// money after the payout is confirmed; a failed or timed-out payout rolls
/// the reservation back and leaves the totals untouched.
pub struct EscrowManager {
    transactions: TransactionStoreBox,
    escrows: EscrowStoreBox,
    payouts: PayoutServiceBox,
    policy: EscrowPolicy,
}

impl EscrowManager {
    pub fn new(
        transactions: TransactionStoreBox,
        escrows: EscrowStoreBox,
        payouts: PayoutServiceBox,
        policy: EscrowPolicy,
    ) -> Self {
        Self {
            transactions,
            escrows,
            payouts,
            policy,
        }
    }

    pub async fn create_escrow(&self, request: CreateEscrowRequest) -> Result<EscrowRecord> {
        let transaction = self
            .transactions
            .get(&request.transaction_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("transaction", &request.transaction_id))?;
        if !transaction.is_completed() {
            return Err(SettlementError::StateConflict(format!(
                "transaction {} is not completed",
                transaction.id
            )));
        }
        if transaction.amount < self.policy.minimum_amount {
            return Err(SettlementError::Eligibility(format!(
                "amount {} too low for escrow, minimum is {}",
                transaction.amount, self.policy.minimum_amount
            )));
        }
        let existing = self.escrows.find_by_transaction(&transaction.id).await?;
        if let Some(live) = existing.iter().find(|e| !e.status.is_terminal()) {
            return Err(SettlementError::StateConflict(format!(
                "transaction {} already has escrow {} in status {}",
                transaction.id, live.id, live.status
            )));
        }

        let escrow = EscrowRecord::open(
            &transaction,
            request.conditions.clone(),
            request.milestones,
            request.auto_release_days,
            request.fee_percentage,
            request.fee_payer,
            Utc::now(),
        )?;
        self.escrows.insert(escrow.clone()).await?;

        // The escrow write is authoritative; the back-reference on the
        // transaction is best-effort and reconcilable later.
        let escrow_id = escrow.id.clone();
        let conditions = request.conditions;
        if let Err(error) = self
            .transactions
            .update(
                &transaction.id,
                Box::new(move |tx| {
                    tx.escrow_id = Some(escrow_id);
                    tx.escrow_conditions = Some(conditions);
                    Ok(())
                }),
            )
            .await
        {
            tracing::warn!(
                transaction_id = %transaction.id,
                %error,
                "failed to back-reference escrow on transaction"
            );
        }

        tracing::info!(
            escrow_id = %escrow.id,
            transaction_id = %transaction.id,
            amount = %escrow.original_amount,
            fee = %escrow.fee_amount,
            "escrow created"
        );
        Ok(escrow)
    }

    pub async fn get_escrow(&self, escrow_id: &str) -> Result<EscrowRecord> {
        self.escrows
            .get(escrow_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("escrow", escrow_id))
    }

    /// The escrow currently anchored to a transaction: the live one if any,
    /// otherwise the most recently created.
    pub async fn escrow_for_transaction(&self, transaction_id: &str) -> Result<EscrowRecord> {
        let mut found = self.escrows.find_by_transaction(transaction_id).await?;
        if let Some(live) = found.iter().find(|e| !e.status.is_terminal()) {
            return Ok(live.clone());
        }
        found.sort_by_key(|e| e.created_at);
        found
            .pop()
            .ok_or_else(|| SettlementError::not_found("escrow for transaction", transaction_id))
    }

    /// Releases funds to the vendor. `amount = None` releases the full
    /// remaining balance, resolved against the freshly read record.
    pub async fn release_funds(
        &self,
        escrow_id: &str,
        amount: Option<Decimal>,
        reason: &str,
        actor: &str,
    ) -> Result<ReleaseOutcome> {
        let amount = amount.map(Amount::new).transpose()?.map(Decimal::from);
        let reason = reason.to_string();
        let actor = actor.to_string();
        let now = Utc::now();
        self.execute_release(
            escrow_id,
            Box::new(move |escrow| {
                let amount = amount.unwrap_or(escrow.remaining_amount);
                escrow.reserve_release(amount, &reason, &actor, now)
            }),
        )
        .await
    }

    /// Releases the amount owed for one named milestone. The milestone is
    /// resolved against the freshly read record, so a concurrent release of
    /// the same milestone loses with a state conflict instead of paying out
    /// twice.
    pub async fn release_milestone(
        &self,
        escrow_id: &str,
        milestone_name: &str,
        actor: &str,
    ) -> Result<ReleaseOutcome> {
        let name = milestone_name.to_string();
        let actor = actor.to_string();
        let now = Utc::now();
        self.execute_release(
            escrow_id,
            Box::new(move |escrow| {
                let amount = escrow.milestone_amount(&name)?;
                escrow.reserve_release(amount, &EscrowRecord::milestone_reason(&name), &actor, now)
            }),
        )
        .await
    }

    async fn execute_release(
        &self,
        escrow_id: &str,
        reserve: UpdateFn<EscrowRecord>,
    ) -> Result<ReleaseOutcome> {
        let reserved = self.escrows.update(escrow_id, reserve).await?;
        let pending = reserved.pending_release.clone().ok_or_else(|| {
            SettlementError::Storage(format!(
                "release reservation missing on escrow {escrow_id} after update"
            ))
        })?;

        match self
            .attempt_payout(&reserved.vendor_id, pending.amount, &reserved.currency)
            .await
        {
            Ok(receipt) => {
                let transfer_id = receipt.transfer_id.clone();
                let committed = self
                    .escrows
                    .update(
                        escrow_id,
                        Box::new(move |escrow| {
                            escrow.commit_release(&transfer_id, Utc::now()).map(drop)
                        }),
                    )
                    .await?;
                tracing::info!(
                    escrow_id = %committed.id,
                    amount = %pending.amount,
                    remaining = %committed.remaining_amount,
                    status = %committed.status,
                    transfer_id = %receipt.transfer_id,
                    reason = %pending.reason,
                    "escrow funds released"
                );
                Ok(ReleaseOutcome {
                    escrow_id: committed.id.clone(),
                    amount_released: pending.amount,
                    remaining_amount: committed.remaining_amount,
                    new_status: committed.status,
                    transfer: receipt,
                })
            }
            Err(error) => {
                if let Err(rollback_error) = self
                    .escrows
                    .update(
                        escrow_id,
                        Box::new(|escrow| escrow.abort_release(Utc::now()).map(drop)),
                    )
                    .await
                {
                    tracing::error!(
                        escrow_id,
                        %rollback_error,
                        "failed to roll back release reservation"
                    );
                }
                Err(error)
            }
        }
    }

    async fn attempt_payout(
        &self,
        recipient_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<TransferReceipt> {
        let timeout = std::time::Duration::from_secs(self.policy.payout_timeout_secs);
        let mut last_error = SettlementError::External("payout never attempted".to_string());
        for attempt in 1..=self.policy.payout_attempts {
            match tokio::time::timeout(timeout, self.payouts.transfer(recipient_id, amount, currency))
                .await
            {
                Ok(Ok(receipt)) if receipt.status != TransferStatus::Failed => return Ok(receipt),
                Ok(Ok(receipt)) => {
                    last_error = SettlementError::External(format!(
                        "transfer {} reported failed",
                        receipt.transfer_id
                    ));
                }
                Ok(Err(error)) => last_error = error,
                Err(_) => {
                    last_error = SettlementError::External(format!(
                        "payout timed out after {}s",
                        self.policy.payout_timeout_secs
                    ));
                }
            }
            tracing::warn!(attempt, recipient_id, %last_error, "payout attempt failed");
        }
        Err(last_error)
    }

    pub async fn raise_dispute(
        &self,
        escrow_id: &str,
        raised_by: &str,
        details: &str,
    ) -> Result<EscrowRecord> {
        let raiser = raised_by.to_string();
        let details = details.to_string();
        let window = self.policy.dispute_window_days;
        let escrow = self
            .escrows
            .update(
                escrow_id,
                Box::new(move |escrow| escrow.raise_dispute(&raiser, &details, window, Utc::now())),
            )
            .await?;
        tracing::info!(escrow_id = %escrow.id, raised_by, "escrow disputed");
        Ok(escrow)
    }

    pub async fn resolve_dispute(
        &self,
        escrow_id: &str,
        resolved_by: &str,
        notes: &str,
    ) -> Result<EscrowRecord> {
        let resolved_by = resolved_by.to_string();
        let notes = notes.to_string();
        let escrow = self
            .escrows
            .update(
                escrow_id,
                Box::new(move |escrow| escrow.resolve_dispute(&resolved_by, &notes, Utc::now())),
            )
            .await?;
        tracing::info!(escrow_id = %escrow.id, status = %escrow.status, "escrow dispute resolved");
        Ok(escrow)
    }

    pub async fn cancel_escrow(&self, escrow_id: &str, actor: &str) -> Result<EscrowRecord> {
        let escrow = self
            .escrows
            .update(escrow_id, Box::new(|escrow| escrow.cancel(Utc::now())))
            .await?;
        tracing::info!(escrow_id = %escrow.id, actor, "escrow cancelled");
        Ok(escrow)
    }

    /// Clears a release reservation left behind by a crashed process.
    /// Refuses while the reservation is young enough that its payout could
    /// still be in flight.
    pub async fn abort_stale_reservation(&self, escrow_id: &str) -> Result<EscrowRecord> {
        let deadline = chrono::Duration::seconds(
            (self.policy.payout_timeout_secs * u64::from(self.policy.payout_attempts)) as i64,
        );
        let escrow = self
            .escrows
            .update(
                escrow_id,
                Box::new(move |escrow| {
                    let now = Utc::now();
                    let pending = escrow.pending_release.as_ref().ok_or_else(|| {
                        SettlementError::StateConflict(format!(
                            "no release in flight for escrow {}",
                            escrow.id
                        ))
                    })?;
                    if now < pending.reserved_at + deadline {
                        return Err(SettlementError::StateConflict(format!(
                            "release reservation on escrow {} may still be in flight",
                            escrow.id
                        )));
                    }
                    escrow.abort_release(now).map(drop)
                }),
            )
            .await?;
        tracing::warn!(escrow_id = %escrow.id, "stale release reservation cleared");
        Ok(escrow)
    }

    /// Releases every live escrow past its auto-release date. Safe to run
    /// concurrently with user operations: each mutation re-validates under
    /// the per-record update, and a benign race counts as skipped. Escrows
    /// whose payout keeps failing past the expiry grace window are marked
    /// EXPIRED and retried no further.
    pub async fn sweep_auto_release(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        for escrow in self.escrows.find_live().await? {
            if escrow.auto_release_at > now {
                continue;
            }
            let result = self
                .execute_release(
                    &escrow.id,
                    Box::new(move |e| {
                        let amount = e.remaining_amount;
                        e.reserve_release(amount, "auto_release", "system", now)
                    }),
                )
                .await;
            match result {
                Ok(_) => outcome.released += 1,
                Err(SettlementError::StateConflict(reason)) => {
                    tracing::debug!(escrow_id = %escrow.id, %reason, "auto-release skipped");
                    outcome.skipped += 1;
                }
                Err(SettlementError::External(reason)) => {
                    let expiry = escrow.auto_release_at
                        + chrono::Duration::days(self.policy.expiry_grace_days);
                    if now >= expiry {
                        match self
                            .escrows
                            .update(&escrow.id, Box::new(move |e| e.mark_expired(now)))
                            .await
                        {
                            Ok(_) => {
                                tracing::warn!(
                                    escrow_id = %escrow.id,
                                    %reason,
                                    "escrow expired after repeated payout failures"
                                );
                                outcome.expired += 1;
                            }
                            Err(error) => {
                                tracing::error!(escrow_id = %escrow.id, %error, "expiry failed");
                                outcome.failed += 1;
                            }
                        }
                    } else {
                        tracing::warn!(escrow_id = %escrow.id, %reason, "auto-release payout failed");
                        outcome.failed += 1;
                    }
                }
                Err(error) => {
                    tracing::error!(escrow_id = %escrow.id, %error, "auto-release errored");
                    outcome.failed += 1;
                }
            }
        }
        tracing::info!(
            released = outcome.released,
            expired = outcome.expired,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "auto-release sweep complete"
        );
        Ok(outcome)
    }
}
