use crate::application::credit_scheduler::{CreateCreditTermsRequest, CreditScheduler};
use crate::application::escrow_manager::{CreateEscrowRequest, EscrowManager};
use crate::application::refund_engine::{CreateRefundRequest, RefundEngine};
use crate::application::reminder_scheduler::ReminderScheduler;
use crate::domain::refund::{RefundRequestRecord, RefundStatus};
use crate::domain::reminder::ReminderChannel;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;

/// One settlement operation, tagged by `op`, one JSON object per line.
///
/// Operations address records through their transaction id: batch files
/// are written before the engine generates escrow, credit or refund ids,
/// so those can never appear in one.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SettlementOp {
    CreateEscrow(CreateEscrowRequest),
    ReleaseFunds {
        transaction_id: String,
        #[serde(default)]
        amount: Option<Decimal>,
        reason: String,
        actor: String,
    },
    ReleaseMilestone {
        transaction_id: String,
        milestone: String,
        actor: String,
    },
    RaiseDispute {
        transaction_id: String,
        raised_by: String,
        details: String,
    },
    ResolveDispute {
        transaction_id: String,
        resolved_by: String,
        notes: String,
    },
    CancelEscrow {
        transaction_id: String,
        actor: String,
    },
    CreateCreditTerms(CreateCreditTermsRequest),
    RecordPayment {
        transaction_id: String,
        installment_number: u32,
        amount: Decimal,
        #[serde(default)]
        paid_at: Option<DateTime<Utc>>,
    },
    CancelCreditTerms {
        transaction_id: String,
        actor: String,
    },
    CreateReminder {
        transaction_id: String,
        channel: ReminderChannel,
        days_before_due: i64,
        #[serde(default)]
        language: Option<String>,
    },
    AcknowledgeReminder {
        transaction_id: String,
    },
    CreateRefundRequest(CreateRefundRequest),
    ApproveRefund {
        transaction_id: String,
        reviewer: String,
        #[serde(default)]
        notes: Option<String>,
    },
    RejectRefund {
        transaction_id: String,
        reviewer: String,
        #[serde(default)]
        notes: Option<String>,
    },
    ProcessRefund {
        transaction_id: String,
        refund_transaction_id: String,
    },
}

/// Reads newline-delimited JSON operations, skipping blank lines. Yields
/// lazily so a bad line surfaces as an error without stopping the stream.
pub fn read_ops<R: BufRead>(source: R) -> impl Iterator<Item = Result<SettlementOp>> {
    source.lines().filter_map(|line| match line {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(serde_json::from_str(&text).map_err(SettlementError::from)),
        Err(e) => Some(Err(SettlementError::from(e))),
    })
}

/// Dispatches parsed operations to the four managers.
pub struct SettlementOps<'a> {
    escrows: &'a EscrowManager,
    credits: &'a CreditScheduler,
    reminders: &'a ReminderScheduler,
    refunds: &'a RefundEngine,
}

impl<'a> SettlementOps<'a> {
    pub fn new(
        escrows: &'a EscrowManager,
        credits: &'a CreditScheduler,
        reminders: &'a ReminderScheduler,
        refunds: &'a RefundEngine,
    ) -> Self {
        Self {
            escrows,
            credits,
            reminders,
            refunds,
        }
    }

    pub async fn apply(&self, op: SettlementOp) -> Result<()> {
        match op {
            SettlementOp::CreateEscrow(request) => {
                self.escrows.create_escrow(request).await?;
            }
            SettlementOp::ReleaseFunds {
                transaction_id,
                amount,
                reason,
                actor,
            } => {
                let escrow = self.escrows.escrow_for_transaction(&transaction_id).await?;
                self.escrows
                    .release_funds(&escrow.id, amount, &reason, &actor)
                    .await?;
            }
            SettlementOp::ReleaseMilestone {
                transaction_id,
                milestone,
                actor,
            } => {
                let escrow = self.escrows.escrow_for_transaction(&transaction_id).await?;
                self.escrows
                    .release_milestone(&escrow.id, &milestone, &actor)
                    .await?;
            }
            SettlementOp::RaiseDispute {
                transaction_id,
                raised_by,
                details,
            } => {
                let escrow = self.escrows.escrow_for_transaction(&transaction_id).await?;
                self.escrows
                    .raise_dispute(&escrow.id, &raised_by, &details)
                    .await?;
            }
            SettlementOp::ResolveDispute {
                transaction_id,
                resolved_by,
                notes,
            } => {
                let escrow = self.escrows.escrow_for_transaction(&transaction_id).await?;
                self.escrows
                    .resolve_dispute(&escrow.id, &resolved_by, &notes)
                    .await?;
            }
            SettlementOp::CancelEscrow {
                transaction_id,
                actor,
            } => {
                let escrow = self.escrows.escrow_for_transaction(&transaction_id).await?;
                self.escrows.cancel_escrow(&escrow.id, &actor).await?;
            }
            SettlementOp::CreateCreditTerms(request) => {
                self.credits.create_credit_terms(request).await?;
            }
            SettlementOp::RecordPayment {
                transaction_id,
                installment_number,
                amount,
                paid_at,
            } => {
                let credit = self.credits.credit_for_transaction(&transaction_id).await?;
                self.credits
                    .record_payment(
                        &credit.id,
                        installment_number,
                        amount,
                        paid_at.unwrap_or_else(Utc::now),
                    )
                    .await?;
            }
            SettlementOp::CancelCreditTerms {
                transaction_id,
                actor,
            } => {
                let credit = self.credits.credit_for_transaction(&transaction_id).await?;
                self.credits.cancel_credit_terms(&credit.id, &actor).await?;
            }
            SettlementOp::CreateReminder {
                transaction_id,
                channel,
                days_before_due,
                language,
            } => {
                let credit = self.credits.credit_for_transaction(&transaction_id).await?;
                self.reminders
                    .create_reminder(&credit.id, channel, days_before_due, language.as_deref())
                    .await?;
            }
            SettlementOp::AcknowledgeReminder { transaction_id } => {
                let reminder = self
                    .reminders
                    .reminder_for_transaction(&transaction_id)
                    .await?;
                self.reminders.acknowledge(&reminder.id).await?;
            }
            SettlementOp::CreateRefundRequest(request) => {
                self.refunds.create_refund_request(request).await?;
            }
            SettlementOp::ApproveRefund {
                transaction_id,
                reviewer,
                notes,
            } => {
                let request = self
                    .refund_in_status(&transaction_id, RefundStatus::Pending)
                    .await?;
                self.refunds
                    .approve_refund(&request.id, &reviewer, notes.as_deref())
                    .await?;
            }
            SettlementOp::RejectRefund {
                transaction_id,
                reviewer,
                notes,
            } => {
                let request = self
                    .refund_in_status(&transaction_id, RefundStatus::Pending)
                    .await?;
                self.refunds
                    .reject_refund(&request.id, &reviewer, notes.as_deref())
                    .await?;
            }
            SettlementOp::ProcessRefund {
                transaction_id,
                refund_transaction_id,
            } => {
                let request = self
                    .refund_in_status(&transaction_id, RefundStatus::Approved)
                    .await?;
                self.refunds
                    .process_refund(&request.id, &refund_transaction_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// The transaction's most recent refund request in `status`.
    async fn refund_in_status(
        &self,
        transaction_id: &str,
        status: RefundStatus,
    ) -> Result<RefundRequestRecord> {
        self.refunds
            .refunds_for_transaction(transaction_id)
            .await?
            .into_iter()
            .filter(|r| r.status == status)
            .max_by_key(|r| r.created_at)
            .ok_or_else(|| {
                SettlementError::NotFound(format!(
                    "refund request for transaction {transaction_id} in {status:?}"
                ))
            })
    }
}
