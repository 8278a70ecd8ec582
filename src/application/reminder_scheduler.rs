use crate::config::ReminderPolicy;
use crate::domain::ports::{CreditStoreBox, NotificationDeliveryBox, ReminderStoreBox};
use crate::domain::reminder::{DeliveryStatus, ReminderChannel, ReminderRecord};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Tally of one dispatch pass.
#[derive(Debug, Default, Serialize, PartialEq, Eq, Clone)]
pub struct DispatchOutcome {
    pub sent: u32,
    pub failed: u32,
}

/// Derives due-date reminders from active credit terms and hands them to
/// the delivery collaborator when their scheduled time arrives.
pub struct ReminderScheduler {
    credits: CreditStoreBox,
    reminders: ReminderStoreBox,
    delivery: NotificationDeliveryBox,
    policy: ReminderPolicy,
}

impl ReminderScheduler {
    pub fn new(
        credits: CreditStoreBox,
        reminders: ReminderStoreBox,
        delivery: NotificationDeliveryBox,
        policy: ReminderPolicy,
    ) -> Self {
        Self {
            credits,
            reminders,
            delivery,
            policy,
        }
    }

    /// Builds and stores a reminder for the credit record's next unpaid
    /// installment. Nothing is delivered here.
    pub async fn create_reminder(
        &self,
        credit_id: &str,
        channel: ReminderChannel,
        days_before_due: i64,
        language: Option<&str>,
    ) -> Result<ReminderRecord> {
        let credit = self
            .credits
            .get(credit_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("credit terms", credit_id))?;
        let reminder = ReminderRecord::compose(
            &credit,
            channel,
            days_before_due,
            language,
            &self.policy.default_language,
            Utc::now(),
        )?;
        self.reminders.insert(reminder.clone()).await?;
        tracing::info!(
            reminder_id = %reminder.id,
            credit_id = %credit.id,
            channel = %reminder.channel,
            due = %reminder.due_date,
            scheduled = %reminder.scheduled_at,
            "reminder created"
        );
        Ok(reminder)
    }

    pub async fn get_reminder(&self, reminder_id: &str) -> Result<ReminderRecord> {
        self.reminders
            .get(reminder_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("reminder", reminder_id))
    }

    /// The most recently created reminder tied to a transaction.
    pub async fn reminder_for_transaction(&self, transaction_id: &str) -> Result<ReminderRecord> {
        let mut found = self.reminders.find_by_transaction(transaction_id).await?;
        found.sort_by_key(|r| r.created_at);
        found
            .pop()
            .ok_or_else(|| SettlementError::not_found("reminder for transaction", transaction_id))
    }

    /// Hands every unsent reminder whose scheduled time has arrived to the
    /// delivery collaborator. A failed delivery leaves the record unsent so
    /// the next pass retries it.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let timeout = std::time::Duration::from_secs(self.policy.delivery_timeout_secs);
        let mut outcome = DispatchOutcome::default();
        for reminder in self.reminders.find_due(now).await? {
            let delivery = match tokio::time::timeout(timeout, self.delivery.deliver(&reminder))
                .await
            {
                Ok(Ok(status)) if status != DeliveryStatus::Failed => Ok(status),
                Ok(Ok(status)) => Err(SettlementError::External(format!(
                    "delivery of reminder {} reported {status}",
                    reminder.id
                ))),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(SettlementError::External(format!(
                    "delivery of reminder {} timed out after {}s",
                    reminder.id, self.policy.delivery_timeout_secs
                ))),
            };
            match delivery {
                Ok(status) => {
                    let marked = self
                        .reminders
                        .update(
                            &reminder.id,
                            Box::new(move |r| r.mark_sent(status, Utc::now())),
                        )
                        .await;
                    match marked {
                        Ok(_) => {
                            tracing::info!(
                                reminder_id = %reminder.id,
                                %status,
                                "reminder delivered"
                            );
                            outcome.sent += 1;
                        }
                        // A concurrent dispatcher already marked it.
                        Err(SettlementError::StateConflict(reason)) => {
                            tracing::debug!(reminder_id = %reminder.id, %reason, "dispatch raced");
                        }
                        Err(error) => return Err(error),
                    }
                }
                Err(error) => {
                    tracing::warn!(reminder_id = %reminder.id, %error, "reminder delivery failed");
                    outcome.failed += 1;
                }
            }
        }
        tracing::info!(sent = outcome.sent, failed = outcome.failed, "dispatch complete");
        Ok(outcome)
    }

    /// Records the recipient's acknowledgement. Repeats are no-ops.
    pub async fn acknowledge(&self, reminder_id: &str) -> Result<ReminderRecord> {
        let record = self
            .reminders
            .update(
                reminder_id,
                Box::new(|reminder| {
                    reminder.acknowledge(Utc::now());
                    Ok(())
                }),
            )
            .await?;
        tracing::info!(reminder_id = %record.id, "reminder acknowledged");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::credit_scheduler::{CreateCreditTermsRequest, CreditScheduler};
    use crate::config::CreditPolicy;
    use crate::domain::transaction::{LocalizedText, TransactionRecord, TransactionStatus};
    use crate::infrastructure::collaborators::{LoggingNotifier, StaticRelationshipHistory};
    use crate::infrastructure::in_memory::InMemoryLedger;
    use rust_decimal_macros::dec;

    async fn seeded() -> (ReminderScheduler, LoggingNotifier, String) {
        let ledger = InMemoryLedger::new();
        let tx = TransactionRecord {
            id: "TXN_000000000001".to_string(),
            order_id: "ORD-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            vendor_id: "vendor-1".to_string(),
            amount: dec!(30000.00),
            currency: "INR".to_string(),
            status: TransactionStatus::Completed,
            completed_at: Some(Utc::now()),
            description: LocalizedText::new(),
            created_at: Utc::now(),
            escrow_id: None,
            escrow_conditions: None,
            credit_terms_id: None,
        };
        ledger.insert_transaction(tx.clone()).await.unwrap();
        let credit_scheduler = CreditScheduler::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(StaticRelationshipHistory::new(6, 0.85)),
            CreditPolicy::default(),
        );
        let credit = credit_scheduler
            .create_credit_terms(CreateCreditTermsRequest {
                transaction_id: tx.id,
                credit_period_days: 90,
                installment_count: 3,
                interest_rate: None,
                late_fee_rate: None,
            })
            .await
            .unwrap();

        let notifier = LoggingNotifier::new();
        let scheduler = ReminderScheduler::new(
            Box::new(ledger.clone()),
            Box::new(ledger),
            Box::new(notifier.clone()),
            ReminderPolicy::default(),
        );
        (scheduler, notifier, credit.id)
    }

    #[tokio::test]
    async fn test_create_reminder_for_next_installment() {
        let (scheduler, _, credit_id) = seeded().await;
        let reminder = scheduler
            .create_reminder(&credit_id, ReminderChannel::Sms, 3, Some("hi"))
            .await
            .unwrap();
        assert_eq!(reminder.credit_terms_id, credit_id);
        assert_eq!(reminder.recipient_id, "buyer-1");
        assert!(reminder.messages.contains_key("en"));
        assert!(reminder.messages.contains_key("hi"));
        assert!(!reminder.is_sent);
    }

    #[tokio::test]
    async fn test_create_reminder_unknown_credit() {
        let (scheduler, _, _) = seeded().await;
        let err = scheduler
            .create_reminder("CRD_missing00000", ReminderChannel::Sms, 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_sends_due_reminders_only() {
        let (scheduler, notifier, credit_id) = seeded().await;
        // Due immediately: the window is longer than the time to the due date.
        scheduler
            .create_reminder(&credit_id, ReminderChannel::Sms, 365, None)
            .await
            .unwrap();
        // Not due: scheduled three days ahead of a due date a month out.
        scheduler
            .create_reminder(&credit_id, ReminderChannel::Email, 3, None)
            .await
            .unwrap();

        let outcome = scheduler.dispatch_due(Utc::now()).await.unwrap();
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(notifier.delivered().len(), 1);

        // Nothing left to send.
        let again = scheduler.dispatch_due(Utc::now()).await.unwrap();
        assert_eq!(again.sent, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_leaves_reminder_unsent() {
        let (scheduler, notifier, credit_id) = seeded().await;
        let reminder = scheduler
            .create_reminder(&credit_id, ReminderChannel::Sms, 365, None)
            .await
            .unwrap();

        notifier.set_failing(true);
        let outcome = scheduler.dispatch_due(Utc::now()).await.unwrap();
        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.failed, 1);
        let stored = scheduler.get_reminder(&reminder.id).await.unwrap();
        assert!(!stored.is_sent);

        notifier.set_failing(false);
        let retry = scheduler.dispatch_due(Utc::now()).await.unwrap();
        assert_eq!(retry.sent, 1);
        let stored = scheduler.get_reminder(&reminder.id).await.unwrap();
        assert!(stored.is_sent);
        assert_eq!(stored.delivery_status, Some(DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let (scheduler, _, credit_id) = seeded().await;
        let reminder = scheduler
            .create_reminder(&credit_id, ReminderChannel::InApp, 3, None)
            .await
            .unwrap();

        let first = scheduler.acknowledge(&reminder.id).await.unwrap();
        assert!(first.is_acknowledged);
        let again = scheduler.acknowledge(&reminder.id).await.unwrap();
        assert_eq!(again.acknowledged_at, first.acknowledged_at);
    }
}
