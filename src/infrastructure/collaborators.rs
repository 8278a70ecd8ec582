use crate::domain::ids;
use crate::domain::ports::{
    NotificationDelivery, PayoutService, RelationshipHistory, TransferReceipt, TransferStatus,
};
use crate::domain::reminder::{DeliveryStatus, ReminderRecord};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One recorded payout call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub recipient_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Payout collaborator that confirms every transfer immediately and keeps a
/// record of it. Clones share the record and the failure switch, so one
/// handle can be boxed into a manager while another steers it.
#[derive(Default, Clone)]
pub struct RecordingPayout {
    sent: Arc<Mutex<Vec<TransferRecord>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingPayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PayoutService for RecordingPayout {
    async fn transfer(
        &self,
        recipient_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<TransferReceipt> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SettlementError::External(format!(
                "payout to {recipient_id} refused by provider"
            )));
        }
        let receipt = TransferReceipt {
            transfer_id: ids::prefixed_id(ids::TRANSFER_PREFIX),
            status: TransferStatus::Completed,
            processed_at: Utc::now(),
        };
        tracing::info!(
            transfer_id = %receipt.transfer_id,
            recipient_id,
            %amount,
            currency,
            "payout confirmed"
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TransferRecord {
                recipient_id: recipient_id.to_string(),
                amount,
                currency: currency.to_string(),
            });
        Ok(receipt)
    }
}

/// Relationship source that answers the same months and score for every
/// party pair. Real deployments replace this with a history service; batch
/// runs feed it from the command line.
#[derive(Debug, Clone, Copy)]
pub struct StaticRelationshipHistory {
    months: u32,
    score: f64,
}

impl StaticRelationshipHistory {
    pub fn new(months: u32, score: f64) -> Self {
        Self { months, score }
    }
}

#[async_trait]
impl RelationshipHistory for StaticRelationshipHistory {
    async fn duration_months(&self, _buyer_id: &str, _vendor_id: &str) -> Result<u32> {
        Ok(self.months)
    }

    async fn credit_score(&self, _buyer_id: &str) -> Result<f64> {
        Ok(self.score)
    }
}

/// Delivery collaborator that logs each reminder instead of sending it.
/// Clones share the delivered list and the failure switch.
#[derive(Default, Clone)]
pub struct LoggingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

impl LoggingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Ids of the reminders delivered so far.
    pub fn delivered(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationDelivery for LoggingNotifier {
    async fn deliver(&self, reminder: &ReminderRecord) -> Result<DeliveryStatus> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SettlementError::External(format!(
                "channel {} unavailable",
                reminder.channel
            )));
        }
        let text = reminder
            .messages
            .get("en")
            .or_else(|| reminder.messages.values().next())
            .map(String::as_str)
            .unwrap_or_default();
        tracing::info!(
            reminder_id = %reminder.id,
            recipient_id = %reminder.recipient_id,
            channel = %reminder.channel,
            text,
            "reminder delivered"
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reminder.id.clone());
        Ok(DeliveryStatus::Delivered)
    }
}
