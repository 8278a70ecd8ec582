use crate::domain::credit::CreditTermsRecord;
use crate::domain::ids;
use crate::domain::transaction::LocalizedText;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum ReminderChannel {
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "in-app")]
    InApp,
    #[serde(rename = "voice")]
    Voice,
}

impl std::fmt::Display for ReminderChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderChannel::Sms => "sms",
            ReminderChannel::Email => "email",
            ReminderChannel::InApp => "in-app",
            ReminderChannel::Voice => "voice",
        };
        f.write_str(s)
    }
}

/// Outcome reported by the delivery collaborator.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Queued,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn english_text(due_amount: Decimal, due_date: DateTime<Utc>) -> String {
    format!(
        "Your installment of ₹{due_amount} is due on {}. Please pay on time to keep your credit terms active.",
        due_date.format("%d %b %Y")
    )
}

fn template(language: &str, due_amount: Decimal, due_date: DateTime<Utc>) -> Option<String> {
    match language {
        "en" => Some(english_text(due_amount, due_date)),
        "hi" => Some(format!(
            "आपकी ₹{due_amount} की किस्त {} को देय है। कृपया समय पर भुगतान करें।",
            due_date.format("%d %b %Y")
        )),
        _ => None,
    }
}

/// A due-date reminder derived from one pending installment.
///
/// Creating a reminder never delivers anything; delivery happens later
/// through the notification collaborator and is recorded on `is_sent` and
/// `delivery_status`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ReminderRecord {
    pub id: String,
    pub credit_terms_id: String,
    pub transaction_id: String,
    pub recipient_id: String,
    pub channel: ReminderChannel,
    pub due_amount: Decimal,
    pub due_date: DateTime<Utc>,
    pub days_until_due: i64,
    pub messages: LocalizedText,
    pub scheduled_at: DateTime<Utc>,
    pub is_sent: bool,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
    pub is_acknowledged: bool,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReminderRecord {
    /// Derives a reminder from the credit record's next unpaid installment.
    /// `scheduled_at` lands `days_before_due` days ahead of the due date,
    /// clamped to `now` when that point has already passed. Message content
    /// always includes the default language; the recipient's language is
    /// added when a template for it exists.
    pub fn compose(
        credit: &CreditTermsRecord,
        channel: ReminderChannel,
        days_before_due: i64,
        language: Option<&str>,
        default_language: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if days_before_due < 0 {
            return Err(SettlementError::Validation(format!(
                "days before due must be non-negative, got {days_before_due}"
            )));
        }
        let next = credit.next_unpaid().ok_or_else(|| {
            SettlementError::StateConflict(format!(
                "no pending installment on credit terms {}",
                credit.id
            ))
        })?;

        let scheduled_at = (next.due_date - Duration::days(days_before_due)).max(now);
        let mut messages = LocalizedText::new();
        let default_text = template(default_language, next.amount, next.due_date)
            .unwrap_or_else(|| english_text(next.amount, next.due_date));
        messages.insert(default_language.to_string(), default_text);
        let resolved = language.unwrap_or(default_language);
        if resolved != default_language {
            if let Some(text) = template(resolved, next.amount, next.due_date) {
                messages.insert(resolved.to_string(), text);
            }
        }

        Ok(Self {
            id: ids::prefixed_id(ids::REMINDER_PREFIX),
            credit_terms_id: credit.id.clone(),
            transaction_id: credit.transaction_id.clone(),
            recipient_id: credit.buyer_id.clone(),
            channel,
            due_amount: next.amount,
            due_date: next.due_date,
            days_until_due: (next.due_date - now).num_days(),
            messages,
            scheduled_at,
            is_sent: false,
            sent_at: None,
            delivery_status: None,
            is_acknowledged: false,
            acknowledged_at: None,
            created_at: now,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_sent && self.scheduled_at <= now
    }

    pub fn mark_sent(&mut self, status: DeliveryStatus, now: DateTime<Utc>) -> Result<()> {
        if self.is_sent {
            return Err(SettlementError::StateConflict(format!(
                "reminder {} already sent",
                self.id
            )));
        }
        self.is_sent = true;
        self.sent_at = Some(now);
        self.delivery_status = Some(status);
        Ok(())
    }

    /// Recipient acknowledgement. Repeats are no-ops.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        if !self.is_acknowledged {
            self.is_acknowledged = true;
            self.acknowledged_at = Some(now);
        }
    }
}
