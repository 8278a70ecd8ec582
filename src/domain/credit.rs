use crate::domain::ids;
use crate::domain::money::{MONEY_SCALE, round_money};
use crate::domain::transaction::TransactionRecord;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const SCORE_COMPLETION_WEIGHT: f64 = 0.7;
const SCORE_SEVERITY_WEIGHT: f64 = 0.3;
const SCORE_SEVERITY_HORIZON_DAYS: f64 = 90.0;
const SCORE_NO_HISTORY: f64 = 0.5;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditStatus {
    Active,
    Completed,
    Overdue,
    Defaulted,
    Cancelled,
}

impl CreditStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CreditStatus::Completed | CreditStatus::Defaulted | CreditStatus::Cancelled
        )
    }
}

impl std::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CreditStatus::Active => "ACTIVE",
            CreditStatus::Completed => "COMPLETED",
            CreditStatus::Overdue => "OVERDUE",
            CreditStatus::Defaulted => "DEFAULTED",
            CreditStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Installment {
    pub number: u32,
    pub due_date: DateTime<Utc>,
    pub amount: Decimal,
    pub status: InstallmentStatus,
}

impl Installment {
    pub fn is_unpaid(&self) -> bool {
        self.status != InstallmentStatus::Paid
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentEntry {
    pub installment_number: u32,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub late: bool,
    #[serde(default)]
    pub late_fee: Option<Decimal>,
}

/// Simple interest over the credit period, rounded to the minor unit.
pub fn simple_interest(amount: Decimal, rate: Decimal, period_days: u32) -> Decimal {
    round_money(amount * rate * Decimal::from(period_days) / (dec!(100) * dec!(365)))
}

/// Splits `total_due` into `count` near-equal installments due at even
/// intervals across `period_days`. The final installment takes the exact
/// remainder so the sum reconciles to the minor unit. Every amount must stay
/// within 0.5x to 1.5x of the simple average.
pub fn build_schedule(
    total_due: Decimal,
    count: u32,
    period_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<Installment>> {
    let n = Decimal::from(count);
    let base = round_money(total_due / n);
    let last = total_due - base * (n - Decimal::ONE);
    let minor_unit = Decimal::new(1, MONEY_SCALE);
    if base < minor_unit || last < minor_unit {
        return Err(SettlementError::Validation(format!(
            "total {total_due} cannot be split into {count} installments of at least {minor_unit}"
        )));
    }
    let average = total_due / n;
    for amount in [base, last] {
        if amount < average / dec!(2) || amount > average * dec!(1.5) {
            return Err(SettlementError::Validation(format!(
                "installment amount {amount} is disproportionate to the average {average}"
            )));
        }
    }

    let interval_days = i64::from(period_days / count);
    let mut schedule = Vec::with_capacity(count as usize);
    for i in 1..=count {
        schedule.push(Installment {
            number: i,
            due_date: now + Duration::days(interval_days * i64::from(i)),
            amount: if i == count { last } else { base },
            status: InstallmentStatus::Pending,
        });
    }
    Ok(schedule)
}

/// Installment credit extended against one transaction.
///
/// The schedule sum always equals `total_amount + interest_amount` to the
/// minor unit. `paid_amount` never decreases. OVERDUE is recoverable by
/// paying off every overdue installment; COMPLETED, DEFAULTED and CANCELLED
/// are terminal.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CreditTermsRecord {
    pub id: String,
    pub transaction_id: String,
    pub buyer_id: String,
    pub vendor_id: String,
    pub total_amount: Decimal,
    pub installment_count: u32,
    pub credit_period_days: u32,
    pub interest_rate: Option<Decimal>,
    pub late_fee_rate: Option<Decimal>,
    pub interest_amount: Decimal,
    pub schedule: Vec<Installment>,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub payment_history: Vec<PaymentEntry>,
    pub overdue_amount: Decimal,
    pub overdue_days: i64,
    pub status: CreditStatus,
    pub relationship_months: u32,
    pub credit_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditTermsRecord {
    /// Builds an ACTIVE record with a generated schedule. Eligibility gates
    /// (relationship duration, credit score) are the scheduler's concern;
    /// the snapshots taken at that point are recorded here.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        transaction: &TransactionRecord,
        credit_period_days: u32,
        installment_count: u32,
        interest_rate: Option<Decimal>,
        late_fee_rate: Option<Decimal>,
        relationship_months: u32,
        credit_score: f64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if installment_count == 0 {
            return Err(SettlementError::Validation(
                "installment count must be positive".to_string(),
            ));
        }
        if credit_period_days == 0 {
            return Err(SettlementError::Validation(
                "credit period must be at least one day".to_string(),
            ));
        }
        if credit_period_days < installment_count {
            return Err(SettlementError::Validation(format!(
                "credit period of {credit_period_days} days cannot space {installment_count} installments"
            )));
        }
        for rate in [interest_rate, late_fee_rate].into_iter().flatten() {
            if rate < Decimal::ZERO || rate > dec!(100) {
                return Err(SettlementError::Validation(format!(
                    "rate {rate} outside [0, 100]"
                )));
            }
        }

        let interest_amount = interest_rate
            .map(|rate| simple_interest(transaction.amount, rate, credit_period_days))
            .unwrap_or(Decimal::ZERO);
        let total_due = transaction.amount + interest_amount;
        let schedule = build_schedule(total_due, installment_count, credit_period_days, now)?;
        let next_payment_date = schedule.first().map(|i| i.due_date);

        Ok(Self {
            id: ids::prefixed_id(ids::CREDIT_PREFIX),
            transaction_id: transaction.id.clone(),
            buyer_id: transaction.buyer_id.clone(),
            vendor_id: transaction.vendor_id.clone(),
            total_amount: transaction.amount,
            installment_count,
            credit_period_days,
            interest_rate,
            late_fee_rate,
            interest_amount,
            schedule,
            paid_amount: Decimal::ZERO,
            remaining_amount: total_due,
            next_payment_date,
            payment_history: Vec::new(),
            overdue_amount: Decimal::ZERO,
            overdue_days: 0,
            status: CreditStatus::Active,
            relationship_months,
            credit_score,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn total_due(&self) -> Decimal {
        self.total_amount + self.interest_amount
    }

    /// Earliest unpaid installment, by due date.
    pub fn next_unpaid(&self) -> Option<&Installment> {
        self.schedule
            .iter()
            .filter(|i| i.is_unpaid())
            .min_by_key(|i| i.due_date)
    }

    /// Marks an installment paid. The amount must match the scheduled amount
    /// exactly. Paying past the due date records a `late` entry with the
    /// late fee when a rate is set; the fee is tracked in history only and
    /// never added to `remaining_amount`. Paying off every overdue
    /// installment cures OVERDUE back to ACTIVE.
    pub fn apply_payment(
        &mut self,
        installment_number: u32,
        amount: Decimal,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentEntry> {
        if self.status.is_terminal() {
            return Err(SettlementError::StateConflict(format!(
                "credit terms {} are {}",
                self.id, self.status
            )));
        }
        let late_fee_rate = self.late_fee_rate;
        let installment = self
            .schedule
            .iter_mut()
            .find(|i| i.number == installment_number)
            .ok_or_else(|| {
                SettlementError::Validation(format!(
                    "no installment {installment_number} on this schedule"
                ))
            })?;
        if installment.status == InstallmentStatus::Paid {
            return Err(SettlementError::StateConflict(format!(
                "installment {installment_number} already paid"
            )));
        }
        if amount != installment.amount {
            return Err(SettlementError::Validation(format!(
                "payment amount {amount} does not match scheduled {}",
                installment.amount
            )));
        }

        let late = paid_at > installment.due_date;
        let late_fee = match (late, late_fee_rate) {
            (true, Some(rate)) => Some(round_money(amount * rate / dec!(100))),
            _ => None,
        };
        installment.status = InstallmentStatus::Paid;
        self.paid_amount += amount;
        self.remaining_amount -= amount;

        let entry = PaymentEntry {
            installment_number,
            amount,
            paid_at,
            late,
            late_fee,
        };
        self.payment_history.push(entry.clone());

        self.next_payment_date = self.next_unpaid().map(|i| i.due_date);
        if self.next_payment_date.is_none() {
            self.status = CreditStatus::Completed;
            self.overdue_amount = Decimal::ZERO;
            self.overdue_days = 0;
        } else {
            self.recompute_overdue_totals(paid_at);
            if self.overdue_amount.is_zero() && self.status == CreditStatus::Overdue {
                self.status = CreditStatus::Active;
            }
        }
        self.updated_at = paid_at;
        Ok(entry)
    }

    fn recompute_overdue_totals(&mut self, now: DateTime<Utc>) {
        let overdue: Vec<&Installment> = self
            .schedule
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
            .collect();
        self.overdue_amount = overdue.iter().map(|i| i.amount).sum();
        self.overdue_days = overdue
            .iter()
            .map(|i| (now - i.due_date).num_days().max(0))
            .max()
            .unwrap_or(0);
    }

    /// Rolls pending installments past their due date into the overdue
    /// aggregates and escalates status past the policy windows. Idempotent;
    /// terminal records are left untouched.
    pub fn refresh_overdue(
        &mut self,
        now: DateTime<Utc>,
        grace_days: i64,
        default_after_days: i64,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Ok(());
        }
        for installment in &mut self.schedule {
            if installment.status == InstallmentStatus::Pending && installment.due_date < now {
                installment.status = InstallmentStatus::Overdue;
            }
        }
        self.recompute_overdue_totals(now);
        if self.overdue_amount.is_zero() {
            if self.status == CreditStatus::Overdue {
                self.status = CreditStatus::Active;
            }
        } else if self.overdue_days > default_after_days {
            self.status = CreditStatus::Defaulted;
        } else if self.overdue_days > grace_days {
            self.status = CreditStatus::Overdue;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Mutual cancellation of the arrangement. Live records only.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SettlementError::StateConflict(format!(
                "credit terms {} are {}",
                self.id, self.status
            )));
        }
        self.status = CreditStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }
}

/// Eligibility score in [0, 1] from a buyer's past credit terms: a weighted
/// blend of completion rate and overdue severity, where severity saturates
/// at 90 days overdue. A buyer with no history scores 0.5.
pub fn derive_credit_score(history: &[CreditTermsRecord]) -> f64 {
    if history.is_empty() {
        return SCORE_NO_HISTORY;
    }
    let n = history.len() as f64;
    let completed = history
        .iter()
        .filter(|r| r.status == CreditStatus::Completed)
        .count() as f64;
    let avg_severity = history
        .iter()
        .map(|r| (r.overdue_days as f64 / SCORE_SEVERITY_HORIZON_DAYS).min(1.0))
        .sum::<f64>()
        / n;
    let score =
        SCORE_COMPLETION_WEIGHT * (completed / n) + SCORE_SEVERITY_WEIGHT * (1.0 - avg_severity);
    score.clamp(0.0, 1.0)
}
