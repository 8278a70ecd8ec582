//! Settlement policy configuration.
//!
//! Business-tunable thresholds are configurable via environment variables;
//! everything else ships with documented defaults. An out-of-range override
//! logs a warning and is clamped or replaced with the default, never applied
//! as-is.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

/// Minimum transaction amount eligible for escrow custody (INR).
///
/// Override via MANDIPAY_ESCROW_MINIMUM.
pub const DEFAULT_ESCROW_MINIMUM: Decimal = dec!(10000.00);

/// Days a raised dispute has before its resolution deadline passes.
pub const DEFAULT_DISPUTE_WINDOW_DAYS: i64 = 14;

/// Days past `auto_release_date` after which a repeatedly failing
/// auto-release stops being retried and the escrow is marked expired.
pub const DEFAULT_EXPIRY_GRACE_DAYS: i64 = 30;

/// Upper bound on a single payout call before it is treated as failed.
pub const DEFAULT_PAYOUT_TIMEOUT_SECS: u64 = 5;

/// Payout attempts per release before the failure is surfaced.
pub const DEFAULT_PAYOUT_ATTEMPTS: u32 = 3;

/// Minimum buyer-vendor trading relationship for credit terms, in months.
///
/// Override via MANDIPAY_MIN_RELATIONSHIP_MONTHS.
pub const DEFAULT_MIN_RELATIONSHIP_MONTHS: u32 = 3;

/// Minimum buyer credit score for credit terms, in [0, 1].
///
/// Override via MANDIPAY_MIN_CREDIT_SCORE.
pub const DEFAULT_MIN_CREDIT_SCORE: f64 = 0.7;

/// Days past due before an installment pushes the record ACTIVE -> OVERDUE.
pub const DEFAULT_OVERDUE_GRACE_DAYS: i64 = 7;

/// Days past due before an overdue record is defaulted.
pub const DEFAULT_DEFAULT_AFTER_DAYS: i64 = 60;

/// Return window for buyer-initiated cancellation refunds, in days.
pub const DEFAULT_CANCELLATION_WINDOW_DAYS: i64 = 7;

/// Language used when the recipient's language is unknown.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Currency assumed when a seed row leaves the column empty.
pub const DEFAULT_CURRENCY: &str = "INR";

/// Escrow custody policy.
#[derive(Debug, Clone)]
pub struct EscrowPolicy {
    pub minimum_amount: Decimal,
    pub dispute_window_days: i64,
    pub expiry_grace_days: i64,
    pub payout_timeout_secs: u64,
    pub payout_attempts: u32,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            minimum_amount: DEFAULT_ESCROW_MINIMUM,
            dispute_window_days: DEFAULT_DISPUTE_WINDOW_DAYS,
            expiry_grace_days: DEFAULT_EXPIRY_GRACE_DAYS,
            payout_timeout_secs: DEFAULT_PAYOUT_TIMEOUT_SECS,
            payout_attempts: DEFAULT_PAYOUT_ATTEMPTS,
        }
    }
}

/// Credit terms eligibility and overdue policy.
#[derive(Debug, Clone)]
pub struct CreditPolicy {
    pub min_relationship_months: u32,
    pub min_credit_score: f64,
    pub overdue_grace_days: i64,
    pub default_after_days: i64,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            min_relationship_months: DEFAULT_MIN_RELATIONSHIP_MONTHS,
            min_credit_score: DEFAULT_MIN_CREDIT_SCORE,
            overdue_grace_days: DEFAULT_OVERDUE_GRACE_DAYS,
            default_after_days: DEFAULT_DEFAULT_AFTER_DAYS,
        }
    }
}

/// Refund return-policy windows.
#[derive(Debug, Clone)]
pub struct RefundPolicy {
    pub cancellation_window_days: i64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            cancellation_window_days: DEFAULT_CANCELLATION_WINDOW_DAYS,
        }
    }
}

/// Reminder construction and dispatch policy.
#[derive(Debug, Clone)]
pub struct ReminderPolicy {
    pub default_language: String,
    pub delivery_timeout_secs: u64,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            default_language: DEFAULT_LANGUAGE.to_string(),
            delivery_timeout_secs: DEFAULT_PAYOUT_TIMEOUT_SECS,
        }
    }
}

/// Full settlement policy, one section per component.
#[derive(Debug, Clone, Default)]
pub struct SettlementPolicy {
    pub escrow: EscrowPolicy,
    pub credit: CreditPolicy,
    pub refund: RefundPolicy,
    pub reminder: ReminderPolicy,
}

impl SettlementPolicy {
    /// Build the policy from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        policy.escrow.minimum_amount = env_escrow_minimum();
        policy.credit.min_relationship_months = env_min_relationship_months();
        policy.credit.min_credit_score = env_min_credit_score();
        policy
    }
}

fn env_escrow_minimum() -> Decimal {
    env::var("MANDIPAY_ESCROW_MINIMUM")
        .ok()
        .and_then(|v| v.parse::<Decimal>().ok())
        .map(|min| {
            if min < Decimal::ZERO {
                tracing::warn!(
                    configured = %min,
                    "MANDIPAY_ESCROW_MINIMUM is negative, using default"
                );
                DEFAULT_ESCROW_MINIMUM
            } else {
                min
            }
        })
        .unwrap_or(DEFAULT_ESCROW_MINIMUM)
}

fn env_min_relationship_months() -> u32 {
    env::var("MANDIPAY_MIN_RELATIONSHIP_MONTHS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MIN_RELATIONSHIP_MONTHS)
}

fn env_min_credit_score() -> f64 {
    env::var("MANDIPAY_MIN_CREDIT_SCORE")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|score| {
            if !(0.0..=1.0).contains(&score) {
                tracing::warn!(
                    configured = score,
                    "MANDIPAY_MIN_CREDIT_SCORE outside [0, 1], clamping"
                );
                score.clamp(0.0, 1.0)
            } else {
                score
            }
        })
        .unwrap_or(DEFAULT_MIN_CREDIT_SCORE)
}
