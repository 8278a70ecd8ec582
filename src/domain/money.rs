use crate::error::{Result, SettlementError};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of fractional digits carried by INR-denominated amounts.
pub const MONEY_SCALE: u32 = 2;

/// Rounds a decimal to the money scale, half away from zero.
///
/// Every derived monetary value (fees, interest, installment splits) passes
/// through here so stored records never carry more than two fractional digits.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A validated positive monetary amount.
///
/// Wraps `rust_decimal::Decimal` to enforce the two rules every monetary
/// operation input must satisfy: strictly positive, and at most two
/// fractional digits. Record fields store plain `Decimal` (already rounded);
/// operations accept `Amount` so invalid money never reaches a write.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "amount must be positive, got {value}"
            )));
        }
        if value.scale() > MONEY_SCALE {
            return Err(SettlementError::Validation(format!(
                "amount {value} has more than {MONEY_SCALE} decimal places"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SettlementError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
