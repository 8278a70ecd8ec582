use crate::domain::ids;
use crate::domain::money::round_money;
use crate::domain::transaction::TransactionRecord;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Active,
    PartiallyReleased,
    Released,
    Disputed,
    Cancelled,
    Expired,
}

impl EscrowStatus {
    /// Terminal states accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Released | EscrowStatus::Cancelled | EscrowStatus::Expired
        )
    }

    /// Live states are the only ones funds can still move out of.
    pub fn is_live(&self) -> bool {
        matches!(self, EscrowStatus::Active | EscrowStatus::PartiallyReleased)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EscrowStatus::Active => "ACTIVE",
            EscrowStatus::PartiallyReleased => "PARTIALLY_RELEASED",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Disputed => "DISPUTED",
            EscrowStatus::Cancelled => "CANCELLED",
            EscrowStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Conditions under which escrowed funds may be released, one variant per
/// known condition kind so the state machine stays exhaustive-checkable.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseCondition {
    DeliveryConfirmation,
    QualityInspection { inspection_period_days: u32 },
    TimeBased { release_at: DateTime<Utc> },
    MilestoneBased,
    ManualApproval { approver_id: String },
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Milestone {
    pub name: String,
    pub release_percentage: u32,
    #[serde(default)]
    pub description: Option<String>,
}

/// Milestone percentages must each be positive and sum to exactly 100.
/// A bad set is a caller error, never silently normalized.
pub fn validate_milestones(milestones: &[Milestone]) -> Result<()> {
    if milestones.is_empty() {
        return Err(SettlementError::Validation(
            "milestone list must not be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    let mut sum: u64 = 0;
    for m in milestones {
        if m.release_percentage == 0 {
            return Err(SettlementError::Validation(format!(
                "milestone '{}' has non-positive release percentage",
                m.name
            )));
        }
        if !seen.insert(m.name.as_str()) {
            return Err(SettlementError::Validation(format!(
                "duplicate milestone name '{}'",
                m.name
            )));
        }
        sum += u64::from(m.release_percentage);
    }
    if sum != 100 {
        return Err(SettlementError::Validation(format!(
            "milestone percentages sum to {sum}, expected 100"
        )));
    }
    Ok(())
}

/// Append-only record of one committed release.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ReleaseEntry {
    pub amount: Decimal,
    pub reason: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub transfer_id: String,
}

/// Reservation placed before the payout call. Money totals move only when
/// the reservation is committed with a confirmed transfer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PendingRelease {
    pub amount: Decimal,
    pub reason: String,
    pub actor: String,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Dispute {
    pub raised_by: String,
    pub details: String,
    pub raised_at: DateTime<Utc>,
    pub resolution_deadline: DateTime<Utc>,
    #[serde(default)]
    pub resolution: Option<DisputeResolution>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DisputeResolution {
    pub resolved_by: String,
    pub notes: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FeePayer {
    Buyer,
    Vendor,
}

/// Custody of one transaction's funds.
///
/// `released_amount + remaining_amount == original_amount` after every
/// committed operation; `released_amount` never decreases. All mutating
/// methods take `now` so callers (and tests) control the clock.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EscrowRecord {
    pub id: String,
    pub transaction_id: String,
    pub buyer_id: String,
    pub vendor_id: String,
    pub original_amount: Decimal,
    pub released_amount: Decimal,
    pub remaining_amount: Decimal,
    pub currency: String,
    pub status: EscrowStatus,
    pub conditions: Vec<ReleaseCondition>,
    #[serde(default)]
    pub milestones: Option<Vec<Milestone>>,
    pub release_history: Vec<ReleaseEntry>,
    #[serde(default)]
    pub dispute: Option<Dispute>,
    pub auto_release_at: DateTime<Utc>,
    pub fee_amount: Decimal,
    pub fee_payer: FeePayer,
    #[serde(default)]
    pub pending_release: Option<PendingRelease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowRecord {
    /// Builds an ACTIVE escrow over `transaction`'s full amount. Validates
    /// milestone shape and the fee percentage; eligibility (minimum amount,
    /// transaction status) is the manager's concern.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        transaction: &TransactionRecord,
        conditions: Vec<ReleaseCondition>,
        milestones: Option<Vec<Milestone>>,
        auto_release_days: u32,
        fee_percentage: Decimal,
        fee_payer: FeePayer,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if let Some(ref set) = milestones {
            validate_milestones(set)?;
        }
        if fee_percentage < Decimal::ZERO || fee_percentage > dec!(100) {
            return Err(SettlementError::Validation(format!(
                "fee percentage {fee_percentage} outside [0, 100]"
            )));
        }
        let fee_amount = round_money(transaction.amount * fee_percentage / dec!(100));
        Ok(Self {
            id: ids::prefixed_id(ids::ESCROW_PREFIX),
            transaction_id: transaction.id.clone(),
            buyer_id: transaction.buyer_id.clone(),
            vendor_id: transaction.vendor_id.clone(),
            original_amount: transaction.amount,
            released_amount: Decimal::ZERO,
            remaining_amount: transaction.amount,
            currency: transaction.currency.clone(),
            status: EscrowStatus::Active,
            conditions,
            milestones,
            release_history: Vec::new(),
            dispute: None,
            auto_release_at: now + Duration::days(i64::from(auto_release_days)),
            fee_amount,
            fee_payer,
            pending_release: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn guard_mutable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SettlementError::StateConflict(format!(
                "escrow {} is {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn guard_no_inflight(&self) -> Result<()> {
        if self.pending_release.is_some() {
            return Err(SettlementError::StateConflict(format!(
                "a release is already in flight for escrow {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Phase one of a release: re-validates against current state and parks
    /// the amount in `pending_release`. Totals are untouched until commit.
    pub fn reserve_release(
        &mut self,
        amount: Decimal,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard_mutable()?;
        if self.status == EscrowStatus::Disputed {
            return Err(SettlementError::StateConflict(format!(
                "escrow {} is under dispute",
                self.id
            )));
        }
        self.guard_no_inflight()?;
        if amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "release amount {amount} must be positive"
            )));
        }
        if amount > self.remaining_amount {
            return Err(SettlementError::StateConflict(format!(
                "release amount {amount} exceeds remaining {}",
                self.remaining_amount
            )));
        }
        self.pending_release = Some(PendingRelease {
            amount,
            reason: reason.to_string(),
            actor: actor.to_string(),
            reserved_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Phase two, success path: moves the reserved amount and appends the
    /// history entry. Only called once the payout is confirmed.
    pub fn commit_release(&mut self, transfer_id: &str, now: DateTime<Utc>) -> Result<ReleaseEntry> {
        let pending = self.pending_release.take().ok_or_else(|| {
            SettlementError::StateConflict(format!("no release in flight for escrow {}", self.id))
        })?;
        self.released_amount += pending.amount;
        self.remaining_amount -= pending.amount;
        self.status = if self.remaining_amount.is_zero() {
            EscrowStatus::Released
        } else {
            EscrowStatus::PartiallyReleased
        };
        let entry = ReleaseEntry {
            amount: pending.amount,
            reason: pending.reason,
            actor: pending.actor,
            timestamp: now,
            transfer_id: transfer_id.to_string(),
        };
        self.release_history.push(entry.clone());
        self.updated_at = now;
        Ok(entry)
    }

    /// Phase two, failure path: drops the reservation, totals unchanged.
    pub fn abort_release(&mut self, now: DateTime<Utc>) -> Result<PendingRelease> {
        let pending = self.pending_release.take().ok_or_else(|| {
            SettlementError::StateConflict(format!("no release in flight for escrow {}", self.id))
        })?;
        self.updated_at = now;
        Ok(pending)
    }

    pub fn raise_dispute(
        &mut self,
        raised_by: &str,
        details: &str,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard_mutable()?;
        if !self.status.is_live() {
            return Err(SettlementError::StateConflict(format!(
                "escrow {} is {} and cannot be disputed",
                self.id, self.status
            )));
        }
        self.guard_no_inflight()?;
        if raised_by != self.buyer_id && raised_by != self.vendor_id {
            return Err(SettlementError::Validation(format!(
                "{raised_by} is not a party to escrow {}",
                self.id
            )));
        }
        self.dispute = Some(Dispute {
            raised_by: raised_by.to_string(),
            details: details.to_string(),
            raised_at: now,
            resolution_deadline: now + Duration::days(window_days),
            resolution: None,
        });
        self.status = EscrowStatus::Disputed;
        self.updated_at = now;
        Ok(())
    }

    /// Clears the dispute and restores the pre-dispute live status, derived
    /// from whether any funds have been released.
    pub fn resolve_dispute(
        &mut self,
        resolved_by: &str,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != EscrowStatus::Disputed {
            return Err(SettlementError::StateConflict(format!(
                "escrow {} is {} and has no open dispute",
                self.id, self.status
            )));
        }
        let dispute = self.dispute.as_mut().ok_or_else(|| {
            SettlementError::Storage(format!("disputed escrow {} missing dispute details", self.id))
        })?;
        dispute.resolution = Some(DisputeResolution {
            resolved_by: resolved_by.to_string(),
            notes: notes.to_string(),
            resolved_at: now,
        });
        self.status = if self.released_amount > Decimal::ZERO {
            EscrowStatus::PartiallyReleased
        } else {
            EscrowStatus::Active
        };
        self.updated_at = now;
        Ok(())
    }

    /// Explicit cancellation. Allowed from live states and from an open
    /// dispute resolved in the buyer's favour; never while a release is in
    /// flight.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard_mutable()?;
        self.guard_no_inflight()?;
        self.status = EscrowStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Policy edge for escrows the auto-release sweep could never pay out.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard_mutable()?;
        if !self.status.is_live() {
            return Err(SettlementError::StateConflict(format!(
                "escrow {} is {} and cannot expire",
                self.id, self.status
            )));
        }
        self.guard_no_inflight()?;
        self.status = EscrowStatus::Expired;
        self.updated_at = now;
        Ok(())
    }

    /// Release reason recorded for a named milestone.
    pub fn milestone_reason(name: &str) -> String {
        format!("milestone:{name}")
    }

    /// Amount owed for the named milestone: its percentage of the original
    /// amount, except the final unreleased milestone takes the exact
    /// remainder so the percentages reconcile to the last minor unit.
    pub fn milestone_amount(&self, name: &str) -> Result<Decimal> {
        let milestones = self.milestones.as_deref().ok_or_else(|| {
            SettlementError::Validation(format!("escrow {} has no milestones", self.id))
        })?;
        let milestone = milestones.iter().find(|m| m.name == name).ok_or_else(|| {
            SettlementError::Validation(format!("unknown milestone '{name}' on escrow {}", self.id))
        })?;
        let released: HashSet<&str> = self
            .release_history
            .iter()
            .filter_map(|entry| entry.reason.strip_prefix("milestone:"))
            .collect();
        if released.contains(name) {
            return Err(SettlementError::StateConflict(format!(
                "milestone '{name}' already released on escrow {}",
                self.id
            )));
        }
        let unreleased = milestones
            .iter()
            .filter(|m| !released.contains(m.name.as_str()))
            .count();
        if unreleased == 1 {
            return Ok(self.remaining_amount);
        }
        Ok(round_money(
            self.original_amount * Decimal::from(milestone.release_percentage) / dec!(100),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::{LocalizedText, TransactionStatus};

    fn completed_transaction(amount: Decimal) -> TransactionRecord {
        TransactionRecord {
            id: "TXN_0011aabbccdd".to_string(),
            order_id: "ORD-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            vendor_id: "vendor-1".to_string(),
            amount,
            currency: "INR".to_string(),
            status: TransactionStatus::Completed,
            completed_at: Some(Utc::now()),
            description: LocalizedText::new(),
            created_at: Utc::now(),
            escrow_id: None,
            escrow_conditions: None,
            credit_terms_id: None,
        }
    }

    fn open_escrow(amount: Decimal) -> EscrowRecord {
        EscrowRecord::open(
            &completed_transaction(amount),
            vec![ReleaseCondition::DeliveryConfirmation],
            None,
            14,
            dec!(1.5),
            FeePayer::Buyer,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_computes_fee_exactly() {
        let escrow = open_escrow(dec!(50000.00));
        assert_eq!(escrow.fee_amount, dec!(750.00));
        assert_eq!(escrow.remaining_amount, dec!(50000.00));
        assert_eq!(escrow.released_amount, Decimal::ZERO);
        assert_eq!(escrow.status, EscrowStatus::Active);
    }

    #[test]
    fn test_fee_percentage_out_of_range_rejected() {
        let tx = completed_transaction(dec!(50000.00));
        let result = EscrowRecord::open(
            &tx,
            vec![],
            None,
            14,
            dec!(101),
            FeePayer::Buyer,
            Utc::now(),
        );
        assert!(matches!(result, Err(SettlementError::Validation(_))));
    }

    #[test]
    fn test_milestone_percentages_must_sum_to_100() {
        let bad = vec![
            Milestone {
                name: "shipped".to_string(),
                release_percentage: 40,
                description: None,
            },
            Milestone {
                name: "delivered".to_string(),
                release_percentage: 50,
                description: None,
            },
        ];
        let err = validate_milestones(&bad).unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn test_zero_percentage_milestone_rejected() {
        let bad = vec![
            Milestone {
                name: "shipped".to_string(),
                release_percentage: 0,
                description: None,
            },
            Milestone {
                name: "delivered".to_string(),
                release_percentage: 100,
                description: None,
            },
        ];
        assert!(validate_milestones(&bad).is_err());
    }

    #[test]
    fn test_reserve_commit_conserves_amounts() {
        let mut escrow = open_escrow(dec!(50000.00));
        let now = Utc::now();

        escrow
            .reserve_release(dec!(30000.00), "delivery confirmed", "vendor-1", now)
            .unwrap();
        assert_eq!(escrow.remaining_amount, dec!(50000.00));

        let entry = escrow.commit_release("TRF_aabbccddeeff", now).unwrap();
        assert_eq!(entry.amount, dec!(30000.00));
        assert_eq!(escrow.released_amount, dec!(30000.00));
        assert_eq!(escrow.remaining_amount, dec!(20000.00));
        assert_eq!(
            escrow.released_amount + escrow.remaining_amount,
            escrow.original_amount
        );
        assert_eq!(escrow.status, EscrowStatus::PartiallyReleased);

        escrow
            .reserve_release(dec!(20000.00), "final release", "vendor-1", now)
            .unwrap();
        escrow.commit_release("TRF_001122334455", now).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(escrow.remaining_amount, Decimal::ZERO);
        assert_eq!(escrow.release_history.len(), 2);
    }

    #[test]
    fn test_abort_leaves_totals_untouched() {
        let mut escrow = open_escrow(dec!(50000.00));
        let now = Utc::now();
        escrow
            .reserve_release(dec!(10000.00), "partial", "vendor-1", now)
            .unwrap();
        escrow.abort_release(now).unwrap();
        assert_eq!(escrow.released_amount, Decimal::ZERO);
        assert_eq!(escrow.remaining_amount, dec!(50000.00));
        assert_eq!(escrow.status, EscrowStatus::Active);
        assert!(escrow.release_history.is_empty());
    }

    #[test]
    fn test_release_exceeding_remaining_rejected() {
        let mut escrow = open_escrow(dec!(50000.00));
        let err = escrow
            .reserve_release(dec!(50000.01), "too much", "vendor-1", Utc::now())
            .unwrap_err();
        assert!(matches!(err, SettlementError::StateConflict(_)));
        assert!(err.to_string().contains("exceeds remaining"));
    }

    #[test]
    fn test_second_reservation_rejected_while_in_flight() {
        let mut escrow = open_escrow(dec!(50000.00));
        let now = Utc::now();
        escrow
            .reserve_release(dec!(10000.00), "first", "vendor-1", now)
            .unwrap();
        let err = escrow
            .reserve_release(dec!(10000.00), "second", "vendor-1", now)
            .unwrap_err();
        assert!(err.to_string().contains("in flight"));
    }

    #[test]
    fn test_dispute_blocks_release() {
        let mut escrow = open_escrow(dec!(50000.00));
        let now = Utc::now();
        escrow
            .raise_dispute("buyer-1", "goods not delivered", 14, now)
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::Disputed);

        let err = escrow
            .reserve_release(dec!(10000.00), "attempt", "vendor-1", now)
            .unwrap_err();
        assert!(err.to_string().contains("dispute"));
    }

    #[test]
    fn test_dispute_from_non_party_rejected() {
        let mut escrow = open_escrow(dec!(50000.00));
        let err = escrow
            .raise_dispute("stranger", "not mine", 14, Utc::now())
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[test]
    fn test_resolve_dispute_restores_prior_status() {
        let mut escrow = open_escrow(dec!(50000.00));
        let now = Utc::now();
        escrow
            .reserve_release(dec!(20000.00), "partial", "vendor-1", now)
            .unwrap();
        escrow.commit_release("TRF_aabbccddeeff", now).unwrap();
        escrow
            .raise_dispute("buyer-1", "quality issue", 14, now)
            .unwrap();
        escrow
            .resolve_dispute("admin-1", "inspection passed", now)
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::PartiallyReleased);
        assert!(
            escrow
                .dispute
                .as_ref()
                .is_some_and(|d| d.resolution.is_some())
        );
    }

    #[test]
    fn test_terminal_states_reject_mutation() {
        let mut escrow = open_escrow(dec!(50000.00));
        let now = Utc::now();
        escrow.cancel(now).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Cancelled);

        assert!(escrow.reserve_release(dec!(1.00), "x", "vendor-1", now).is_err());
        assert!(escrow.raise_dispute("buyer-1", "x", 14, now).is_err());
        assert!(escrow.cancel(now).is_err());
        assert!(escrow.mark_expired(now).is_err());
    }

    #[test]
    fn test_milestone_amount_final_takes_remainder() {
        let tx = completed_transaction(dec!(10000.01));
        let milestones = vec![
            Milestone {
                name: "advance".to_string(),
                release_percentage: 33,
                description: None,
            },
            Milestone {
                name: "shipped".to_string(),
                release_percentage: 33,
                description: None,
            },
            Milestone {
                name: "delivered".to_string(),
                release_percentage: 34,
                description: None,
            },
        ];
        let mut escrow = EscrowRecord::open(
            &tx,
            vec![ReleaseCondition::MilestoneBased],
            Some(milestones),
            30,
            Decimal::ZERO,
            FeePayer::Buyer,
            Utc::now(),
        )
        .unwrap();
        let now = Utc::now();

        for name in ["advance", "shipped"] {
            let amount = escrow.milestone_amount(name).unwrap();
            escrow
                .reserve_release(amount, &EscrowRecord::milestone_reason(name), "vendor-1", now)
                .unwrap();
            escrow.commit_release("TRF_aabbccddeeff", now).unwrap();
        }

        let last = escrow.milestone_amount("delivered").unwrap();
        assert_eq!(last, escrow.remaining_amount);
        escrow
            .reserve_release(last, &EscrowRecord::milestone_reason("delivered"), "vendor-1", now)
            .unwrap();
        escrow.commit_release("TRF_001122334455", now).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(escrow.released_amount, dec!(10000.01));
    }

    #[test]
    fn test_milestone_cannot_release_twice() {
        let tx = completed_transaction(dec!(20000.00));
        let milestones = vec![
            Milestone {
                name: "half".to_string(),
                release_percentage: 50,
                description: None,
            },
            Milestone {
                name: "rest".to_string(),
                release_percentage: 50,
                description: None,
            },
        ];
        let mut escrow = EscrowRecord::open(
            &tx,
            vec![ReleaseCondition::MilestoneBased],
            Some(milestones),
            30,
            Decimal::ZERO,
            FeePayer::Buyer,
            Utc::now(),
        )
        .unwrap();
        let now = Utc::now();
        let amount = escrow.milestone_amount("half").unwrap();
        escrow
            .reserve_release(amount, &EscrowRecord::milestone_reason("half"), "vendor-1", now)
            .unwrap();
        escrow.commit_release("TRF_aabbccddeeff", now).unwrap();

        let err = escrow.milestone_amount("half").unwrap_err();
        assert!(matches!(err, SettlementError::StateConflict(_)));
    }
}
