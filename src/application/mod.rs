//! Application layer containing the settlement orchestration.
//!
//! One manager per component: escrow custody, credit scheduling, reminder
//! dispatch and refund adjudication. Managers own boxed store and
//! collaborator ports and enforce the cross-record flow; record-level
//! invariants live on the domain types themselves.

pub mod credit_scheduler;
pub mod escrow_manager;
pub mod refund_engine;
pub mod reminder_scheduler;
