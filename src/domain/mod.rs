pub mod credit;
pub mod escrow;
pub mod ids;
pub mod money;
pub mod ports;
pub mod refund;
pub mod reminder;
pub mod transaction;
