use uuid::Uuid;

pub const TRANSACTION_PREFIX: &str = "TXN";
pub const ESCROW_PREFIX: &str = "ESC";
pub const CREDIT_PREFIX: &str = "CRD";
pub const REMINDER_PREFIX: &str = "REM";
pub const REFUND_PREFIX: &str = "REF";
pub const TRANSFER_PREFIX: &str = "TRF";

/// Generates an opaque identifier: the prefix, an underscore, and 12
/// lowercase hex characters drawn from a v4 UUID.
pub fn prefixed_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..12])
}
