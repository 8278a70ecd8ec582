use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::json;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_dispute_freezes_release() {
    let dir = tempdir().unwrap();
    let seed = dir.path().join("seed.csv");
    let ops = dir.path().join("ops.jsonl");
    common::write_seed_csv(&seed, &[("TXN_000000000001", "50000.00")]).unwrap();
    common::write_ops_jsonl(
        &ops,
        &[
            json!({
                "op": "create_escrow",
                "transaction_id": "TXN_000000000001",
                "conditions": [{"kind": "delivery_confirmation"}],
                "auto_release_days": 14,
                "fee_percentage": 1.5,
                "fee_payer": "buyer"
            }),
            json!({
                "op": "raise_dispute",
                "transaction_id": "TXN_000000000001",
                "raised_by": "buyer-1",
                "details": "parcel never arrived"
            }),
            json!({
                "op": "release_funds",
                "transaction_id": "TXN_000000000001",
                "amount": "30000.00",
                "reason": "delivery confirmed",
                "actor": "vendor-1"
            }),
        ],
    )
    .unwrap();

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(&seed).arg("--ops").arg(&ops);

    // Expected: the release is refused while the dispute is open, so the
    // full 50000.00 stays in custody.
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error applying operation"))
        .stdout(predicate::str::contains("DISPUTED,0,50000.00"));
}

#[test]
fn test_resolved_dispute_allows_release() {
    let dir = tempdir().unwrap();
    let seed = dir.path().join("seed.csv");
    let ops = dir.path().join("ops.jsonl");
    common::write_seed_csv(&seed, &[("TXN_000000000001", "50000.00")]).unwrap();
    common::write_ops_jsonl(
        &ops,
        &[
            json!({
                "op": "create_escrow",
                "transaction_id": "TXN_000000000001",
                "conditions": [{"kind": "delivery_confirmation"}],
                "auto_release_days": 14,
                "fee_percentage": 1.5,
                "fee_payer": "buyer"
            }),
            json!({
                "op": "raise_dispute",
                "transaction_id": "TXN_000000000001",
                "raised_by": "buyer-1",
                "details": "parcel never arrived"
            }),
            json!({
                "op": "resolve_dispute",
                "transaction_id": "TXN_000000000001",
                "resolved_by": "admin-1",
                "notes": "courier confirmed redelivery"
            }),
            json!({
                "op": "release_funds",
                "transaction_id": "TXN_000000000001",
                "reason": "dispute resolved in vendor favour",
                "actor": "admin-1"
            }),
        ],
    )
    .unwrap();

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(&seed).arg("--ops").arg(&ops);

    // Expected: resolving the dispute restores the escrow, so the omitted
    // amount releases the full remaining balance.
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error applying operation").not())
        .stdout(predicate::str::contains("RELEASED,50000.00,0.00"));
}

#[test]
fn test_dispute_on_unknown_transaction_does_not_stop_the_run() {
    let dir = tempdir().unwrap();
    let seed = dir.path().join("seed.csv");
    let ops = dir.path().join("ops.jsonl");
    common::write_seed_csv(&seed, &[("TXN_000000000001", "50000.00")]).unwrap();
    common::write_ops_jsonl(
        &ops,
        &[
            json!({
                "op": "raise_dispute",
                "transaction_id": "TXN_000000000099",
                "raised_by": "buyer-1",
                "details": "no such order"
            }),
            json!({
                "op": "create_escrow",
                "transaction_id": "TXN_000000000001",
                "conditions": [{"kind": "delivery_confirmation"}],
                "auto_release_days": 14,
                "fee_percentage": 1.5,
                "fee_payer": "buyer"
            }),
        ],
    )
    .unwrap();

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(&seed).arg("--ops").arg(&ops);

    // Expected: the bad dispute is reported and skipped; the escrow for the
    // known transaction still opens.
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error applying operation"))
        .stdout(predicate::str::contains("ACTIVE,0,50000.00"));
}

#[test]
fn test_refund_blocked_until_escrow_resolved() {
    let dir = tempdir().unwrap();
    let seed = dir.path().join("seed.csv");
    let ops = dir.path().join("ops.jsonl");
    common::write_seed_csv(&seed, &[("TXN_000000000001", "50000.00")]).unwrap();
    common::write_ops_jsonl(
        &ops,
        &[
            json!({
                "op": "create_escrow",
                "transaction_id": "TXN_000000000001",
                "conditions": [{"kind": "delivery_confirmation"}],
                "auto_release_days": 14,
                "fee_percentage": 1.5,
                "fee_payer": "buyer"
            }),
            json!({
                "op": "create_refund_request",
                "transaction_id": "TXN_000000000001",
                "requester_id": "buyer-1",
                "amount": "10000.00",
                "reason": "NOT_DELIVERED"
            }),
            json!({
                "op": "approve_refund",
                "transaction_id": "TXN_000000000001",
                "reviewer": "admin-1",
                "notes": "vendor accepts the claim"
            }),
            // Refused: the transaction funds are still escrowed.
            json!({
                "op": "process_refund",
                "transaction_id": "TXN_000000000001",
                "refund_transaction_id": "TXN_0000000000ab"
            }),
            json!({
                "op": "cancel_escrow",
                "transaction_id": "TXN_000000000001",
                "actor": "admin-1"
            }),
            json!({
                "op": "process_refund",
                "transaction_id": "TXN_000000000001",
                "refund_transaction_id": "TXN_0000000000ab"
            }),
        ],
    )
    .unwrap();

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(&seed).arg("--ops").arg(&ops);

    // Expected: the first process attempt fails while the escrow is live;
    // after cancellation the refund goes through and flags the transaction.
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error applying operation"))
        .stdout(predicate::str::contains("refunded,CANCELLED"))
        .stdout(predicate::str::contains("PROCESSED,10000.00"));
}
