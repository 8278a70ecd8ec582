use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;

/// Writes a seed CSV of completed transactions between buyer-1 and
/// vendor-1, one row per (id, amount) pair.
pub fn write_seed_csv(path: &Path, rows: &[(&str, &str)]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "id",
        "order_id",
        "buyer_id",
        "vendor_id",
        "amount",
        "currency",
        "status",
        "completed_at",
        "description",
    ])?;

    for (i, (id, amount)) in rows.iter().enumerate() {
        wtr.write_record([
            id.to_string(),
            format!("ORD-{}", i + 1),
            "buyer-1".to_string(),
            "vendor-1".to_string(),
            amount.to_string(),
            "INR".to_string(),
            "completed".to_string(),
            String::new(),
            String::new(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes one JSON operation per line.
pub fn write_ops_jsonl(path: &Path, ops: &[serde_json::Value]) -> Result<(), Error> {
    let mut file = File::create(path)?;
    for op in ops {
        writeln!(file, "{op}")?;
    }
    Ok(())
}
