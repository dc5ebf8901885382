//! Database status command

use super::{Context, SourceKind};
use crate::error::Result;
use crate::storage::open_db;

/// Show stored tables and unresolved failed windows
pub async fn status(ctx: Context) -> Result<()> {
    if !ctx.db_path.exists() {
        println!("No database found at: {}", ctx.db_path.display());
        println!("Run 'iot-ingest ingest' to create one.");
        return Ok(());
    }

    let db = open_db(&ctx.db_path)?;
    println!("Database: {}", ctx.db_path.display());
    println!("Timezone: {}", ctx.config.timezone);
    println!();
    println!("Data stored:");

    for kind in [SourceKind::Zentra, SourceKind::Thingspeak] {
        let table = kind.table(&ctx.config);
        match db.table_summary(table)? {
            Some(summary) => println!(
                "  {:<16} {:>8} rows  {} .. {} UTC",
                summary.table,
                summary.rows,
                summary.first.as_deref().unwrap_or("-"),
                summary.last.as_deref().unwrap_or("-")
            ),
            None => println!("  {:<16} {:>8}", table, "empty"),
        }
    }

    for source in ["zentra", "thingspeak"] {
        let counts = db.count_runs_by_status(source)?;
        if counts.is_empty() {
            continue;
        }
        let line: Vec<String> = counts
            .iter()
            .map(|(status, count)| format!("{} {}", count, status))
            .collect();
        println!();
        println!("Windows ({}): {}", source, line.join(", "));
    }

    let failed = db.failed_runs(None)?;
    if !failed.is_empty() {
        println!();
        println!("Failed windows:");
        for run in &failed {
            println!(
                "  {} {}  {} to {}  {}",
                run.source,
                run.source_id,
                run.window_start.format("%Y-%m-%d %H:%M"),
                run.window_end.format("%Y-%m-%d %H:%M"),
                run.error.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}
