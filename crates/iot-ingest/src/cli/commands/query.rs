//! Range queries over stored readings

use chrono::Utc;

use super::{Context, SourceKind};
use crate::error::{IngestError, Result};
use crate::storage::{open_db, QueryOutcome};
use crate::sync::parse_datetime_input;

/// Print stored rows in `[from, to]` as column-oriented JSON
pub async fn query(
    ctx: Context,
    kind: SourceKind,
    from: Option<String>,
    to: Option<String>,
    pretty: bool,
) -> Result<()> {
    let tz = ctx.config.timezone;
    let start = from
        .as_deref()
        .map(|s| parse_datetime_input(s, tz).map(|dt| dt.with_timezone(&Utc)))
        .transpose()?;
    let end = to
        .as_deref()
        .map(|s| parse_datetime_input(s, tz).map(|dt| dt.with_timezone(&Utc)))
        .transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(IngestError::invalid_param("--from is after --to"));
        }
    }

    if !ctx.db_path.exists() {
        return Err(IngestError::Database(format!(
            "No database found at {}. Run 'iot-ingest ingest' first.",
            ctx.db_path.display()
        )));
    }
    let db = open_db(&ctx.db_path)?;

    match db.query_range(kind.table(&ctx.config), start, end)? {
        QueryOutcome::Rows(table) => {
            let json = table.to_json();
            let output = if pretty {
                serde_json::to_string_pretty(&json)?
            } else {
                serde_json::to_string(&json)?
            };
            println!("{}", output);
            eprintln!("{} rows", table.rows);
        }
        QueryOutcome::NoData => {
            println!("{{}}");
            eprintln!("No data in range");
        }
    }

    Ok(())
}
