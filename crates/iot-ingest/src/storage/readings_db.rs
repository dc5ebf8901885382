//! SQLite storage for aligned readings and the ingestion run ledger
//!
//! Each source writes to its own table keyed by a unique UTC `timestamp`.
//! Value columns are added on demand as new sensor/measurement pairs appear.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::db::models::{IngestRun, RunStatus, TableSummary, WideRow};
use crate::error::{IngestError, Result};

/// Storage format of the `timestamp` key column (UTC)
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format of query results
pub const QUERY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const TIMESTAMP_COLUMN: &str = "timestamp";
const ID_COLUMN: &str = "id";

/// How an incoming row treats a stored row with the same timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Incoming values overwrite; incoming nulls keep the stored value
    #[default]
    Merge,
    /// Every incoming column overwrites, nulls included
    Replace,
}

/// Options for one upsert batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    pub policy: ConflictPolicy,
    /// Add missing value columns instead of failing with `SchemaMismatch`
    pub schema_evolution: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::Merge,
            schema_evolution: true,
        }
    }
}

/// Column-oriented query result: `{column: [values...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTable {
    pub columns: Vec<String>,
    pub rows: usize,
    data: Map<String, Value>,
}

impl ColumnTable {
    pub fn column(&self, name: &str) -> Option<&Vec<Value>> {
        self.data.get(name).and_then(Value::as_array)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

/// Result of a range query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(ColumnTable),
    /// Nothing stored in the range; not an error
    NoData,
}

/// Format a timestamp as the stored UTC key
pub fn timestamp_key<Z: TimeZone>(dt: &DateTime<Z>) -> String {
    dt.with_timezone(&Utc).format(STORED_TIMESTAMP_FORMAT).to_string()
}

/// Quote an SQL identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite database holding reading tables and the run ledger
pub struct ReadingsDb {
    conn: Connection,
}

impl ReadingsDb {
    /// Open or create the readings database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            IngestError::Database(format!("Failed to open readings database: {}", e))
        })?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            IngestError::Database(format!("Failed to open in-memory database: {}", e))
        })?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA journal_mode = WAL;

                CREATE TABLE IF NOT EXISTS ingest_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    window_start TEXT NOT NULL,
                    window_end TEXT NOT NULL,
                    status TEXT NOT NULL,
                    rows INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    attempted_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                );

                CREATE INDEX IF NOT EXISTS idx_ingest_runs_status
                ON ingest_runs(source, status);
                "#,
            )
            .map_err(|e| IngestError::Database(format!("Failed to run migrations: {}", e)))?;

        Ok(())
    }

    // =========================================================================
    // Reading tables
    // =========================================================================

    /// Whether a table exists
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        table_exists(&self.conn, table)
    }

    /// Column names of a table, in declaration order
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        table_columns(&self.conn, table)
    }

    /// Insert-or-update wide rows in one transaction.
    ///
    /// Only columns present in the batch are written. Returns the number of
    /// rows processed.
    pub fn upsert(&mut self, table: &str, rows: &[WideRow], options: UpsertOptions) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut columns: Vec<&str> = Vec::new();
        for row in rows {
            for column in row.values.keys() {
                if columns.contains(&column.as_str()) {
                    continue;
                }
                if let Some(clash) = columns.iter().find(|c| c.eq_ignore_ascii_case(column)) {
                    return Err(IngestError::ColumnCollision {
                        column: column.clone(),
                        first: clash.to_string(),
                        second: column.clone(),
                    });
                }
                columns.push(column.as_str());
            }
        }

        let tx = self.conn.transaction()?;
        create_readings_table(&tx, table)?;
        let added = reconcile_columns(&tx, table, &columns, options.schema_evolution)?;
        if !added.is_empty() {
            info!(table, columns = ?added, "Added value columns");
        }

        let sql = upsert_sql(table, &columns, options.policy);
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let mut values: Vec<SqlValue> = Vec::with_capacity(columns.len() + 1);
                values.push(SqlValue::Text(timestamp_key(&row.timestamp)));
                for column in &columns {
                    values.push(match row.values.get(*column).copied().flatten() {
                        Some(v) => SqlValue::Real(v),
                        None => SqlValue::Null,
                    });
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        debug!(table, rows = rows.len(), "Upserted rows");
        Ok(rows.len())
    }

    /// All records with timestamp in `[start, end]`, ascending.
    ///
    /// Open bounds select everything on that side. A table that was never
    /// written yields `NoData`.
    pub fn query_range(
        &self,
        table: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<QueryOutcome> {
        if !self.table_exists(table)? {
            return Ok(QueryOutcome::NoData);
        }

        let sql = format!(
            "SELECT * FROM {} WHERE (?1 IS NULL OR timestamp >= ?1) AND (?2 IS NULL OR timestamp <= ?2)
             ORDER BY timestamp ASC",
            quote_ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let keep: Vec<(usize, String)> = names
            .into_iter()
            .enumerate()
            .filter(|(_, name)| name != ID_COLUMN)
            .collect();

        let mut data: Map<String, Value> = keep
            .iter()
            .map(|(_, name)| (name.clone(), Value::Array(Vec::new())))
            .collect();
        let mut count = 0usize;

        let start_key = start.map(|s| timestamp_key(&s));
        let end_key = end.map(|e| timestamp_key(&e));
        let mut rows = stmt.query(params![start_key, end_key])?;
        while let Some(row) = rows.next()? {
            for (idx, name) in &keep {
                let value = if name == TIMESTAMP_COLUMN {
                    let stored: String = row.get(*idx)?;
                    Value::String(render_timestamp(&stored))
                } else {
                    cell_to_json(row.get_ref(*idx)?)
                };
                if let Some(Value::Array(column)) = data.get_mut(name) {
                    column.push(value);
                }
            }
            count += 1;
        }

        if count == 0 {
            return Ok(QueryOutcome::NoData);
        }

        Ok(QueryOutcome::Rows(ColumnTable {
            columns: keep.into_iter().map(|(_, name)| name).collect(),
            rows: count,
            data,
        }))
    }

    /// Row count and time span of a table, `None` if it does not exist
    pub fn table_summary(&self, table: &str) -> Result<Option<TableSummary>> {
        if !self.table_exists(table)? {
            return Ok(None);
        }

        let sql = format!(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM {}",
            quote_ident(table)
        );
        let summary = self.conn.query_row(&sql, [], |row| {
            Ok(TableSummary {
                table: table.to_string(),
                rows: row.get(0)?,
                first: row.get(1)?,
                last: row.get(2)?,
            })
        })?;
        Ok(Some(summary))
    }

    // =========================================================================
    // Run ledger
    // =========================================================================

    /// Record the outcome of one window
    pub fn record_run(&self, run: &IngestRun) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO ingest_runs (source, source_id, window_start, window_end, status, rows, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    run.source,
                    run.source_id,
                    run.window_start.to_rfc3339(),
                    run.window_end.to_rfc3339(),
                    run.status.to_string(),
                    run.rows,
                    run.error,
                ],
            )
            .map_err(|e| IngestError::Database(format!("Failed to record run: {}", e)))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Unresolved failed windows, oldest window first
    pub fn failed_runs(&self, source: Option<&str>) -> Result<Vec<IngestRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source, source_id, window_start, window_end, status, rows, error, attempted_at
             FROM ingest_runs
             WHERE status = 'failed' AND (?1 IS NULL OR source = ?1)
             ORDER BY window_start ASC, id ASC",
        )?;

        let runs = stmt
            .query_map(params![source], |row| {
                let status: String = row.get(5)?;
                Ok(IngestRun {
                    id: Some(row.get(0)?),
                    source: row.get(1)?,
                    source_id: row.get(2)?,
                    window_start: parse_rfc3339(&row.get::<_, String>(3)?),
                    window_end: parse_rfc3339(&row.get::<_, String>(4)?),
                    status: status.parse().unwrap_or(RunStatus::Failed),
                    rows: row.get(6)?,
                    error: row.get(7)?,
                    attempted_at: row
                        .get::<_, Option<String>>(8)?
                        .map(|s| parse_rfc3339(&s)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Mark failed entries for a window resolved after a successful re-run
    pub fn resolve_failed(
        &self,
        source: &str,
        source_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<usize> {
        let count = self
            .conn
            .execute(
                "UPDATE ingest_runs SET status = 'resolved'
                 WHERE status = 'failed' AND source = ? AND source_id = ?
                   AND window_start = ? AND window_end = ?",
                params![
                    source,
                    source_id,
                    window_start.to_rfc3339(),
                    window_end.to_rfc3339()
                ],
            )
            .map_err(|e| IngestError::Database(format!("Failed to resolve runs: {}", e)))?;

        Ok(count)
    }

    /// Count ledger entries by status for a source
    pub fn count_runs_by_status(&self, source: &str) -> Result<Vec<(RunStatus, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM ingest_runs WHERE source = ? GROUP BY status ORDER BY status",
        )?;
        let counts = stmt
            .query_map(params![source], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(counts
            .into_iter()
            .filter_map(|(status, count)| status.parse().ok().map(|s| (s, count)))
            .collect())
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn create_readings_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL UNIQUE
            )",
            quote_ident(table)
        ),
        [],
    )?;
    Ok(())
}

/// Compare the batch's columns with the table; add or reject the missing ones
fn reconcile_columns(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    evolve: bool,
) -> Result<Vec<String>> {
    // SQLite column names are case-insensitive
    let existing: Vec<String> = table_columns(conn, table)?
        .into_iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let mut missing: Vec<String> = Vec::new();
    for column in columns {
        let lower = column.to_ascii_lowercase();
        let seen = existing.contains(&lower)
            || missing.iter().any(|m| m.eq_ignore_ascii_case(column));
        if !seen {
            missing.push(column.to_string());
        }
    }

    if missing.is_empty() {
        return Ok(missing);
    }
    if !evolve {
        return Err(IngestError::SchemaMismatch {
            table: table.to_string(),
            missing,
        });
    }

    for column in &missing {
        conn.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} REAL",
                quote_ident(table),
                quote_ident(column)
            ),
            [],
        )?;
    }
    Ok(missing)
}

fn upsert_sql(table: &str, columns: &[&str], policy: ConflictPolicy) -> String {
    let mut names = vec![quote_ident(TIMESTAMP_COLUMN)];
    names.extend(columns.iter().map(|c| quote_ident(c)));
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();

    let conflict = if columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| {
                let col = quote_ident(c);
                match policy {
                    ConflictPolicy::Merge => format!("{0} = COALESCE(excluded.{0}, {0})", col),
                    ConflictPolicy::Replace => format!("{0} = excluded.{0}", col),
                }
            })
            .collect();
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", "),
        quote_ident(TIMESTAMP_COLUMN),
        conflict
    )
}

fn render_timestamp(stored: &str) -> String {
    NaiveDateTime::parse_from_str(stored, STORED_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc().format(QUERY_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|_| stored.to_string())
}

fn cell_to_json(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use std::collections::BTreeMap;

    fn hour(h: u32) -> DateTime<Tz> {
        chrono_tz::America::Chicago
            .with_ymd_and_hms(2025, 3, 1, h, 0, 0)
            .unwrap()
    }

    fn row(h: u32, values: &[(&str, Option<f64>)]) -> WideRow {
        WideRow {
            timestamp: hour(h),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn rows_of(outcome: QueryOutcome) -> ColumnTable {
        match outcome {
            QueryOutcome::Rows(table) => table,
            QueryOutcome::NoData => panic!("expected rows"),
        }
    }

    #[test]
    fn test_upsert_creates_table_and_columns() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        let rows = vec![row(10, &[("Pitch", Some(1.0)), ("Roll", Some(2.0))])];

        assert_eq!(db.upsert("ThingSpeak", &rows, UpsertOptions::default()).unwrap(), 1);
        assert_eq!(
            db.table_columns("ThingSpeak").unwrap(),
            vec!["id", "timestamp", "Pitch", "Roll"]
        );
    }

    #[test]
    fn test_columns_differing_only_in_case() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        let clashing = vec![row(10, &[("Soil", Some(1.0))]), row(11, &[("soil", Some(2.0))])];

        let err = db.upsert("Zentra", &clashing, UpsertOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::ColumnCollision { .. }));
        assert!(!db.table_exists("Zentra").unwrap());

        db.upsert("Zentra", &[row(10, &[("Soil", Some(1.0))])], UpsertOptions::default())
            .unwrap();
        db.upsert("Zentra", &[row(11, &[("SOIL", Some(2.0))])], UpsertOptions::default())
            .unwrap();
        assert_eq!(db.table_columns("Zentra").unwrap(), vec!["id", "timestamp", "Soil"]);
        assert_eq!(rows_of(db.query_range("Zentra", None, None).unwrap()).rows, 2);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        let rows = vec![
            row(10, &[("Pitch", Some(1.0)), ("Roll", None)]),
            row(11, &[("Pitch", Some(1.5)), ("Roll", Some(0.5))]),
        ];

        db.upsert("ThingSpeak", &rows, UpsertOptions::default()).unwrap();
        let first = db.query_range("ThingSpeak", None, None).unwrap();
        db.upsert("ThingSpeak", &rows, UpsertOptions::default()).unwrap();
        let second = db.query_range("ThingSpeak", None, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(rows_of(second).rows, 2);
    }

    #[test]
    fn test_merge_keeps_columns_absent_from_batch() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        db.upsert(
            "SensorReadings",
            &[row(10, &[("A", Some(1.0)), ("B", Some(2.0))])],
            UpsertOptions::default(),
        )
        .unwrap();
        db.upsert(
            "SensorReadings",
            &[row(10, &[("A", Some(5.0)), ("C", Some(7.0))])],
            UpsertOptions::default(),
        )
        .unwrap();

        let table = rows_of(db.query_range("SensorReadings", None, None).unwrap());
        assert_eq!(table.rows, 1);
        assert_eq!(table.column("A").unwrap()[0], Value::from(5.0));
        assert_eq!(table.column("B").unwrap()[0], Value::from(2.0));
        assert_eq!(table.column("C").unwrap()[0], Value::from(7.0));
    }

    #[test]
    fn test_merge_null_does_not_clear() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        db.upsert("t", &[row(10, &[("A", Some(1.0))])], UpsertOptions::default())
            .unwrap();
        db.upsert("t", &[row(10, &[("A", None)])], UpsertOptions::default())
            .unwrap();

        let table = rows_of(db.query_range("t", None, None).unwrap());
        assert_eq!(table.column("A").unwrap()[0], Value::from(1.0));
    }

    #[test]
    fn test_replace_overwrites_nulls() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        let replace = UpsertOptions {
            policy: ConflictPolicy::Replace,
            schema_evolution: true,
        };
        db.upsert("t", &[row(10, &[("A", Some(1.0)), ("B", Some(2.0))])], replace)
            .unwrap();
        db.upsert("t", &[row(10, &[("A", None)])], replace).unwrap();

        let table = rows_of(db.query_range("t", None, None).unwrap());
        assert_eq!(table.column("A").unwrap()[0], Value::Null);
        assert_eq!(table.column("B").unwrap()[0], Value::from(2.0));
    }

    #[test]
    fn test_schema_mismatch_without_evolution() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        db.upsert("t", &[row(10, &[("A", Some(1.0))])], UpsertOptions::default())
            .unwrap();

        let strict = UpsertOptions {
            policy: ConflictPolicy::Merge,
            schema_evolution: false,
        };
        let err = db
            .upsert("t", &[row(11, &[("A", Some(1.0)), ("B", Some(2.0))])], strict)
            .unwrap_err();
        match err {
            IngestError::SchemaMismatch { table, missing } => {
                assert_eq!(table, "t");
                assert_eq!(missing, vec!["B"]);
            }
            other => panic!("unexpected error: {}", other),
        }

        // The failed batch left nothing behind
        let table = rows_of(db.query_range("t", None, None).unwrap());
        assert_eq!(table.rows, 1);
    }

    #[test]
    fn test_query_range_bounds_and_format() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        let rows: Vec<_> = (8..13).map(|h| row(h, &[("A", Some(f64::from(h)))])).collect();
        db.upsert("t", &rows, UpsertOptions::default()).unwrap();

        let start = hour(9).with_timezone(&Utc);
        let end = hour(11).with_timezone(&Utc);
        let table = rows_of(db.query_range("t", Some(start), Some(end)).unwrap());

        assert_eq!(table.rows, 3);
        assert!(!table.columns.contains(&"id".to_string()));
        // 09:00 CST is 15:00 UTC
        assert_eq!(
            table.column("timestamp").unwrap()[0],
            Value::from("2025-03-01T15:00:00.000000Z")
        );
        assert_eq!(
            table.column("A").unwrap(),
            &vec![Value::from(9.0), Value::from(10.0), Value::from(11.0)]
        );
    }

    #[test]
    fn test_query_no_data() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        assert_eq!(db.query_range("missing", None, None).unwrap(), QueryOutcome::NoData);

        db.upsert("t", &[row(10, &[("A", Some(1.0))])], UpsertOptions::default())
            .unwrap();
        let later = hour(20).with_timezone(&Utc);
        assert_eq!(
            db.query_range("t", Some(later), None).unwrap(),
            QueryOutcome::NoData
        );
    }

    #[test]
    fn test_quoted_identifiers() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        let rows = vec![row(10, &[("ATMOS_41_-_Air_Temperature", Some(3.4)), ("odd\"name", Some(1.0))])];
        db.upsert("SensorReadings", &rows, UpsertOptions::default())
            .unwrap();
        let table = rows_of(db.query_range("SensorReadings", None, None).unwrap());
        assert_eq!(table.column("odd\"name").unwrap()[0], Value::from(1.0));
    }

    #[test]
    fn test_table_summary() {
        let mut db = ReadingsDb::open_in_memory().unwrap();
        assert_eq!(db.table_summary("t").unwrap(), None);

        db.upsert(
            "t",
            &[row(10, &[("A", Some(1.0))]), row(12, &[("A", Some(1.0))])],
            UpsertOptions::default(),
        )
        .unwrap();
        let summary = db.table_summary("t").unwrap().unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.first.as_deref(), Some("2025-03-01 16:00:00"));
        assert_eq!(summary.last.as_deref(), Some("2025-03-01 18:00:00"));
    }

    #[test]
    fn test_run_ledger() {
        let db = ReadingsDb::open_in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 8, 6, 0, 0).unwrap();
        let run = IngestRun {
            id: None,
            source: "zentra".to_string(),
            source_id: "z6".to_string(),
            window_start: start,
            window_end: end,
            status: RunStatus::Failed,
            rows: 0,
            error: Some("API error 500: boom".to_string()),
            attempted_at: None,
        };
        db.record_run(&run).unwrap();
        db.record_run(&IngestRun {
            status: RunStatus::Ingested,
            rows: 168,
            error: None,
            ..run.clone()
        })
        .unwrap();

        let failed = db.failed_runs(Some("zentra")).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].window_start, start);
        assert_eq!(failed[0].error.as_deref(), Some("API error 500: boom"));
        assert!(failed[0].attempted_at.is_some());
        assert!(db.failed_runs(Some("thingspeak")).unwrap().is_empty());

        assert_eq!(db.resolve_failed("zentra", "z6", start, end).unwrap(), 1);
        assert!(db.failed_runs(None).unwrap().is_empty());

        let counts = db.count_runs_by_status("zentra").unwrap();
        assert!(counts.contains(&(RunStatus::Ingested, 1)));
        assert!(counts.contains(&(RunStatus::Resolved, 1)));
    }

    #[test]
    fn test_upsert_sql_merge() {
        let sql = upsert_sql("t", &["A"], ConflictPolicy::Merge);
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"timestamp\", \"A\") VALUES (?1, ?2) ON CONFLICT(\"timestamp\") DO UPDATE SET \"A\" = COALESCE(excluded.\"A\", \"A\")"
        );
    }
}
