//! Ingestion engine for provider telemetry
//!
//! Provides:
//! - Splitting of a requested range into bounded segments
//! - Rate-limited, paginated fetching per segment
//! - Calibration, hour alignment and pivoting of each segment in memory
//! - Idempotent upserts, one transaction per segment
//! - A run ledger so failed segments can be retried later

pub mod fetcher;
pub mod rate_limiter;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::client::TelemetryClient;
use crate::config::PipelineConfig;
use crate::db::models::{IngestRun, RawReading, RunStatus, Window};
use crate::error::{IngestError, Result};
use crate::sources::{apply_calibration, Source};
use crate::storage::{ReadingsDb, UpsertOptions};
use crate::transform::{align, pivot};

pub use fetcher::{fetch_page, fetch_window, FetchResult, PageOutcome};
pub use rate_limiter::RateLimiter;

/// Parse a user supplied timestamp.
///
/// Zoned input (RFC 3339) keeps its offset; naive input (`YYYY-MM-DD`,
/// `YYYY-MM-DD HH:MM[:SS]`, optionally with `T`) is taken to be in `tz`.
pub fn parse_datetime_input(input: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&tz));
    }

    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| IngestError::InvalidDateFormat(input.to_string()))?;

    // A local time skipped by a DST change does not exist
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| IngestError::InvalidDateFormat(format!("{} (not a valid {} time)", input, tz)))
}

/// Advance `at` by `length` of wall-clock time in its own zone, so segment
/// boundaries keep their time of day across DST changes
fn step_local(at: DateTime<Tz>, length: Duration) -> DateTime<Tz> {
    let target = at.naive_local() + length;
    match at.timezone().from_local_datetime(&target) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Skipped by a spring-forward change
        LocalResult::None => at + length,
    }
}

/// Split `[start, end]` into consecutive windows of `length`.
///
/// The last window is clipped to `end`; windows after the first start one
/// minute past the previous window's end so a boundary instant is claimed once.
pub fn split_windows(start: DateTime<Tz>, end: DateTime<Tz>, length: Duration) -> Result<Vec<Window>> {
    if start > end {
        return Err(IngestError::invalid_param(format!(
            "range start {} is after range end {}",
            start, end
        )));
    }
    if length <= Duration::zero() {
        return Err(IngestError::invalid_param("segment length must be positive"));
    }

    let mut boundaries = Vec::new();
    let mut cursor = start;
    while cursor < end {
        boundaries.push(cursor);
        cursor = step_local(cursor, length);
    }
    boundaries.push(end);

    let windows = boundaries
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let window_start = if i == 0 { pair[0] } else { pair[0] + Duration::minutes(1) };
            Window::new(window_start, pair[1])
        })
        .filter(|w| w.start <= w.end)
        .collect();

    Ok(windows)
}

/// Outcome of one window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowStatus {
    /// Rows upserted
    Ingested(usize),
    /// Provider had nothing (usable) for the window
    Empty,
    Failed(String),
}

impl WindowStatus {
    fn run_status(&self) -> RunStatus {
        match self {
            WindowStatus::Ingested(_) => RunStatus::Ingested,
            WindowStatus::Empty => RunStatus::Empty,
            WindowStatus::Failed(_) => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub window: Window,
    pub status: WindowStatus,
    /// Raw readings received, including those of an aborted fetch
    pub fetched: usize,
    pub pages: u32,
}

/// Per-window outcomes of one ingestion run
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub windows: Vec<WindowReport>,
}

impl IngestReport {
    pub fn rows_written(&self) -> usize {
        self.windows
            .iter()
            .map(|w| match w.status {
                WindowStatus::Ingested(rows) => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &WindowReport> {
        self.windows
            .iter()
            .filter(|w| matches!(w.status, WindowStatus::Failed(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Ingestion engine for orchestrating segment processing
pub struct IngestEngine {
    db: ReadingsDb,
    client: TelemetryClient,
    config: PipelineConfig,
    rate_limiter: RateLimiter,
}

impl IngestEngine {
    pub fn new(db: ReadingsDb, client: TelemetryClient, config: PipelineConfig) -> Self {
        let rate_limiter = RateLimiter::from_config(&config);
        Self {
            db,
            client,
            config,
            rate_limiter,
        }
    }

    pub fn db(&self) -> &ReadingsDb {
        &self.db
    }

    pub fn into_db(self) -> ReadingsDb {
        self.db
    }

    /// Ingest `[start, end]` for `source`, one segment at a time.
    ///
    /// Window-level failures are reported and recorded, then the next window
    /// runs. Only errors that would fail every window (configuration,
    /// parameters) end the run early.
    pub async fn ingest<S: Source + ?Sized>(
        &mut self,
        source: &S,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> Result<IngestReport> {
        let windows = split_windows(start, end, self.config.segment_length())?;
        info!(
            source = source.name(),
            source_id = source.source_id(),
            windows = windows.len(),
            "Starting ingestion from {} to {}",
            start,
            end
        );
        self.run_windows(source, &windows).await
    }

    /// Re-ingest the source's failed windows from the run ledger
    pub async fn retry_failed<S: Source + ?Sized>(&mut self, source: &S) -> Result<IngestReport> {
        let tz = self.config.timezone;
        let mut windows: Vec<Window> = Vec::new();
        for run in self.db.failed_runs(Some(source.name()))? {
            if run.source_id != source.source_id() {
                continue;
            }
            let window = Window::new(run.window_start.with_timezone(&tz), run.window_end.with_timezone(&tz));
            if !windows.contains(&window) {
                windows.push(window);
            }
        }

        if windows.is_empty() {
            info!(source = source.name(), source_id = source.source_id(), "No failed windows to retry");
            return Ok(IngestReport::default());
        }

        info!(
            source = source.name(),
            source_id = source.source_id(),
            windows = windows.len(),
            "Retrying failed windows"
        );
        self.run_windows(source, &windows).await
    }

    async fn run_windows<S: Source + ?Sized>(&mut self, source: &S, windows: &[Window]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for (i, window) in windows.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.segment_delay()).await;
            }
            report.windows.push(self.ingest_window(source, window).await?);
        }

        info!(
            source = source.name(),
            source_id = source.source_id(),
            windows = report.windows.len(),
            rows = report.rows_written(),
            failed = report.failed().count(),
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Fetch, transform and store one window, recording the outcome
    pub async fn ingest_window<S: Source + ?Sized>(&mut self, source: &S, window: &Window) -> Result<WindowReport> {
        let fetch = fetch_window(&self.client, source, window, &mut self.rate_limiter).await;
        let fetched = fetch.readings.len();
        let pages = fetch.pages;

        let outcome = match fetch.failure {
            // Partial pages are discarded; the window is retried as a whole
            Some(e) => Err(e),
            None => self.store(source, fetch.readings),
        };

        let status = match &outcome {
            Ok(0) => WindowStatus::Empty,
            Ok(rows) => WindowStatus::Ingested(*rows),
            Err(e) => WindowStatus::Failed(e.to_string()),
        };

        match &status {
            WindowStatus::Ingested(rows) => info!(
                source = source.name(),
                source_id = source.source_id(),
                window = %window,
                fetched,
                pages,
                rows,
                "Window ingested"
            ),
            WindowStatus::Empty => info!(
                source = source.name(),
                source_id = source.source_id(),
                window = %window,
                fetched,
                "No data for window"
            ),
            WindowStatus::Failed(reason) => error!(
                source = source.name(),
                source_id = source.source_id(),
                window = %window,
                fetched,
                pages,
                "Window failed: {}",
                reason
            ),
        }

        self.record(source, window, &status)?;

        if let Err(e) = outcome {
            if !e.is_window_scoped() {
                return Err(e);
            }
        }

        Ok(WindowReport {
            window: *window,
            status,
            fetched,
            pages,
        })
    }

    /// Calibrate, align, pivot and upsert; returns rows written
    fn store<S: Source + ?Sized>(&mut self, source: &S, mut readings: Vec<RawReading>) -> Result<usize> {
        if readings.is_empty() {
            return Ok(0);
        }

        apply_calibration(&mut readings, source.calibration());
        let aligned = align(&readings, self.config.timezone, source.alignment());
        let pivoted = pivot(&aligned, &self.config.column_separator)?;
        if pivoted.dropped > 0 {
            warn!(
                source = source.name(),
                source_id = source.source_id(),
                dropped = pivoted.dropped,
                "Readings dropped while reshaping"
            );
        }

        let options = UpsertOptions {
            policy: self.config.conflict_policy,
            schema_evolution: self.config.schema_evolution,
        };
        self.db.upsert(source.table(), &pivoted.rows, options)
    }

    fn record<S: Source + ?Sized>(&self, source: &S, window: &Window, status: &WindowStatus) -> Result<()> {
        let window_start = window.start.with_timezone(&Utc);
        let window_end = window.end.with_timezone(&Utc);

        self.db.record_run(&IngestRun {
            id: None,
            source: source.name().to_string(),
            source_id: source.source_id().to_string(),
            window_start,
            window_end,
            status: status.run_status(),
            rows: match status {
                WindowStatus::Ingested(rows) => *rows as i64,
                _ => 0,
            },
            error: match status {
                WindowStatus::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
            attempted_at: None,
        })?;

        if !matches!(status, WindowStatus::Failed(_)) {
            let resolved = self
                .db
                .resolve_failed(source.name(), source.source_id(), window_start, window_end)?;
            if resolved > 0 {
                info!(source = source.name(), window = %window, resolved, "Resolved earlier failures");
            }
        }
        Ok(())
    }
}
