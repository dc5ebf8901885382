//! Paginated, rate-limit aware retrieval of one window

use std::time::Duration;

use tracing::{debug, warn};

use super::rate_limiter::RateLimiter;
use crate::client::TelemetryClient;
use crate::db::models::{RawReading, Window};
use crate::error::IngestError;
use crate::sources::Source;

/// Result of requesting one page
#[derive(Debug)]
pub enum PageOutcome {
    Page(Vec<RawReading>),
    /// No readings; ends pagination
    Empty,
    /// Provider asked us to slow down, with its Retry-After hint if any
    RateLimited(Option<Duration>),
    Failed(IngestError),
}

/// Everything fetched for one window
#[derive(Debug, Default)]
pub struct FetchResult {
    /// Readings of all completed pages, in page order
    pub readings: Vec<RawReading>,
    /// Number of non-empty pages received
    pub pages: u32,
    /// Why the window was aborted, if it was
    pub failure: Option<IngestError>,
}

impl FetchResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Request a single page and classify the response
pub async fn fetch_page<S: Source + ?Sized>(
    client: &TelemetryClient,
    source: &S,
    window: &Window,
    page: u32,
) -> PageOutcome {
    let request = source.page_request(window, page);

    let payload = match client.get_json(&request).await {
        Ok(payload) => payload,
        Err(IngestError::RateLimited { retry_after }) => return PageOutcome::RateLimited(retry_after),
        Err(e) => return PageOutcome::Failed(e),
    };

    match source.parse_page(&payload) {
        Ok(readings) if readings.is_empty() => PageOutcome::Empty,
        Ok(readings) => PageOutcome::Page(readings),
        Err(e) => PageOutcome::Failed(e),
    }
}

/// Fetch every page of `window`.
///
/// A rate-limited page is retried after the cool-down until it succeeds or
/// the limiter gives up. Any other failure aborts the window; the readings
/// of pages completed before it are returned alongside the failure.
pub async fn fetch_window<S: Source + ?Sized>(
    client: &TelemetryClient,
    source: &S,
    window: &Window,
    limiter: &mut RateLimiter,
) -> FetchResult {
    let mut result = FetchResult::default();
    let mut page = 1u32;
    limiter.reset();

    loop {
        limiter.wait().await;

        match fetch_page(client, source, window, page).await {
            PageOutcome::Page(readings) => {
                limiter.on_success();
                let count = readings.len();
                debug!(
                    source = source.name(),
                    source_id = source.source_id(),
                    page,
                    readings = count,
                    "Fetched page"
                );
                result.readings.extend(readings);
                result.pages += 1;

                if !source.paginated() {
                    if count >= source.page_size() as usize {
                        warn!(
                            source = source.name(),
                            source_id = source.source_id(),
                            window = %window,
                            cap = source.page_size(),
                            "Result cap reached; window may be truncated, use shorter segments"
                        );
                    }
                    break;
                }
                page += 1;
            }
            PageOutcome::Empty => {
                limiter.on_success();
                break;
            }
            PageOutcome::RateLimited(retry_after) => {
                let wait = limiter.on_rate_limit(retry_after);
                if limiter.should_give_up() {
                    result.failure = Some(IngestError::RateLimited { retry_after });
                    break;
                }
                warn!(
                    source = source.name(),
                    source_id = source.source_id(),
                    page,
                    attempt = limiter.consecutive_429s(),
                    wait_secs = wait.as_secs_f64(),
                    "Rate limited; retrying the same page after cool-down"
                );
                tokio::time::sleep(wait).await;
            }
            PageOutcome::Failed(e) => {
                result.failure = Some(e);
                break;
            }
        }
    }

    result
}
