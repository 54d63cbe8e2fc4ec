//!
//! src/sheet.rs
//!
//! Remote spreadsheet store. Every remote call runs through a retry loop
//! that tells apart dropped connections, quota exhaustion and a sheet that
//! has run out of rows. Writes are paced to stay under sustained limits.
//!

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SheetRetryConfig;
use crate::errors::SyncError;
use crate::sink::TrackStore;
use crate::throttle::{Pause, RateGate};
use crate::types::{header_mismatch, is_header, TrackRecord, COLUMNS};

const RATE_LIMIT_STATUS: &str = "RESOURCE_EXHAUSTED";
const SHEET_SIZE_STATUS: &str = "INVALID_ARGUMENT";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SheetApiError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("sheet too small: {0}")]
    TooSmall(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("api error {code} {status}: {message}")]
    Api { code: u16, status: String, message: String }
}

/// Maps a non-success response onto the retry classes
pub fn classify(http_status: u16, body: &str) -> SheetApiError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let status  = parsed["error"]["status"].as_str().unwrap_or_default().to_string();
    let message = parsed["error"]["message"].as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect());

    if http_status == 429 || status == RATE_LIMIT_STATUS {
        return SheetApiError::RateLimited(message);
    }
    if status == SHEET_SIZE_STATUS && message.to_ascii_lowercase().contains("grid limits") {
        return SheetApiError::TooSmall(message);
    }
    SheetApiError::Api { code: http_status, status, message }
}

/// Cell level primitives of one worksheet. Rows and columns are 1-based.
pub trait SheetApi {
    fn row_values(&self, row: u32) -> Result<Vec<String>, SheetApiError>;

    fn col_values(&self, col: u32) -> Result<Vec<String>, SheetApiError>;

    fn all_values(&self) -> Result<Vec<Vec<String>>, SheetApiError>;

    fn write_row(&self, row: u32, values: &[String]) -> Result<(), SheetApiError>;

    fn add_rows(&self, count: u32) -> Result<(), SheetApiError>;
}

pub struct SpreadsheetStore<A: SheetApi> {
    api: A,
    label: String,
    retry: SheetRetryConfig,
    pause: Arc<dyn Pause>
}

impl<A: SheetApi> SpreadsheetStore<A> {
    pub fn new(api: A, label: impl Into<String>, retry: SheetRetryConfig, pause: Arc<dyn Pause>) -> Self {
        Self { api, label: label.into(), retry, pause }
    }

    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Runs `op` until it succeeds or the attempt budget is spent.
    /// Quota and sheet-size errors wait and retry without spending an attempt.
    fn with_retry<T>(&self, what: &str, mut op: impl FnMut(&A) -> Result<T, SheetApiError>) ->
        Result<T, SyncError> {
        let mut attempts = 0_u32;
        let mut cycles = 0_u32;
        let mut grow = false;

        loop {
            let result = if grow {
                self.api.add_rows(self.retry.grow_rows).map(|_| None)
            } else {
                op(&self.api).map(Some)
            };

            let err = match result {
                Ok(Some(v)) => return Ok(v),
                Ok(None) => {
                    grow = false;
                    info!(store = %self.label, rows = self.retry.grow_rows, "sheet.grow");
                    continue;
                }
                Err(e) => e
            };

            match err {
                SheetApiError::TooSmall(msg) => {
                    cycles += 1;
                    self.check_cycles(cycles, what, &msg)?;
                    warn!(store = %self.label, op = what, reason = %msg, "sheet.too_small");
                    self.pause.pause(self.retry.grow_cooldown);
                    grow = true;
                }
                SheetApiError::RateLimited(msg) => {
                    cycles += 1;
                    self.check_cycles(cycles, what, &msg)?;
                    warn!(
                        store = %self.label, op = what, reason = %msg,
                        cooldown = ?self.retry.rate_limit_cooldown, "sheet.rate_limited"
                    );
                    self.pause.pause(self.retry.rate_limit_cooldown);
                }
                SheetApiError::Connection(msg) => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts {
                        error!(store = %self.label, op = what, attempts, reason = %msg,
                            "sheet.connection.exhausted");
                        return Err(SyncError::Connectivity { attempts, reason: msg });
                    }
                    warn!(
                        store = %self.label, op = what, attempts, reason = %msg,
                        cooldown = ?self.retry.connection_cooldown, "sheet.retry"
                    );
                    self.pause.pause(self.retry.connection_cooldown);
                }
                api @ SheetApiError::Api { .. } => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts {
                        error!(store = %self.label, op = what, attempts, error = %api,
                            "sheet.api.exhausted");
                        return Err(SyncError::SheetApi { attempts, reason: api.to_string() });
                    }
                    warn!(store = %self.label, op = what, attempts, error = %api, "sheet.retry");
                }
            }
        }
    }

    fn check_cycles(&self, cycles: u32, what: &str, msg: &str) -> Result<(), SyncError> {
        if cycles > self.retry.max_cooldown_cycles {
            return Err(SyncError::SheetApi {
                attempts: cycles,
                reason: format!("{what}: still failing after {cycles} cooldowns: {msg}")
            });
        }
        Ok(())
    }

    /// Count of non-empty cells in the key column, plus one
    fn next_available_row(api: &A) -> Result<u32, SheetApiError> {
        let used = api.col_values(1)?
            .iter()
            .filter(|v| !v.is_empty())
            .count();
        Ok(used as u32 + 1)
    }

    fn ensure_header(&self, gate: &RateGate<'_>) -> Result<(), SyncError> {
        let found = self.with_retry("read_header", |api| api.row_values(1))?;
        if is_header(&found) {
            return Ok(());
        }
        if found.iter().any(|c| !c.is_empty()) {
            return Err(header_mismatch(&self.label, &found));
        }

        let header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
        self.with_retry("write_header", |api| {
            let r = api.write_row(1, &header);
            gate.wait();
            r
        })?;
        info!(store = %self.label, "sheet.header.created");
        Ok(())
    }

    fn append_row(&self, values: &[String], gate: &RateGate<'_>) -> Result<u32, SyncError> {
        self.with_retry("append_row", |api| {
            let row = Self::next_available_row(api)?;
            let r = api.write_row(row, values);
            gate.wait();
            r.map(|_| row)
        })
    }
}

impl<A: SheetApi> TrackStore for SpreadsheetStore<A> {
    fn label(&self) -> &str {
        &self.label
    }

    #[instrument(skip_all, fields(store = %self.label))]
    fn read_all(&self) -> Result<Vec<TrackRecord>, SyncError> {
        let values = self.with_retry("read_all", |api| api.all_values())?;
        let Some((header, rows)) = values.split_first() else {
            return Ok(Vec::new());
        };
        if header.iter().all(|c| c.is_empty()) && rows.is_empty() {
            return Ok(Vec::new());
        }
        if !is_header(header) {
            return Err(header_mismatch(&self.label, header));
        }

        let mut tracks = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.iter().all(|c| c.is_empty()) {
                continue;
            }
            // trailing blank cells are omitted by the remote
            let mut row = row.clone();
            if row.len() < COLUMNS.len() {
                row.resize(COLUMNS.len(), String::new());
            }
            let track = TrackRecord::from_row(&row)
                .map_err(|e| e.into_sync(&self.label, i as u64 + 2))?;
            tracks.push(track);
        }
        info!(store = %self.label, rows = tracks.len(), "sheet.read");
        Ok(tracks)
    }

    #[instrument(skip_all, fields(store = %self.label, count = records.len()))]
    fn append(&self, records: &[TrackRecord]) -> Result<usize, SyncError> {
        if records.is_empty() {
            info!(store = %self.label, "sheet.append.empty");
            return Ok(0);
        }

        let gate = RateGate::new(self.retry.write_pacing, self.pause.as_ref());
        self.ensure_header(&gate)?;

        for (written, record) in records.iter().enumerate() {
            match self.append_row(&record.to_row(), &gate) {
                Ok(row) => debug!(row, name = %record.name, "sheet.row"),
                Err(e) => {
                    error!(store = %self.label, written, total = records.len(), error = %e,
                        "sheet.append.stopped");
                    return Err(e);
                }
            }
        }
        info!(store = %self.label, written = records.len(), "sheet.append.done");
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::{track, FakeSheet, RecordingPause};

    fn store(sheet: FakeSheet) -> (SpreadsheetStore<FakeSheet>, Arc<RecordingPause>) {
        let pause = Arc::new(RecordingPause::default());
        let s = SpreadsheetStore::new(sheet, "sheet", SheetRetryConfig::default(), pause.clone());
        (s, pause)
    }

    fn header() -> Vec<String> {
        COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn empty_append_makes_no_remote_calls() {
        let (s, pause) = store(FakeSheet::with_capacity(10));
        assert_eq!(s.append(&[]).unwrap(), 0);
        assert!(s.api().calls().is_empty());
        assert!(pause.taken().is_empty());
    }

    #[test]
    fn header_is_written_on_a_blank_sheet() {
        let (s, _) = store(FakeSheet::with_capacity(10));
        s.append(&[track("Song A", "Artist X", "u1")]).unwrap();
        let rows = s.api().rows();
        assert_eq!(rows[0], header());
        assert_eq!(rows[1][0], "Song A");
    }

    #[test]
    fn foreign_header_is_not_overwritten() {
        let sheet = FakeSheet::with_capacity(10);
        sheet.seed(vec![vec!["title".into(), "by".into()]]);
        let (s, _) = store(sheet);
        let err = s.append(&[track("a", "b", "u")]).unwrap_err();
        assert!(matches!(err, SyncError::HeaderMismatch { .. }));
        assert_eq!(s.api().rows().len(), 1);
    }

    #[test]
    fn next_row_is_recomputed_before_every_write() {
        let (s, _) = store(FakeSheet::with_capacity(10));
        s.append(&[track("a", "x", "u1"), track("b", "y", "u2")]).unwrap();
        let calls = s.api().calls();
        let reads = calls.iter().filter(|c| c.starts_with("col_values")).count();
        assert_eq!(reads, 2);
        assert!(calls.contains(&"write_row(2)".to_string()));
        assert!(calls.contains(&"write_row(3)".to_string()));
    }

    #[test]
    fn rate_limit_waits_once_and_succeeds_on_second_attempt() {
        let sheet = FakeSheet::with_capacity(10);
        sheet.seed(vec![header()]);
        sheet.fail_next_write(SheetApiError::RateLimited("quota".into()));
        let (s, pause) = store(sheet);

        assert_eq!(s.append(&[track("a", "x", "u1")]).unwrap(), 1);

        let cfg = SheetRetryConfig::default();
        let cooldowns = pause.taken().iter().filter(|d| **d == cfg.rate_limit_cooldown).count();
        assert_eq!(cooldowns, 1);
        let writes = s.api().calls().iter().filter(|c| c.starts_with("write_row")).count();
        assert_eq!(writes, 2);
        assert_eq!(s.api().rows()[1][0], "a");
    }

    #[test]
    fn full_sheet_grows_without_spending_an_attempt() {
        let sheet = FakeSheet::with_capacity(1);
        sheet.seed(vec![header()]);
        sheet.fail_next_write(SheetApiError::Connection("reset".into()));
        sheet.fail_next_write(SheetApiError::Connection("reset".into()));
        let (s, pause) = store(sheet);

        // two connection failures use two attempts, the grow must not use the third
        s.append(&[track("a", "x", "u1")]).unwrap();

        let cfg = SheetRetryConfig::default();
        assert!(s.api().calls().contains(&format!("add_rows({})", cfg.grow_rows)));
        assert_eq!(pause.taken().iter().filter(|d| **d == cfg.grow_cooldown).count(), 1);
        assert_eq!(pause.taken().iter().filter(|d| **d == cfg.connection_cooldown).count(), 2);
    }

    #[test]
    fn connection_failures_exhaust_after_three_attempts() {
        let sheet = FakeSheet::with_capacity(10);
        sheet.seed(vec![header()]);
        for _ in 0..3 {
            sheet.fail_next_write(SheetApiError::Connection("down".into()));
        }
        let (s, pause) = store(sheet);

        let err = s.append(&[track("a", "x", "u1")]).unwrap_err();
        assert!(matches!(err, SyncError::Connectivity { attempts: 3, .. }));
        let cfg = SheetRetryConfig::default();
        assert_eq!(pause.taken().iter().filter(|d| **d == cfg.connection_cooldown).count(), 2);
    }

    #[test]
    fn other_api_errors_are_fatal_once_attempts_run_out() {
        let sheet = FakeSheet::with_capacity(10);
        sheet.seed(vec![header()]);
        for _ in 0..3 {
            sheet.fail_next_write(SheetApiError::Api {
                code: 403, status: "PERMISSION_DENIED".into(), message: "no".into()
            });
        }
        let (s, _) = store(sheet);
        let err = s.append(&[track("a", "x", "u1")]).unwrap_err();
        assert!(matches!(err, SyncError::SheetApi { attempts: 3, .. }));
    }

    #[test]
    fn every_write_is_paced_even_when_it_fails() {
        let sheet = FakeSheet::with_capacity(10);
        sheet.seed(vec![header()]);
        sheet.fail_next_write(SheetApiError::Api {
            code: 500, status: "INTERNAL".into(), message: "boom".into()
        });
        let (s, pause) = store(sheet);
        s.append(&[track("a", "x", "u1"), track("b", "y", "u2")]).unwrap();

        let cfg = SheetRetryConfig::default();
        let paced = pause.taken().iter().filter(|d| **d == cfg.write_pacing).count();
        assert_eq!(paced, 3);
    }

    #[test]
    fn read_all_pads_trimmed_rows_and_skips_blank_ones() {
        let sheet = FakeSheet::with_capacity(10);
        let mut row = track("a", "x", "u1").to_row();
        row.truncate(8);
        sheet.seed(vec![header(), row, vec![], track("b", "y", "u2").to_row()]);
        let (s, _) = store(sheet);

        let tracks = s.read_all().unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(!tracks[0].like);
    }

    #[test]
    fn classify_maps_remote_statuses() {
        let quota = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#;
        assert!(matches!(classify(429, quota), SheetApiError::RateLimited(_)));

        let grid = r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","message":"Range ('new'!A1001) exceeds grid limits. Max rows: 1000"}}"#;
        assert!(matches!(classify(400, grid), SheetApiError::TooSmall(_)));

        let other = r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","message":"Unable to parse range"}}"#;
        assert!(matches!(classify(400, other), SheetApiError::Api { code: 400, .. }));

        assert!(matches!(classify(502, "<html>bad gateway</html>"), SheetApiError::Api { code: 502, .. }));
    }

    #[test]
    fn cooldown_cycles_are_bounded() {
        let sheet = FakeSheet::with_capacity(10);
        sheet.seed(vec![header()]);
        for _ in 0..3 {
            sheet.fail_next_write(SheetApiError::RateLimited("quota".into()));
        }
        let pause = Arc::new(RecordingPause::default());
        let retry = SheetRetryConfig { max_cooldown_cycles: 2, ..SheetRetryConfig::default() };
        let s = SpreadsheetStore::new(sheet, "sheet", retry, pause.clone());

        let err = s.append(&[track("a", "x", "u1")]).unwrap_err();
        assert!(matches!(err, SyncError::SheetApi { .. }));
        assert_eq!(pause.taken().iter().filter(|d| **d == Duration::from_secs(60)).count(), 2);
    }
}
