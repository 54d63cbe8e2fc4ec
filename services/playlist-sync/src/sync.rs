//!
//! src/sync.rs
//!
//! Drives one run: collect every source, keep only tracks the ledger has
//! not seen, then fan the same set out to ledger, spreadsheet and playlist.
//!
//! Collection and ledger failures abort the run. Spreadsheet and playlist
//! failures are recorded and the run carries on, the next run's dedup pass
//! re-delivers whatever they missed.
//!

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::collector::TrackSource;
use crate::dedup::{Deduplicator, IdentityKey};
use crate::errors::SyncError;
use crate::sink::{StageOutcome, TrackSink, TrackStore};
use crate::types::TrackRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Ledger,
    Spreadsheet,
    Playlist
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collecting,
    Deduplicating,
    Writing(SinkKind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Collecting,
    Deduplicating,
    Writing(SinkKind),
    Done,
    Failed(Stage)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub source_id: String,
    pub fetched: usize,
    pub accepted: usize
}

#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub sources: Vec<SourceOutcome>,
    pub new_tracks: Vec<TrackRecord>,
    pub ledger: StageOutcome,
    pub spreadsheet: StageOutcome,
    pub playlist: StageOutcome,
    /// Error that stopped the run, if any
    pub failure: Option<SyncError>
}

impl SyncReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            sources: Vec::new(),
            new_tracks: Vec::new(),
            ledger: StageOutcome::Pending,
            spreadsheet: StageOutcome::Pending,
            playlist: StageOutcome::Pending,
            failure: None
        }
    }

    /// Done with every sink written or skipped
    pub fn is_clean(&self) -> bool {
        self.state == RunState::Done
            && ![&self.ledger, &self.spreadsheet, &self.playlist].iter().any(|s| s.is_failed())
    }

    fn fail(&mut self, stage: Stage, e: SyncError) {
        error!(stage = ?stage, error = %e, "sync.failed");
        self.state = RunState::Failed(stage);
        for outcome in [&mut self.ledger, &mut self.spreadsheet, &mut self.playlist] {
            if *outcome == StageOutcome::Pending {
                *outcome = StageOutcome::Skipped;
            }
        }
        self.failure = Some(e);
    }

    fn outcome_mut(&mut self, kind: SinkKind) -> &mut StageOutcome {
        match kind {
            SinkKind::Ledger => &mut self.ledger,
            SinkKind::Spreadsheet => &mut self.spreadsheet,
            SinkKind::Playlist => &mut self.playlist
        }
    }
}

pub struct SyncOrchestrator<'a> {
    kind: &'static str,
    source: &'a dyn TrackSource,
    source_ids: Vec<String>,
    ledger: &'a dyn TrackStore,
    spreadsheet: &'a dyn TrackStore,
    playlist: Option<&'a dyn TrackSink>,
    dedup: Deduplicator,
    shutdown: CancellationToken,
    timeout: Option<Duration>
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        kind: &'static str,
        source: &'a dyn TrackSource,
        source_ids: Vec<String>,
        ledger: &'a dyn TrackStore,
        spreadsheet: &'a dyn TrackStore
    ) -> Self {
        Self {
            kind,
            source,
            source_ids,
            ledger,
            spreadsheet,
            playlist: None,
            dedup: Deduplicator::new(IdentityKey::Weak),
            shutdown: CancellationToken::new(),
            timeout: None
        }
    }

    pub fn with_playlist(mut self, playlist: &'a dyn TrackSink) -> Self {
        self.playlist = Some(playlist);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn checkpoint(&self, deadline: Option<Instant>) -> Result<(), SyncError> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::Cancelled("shutdown requested".to_string()));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SyncError::Cancelled("run deadline passed".to_string()));
        }
        Ok(())
    }

    pub fn run(&self) -> SyncReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync.run", %run_id, kind = self.kind);
        let _enter = span.enter();

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut report = SyncReport::new(run_id);
        info!(sources = self.source_ids.len(), "sync.start");

        report.state = RunState::Collecting;
        let mut batches = Vec::with_capacity(self.source_ids.len());
        for source_id in &self.source_ids {
            let fetched = self.checkpoint(deadline)
                .and_then(|_| self.source.fetch_all(source_id));
            match fetched {
                Ok(tracks) => batches.push((source_id.clone(), tracks)),
                Err(e) => {
                    report.fail(Stage::Collecting, e);
                    return report;
                }
            }
        }

        report.state = RunState::Deduplicating;
        let mut known = match self.ledger.read_all() {
            Ok(k) => k,
            Err(e) => {
                report.fail(Stage::Deduplicating, e);
                return report;
            }
        };
        for (source_id, tracks) in batches {
            let accepted = self.dedup.unique(&tracks, &known);
            info!(source = %source_id, fetched = tracks.len(), accepted = accepted.len(), "sync.source");
            report.sources.push(SourceOutcome {
                source_id,
                fetched: tracks.len(),
                accepted: accepted.len()
            });
            known.extend_from_slice(&accepted);
            report.new_tracks.extend(accepted);
        }
        info!(new = report.new_tracks.len(), "sync.dedup.done");

        let new_tracks = std::mem::take(&mut report.new_tracks);
        let result = self.write_all(&new_tracks, deadline, &mut report);
        report.new_tracks = new_tracks;
        if let Err((stage, e)) = result {
            report.fail(stage, e);
            return report;
        }

        report.state = RunState::Done;
        info!(
            new = report.new_tracks.len(),
            ledger = ?report.ledger,
            spreadsheet = ?report.spreadsheet,
            playlist = ?report.playlist,
            "sync.done"
        );
        report
    }

    /// Ledger first; only its failure stops the fan-out
    fn write_all(&self, tracks: &[TrackRecord], deadline: Option<Instant>, report: &mut SyncReport) ->
        Result<(), (Stage, SyncError)> {
        for kind in [SinkKind::Ledger, SinkKind::Spreadsheet, SinkKind::Playlist] {
            let stage = Stage::Writing(kind);
            report.state = RunState::Writing(kind);
            self.checkpoint(deadline).map_err(|e| (stage, e))?;

            let (label, result) = match kind {
                SinkKind::Ledger => (self.ledger.label(), self.ledger.append(tracks)),
                SinkKind::Spreadsheet => (self.spreadsheet.label(), self.spreadsheet.append(tracks)),
                SinkKind::Playlist => match self.playlist {
                    Some(p) => (p.label(), p.deliver(tracks)),
                    None => {
                        info!(sink = ?kind, "sync.sink.skipped");
                        *report.outcome_mut(kind) = StageOutcome::Skipped;
                        continue;
                    }
                }
            };

            match result {
                Ok(n) => {
                    info!(sink = label, written = n, "sync.sink.written");
                    *report.outcome_mut(kind) = StageOutcome::Written(n);
                }
                Err(e) if kind == SinkKind::Ledger => {
                    *report.outcome_mut(kind) = StageOutcome::Failed(e.to_string());
                    return Err((stage, e));
                }
                Err(e) => {
                    warn!(sink = label, error = %e, "sync.sink.failed");
                    *report.outcome_mut(kind) = StageOutcome::Failed(e.user_message());
                }
            }
        }
        Ok(())
    }
}
