//!
//! src/ledger.rs
//!
//! Flat-file ledger of every track already synced. It is the reference
//! the deduplicator reads, so layout problems fail loudly here.
//!

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, info, instrument};

use crate::errors::SyncError;
use crate::sink::TrackStore;
use crate::types::{header_mismatch, is_header, TrackRecord, COLUMNS};

#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
    label: String
}

/// What the first row of the file says about its state
enum HeaderState {
    Missing,
    Empty,
    Valid
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = format!("ledger {}", path.display());
        Self { path, label }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn reader(&self, file: File) -> csv::Reader<File> {
        ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file)
    }

    fn header_state(&self) -> Result<HeaderState, SyncError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HeaderState::Missing),
            Err(e) => return Err(e.into())
        };
        let mut first = StringRecord::new();
        if !self.reader(file).read_record(&mut first)? {
            return Ok(HeaderState::Empty);
        }
        if is_header(&first.iter().collect::<Vec<_>>()) {
            Ok(HeaderState::Valid)
        } else {
            Err(header_mismatch(&self.label, &first.iter().collect::<Vec<_>>()))
        }
    }

    /// True when a non-empty file stops mid-line
    fn lacks_final_newline(&self, file: &mut File) -> Result<bool, SyncError> {
        if file.metadata()?.len() == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0_u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n' && last[0] != b'\r')
    }
}

impl TrackStore for LedgerStore {
    fn label(&self) -> &str {
        &self.label
    }

    /// A missing, empty or header-only file reads as no records
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn read_all(&self) -> Result<Vec<TrackRecord>, SyncError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("ledger.missing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into())
        };

        let mut rows = self.reader(file).into_records();
        let Some(first) = rows.next() else {
            return Ok(Vec::new());
        };
        let first = first?;
        let cells: Vec<&str> = first.iter().collect();
        if !is_header(&cells) {
            return Err(header_mismatch(&self.label, &cells));
        }

        let mut tracks = Vec::new();
        for row in rows {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            let cells: Vec<&str> = row.iter().collect();
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            let track = TrackRecord::from_row(&cells)
                .map_err(|e| e.into_sync(&self.label, line))?;
            tracks.push(track);
        }
        info!(rows = tracks.len(), "ledger.read");
        Ok(tracks)
    }

    #[instrument(skip_all, fields(path = %self.path.display(), count = records.len()))]
    fn append(&self, records: &[TrackRecord]) -> Result<usize, SyncError> {
        if records.is_empty() {
            info!("ledger.append.empty");
            return Ok(0);
        }

        let needs_header = match self.header_state()? {
            HeaderState::Missing => {
                if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir)?;
                }
                info!("ledger.create");
                true
            }
            HeaderState::Empty => true,
            HeaderState::Valid => false
        };

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        if self.lacks_final_newline(&mut file)? {
            debug!("ledger.terminate.last_line");
            file.write_all(b"\n")?;
        }
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(COLUMNS)?;
        }
        for record in records {
            writer.write_record(record.to_row())?;
        }
        writer.flush()?;
        writer.into_inner()
            .map_err(|e| SyncError::Io(e.into_error()))?
            .sync_data()?;

        info!(written = records.len(), header = needs_header, "ledger.append");
        Ok(records.len())
    }
}
