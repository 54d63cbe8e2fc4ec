//!
//! src/types.rs
//!
//! Track record shared by every stage of the pipeline and its
//! positional row layout used by the ledger and the spreadsheet
//!

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Column order on disk and in the sheet. Both stores map by position.
pub const COLUMNS: [&str; 9] = [
    "name",
    "artist",
    "playlist_name",
    "track_url",
    "playlist_url",
    "release_date",
    "added_at",
    "created_at",
    "like"
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub name: String,
    pub artist: String,
    pub playlist_name: Option<String>,
    pub track_url: String,
    pub playlist_url: Option<String>,
    pub release_date: Option<String>,
    pub added_at: Option<String>,
    pub created_at: String,
    pub like: bool
}

/// Reason a row could not become a record, without store context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    Width(usize),
    Like(String)
}

impl RowError {
    pub fn into_sync(self, store: &str, line: u64) -> SyncError {
        let reason = match self {
            RowError::Width(n) =>
                format!("expected {} cells, found {n}", COLUMNS.len()),
            RowError::Like(v) => format!("invalid like flag {v:?}")
        };
        SyncError::CorruptRow { store: store.to_string(), line, reason }
    }
}

impl TrackRecord {
    pub fn to_row(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            self.name.clone(),
            self.artist.clone(),
            opt(&self.playlist_name),
            self.track_url.clone(),
            opt(&self.playlist_url),
            opt(&self.release_date),
            opt(&self.added_at),
            self.created_at.clone(),
            if self.like { "True".to_string() } else { "False".to_string() }
        ]
    }

    /// Strictly positional, cell count must equal COLUMNS
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Result<Self, RowError> {
        if row.len() != COLUMNS.len() {
            return Err(RowError::Width(row.len()));
        }
        let cell = |i: usize| row[i].as_ref().to_string();
        let opt  = |i: usize| {
            let v = row[i].as_ref();
            if v.is_empty() { None } else { Some(v.to_string()) }
        };

        Ok( Self {
            name: cell(0),
            artist: cell(1),
            playlist_name: opt(2),
            track_url: cell(3),
            playlist_url: opt(4),
            release_date: opt(5),
            added_at: opt(6),
            created_at: cell(7),
            like: parse_like(row[8].as_ref())?
        })
    }

    pub fn weak_key(&self) -> (&str, &str) {
        (&self.name, &self.artist)
    }

    pub fn strong_key(&self) -> &str {
        &self.track_url
    }
}

fn parse_like(v: &str) -> Result<bool, RowError> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(RowError::Like(v.to_string()))
    }
}

/// True when `found` is exactly the expected header
pub fn is_header<S: AsRef<str>>(found: &[S]) -> bool {
    found.len() == COLUMNS.len()
        && found.iter().zip(COLUMNS.iter()).all(|(f, c)| f.as_ref() == *c)
}

pub fn header_mismatch<S: AsRef<str>>(store: &str, found: &[S]) -> SyncError {
    SyncError::HeaderMismatch {
        store: store.to_string(),
        expected: COLUMNS.join(","),
        found: found.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(",")
    }
}
