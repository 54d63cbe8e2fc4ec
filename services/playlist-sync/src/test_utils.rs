//!
//! src/test_utils.rs
//!
//! In-memory stand-ins for the remote services and stores
//!

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::catalog::{ExternalUrls, MusicCatalog, PlaylistMeta, RawAlbum, RawArtist, RawItem, RawTrack, SavedPage};
use crate::errors::SyncError;
use crate::sheet::{SheetApi, SheetApiError};
use crate::sink::{TrackSink, TrackStore};
use crate::throttle::Pause;
use crate::types::TrackRecord;

pub fn track(name: &str, artist: &str, url: &str) -> TrackRecord {
    TrackRecord {
        name: name.to_string(),
        artist: artist.to_string(),
        playlist_name: None,
        track_url: url.to_string(),
        playlist_url: None,
        release_date: None,
        added_at: None,
        created_at: "2025/01/01".to_string(),
        like: false
    }
}

pub fn raw_track(name: &str, artist: &str, url: &str) -> RawTrack {
    RawTrack {
        name: Some(name.to_string()),
        artists: vec![RawArtist { name: Some(artist.to_string()) }],
        external_urls: Some(ExternalUrls { spotify: Some(url.to_string()) }),
        album: Some(RawAlbum { release_date: Some("2024-05-01".to_string()) })
    }
}

pub fn raw(name: &str, artist: &str, url: &str) -> RawItem {
    RawItem {
        added_at: Some("2025-01-01T00:00:00Z".to_string()),
        track: Some(raw_track(name, artist, url))
    }
}

/// Records requested sleeps instead of sleeping
#[derive(Default)]
pub struct RecordingPause {
    taken: RefCell<Vec<Duration>>
}

impl RecordingPause {
    pub fn taken(&self) -> Vec<Duration> {
        self.taken.borrow().clone()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        self.taken.borrow_mut().push(duration);
    }
}

/// Worksheet with a fixed row capacity and scripted write failures
pub struct FakeSheet {
    rows: RefCell<Vec<Vec<String>>>,
    capacity: Cell<u32>,
    write_errors: RefCell<VecDeque<SheetApiError>>,
    calls: RefCell<Vec<String>>
}

impl FakeSheet {
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            rows: RefCell::new(Vec::new()),
            capacity: Cell::new(capacity),
            write_errors: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new())
        }
    }

    pub fn seed(&self, rows: Vec<Vec<String>>) {
        *self.rows.borrow_mut() = rows;
    }

    pub fn fail_next_write(&self, error: SheetApiError) {
        self.write_errors.borrow_mut().push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.borrow().clone()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl SheetApi for FakeSheet {
    fn row_values(&self, row: u32) -> Result<Vec<String>, SheetApiError> {
        self.log(format!("row_values({row})"));
        Ok(self.rows.borrow().get(row as usize - 1).cloned().unwrap_or_default())
    }

    fn col_values(&self, col: u32) -> Result<Vec<String>, SheetApiError> {
        self.log(format!("col_values({col})"));
        Ok(self.rows.borrow().iter()
            .map(|r| r.get(col as usize - 1).cloned().unwrap_or_default())
            .collect())
    }

    fn all_values(&self) -> Result<Vec<Vec<String>>, SheetApiError> {
        self.log("all_values".to_string());
        Ok(self.rows())
    }

    fn write_row(&self, row: u32, values: &[String]) -> Result<(), SheetApiError> {
        self.log(format!("write_row({row})"));
        if let Some(e) = self.write_errors.borrow_mut().pop_front() {
            return Err(e);
        }
        if row > self.capacity.get() {
            return Err(SheetApiError::TooSmall(format!("row {row} exceeds grid limits")));
        }
        let mut rows = self.rows.borrow_mut();
        let idx = row as usize - 1;
        if rows.len() <= idx {
            rows.resize(idx + 1, Vec::new());
        }
        rows[idx] = values.to_vec();
        Ok(())
    }

    fn add_rows(&self, count: u32) -> Result<(), SheetApiError> {
        self.log(format!("add_rows({count})"));
        self.capacity.set(self.capacity.get() + count);
        Ok(())
    }
}

/// Catalog backed by in-memory playlists. Adds and removes mutate them.
#[derive(Default)]
pub struct FakeCatalog {
    playlists: RefCell<HashMap<String, (PlaylistMeta, Vec<RawItem>)>>,
    failing: HashSet<String>,
    page_calls: RefCell<Vec<(String, u32, u32)>>,
    added: RefCell<Vec<(String, Vec<String>, Option<u32>)>>,
    removed: RefCell<Vec<(String, Vec<String>)>>,
    pub playing: Option<RawTrack>,
    pub recent: Vec<RawItem>,
    pub saved: Vec<RawItem>
}

impl FakeCatalog {
    pub fn with_playlist(self, id: &str, name: &str, items: Vec<RawItem>) -> Self {
        let meta = PlaylistMeta {
            name: name.to_string(),
            url: Some(format!("https://open.spotify.com/playlist/{id}")),
            total: items.len() as u32
        };
        self.playlists.borrow_mut().insert(id.to_string(), (meta, items));
        self
    }

    pub fn fail(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn page_calls(&self) -> Vec<(String, u32, u32)> {
        self.page_calls.borrow().clone()
    }

    pub fn added(&self) -> Vec<(String, Vec<String>, Option<u32>)> {
        self.added.borrow().clone()
    }

    pub fn removed(&self) -> Vec<(String, Vec<String>)> {
        self.removed.borrow().clone()
    }

    /// Urls currently in a playlist, in order
    pub fn urls(&self, id: &str) -> Vec<String> {
        self.playlists.borrow().get(id)
            .map(|(_, items)| items.iter().filter_map(url_of).collect())
            .unwrap_or_default()
    }
}

fn url_of(item: &RawItem) -> Option<String> {
    item.track.as_ref()?.external_urls.as_ref()?.spotify.clone()
}

impl MusicCatalog for FakeCatalog {
    fn get_playlist(&self, playlist_id: &str) -> Result<PlaylistMeta, SyncError> {
        self.playlists.borrow().get(playlist_id)
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| SyncError::Http(format!("status 404: {playlist_id}")))
    }

    fn get_playlist_items(&self, playlist_id: &str, offset: u32, limit: u32) ->
        Result<Vec<RawItem>, SyncError> {
        self.page_calls.borrow_mut().push((playlist_id.to_string(), offset, limit));
        if self.failing.contains(playlist_id) {
            return Err(SyncError::Http("status 500 Internal Server Error".to_string()));
        }
        let playlists = self.playlists.borrow();
        let (_, items) = playlists.get(playlist_id)
            .ok_or_else(|| SyncError::Http(format!("status 404: {playlist_id}")))?;
        Ok(items.iter().skip(offset as usize).take(limit as usize).cloned().collect())
    }

    fn add_items(&self, playlist_id: &str, track_ids: &[String], position: Option<u32>) ->
        Result<(), SyncError> {
        self.added.borrow_mut().push((playlist_id.to_string(), track_ids.to_vec(), position));
        if let Some((meta, items)) = self.playlists.borrow_mut().get_mut(playlist_id) {
            let new: Vec<RawItem> = track_ids.iter().map(|u| raw("", "", u)).collect();
            let at = position.map(|p| (p as usize).min(items.len())).unwrap_or(items.len());
            items.splice(at..at, new);
            meta.total = items.len() as u32;
        }
        Ok(())
    }

    fn remove_items(&self, playlist_id: &str, track_ids: &[String]) -> Result<(), SyncError> {
        self.removed.borrow_mut().push((playlist_id.to_string(), track_ids.to_vec()));
        if let Some((meta, items)) = self.playlists.borrow_mut().get_mut(playlist_id) {
            items.retain(|i| url_of(i).is_none_or(|u| !track_ids.contains(&u)));
            meta.total = items.len() as u32;
        }
        Ok(())
    }

    fn get_currently_playing(&self) -> Result<Option<RawTrack>, SyncError> {
        Ok(self.playing.clone())
    }

    fn get_recently_played(&self) -> Result<Vec<RawItem>, SyncError> {
        Ok(self.recent.clone())
    }

    fn get_saved_tracks(&self, offset: u32, limit: u32) -> Result<SavedPage, SyncError> {
        self.page_calls.borrow_mut().push(("saved".to_string(), offset, limit));
        Ok( SavedPage {
            total: self.saved.len() as u32,
            items: self.saved.iter().skip(offset as usize).take(limit as usize).cloned().collect()
        })
    }
}

/// Store kept in a vector
#[derive(Default)]
pub struct MemoryStore {
    pub records: RefCell<Vec<TrackRecord>>,
    pub fail_append: bool
}

impl MemoryStore {
    pub fn seeded(records: Vec<TrackRecord>) -> Self {
        Self { records: RefCell::new(records), fail_append: false }
    }
}

impl TrackStore for MemoryStore {
    fn label(&self) -> &str {
        "memory"
    }

    fn read_all(&self) -> Result<Vec<TrackRecord>, SyncError> {
        Ok(self.records.borrow().clone())
    }

    fn append(&self, records: &[TrackRecord]) -> Result<usize, SyncError> {
        if self.fail_append {
            return Err(SyncError::Connectivity { attempts: 3, reason: "offline".to_string() });
        }
        self.records.borrow_mut().extend_from_slice(records);
        Ok(records.len())
    }
}

/// Sink that remembers every delivery
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: RefCell<Vec<Vec<TrackRecord>>>,
    pub fail: bool
}

impl TrackSink for RecordingSink {
    fn label(&self) -> &str {
        "recording"
    }

    fn deliver(&self, records: &[TrackRecord]) -> Result<usize, SyncError> {
        if self.fail {
            return Err(SyncError::PartialDelivery {
                delivered: 0, total: records.len(), reason: "status 502".to_string()
            });
        }
        self.delivered.borrow_mut().push(records.to_vec());
        Ok(records.len())
    }
}
