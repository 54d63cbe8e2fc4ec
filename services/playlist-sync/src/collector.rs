//!
//! src/collector.rs
//!
//! Pages through upstream collections and turns raw items into
//! TrackRecords tagged with the playlist they were observed in
//!

use tracing::{debug, info, instrument, warn};

use crate::catalog::{MusicCatalog, RawItem, RawTrack};
use crate::errors::SyncError;
use crate::types::TrackRecord;

/// Capture timestamp source, local date as %Y/%m/%d
pub type Clock = fn() -> String;

pub fn local_date() -> String {
    chrono::Local::now().format("%Y/%m/%d").to_string()
}

pub trait TrackSource {
    fn fetch_all(&self, source_id: &str) -> Result<Vec<TrackRecord>, SyncError>;
}

/// Playlist context copied onto every record from that playlist
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub playlist_name: Option<String>,
    pub playlist_url: Option<String>
}

/// Builds a record from one raw track. Missing title, artist or url is
/// an upstream data error for that item alone.
pub fn record_from_track(
    track: &RawTrack,
    added_at: Option<String>,
    provenance: &Provenance,
    created_at: &str,
    like: bool
) -> Result<TrackRecord, SyncError> {
    let name = track.name.clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SyncError::UpstreamData("track has no name".to_string()))?;
    let artist = track.artists.first()
        .and_then(|a| a.name.clone())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| SyncError::UpstreamData(format!("track {name:?} has no artist")))?;
    let track_url = track.external_urls.as_ref()
        .and_then(|u| u.spotify.clone())
        .ok_or_else(|| SyncError::UpstreamData(format!("track {name:?} has no url")))?;

    Ok( TrackRecord {
        name,
        artist,
        playlist_name: provenance.playlist_name.clone(),
        track_url,
        playlist_url: provenance.playlist_url.clone(),
        release_date: track.album.as_ref().and_then(|a| a.release_date.clone()),
        added_at,
        created_at: created_at.to_string(),
        like
    })
}

/// Converts a page, skipping removed tracks and malformed items
fn convert_page(
    source_id: &str,
    items: Vec<RawItem>,
    provenance: &Provenance,
    created_at: &str,
    like: bool,
    out: &mut Vec<TrackRecord>
) {
    for item in items {
        let Some(track) = item.track.as_ref() else {
            debug!(source = source_id, "collect.skip.unavailable");
            continue;
        };
        match record_from_track(track, item.added_at.clone(), provenance, created_at, like) {
            Ok(record) => out.push(record),
            Err(e) => warn!(source = source_id, error = %e, "collect.skip.malformed")
        }
    }
}

fn fetch_error(source_id: &str, e: SyncError) -> SyncError {
    SyncError::Fetch { source_id: source_id.to_string(), reason: e.to_string() }
}

pub struct PlaylistCollector<'c> {
    catalog: &'c dyn MusicCatalog,
    page_size: u32,
    clock: Clock
}

impl<'c> PlaylistCollector<'c> {
    pub fn new(catalog: &'c dyn MusicCatalog, page_size: u32) -> Self {
        Self { catalog, page_size: page_size.max(1), clock: local_date }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl TrackSource for PlaylistCollector<'_> {
    /// Requests pages in increasing offset order until the reported total is
    /// covered. At least one page is always requested.
    #[instrument(skip(self), fields(page_size = self.page_size))]
    fn fetch_all(&self, source_id: &str) -> Result<Vec<TrackRecord>, SyncError> {
        let meta = self.catalog.get_playlist(source_id)
            .map_err(|e| fetch_error(source_id, e))?;
        let provenance = Provenance {
            playlist_name: Some(meta.name.clone()),
            playlist_url: meta.url.clone()
        };
        let created_at = (self.clock)();

        let mut records = Vec::with_capacity(meta.total as usize);
        let mut offset = 0_u32;
        let mut pages = 0_u32;
        loop {
            let items = self.catalog.get_playlist_items(source_id, offset, self.page_size)
                .map_err(|e| fetch_error(source_id, e))?;
            pages += 1;
            let empty = items.is_empty();
            convert_page(source_id, items, &provenance, &created_at, false, &mut records);

            offset += self.page_size;
            if empty || offset >= meta.total {
                break;
            }
        }

        info!(source = source_id, playlist = %meta.name, total = meta.total, pages,
            records = records.len(), "collect.done");
        Ok(records)
    }
}

/// The user's saved tracks. Records carry `like = true` and no provenance.
pub struct SavedTracksCollector<'c> {
    catalog: &'c dyn MusicCatalog,
    page_size: u32
}

impl<'c> SavedTracksCollector<'c> {
    pub fn new(catalog: &'c dyn MusicCatalog, page_size: u32) -> Self {
        Self { catalog, page_size: page_size.max(1) }
    }
}

impl TrackSource for SavedTracksCollector<'_> {
    #[instrument(skip(self), fields(page_size = self.page_size))]
    fn fetch_all(&self, source_id: &str) -> Result<Vec<TrackRecord>, SyncError> {
        let created_at = local_date();
        let provenance = Provenance::default();

        let mut records = Vec::new();
        let mut offset = 0_u32;
        loop {
            let page = self.catalog.get_saved_tracks(offset, self.page_size)
                .map_err(|e| fetch_error(source_id, e))?;
            let empty = page.items.is_empty();
            convert_page(source_id, page.items, &provenance, &created_at, true, &mut records);

            offset += self.page_size;
            if empty || offset >= page.total {
                break;
            }
        }

        info!(source = source_id, records = records.len(), "collect.saved.done");
        Ok(records)
    }
}
