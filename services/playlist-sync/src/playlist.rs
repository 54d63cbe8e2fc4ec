//!
//! src/playlist.rs
//!
//! Destination playlist writes. The catalog caps how many items one call
//! may carry, so both add and remove walk the input in ordered chunks.
//!

use tracing::{error, info, instrument, warn};

use crate::catalog::MusicCatalog;
use crate::errors::SyncError;
use crate::sink::TrackSink;
use crate::types::TrackRecord;

/// Explicit go-ahead for destructive playlist edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined
}

pub struct PlaylistSink<'c> {
    catalog: &'c dyn MusicCatalog,
    playlist_id: String,
    chunk_size: usize,
    insert_position: Option<u32>,
    label: String
}

impl<'c> PlaylistSink<'c> {
    pub fn new(
        catalog: &'c dyn MusicCatalog,
        playlist_id: impl Into<String>,
        chunk_size: usize,
        insert_position: Option<u32>
    ) -> Self {
        let playlist_id = playlist_id.into();
        let label = format!("playlist {playlist_id}");
        Self { catalog, playlist_id, chunk_size: chunk_size.max(1), insert_position, label }
    }

    pub fn playlist_id(&self) -> &str {
        &self.playlist_id
    }

    /// Adds ids chunk by chunk in input order. Returns how many were added.
    /// With an insert position each chunk lands right after the previous one.
    #[instrument(skip_all, fields(playlist = %self.playlist_id, count = track_ids.len()))]
    pub fn add(&self, track_ids: &[String]) -> Result<usize, SyncError> {
        if track_ids.is_empty() {
            info!("playlist.add.empty");
            return Ok(0);
        }

        let mut delivered = 0_usize;
        for chunk in track_ids.chunks(self.chunk_size) {
            let position = self.insert_position.map(|p| p + delivered as u32);
            if let Err(e) = self.catalog.add_items(&self.playlist_id, chunk, position) {
                error!(delivered, total = track_ids.len(), error = %e, "playlist.add.stopped");
                return Err(SyncError::PartialDelivery {
                    delivered, total: track_ids.len(), reason: e.to_string()
                });
            }
            delivered += chunk.len();
        }
        info!(delivered, "playlist.add.done");
        Ok(delivered)
    }

    /// Removes ids in chunks, only when confirmed
    #[instrument(skip_all, fields(playlist = %self.playlist_id, count = track_ids.len()))]
    pub fn remove(&self, track_ids: &[String], confirmation: Confirmation) -> Result<usize, SyncError> {
        if confirmation == Confirmation::Declined {
            warn!("playlist.remove.declined");
            return Ok(0);
        }
        if track_ids.is_empty() {
            info!("playlist.remove.empty");
            return Ok(0);
        }

        let mut removed = 0_usize;
        for chunk in track_ids.chunks(self.chunk_size) {
            if let Err(e) = self.catalog.remove_items(&self.playlist_id, chunk) {
                error!(removed, total = track_ids.len(), error = %e, "playlist.remove.stopped");
                return Err(SyncError::PartialDelivery {
                    delivered: removed, total: track_ids.len(), reason: e.to_string()
                });
            }
            removed += chunk.len();
        }
        info!(removed, "playlist.remove.done");
        Ok(removed)
    }
}

impl TrackSink for PlaylistSink<'_> {
    fn label(&self) -> &str {
        &self.label
    }

    fn deliver(&self, records: &[TrackRecord]) -> Result<usize, SyncError> {
        let ids: Vec<String> = records.iter().map(|r| r.track_url.clone()).collect();
        self.add(&ids)
    }
}
