//!
//! src/commands.rs
//!
//! One-shot actions behind the menu besides the sync runs: look up the
//! current track and prune the destination playlist
//!

use std::fmt;

use tracing::{info, instrument, warn};

use crate::catalog::MusicCatalog;
use crate::collector::{local_date, record_from_track, PlaylistCollector, Provenance, TrackSource};
use crate::dedup::{Deduplicator, IdentityKey};
use crate::errors::SyncError;
use crate::playlist::{Confirmation, PlaylistSink};
use crate::sink::TrackStore;
use crate::types::TrackRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTrack {
    pub name: String,
    pub artist: String,
    pub playlist_name: Option<String>,
    /// Whether the ledger already holds this track
    pub recorded: bool
}

impl fmt::Display for CurrentTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.artist)?;
        match (&self.playlist_name, self.recorded) {
            (Some(p), _) => write!(f, " (from {p})"),
            (None, true) => write!(f, " (already recorded)"),
            (None, false) => Ok(())
        }
    }
}

/// Currently playing track, preferring the ledger's copy of it
#[instrument(skip_all)]
pub fn show_current(catalog: &dyn MusicCatalog, ledger: &dyn TrackStore) ->
    Result<Option<CurrentTrack>, SyncError> {
    let Some(raw) = catalog.get_currently_playing()? else {
        info!("current.none");
        return Ok(None);
    };
    let fresh = record_from_track(&raw, None, &Provenance::default(), &local_date(), false)?;

    let recorded = ledger.read_all()?
        .into_iter()
        .find(|r| r.strong_key() == fresh.strong_key());
    let current = match recorded {
        Some(r) => CurrentTrack {
            name: r.name, artist: r.artist, playlist_name: r.playlist_name, recorded: true
        },
        None => CurrentTrack {
            name: fresh.name, artist: fresh.artist, playlist_name: None, recorded: false
        }
    };
    info!(name = %current.name, recorded = current.recorded, "current.found");
    Ok(Some(current))
}

fn destination_contents(catalog: &dyn MusicCatalog, playlist: &PlaylistSink<'_>, page_size: u32) ->
    Result<Vec<TrackRecord>, SyncError> {
    PlaylistCollector::new(catalog, page_size).fetch_all(playlist.playlist_id())
}

fn urls(tracks: &[TrackRecord]) -> Vec<String> {
    tracks.iter().map(|t| t.track_url.clone()).collect()
}

/// Removes destination tracks that show up in the recently played list.
/// `confirm` sees the exact tracks before anything changes.
#[instrument(skip_all, fields(playlist = %playlist.playlist_id()))]
pub fn remove_recent<F>(
    catalog: &dyn MusicCatalog,
    playlist: &PlaylistSink<'_>,
    page_size: u32,
    confirm: F
) -> Result<usize, SyncError>
where
    F: FnOnce(&[TrackRecord]) -> Confirmation
{
    let created_at = local_date();
    let recent: Vec<TrackRecord> = catalog.get_recently_played()?
        .iter()
        .filter_map(|item| item.track.as_ref())
        .filter_map(|t| match record_from_track(t, None, &Provenance::default(), &created_at, false) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "remove.recent.skip");
                None
            }
        })
        .collect();

    let dedup = Deduplicator::new(IdentityKey::Strong);
    let contents = destination_contents(catalog, playlist, page_size)?;
    let (recent, _) = dedup.partition(&recent, &[]);
    let (_, played) = dedup.partition(&recent, &contents);

    if played.is_empty() {
        info!(recent = recent.len(), "remove.recent.none");
        return Ok(0);
    }
    let decision = confirm(&played);
    playlist.remove(&urls(&played), decision)
}

/// Removes positions `first..=last` (1-based) of the destination playlist.
/// The end is clamped to the playlist length.
#[instrument(skip_all, fields(playlist = %playlist.playlist_id(), first = first, last = last))]
pub fn remove_range<F>(
    catalog: &dyn MusicCatalog,
    playlist: &PlaylistSink<'_>,
    page_size: u32,
    first: usize,
    last: usize,
    confirm: F
) -> Result<usize, SyncError>
where
    F: FnOnce(&[TrackRecord]) -> Confirmation
{
    if first == 0 || first > last {
        return Err(SyncError::InvalidInput(
            format!("range {first}..{last} must start at 1 and not run backwards")
        ));
    }

    let contents = destination_contents(catalog, playlist, page_size)?;
    if first > contents.len() {
        warn!(len = contents.len(), "remove.range.out_of_bounds");
        return Ok(0);
    }
    let last = last.min(contents.len());
    let selected = &contents[first - 1..last];

    let decision = confirm(selected);
    playlist.remove(&urls(selected), decision)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::test_utils::{raw, raw_track, track, FakeCatalog, MemoryStore};

    fn dest(n: usize) -> FakeCatalog {
        let items = (1..=n).map(|i| raw(&format!("song {i}"), "artist", &format!("u{i}"))).collect();
        FakeCatalog::default().with_playlist("dest", "New", items)
    }

    #[test]
    fn current_track_prefers_ledger_row() {
        let mut catalog = FakeCatalog::default();
        catalog.playing = Some(raw_track("Song A", "Artist X", "u1"));
        let mut known = track("Song A (Remastered)", "Artist X", "u1");
        known.playlist_name = Some("Top 50".to_string());
        let ledger = MemoryStore::seeded(vec![known]);

        let current = show_current(&catalog, &ledger).unwrap().unwrap();
        assert!(current.recorded);
        assert_eq!(current.playlist_name.as_deref(), Some("Top 50"));
        assert_eq!(current.to_string(), "Song A (Remastered) - Artist X (from Top 50)");
    }

    #[test]
    fn current_track_falls_back_to_fresh_data() {
        let mut catalog = FakeCatalog::default();
        catalog.playing = Some(raw_track("Song B", "Artist Y", "u2"));
        let ledger = MemoryStore::seeded(vec![track("Song B", "Artist Y", "other-url")]);

        let current = show_current(&catalog, &ledger).unwrap().unwrap();
        assert!(!current.recorded);
        assert_eq!(current.to_string(), "Song B - Artist Y");
    }

    #[test]
    fn nothing_playing_is_not_an_error() {
        let catalog = FakeCatalog::default();
        assert_eq!(show_current(&catalog, &MemoryStore::default()).unwrap(), None);
    }

    #[test]
    fn recently_played_tracks_are_removed_once_confirmed() {
        let mut catalog = dest(4);
        catalog.recent = vec![raw("song 2", "artist", "u2"), raw("elsewhere", "x", "u9"), raw("song 2", "artist", "u2"), raw("song 4", "artist", "u4")];
        let playlist = PlaylistSink::new(&catalog, "dest", 100, Some(0));

        let seen = Cell::new(0);
        let removed = remove_recent(&catalog, &playlist, 100, |tracks| {
            seen.set(tracks.len());
            Confirmation::Confirmed
        }).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(seen.get(), 2);
        assert_eq!(catalog.urls("dest"), vec!["u1", "u3"]);
    }

    #[test]
    fn declined_prompt_leaves_playlist_alone() {
        let mut catalog = dest(2);
        catalog.recent = vec![raw("song 1", "artist", "u1")];
        let playlist = PlaylistSink::new(&catalog, "dest", 100, Some(0));

        let removed = remove_recent(&catalog, &playlist, 100, |_| Confirmation::Declined).unwrap();
        assert_eq!(removed, 0);
        assert!(catalog.removed().is_empty());
    }

    #[test]
    fn range_is_one_based_inclusive_and_clamped() {
        let catalog = dest(5);
        let playlist = PlaylistSink::new(&catalog, "dest", 100, Some(0));

        let removed = remove_range(&catalog, &playlist, 2, 4, 99, |tracks| {
            assert_eq!(tracks.first().map(|t| t.track_url.as_str()), Some("u4"));
            Confirmation::Confirmed
        }).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(catalog.urls("dest"), vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn invalid_ranges_are_rejected_before_any_call() {
        let catalog = dest(3);
        let playlist = PlaylistSink::new(&catalog, "dest", 100, Some(0));

        for (first, last) in [(0, 2), (3, 1)] {
            let err = remove_range(&catalog, &playlist, 100, first, last, |_| Confirmation::Confirmed).unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)));
        }
        assert!(catalog.page_calls().is_empty());
        assert_eq!(remove_range(&catalog, &playlist, 100, 7, 9, |_| Confirmation::Confirmed).unwrap(), 0);
    }
}
