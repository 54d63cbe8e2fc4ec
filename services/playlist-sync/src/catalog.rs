//!
//! src/catalog.rs
//!
//! Interface to the upstream music catalog and the raw item shapes it
//! returns. The HTTP implementation lives in fetch.rs
//!

use serde::Deserialize;

use crate::errors::SyncError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawArtist {
    pub name: Option<String>
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAlbum {
    pub release_date: Option<String>
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTrack {
    pub name: Option<String>,
    #[serde(default)]
    pub artists: Vec<RawArtist>,
    #[serde(default)]
    pub external_urls: Option<ExternalUrls>,
    #[serde(default)]
    pub album: Option<RawAlbum>
}

/// One entry of a paged collection. `track` is null for removed tracks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub added_at: Option<String>,
    #[serde(default)]
    pub track: Option<RawTrack>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistMeta {
    pub name: String,
    pub url: Option<String>,
    pub total: u32
}

#[derive(Debug, Clone, Default)]
pub struct SavedPage {
    pub total: u32,
    pub items: Vec<RawItem>
}

#[cfg_attr(test, mockall::automock)]
pub trait MusicCatalog {
    fn get_playlist(&self, playlist_id: &str) -> Result<PlaylistMeta, SyncError>;

    fn get_playlist_items(&self, playlist_id: &str, offset: u32, limit: u32) ->
        Result<Vec<RawItem>, SyncError>;

    /// `position` None appends at the end
    fn add_items(&self, playlist_id: &str, track_ids: &[String], position: Option<u32>) ->
        Result<(), SyncError>;

    fn remove_items(&self, playlist_id: &str, track_ids: &[String]) ->
        Result<(), SyncError>;

    fn get_currently_playing(&self) -> Result<Option<RawTrack>, SyncError>;

    fn get_recently_played(&self) -> Result<Vec<RawItem>, SyncError>;

    fn get_saved_tracks(&self, offset: u32, limit: u32) -> Result<SavedPage, SyncError>;
}
