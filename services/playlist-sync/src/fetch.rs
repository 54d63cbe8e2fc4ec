//!
//! src/fetch.rs
//!
//! Defines methods for hitting the catalog and spreadsheet endpoints,
//! handling retries and mapping responses onto the collaborator traits
//!

use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::blocking::{Client, ClientBuilder, RequestBuilder, Response};
use reqwest::{header, redirect, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::catalog::{MusicCatalog, PlaylistMeta, RawItem, RawTrack, SavedPage};
use crate::config::{HttpConfig, RetryConfig, SheetsConfig, SpotifyConfig};
use crate::errors::SyncError;
use crate::sheet::{classify, SheetApi, SheetApiError};
use crate::throttle::{Pause, ThreadPause};

/// Client building functionality
fn client_helper(http: &HttpConfig) -> ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, SyncError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| SyncError::Http(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, SyncError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

fn join(base: &Url, path: &str) -> Result<Url, SyncError> {
    base.join(path).map_err(|e| SyncError::Config(format!("bad endpoint {path}: {e}")))
}

/// Simple function to generate random wait for http_with_retry
fn generate_backoff(base: Duration, attempt: usize, jitter: bool, rng: &mut SmallRng) -> Duration {
    let exp = (1_u32 << attempt.min(6)) * base.as_millis() as u32;
    let jitter = if jitter { rng.gen_range(50..=200) } else { 0 };
    Duration::from_millis(u64::from(exp) + jitter)
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(header::RETRY_AFTER)?
        .to_str().ok()?
        .trim()
        .parse::<u64>().ok()
        .map(Duration::from_secs)
}

/// Sends with exponential backoff on retryable statuses and transport errors.
/// Returns None for 204 responses.
fn http_with_retry(request: RequestBuilder, retry: &RetryConfig, pause: &dyn Pause) ->
    Result<Option<Value>, SyncError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    let max_retries = retry.max_attempts.saturating_sub(1) as usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| SyncError::Http("non-cloneable request".to_string()))?
            .send();
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::NO_CONTENT {
                    return Ok(None);
                }
                if status.is_success() {
                    let body = resp.text()?;
                    if body.trim().is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(serde_json::from_str(&body)?));
                }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    let body = resp.text().unwrap_or_default();
                    return Err(SyncError::Auth(format!("status {status}: {body}")));
                }
                let hinted = retry_after(&resp);
                let body = resp.text().unwrap_or_default();
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt >= max_retries {
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(SyncError::RateLimited(
                            format!("status {status} after {attempt} retries")
                        ));
                    }
                    return Err(SyncError::Http(
                        format!("status {status} after {attempt} retries: {body}")
                    ));
                }
                let mut backoff = generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng);
                if let Some(hint) = hinted {
                    backoff = backoff.max(hint);
                }
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                pause.pause(backoff);
                attempt += 1;
            },
            Err(e) => {
                if attempt >= max_retries {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng);
                warn!(backoff = ?backoff.as_millis(), error = %e, "http.retry.error");
                pause.pause(backoff);
                attempt += 1;
            }
        }
    }
}

/// Write endpoints take catalog uris, the pipeline keys tracks by url
pub fn track_uri(id_or_url: &str) -> String {
    if id_or_url.starts_with("spotify:") {
        return id_or_url.to_string();
    }
    if let Ok(url) = Url::parse(id_or_url) {
        if let Some(id) = url.path_segments()
            .and_then(|mut s| if s.next() == Some("track") { s.next() } else { None }) {
            return format!("spotify:track:{id}");
        }
    }
    format!("spotify:track:{id_or_url}")
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig,
    retry: RetryConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, SyncError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone()
        })
    }

    fn send(&self, request: RequestBuilder) -> Result<Option<Value>, SyncError> {
        http_with_retry(request.bearer_auth(&self.cfg.access_token), &self.retry, &ThreadPause)
    }

    fn send_json(&self, request: RequestBuilder, what: &str) -> Result<Value, SyncError> {
        self.send(request)?
            .ok_or_else(|| SyncError::Parse(format!("{what}: empty response")))
    }

    /// GET /v1/playlists/{id}?fields=name,external_urls,tracks.total
    pub fn playlist(&self, playlist_id: &str) -> Result<RequestBuilder, SyncError> {
        let url = join(&self.cfg.api_base, &format!("playlists/{playlist_id}"))?;
        Ok(self.http.get(url).query(&[("fields", "name,external_urls,tracks.total")]))
    }

    /// GET /v1/playlists/{id}/tracks?limit=&offset=
    pub fn playlist_items(&self, playlist_id: &str, offset: u32, limit: u32) ->
        Result<RequestBuilder, SyncError> {
        let url = join(&self.cfg.api_base, &format!("playlists/{playlist_id}/tracks"))?;
        Ok(self.http.get(url).query(&[
            ("limit", &limit.to_string()),
            ("offset", &offset.to_string())
        ]))
    }

    /// GET /v1/me/tracks?limit=&offset=
    pub fn saved_tracks(&self, offset: u32, limit: u32) -> Result<RequestBuilder, SyncError> {
        let url = join(&self.cfg.api_base, "me/tracks")?;
        Ok(self.http.get(url).query(&[
            ("limit", &limit.to_string()),
            ("offset", &offset.to_string())
        ]))
    }
}

fn items_of(value: &Value) -> Result<Vec<RawItem>, SyncError> {
    match value.get("items") {
        Some(items) => Ok(serde_json::from_value(items.clone())?),
        None => Err(SyncError::Parse("response has no items".to_string()))
    }
}

fn saved_page(value: &Value) -> Result<SavedPage, SyncError> {
    let total = value["total"].as_u64()
        .ok_or_else(|| SyncError::Parse("saved tracks page has no total".to_string()))?;
    Ok( SavedPage { total: total as u32, items: items_of(value)? } )
}

impl MusicCatalog for SpotifyClient {
    fn get_playlist(&self, playlist_id: &str) -> Result<PlaylistMeta, SyncError> {
        let v = self.send_json(self.playlist(playlist_id)?, "playlist")?;
        let name = v["name"].as_str()
            .ok_or_else(|| SyncError::Parse(format!("playlist {playlist_id} has no name")))?
            .to_string();
        let total = v["tracks"]["total"].as_u64()
            .ok_or_else(|| SyncError::Parse(format!("playlist {playlist_id} has no total")))?;
        Ok( PlaylistMeta {
            name,
            url: v["external_urls"]["spotify"].as_str().map(str::to_string),
            total: total as u32
        })
    }

    fn get_playlist_items(&self, playlist_id: &str, offset: u32, limit: u32) ->
        Result<Vec<RawItem>, SyncError> {
        let v = self.send_json(self.playlist_items(playlist_id, offset, limit)?, "playlist items")?;
        items_of(&v)
    }

    /// POST /v1/playlists/{id}/tracks
    fn add_items(&self, playlist_id: &str, track_ids: &[String], position: Option<u32>) ->
        Result<(), SyncError> {
        let url = join(&self.cfg.api_base, &format!("playlists/{playlist_id}/tracks"))?;
        let uris: Vec<String> = track_ids.iter().map(|t| track_uri(t)).collect();
        let mut body = json!({ "uris": uris });
        if let Some(p) = position {
            body["position"] = json!(p);
        }
        let resp = self.send(self.http.post(url).json(&body))?;
        debug!(playlist = playlist_id, count = track_ids.len(),
            snapshot = ?resp.as_ref().and_then(|v| v["snapshot_id"].as_str().map(str::to_string)),
            "catalog.add");
        Ok(())
    }

    /// DELETE /v1/playlists/{id}/tracks
    fn remove_items(&self, playlist_id: &str, track_ids: &[String]) -> Result<(), SyncError> {
        let url = join(&self.cfg.api_base, &format!("playlists/{playlist_id}/tracks"))?;
        let tracks: Vec<Value> = track_ids.iter()
            .map(|t| json!({ "uri": track_uri(t) }))
            .collect();
        self.send(self.http.delete(url).json(&json!({ "tracks": tracks })))?;
        debug!(playlist = playlist_id, count = track_ids.len(), "catalog.remove");
        Ok(())
    }

    /// GET /v1/me/player/currently-playing
    fn get_currently_playing(&self) -> Result<Option<RawTrack>, SyncError> {
        let url = join(&self.cfg.api_base, "me/player/currently-playing")?;
        let Some(v) = self.send(self.http.get(url))? else {
            return Ok(None);
        };
        match v.get("item") {
            Some(item) if !item.is_null() => Ok(Some(serde_json::from_value(item.clone())?)),
            _ => Ok(None)
        }
    }

    /// GET /v1/me/player/recently-played?limit=50
    fn get_recently_played(&self) -> Result<Vec<RawItem>, SyncError> {
        let url = join(&self.cfg.api_base, "me/player/recently-played")?;
        let v = self.send_json(self.http.get(url).query(&[("limit", "50")]), "recently played")?;
        items_of(&v)
    }

    fn get_saved_tracks(&self, offset: u32, limit: u32) -> Result<SavedPage, SyncError> {
        let v = self.send_json(self.saved_tracks(offset, limit)?, "saved tracks")?;
        saved_page(&v)
    }
}

/// One worksheet of a remote spreadsheet
#[derive(Clone, Debug)]
pub struct SheetsClient {
    pub http: Client,
    base: Url,
    token: String,
    key: String,
    worksheet: String
}

impl SheetsClient {
    pub fn new(http_config: &HttpConfig, cfg: &SheetsConfig, worksheet: &str) ->
        Result<Self, SyncError> {
        let http = base_client(http_config)?;
        Ok( Self {
            http,
            base: cfg.api_base.clone(),
            token: cfg.access_token.clone(),
            key: cfg.spreadsheet_key.clone(),
            worksheet: worksheet.to_string()
        })
    }

    fn spreadsheet_url(&self, suffix: Option<&str>) -> Result<Url, SheetApiError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut()
                .map_err(|_| SheetApiError::Connection("base url cannot hold a path".to_string()))?;
            segments.pop_if_empty().push("spreadsheets");
            match suffix {
                Some(s) => { segments.push(&format!("{}{s}", self.key)); }
                None => { segments.push(&self.key); }
            }
        }
        Ok(url)
    }

    /// spreadsheets/{key}/values/{range}
    fn values_url(&self, range: &str) -> Result<Url, SheetApiError> {
        let mut url = self.spreadsheet_url(None)?;
        url.path_segments_mut()
            .map_err(|_| SheetApiError::Connection("base url cannot hold a path".to_string()))?
            .push("values")
            .push(&format!("'{}'!{range}", self.worksheet.replace('\'', "''")));
        Ok(url)
    }

    fn whole_sheet_url(&self) -> Result<Url, SheetApiError> {
        let mut url = self.spreadsheet_url(None)?;
        url.path_segments_mut()
            .map_err(|_| SheetApiError::Connection("base url cannot hold a path".to_string()))?
            .push("values")
            .push(&format!("'{}'", self.worksheet.replace('\'', "''")));
        Ok(url)
    }

    fn execute(&self, request: RequestBuilder) -> Result<Value, SheetApiError> {
        let resp = request.bearer_auth(&self.token).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() || e.is_request() {
                SheetApiError::Connection(e.to_string())
            } else {
                SheetApiError::Api { code: 0, status: "TRANSPORT".to_string(), message: e.to_string() }
            }
        })?;
        let status = resp.status();
        let body = resp.text().map_err(|e| SheetApiError::Connection(e.to_string()))?;
        if !status.is_success() {
            return Err(classify(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| SheetApiError::Api {
            code: status.as_u16(), status: "PARSE".to_string(), message: e.to_string()
        })
    }

    fn sheet_id(&self) -> Result<i64, SheetApiError> {
        let url = self.spreadsheet_url(None)?;
        let v = self.execute(self.http.get(url).query(&[("fields", "sheets.properties")]))?;
        v["sheets"].as_array()
            .into_iter()
            .flatten()
            .find(|s| s["properties"]["title"].as_str() == Some(self.worksheet.as_str()))
            .and_then(|s| s["properties"]["sheetId"].as_i64())
            .ok_or_else(|| SheetApiError::Api {
                code: 404,
                status: "NOT_FOUND".to_string(),
                message: format!("worksheet {} not found", self.worksheet)
            })
    }
}

fn string_rows(v: &Value) -> Vec<Vec<String>> {
    v["values"].as_array()
        .map(|rows| rows.iter()
            .map(|r| r.as_array()
                .map(|cells| cells.iter()
                    .map(|c| match c {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string()
                    })
                    .collect())
                .unwrap_or_default())
            .collect())
        .unwrap_or_default()
}

fn column_letter(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        out.push((b'A' + rem) as char);
        col = (col - 1) / 26;
    }
    out.iter().rev().collect()
}

impl SheetApi for SheetsClient {
    fn row_values(&self, row: u32) -> Result<Vec<String>, SheetApiError> {
        let v = self.execute(self.http.get(self.values_url(&format!("{row}:{row}"))?))?;
        Ok(string_rows(&v).into_iter().next().unwrap_or_default())
    }

    fn col_values(&self, col: u32) -> Result<Vec<String>, SheetApiError> {
        let letter = column_letter(col);
        let url = self.values_url(&format!("{letter}:{letter}"))?;
        let v = self.execute(self.http.get(url).query(&[("majorDimension", "COLUMNS")]))?;
        Ok(string_rows(&v).into_iter().next().unwrap_or_default())
    }

    fn all_values(&self) -> Result<Vec<Vec<String>>, SheetApiError> {
        let v = self.execute(self.http.get(self.whole_sheet_url()?))?;
        Ok(string_rows(&v))
    }

    fn write_row(&self, row: u32, values: &[String]) -> Result<(), SheetApiError> {
        let url = self.values_url(&format!("A{row}"))?;
        let body = json!({ "majorDimension": "ROWS", "values": [values] });
        self.execute(self.http.put(url).query(&[("valueInputOption", "RAW")]).json(&body))?;
        Ok(())
    }

    fn add_rows(&self, count: u32) -> Result<(), SheetApiError> {
        let sheet_id = self.sheet_id()?;
        let url = self.spreadsheet_url(Some(":batchUpdate"))?;
        let body = json!({
            "requests": [{
                "appendDimension": { "sheetId": sheet_id, "dimension": "ROWS", "length": count }
            }]
        });
        self.execute(self.http.post(url).json(&body))?;
        Ok(())
    }
}
