//!
//! src/config.rs
//!
//! Loads settings from the environment (and .env) into typed configs.
//! Lookups go through `Env` so the builders can be fed a map in tests.
//!

use std::{collections::HashMap, path::PathBuf, time};

use url::Url;

use crate::errors::SyncError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 4;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 4;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRY_JITTER: bool = true;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Spreadsheet retry policy
pub const GSS_MAX_ATTEMPTS: u32 = 3;
pub const GSS_CONNECTION_COOLDOWN: u64 = 30;
pub const GSS_GROW_COOLDOWN: u64 = 10;
pub const GSS_GROW_ROWS: u32 = 1000;
pub const GSS_RATE_LIMIT_COOLDOWN: u64 = 60;
pub const GSS_WRITE_PACING: u64 = 900;
pub const GSS_MAX_COOLDOWN_CYCLES: u32 = 100;

/// Charts and new-release playlists polled when SOURCE_PLAYLIST_IDS is unset
pub const DEFAULT_SOURCE_PLAYLISTS: [&str; 16] = [
    "37i9dQZEVXbMDoHDwVN2tF",  // global
    "37i9dQZEVXbLRQDuF5jeBp",  // us
    "37i9dQZEVXbKXQ4mDTEBXq",  // jp
    "37i9dQZEVXbNBz9cRCSFkY",  // ph
    "37i9dQZEVXbLZ52XmnySJg",  // in
    "37i9dQZEVXbLnolsZ8PSNw",  // uk
    "37i9dQZEVXbNxXF4SkHj9F",  // kr
    "37i9dQZEVXbNFJfN1Vw8d9",  // es
    "37i9dQZEVXbJPcfkRz0wJ0",  // au
    "37i9dQZEVXbJiZcmkrIHGU",  // de
    "37i9dQZEVXbIQnj7RRhdSX",  // it
    "37i9dQZEVXbIPWwFssbupI",  // fr
    "37i9dQZEVXbMXbN3EUUhlg",  // br
    "37i9dQZF1DX4JAvHpjipBk",  // new music friday
    "37i9dQZF1DWZvuOKNcLsjv",  // next up
    "37i9dQZEVXbfAlVIR3gQhM"   // release radar
];

/// Source of raw settings
pub struct Env {
    lookup: Box<dyn Fn(&str) -> Option<String>>
}

impl Env {
    pub fn process() -> Self {
        Self { lookup: Box::new(|k: &str| std::env::var(k).ok()) }
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self { lookup: Box::new(move |k: &str| map.get(k).cloned()) }
    }

    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    /// Wrapper over get to return an invalid enviroment var error
    fn check(&self, key: &str) -> Result<String, SyncError> {
        self.get(key).ok_or_else(|| SyncError::Config(format!("{key} was not set")))
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, SyncError> {
        match self.get(key) {
            Some(v) => v.trim().parse::<T>()
                .map_err(|_| SyncError::Config(format!("{key} is not valid: {v:?}"))),
            None => Ok(default)
        }
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn api_base(env: &Env, key: &str, default: &str, host: &str) -> Result<Url, SyncError> {
    let raw = env.get(key).unwrap_or_else(|| default.to_string());
    let mut base = Url::parse(&raw)
        .map_err(|e| SyncError::Config(format!("{key} invalid {e}")))?;

    ensure_https(&base).map_err(SyncError::Config)?;
    ensure_host(&base, host).map_err(SyncError::Config)?;

    // ensure trailing slash
    if !base.path().ends_with('/') {
        let mut path = base.path().to_string();
        path.push('/');
        base.set_path(&path);
    }
    Ok(base)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv { Dev, Prod }

impl AppEnv {
    pub fn parse(s: &str) -> Option<AppEnv> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "develop" | "development" => Some(AppEnv::Dev),
            "prod" | "pro" | "production" => Some(AppEnv::Prod),
            _ => None
        }
    }

    /// Dev runs read the `_TEST` variant of anything that points at a sink
    fn key(self, name: &str) -> String {
        match self {
            AppEnv::Dev => format!("{name}_TEST"),
            AppEnv::Prod => name.to_string()
        }
    }

    /// Fallback sink names keep the same split as the keys
    fn default_name(self, name: &str) -> String {
        match self {
            AppEnv::Dev => format!("{name}_test"),
            AppEnv::Prod => name.to_string()
        }
    }
}

fn build_app_env(env: &Env, flag: Option<AppEnv>) -> Result<AppEnv, SyncError> {
    if let Some(e) = flag {
        return Ok(e);
    }
    match env.get("APP_ENV") {
        Some(v) => AppEnv::parse(&v)
            .ok_or_else(|| SyncError::Config(format!("APP_ENV invalid: {v}"))),
        None => Ok(AppEnv::Prod)
    }
}

///
/// Configuration the music catalog expects when hitting endpoints
///
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub access_token: String,
    pub api_base: Url,
    pub source_playlist_ids: Vec<String>,
    pub destination_playlist_id: String,
    pub page_size: u32,
    pub saved_page_size: u32,
    pub chunk_size: usize,
    pub insert_position: Option<u32>
}

fn build_spotify(env: &Env, app_env: AppEnv) -> Result<SpotifyConfig, SyncError> {
    let access_token = env.check("SPOTIFY_ACCESS_TOKEN")?;
    let api_base = api_base(env, "SPOTIFY_API_BASE",
        "https://api.spotify.com/v1/", "api.spotify.com")?;

    let source_playlist_ids: Vec<String> = match env.get("SOURCE_PLAYLIST_IDS") {
        Some(list) => list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => DEFAULT_SOURCE_PLAYLISTS.iter().map(|s| s.to_string()).collect()
    };
    if source_playlist_ids.is_empty() {
        return Err(SyncError::Config("SOURCE_PLAYLIST_IDS is empty".to_string()));
    }

    let destination_playlist_id = env.check(&app_env.key("DESTINATION_PLAYLIST_ID"))?;

    let page_size       = env.parse_or("PLAYLIST_PAGE_SIZE", 100_u32)?;
    let saved_page_size = env.parse_or("SAVED_TRACKS_PAGE_SIZE", 50_u32)?;
    let chunk_size      = env.parse_or("PLAYLIST_CHUNK_SIZE", 100_usize)?;
    if page_size == 0 || saved_page_size == 0 || chunk_size == 0 {
        return Err(SyncError::Config("page and chunk sizes must be positive".to_string()));
    }

    let insert_position = match env.get("PLAYLIST_INSERT_POSITION") {
        Some(v) if v.trim().eq_ignore_ascii_case("end") => None,
        Some(v) => Some(v.trim().parse::<u32>().map_err(|_|
            SyncError::Config(format!("PLAYLIST_INSERT_POSITION is not valid: {v:?}")))?),
        None => Some(0)
    };

    Ok( SpotifyConfig {
        access_token, api_base, source_playlist_ids, destination_playlist_id,
        page_size, saved_page_size, chunk_size, insert_position
    })
}

///
/// Spreadsheet retry and pacing policy
///
#[derive(Debug, Clone)]
pub struct SheetRetryConfig {
    pub max_attempts: u32,
    pub connection_cooldown: time::Duration,
    pub grow_cooldown: time::Duration,
    pub grow_rows: u32,
    pub rate_limit_cooldown: time::Duration,
    pub write_pacing: time::Duration,
    pub max_cooldown_cycles: u32
}

impl Default for SheetRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: GSS_MAX_ATTEMPTS,
            connection_cooldown: time::Duration::from_secs(GSS_CONNECTION_COOLDOWN),
            grow_cooldown: time::Duration::from_secs(GSS_GROW_COOLDOWN),
            grow_rows: GSS_GROW_ROWS,
            rate_limit_cooldown: time::Duration::from_secs(GSS_RATE_LIMIT_COOLDOWN),
            write_pacing: time::Duration::from_millis(GSS_WRITE_PACING),
            max_cooldown_cycles: GSS_MAX_COOLDOWN_CYCLES
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub access_token: String,
    pub api_base: Url,
    pub spreadsheet_key: String,
    pub worksheet: String,
    pub liked_worksheet: String,
    pub retry: SheetRetryConfig
}

fn build_sheets(env: &Env, app_env: AppEnv) -> Result<SheetsConfig, SyncError> {
    let access_token    = env.check("GOOGLE_SHEETS_ACCESS_TOKEN")?;
    let api_base        = api_base(env, "GSS_API_BASE",
        "https://sheets.googleapis.com/v4/", "sheets.googleapis.com")?;
    let spreadsheet_key = env.check("GSS_SPREADSHEET_KEY")?;
    let worksheet       = env.check(&app_env.key("GSS_WORKSHEET_NAME"))?;
    let liked_worksheet = env.get(&app_env.key("GSS_LIKED_WORKSHEET_NAME"))
        .unwrap_or_else(|| app_env.default_name("liked_tracks"));

    let d = SheetRetryConfig::default();
    let secs = |key: &str, default: time::Duration| -> Result<time::Duration, SyncError> {
        Ok(time::Duration::from_secs(env.parse_or(key, default.as_secs())?))
    };
    let retry = SheetRetryConfig {
        max_attempts: env.parse_or("GSS_MAX_ATTEMPTS", d.max_attempts)?.max(1),
        connection_cooldown: secs("GSS_CONNECTION_COOLDOWN_SECS", d.connection_cooldown)?,
        grow_cooldown: secs("GSS_GROW_COOLDOWN_SECS", d.grow_cooldown)?,
        grow_rows: env.parse_or("GSS_GROW_ROWS", d.grow_rows)?,
        rate_limit_cooldown: secs("GSS_RATE_LIMIT_COOLDOWN_SECS", d.rate_limit_cooldown)?,
        write_pacing: time::Duration::from_millis(
            env.parse_or("GSS_WRITE_PACING_MS", GSS_WRITE_PACING)?),
        max_cooldown_cycles: env.parse_or("GSS_MAX_COOLDOWN_CYCLES", d.max_cooldown_cycles)?
    };

    Ok( SheetsConfig {
        access_token, api_base, spreadsheet_key, worksheet, liked_worksheet, retry
    })
}

///
/// Flat-file ledgers
///
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub liked_path: PathBuf
}

fn build_ledger(env: &Env, app_env: AppEnv) -> Result<LedgerConfig, SyncError> {
    let path = PathBuf::from(env.check(&app_env.key("LEDGER_PATH"))?);
    let liked_path = env.get(&app_env.key("LIKED_LEDGER_PATH"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("./data/{}.csv", app_env.default_name("liked_tracks"))));

    if path.is_dir() {
        return Err(SyncError::Config(format!("ledger path is a directory: {}", path.display())));
    }
    Ok( LedgerConfig { path, liked_path } )
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            jitter: RETRY_JITTER,
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub log_dir: PathBuf,
    pub file_prefix: String,
    pub console_level: String,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,playlist_sync=debug,reqwest=warn".to_string(),
            format: LogFormat::Json,
            log_dir: PathBuf::from("./logs"),
            file_prefix: "playlist-sync.log".to_string(),
            console_level: "warn".to_string(),
            with_ansi: true,
            include_file_line: true,
            include_target: true
        }
    }
}

fn build_logging(env: &Env) -> LoggingConfig {
    let mut cfg = LoggingConfig::default();
    if let Some(dir) = env.get("LOG_DIR") {
        cfg.log_dir = PathBuf::from(dir);
    }
    if let Some(f) = env.get("LOG_FORMAT") {
        if f.eq_ignore_ascii_case("pretty") {
            cfg.format = LogFormat::Pretty;
        }
    }
    cfg
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub timeout: Option<time::Duration>
}

fn build_run(env: &Env) -> Result<RunConfig, SyncError> {
    let timeout = match env.get("SYNC_RUN_TIMEOUT_SECS") {
        Some(v) => Some(time::Duration::from_secs(v.trim().parse::<u64>().map_err(|_|
            SyncError::Config(format!("SYNC_RUN_TIMEOUT_SECS is not valid: {v:?}")))?)),
        None => None
    };
    Ok( RunConfig { timeout } )
}

///
/// AppConfig which holds everything the clients, stores and runs need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_env: AppEnv,
    pub spotify: SpotifyConfig,
    pub sheets: SheetsConfig,
    pub ledger: LedgerConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
    pub run: RunConfig
}

pub fn build_config(env: &Env, flag: Option<AppEnv>) -> Result<AppConfig, SyncError> {
    let app_env = build_app_env(env, flag)?;
    let spotify = build_spotify(env, app_env)?;
    let sheets  = build_sheets(env, app_env)?;
    let ledger  = build_ledger(env, app_env)?;
    let http    = HttpConfig::default();
    let logging = build_logging(env);
    let run     = build_run(env)?;

    Ok( AppConfig { app_env, spotify, sheets, ledger, http, logging, run } )
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config(flag: Option<AppEnv>) -> Result<AppConfig, SyncError> {
    dotenvy::dotenv().ok();
    build_config(&Env::process(), flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Env {
        Env::from_map(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SPOTIFY_ACCESS_TOKEN", "sp-token"),
            ("DESTINATION_PLAYLIST_ID", "dest"),
            ("GOOGLE_SHEETS_ACCESS_TOKEN", "gs-token"),
            ("GSS_SPREADSHEET_KEY", "key"),
            ("GSS_WORKSHEET_NAME", "new_tracks"),
            ("LEDGER_PATH", "./data/new_tracks.csv")
        ]
    }

    #[test]
    fn defaults_follow_reference_policy() {
        let cfg = build_config(&env(&required()), None).unwrap();
        assert_eq!(cfg.app_env, AppEnv::Prod);
        assert_eq!(cfg.spotify.source_playlist_ids.len(), DEFAULT_SOURCE_PLAYLISTS.len());
        assert_eq!(cfg.spotify.page_size, 100);
        assert_eq!(cfg.spotify.insert_position, Some(0));
        assert_eq!(cfg.sheets.retry.max_attempts, 3);
        assert_eq!(cfg.sheets.retry.rate_limit_cooldown, time::Duration::from_secs(60));
        assert_eq!(cfg.sheets.retry.grow_rows, 1000);
        assert!(cfg.run.timeout.is_none());
        assert_eq!(cfg.spotify.api_base.as_str(), "https://api.spotify.com/v1/");
    }

    #[test]
    fn dev_reads_test_variants_of_sink_settings() {
        let mut pairs = required();
        pairs.push(("APP_ENV", "dev"));
        assert!(matches!(build_config(&env(&pairs), None), Err(SyncError::Config(_))));

        pairs.push(("DESTINATION_PLAYLIST_ID_TEST", "dest-test"));
        pairs.push(("GSS_WORKSHEET_NAME_TEST", "new_tracks_test"));
        pairs.push(("LEDGER_PATH_TEST", "./data/test.csv"));
        let cfg = build_config(&env(&pairs), None).unwrap();
        assert_eq!(cfg.spotify.destination_playlist_id, "dest-test");
        assert_eq!(cfg.sheets.worksheet, "new_tracks_test");
        assert_eq!(cfg.ledger.path, PathBuf::from("./data/test.csv"));
    }

    #[test]
    fn liked_sinks_differ_between_dev_and_prod() {
        let mut pairs = required();
        pairs.push(("DESTINATION_PLAYLIST_ID_TEST", "dest-test"));
        pairs.push(("GSS_WORKSHEET_NAME_TEST", "new_tracks_test"));
        pairs.push(("LEDGER_PATH_TEST", "./data/test.csv"));

        let prod = build_config(&env(&pairs), Some(AppEnv::Prod)).unwrap();
        let dev = build_config(&env(&pairs), Some(AppEnv::Dev)).unwrap();
        assert_eq!(prod.ledger.liked_path, PathBuf::from("./data/liked_tracks.csv"));
        assert_eq!(prod.sheets.liked_worksheet, "liked_tracks");
        assert_eq!(dev.ledger.liked_path, PathBuf::from("./data/liked_tracks_test.csv"));
        assert_eq!(dev.sheets.liked_worksheet, "liked_tracks_test");
    }

    #[test]
    fn flag_overrides_app_env() {
        let mut pairs = required();
        pairs.push(("APP_ENV", "dev"));
        let cfg = build_config(&env(&pairs), Some(AppEnv::Prod)).unwrap();
        assert_eq!(cfg.app_env, AppEnv::Prod);
    }

    #[test]
    fn source_list_is_split_and_trimmed() {
        let mut pairs = required();
        pairs.push(("SOURCE_PLAYLIST_IDS", " a, b ,,c "));
        pairs.push(("PLAYLIST_INSERT_POSITION", "end"));
        let cfg = build_config(&env(&pairs), None).unwrap();
        assert_eq!(cfg.spotify.source_playlist_ids, vec!["a", "b", "c"]);
        assert_eq!(cfg.spotify.insert_position, None);
    }

    #[test]
    fn missing_token_and_bad_hosts_are_config_errors() {
        let pairs: Vec<_> = required().into_iter()
            .filter(|(k, _)| *k != "SPOTIFY_ACCESS_TOKEN")
            .collect();
        assert!(matches!(build_config(&env(&pairs), None), Err(SyncError::Config(_))));

        let mut pairs = required();
        pairs.push(("SPOTIFY_API_BASE", "http://api.spotify.com/v1"));
        assert!(matches!(build_config(&env(&pairs), None), Err(SyncError::Config(_))));

        let mut pairs = required();
        pairs.push(("GSS_API_BASE", "https://example.com/v4/"));
        assert!(matches!(build_config(&env(&pairs), None), Err(SyncError::Config(_))));
    }

    #[test]
    fn numeric_overrides_are_validated() {
        let mut pairs = required();
        pairs.push(("GSS_WRITE_PACING_MS", "0"));
        pairs.push(("SYNC_RUN_TIMEOUT_SECS", "120"));
        let cfg = build_config(&env(&pairs), None).unwrap();
        assert!(cfg.sheets.retry.write_pacing.is_zero());
        assert_eq!(cfg.run.timeout, Some(time::Duration::from_secs(120)));

        let mut pairs = required();
        pairs.push(("PLAYLIST_CHUNK_SIZE", "lots"));
        assert!(matches!(build_config(&env(&pairs), None), Err(SyncError::Config(_))));
    }
}
