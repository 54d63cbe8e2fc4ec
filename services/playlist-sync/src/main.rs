//!
//! src/main.rs
//!
//! Entry point: parses the command line, loads configuration and wires
//! the catalog, stores and sinks into sync runs and playlist commands
//!

mod catalog;
mod collector;
mod commands;
mod config;
mod dedup;
mod errors;
mod fetch;
mod ledger;
mod logging;
mod playlist;
mod sheet;
mod sink;
mod sync;
mod throttle;
mod types;

#[cfg(test)]
mod test_utils;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collector::{PlaylistCollector, SavedTracksCollector};
use crate::config::{AppConfig, AppEnv};
use crate::errors::SyncError;
use crate::fetch::{SheetsClient, SpotifyClient};
use crate::ledger::LedgerStore;
use crate::playlist::{Confirmation, PlaylistSink};
use crate::sheet::SpreadsheetStore;
use crate::sink::StageOutcome;
use crate::sync::{SyncOrchestrator, SyncReport};
use crate::throttle::ThreadPause;
use crate::types::TrackRecord;

#[derive(Parser, Debug)]
#[command(name = "playlist-sync", version, about = "Sync new chart tracks into a ledger, a sheet and a playlist")]
struct Cli {
    /// dev reads the *_TEST destinations
    #[arg(long, env = "APP_ENV", value_parser = parse_app_env)]
    env: Option<AppEnv>,

    #[command(subcommand)]
    command: Option<Command>
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Collect the source playlists and deliver new tracks
    Sync,
    /// Record saved tracks into the liked ledger and worksheet
    Liked,
    /// Show the track that is playing now
    Current,
    /// Remove recently played tracks from the destination playlist
    RemoveRecent,
    /// Remove destination positions FIRST..=LAST (1-based)
    RemoveRange { first: usize, last: usize },
    /// Interactive menu
    Menu
}

fn parse_app_env(s: &str) -> Result<AppEnv, String> {
    AppEnv::parse(s).ok_or_else(|| format!("unknown environment {s:?}, use dev or prod"))
}

/// Confirmation answers
fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn prompt(question: &str) -> io::Result<Option<String>> {
    print!("{question}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn confirm_removal(tracks: &[TrackRecord]) -> Confirmation {
    for (i, t) in tracks.iter().enumerate() {
        println!("  {:>3}. {} - {}", i + 1, t.name, t.artist);
    }
    match prompt(&format!("Remove these {} tracks? [y/N] ", tracks.len())) {
        Ok(Some(answer)) if is_yes(&answer) => Confirmation::Confirmed,
        _ => Confirmation::Declined
    }
}

fn print_report(report: &SyncReport) {
    println!("run {}", report.run_id);
    for s in &report.sources {
        println!("{:<24} fetched {:>4}  new {:>4}", s.source_id, s.fetched, s.accepted);
    }
    println!("new tracks: {}", report.new_tracks.len());
    for (label, outcome) in [
        ("ledger", &report.ledger),
        ("spreadsheet", &report.spreadsheet),
        ("playlist", &report.playlist)
    ] {
        let text = match outcome {
            StageOutcome::Written(n) => format!("wrote {n}"),
            StageOutcome::Skipped => "skipped".to_string(),
            StageOutcome::Pending => "not reached".to_string(),
            StageOutcome::Failed(m) => format!("failed: {m}")
        };
        println!("{label:<12} {text}");
    }
    if let Some(e) = &report.failure {
        eprintln!("sync failed: {}", e.user_message());
    }
}

struct App {
    cfg: AppConfig,
    spotify: SpotifyClient,
    shutdown: CancellationToken
}

impl App {
    fn new(cfg: AppConfig, shutdown: CancellationToken) -> Result<Self, SyncError> {
        let spotify = SpotifyClient::new(&cfg.http, &cfg.spotify)?;
        Ok( Self { cfg, spotify, shutdown } )
    }

    fn destination(&self) -> PlaylistSink<'_> {
        PlaylistSink::new(
            &self.spotify,
            self.cfg.spotify.destination_playlist_id.clone(),
            self.cfg.spotify.chunk_size,
            self.cfg.spotify.insert_position
        )
    }

    fn spreadsheet(&self, worksheet: &str) -> Result<SpreadsheetStore<SheetsClient>, SyncError> {
        let client = SheetsClient::new(&self.cfg.http, &self.cfg.sheets, worksheet)?;
        Ok(SpreadsheetStore::new(
            client,
            format!("sheet {worksheet}"),
            self.cfg.sheets.retry.clone(),
            Arc::new(ThreadPause)
        ))
    }

    /// New tracks from the source playlists into all three sinks
    fn sync_new(&self) -> Result<bool, SyncError> {
        let collector = PlaylistCollector::new(&self.spotify, self.cfg.spotify.page_size);
        let ledger = LedgerStore::new(&self.cfg.ledger.path);
        let sheet = self.spreadsheet(&self.cfg.sheets.worksheet)?;
        let playlist = self.destination();

        let report = SyncOrchestrator::new(
            "new_tracks",
            &collector,
            self.cfg.spotify.source_playlist_ids.clone(),
            &ledger,
            &sheet
        )
            .with_playlist(&playlist)
            .with_timeout(self.cfg.run.timeout)
            .with_shutdown(self.shutdown.clone())
            .run();
        print_report(&report);
        Ok(report.is_clean())
    }

    /// Saved tracks into the liked ledger and worksheet, no playlist
    fn sync_liked(&self) -> Result<bool, SyncError> {
        let collector = SavedTracksCollector::new(&self.spotify, self.cfg.spotify.saved_page_size);
        let ledger = LedgerStore::new(&self.cfg.ledger.liked_path);
        let sheet = self.spreadsheet(&self.cfg.sheets.liked_worksheet)?;

        let report = SyncOrchestrator::new("liked_tracks", &collector, vec!["saved".to_string()], &ledger, &sheet)
            .with_timeout(self.cfg.run.timeout)
            .with_shutdown(self.shutdown.clone())
            .run();
        print_report(&report);
        Ok(report.is_clean())
    }

    fn current(&self) -> Result<bool, SyncError> {
        let ledger = LedgerStore::new(&self.cfg.ledger.path);
        match commands::show_current(&self.spotify, &ledger)? {
            Some(track) => println!("now playing: {track}"),
            None => println!("nothing is playing")
        }
        Ok(true)
    }

    fn remove_recent(&self) -> Result<bool, SyncError> {
        let playlist = self.destination();
        let removed = commands::remove_recent(
            &self.spotify, &playlist, self.cfg.spotify.page_size, confirm_removal
        )?;
        println!("removed {removed} tracks");
        Ok(true)
    }

    fn remove_range(&self, first: usize, last: usize) -> Result<bool, SyncError> {
        let playlist = self.destination();
        let removed = commands::remove_range(
            &self.spotify, &playlist, self.cfg.spotify.page_size, first, last, confirm_removal
        )?;
        println!("removed {removed} tracks");
        Ok(true)
    }

    fn execute(&self, command: &Command) -> Result<bool, SyncError> {
        info!(command = ?command, "command.start");
        match command {
            Command::Sync => self.sync_new(),
            Command::Liked => self.sync_liked(),
            Command::Current => self.current(),
            Command::RemoveRecent => self.remove_recent(),
            Command::RemoveRange { first, last } => self.remove_range(*first, *last),
            Command::Menu => self.menu()
        }
    }

    fn menu(&self) -> Result<bool, SyncError> {
        loop {
            println!();
            println!("[1] add new tracks");
            println!("[2] add liked tracks");
            println!("[3] show current track");
            println!("[4] remove tracks: recently played");
            println!("[5] remove tracks: by index range");
            println!("[6] quit");

            let Some(choice) = prompt("> ")? else {
                return Ok(true);
            };
            let command = match choice.as_str() {
                "1" => Command::Sync,
                "2" => Command::Liked,
                "3" => Command::Current,
                "4" => Command::RemoveRecent,
                "5" => match read_range()? {
                    Some((first, last)) => Command::RemoveRange { first, last },
                    None => continue
                },
                "6" | "q" | "quit" => return Ok(true),
                other => {
                    println!("unknown option {other:?}");
                    continue;
                }
            };
            // failures are reported and the menu stays open
            if let Err(e) = self.execute(&command) {
                error!(command = ?command, error = %e, kind = ?e.kind(), "command.failed");
                eprintln!("{}", e.user_message());
            }
            if self.shutdown.is_cancelled() {
                return Ok(false);
            }
        }
    }
}

fn read_range() -> Result<Option<(usize, usize)>, SyncError> {
    let Some(first) = prompt("first position: ")? else { return Ok(None) };
    let Some(last) = prompt("last position: ")? else { return Ok(None) };
    match (first.parse::<usize>(), last.parse::<usize>()) {
        (Ok(f), Ok(l)) => Ok(Some((f, l))),
        _ => {
            println!("positions must be whole numbers");
            Ok(None)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match config::load_config(cli.env) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return ExitCode::FAILURE;
        }
    };
    let _guard = match logging::init_logging(&cfg.logging) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return ExitCode::FAILURE;
        }
    };

    info!(
        service = "playlist-sync",
        version = %env!("CARGO_PKG_VERSION"),
        app_env = ?cfg.app_env,
        "starting"
    );

    // first ctrl-c stops the run at the next step, a second one exits
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if trigger.is_cancelled() {
            std::process::exit(130);
        }
        warn!("sync.signal");
        eprintln!("stopping after the current step, press ctrl-c again to quit now");
        trigger.cancel();
    }) {
        warn!(error = %e, "sync.signal.unavailable");
    }

    let command = cli.command.unwrap_or(Command::Menu);
    let outcome = App::new(cfg, shutdown).and_then(|app| app.execute(&command));
    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(command = ?command, error = %e, kind = ?e.kind(), "command.failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
