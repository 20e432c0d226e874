//! Questboard - live quest tracker
//!
//! Mirrors the active player's quests out of the game database into a JSON
//! snapshot and renders that snapshot as styled, filterable text.

mod config;
mod core;
mod frontend;
mod render;
mod snapshot;
mod sync;

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use config::{AppPaths, SyncConfig};
use crate::core::runtime::{spawn_board, spawn_synchronizer, MarkupWriter};
use crate::core::shortcuts::shortcut_event;
use crate::core::{EventBus, QuestBoard, Shutdown};
use frontend::tui::format_key_combo;
use frontend::{Frontend, FrontendEvent, TuiFrontend};
use render::RenderedView;
use snapshot::Snapshot;
use std::path::PathBuf;
use std::time::Duration;
use sync::{CycleOutcome, QuestSynchronizer};

#[derive(ClapParser)]
#[command(name = "questboard")]
#[command(about = "Live quest tracker for the game database", long_about = None)]
struct Cli {
    /// Custom data directory (default: ~/.questboard)
    /// Can also be set via QUESTBOARD_DIR environment variable
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run only the quest synchronizer
    Sync {
        /// Game database path (overrides config/sync.toml)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,

        /// Run a single poll cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Run the headless renderer
    Render {
        /// Render once and exit
        #[arg(long)]
        once: bool,

        /// Write the markup document here instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Run the synchronizer and the terminal board (default)
    Tui {
        /// Do not start the synchronizer
        #[arg(long)]
        no_sync: bool,

        /// Game database path (overrides config/sync.toml)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
    },
}

fn init_logging(paths: &AppPaths) -> Result<()> {
    let log_path = paths.log_path();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false) // No color codes in log file
        .init();
    Ok(())
}

/// Build the synchronizer from sync.toml and the CLI override.
/// Without a database path the snapshot is cleared and None returned.
fn build_synchronizer(paths: &AppPaths, db_override: Option<PathBuf>) -> Option<QuestSynchronizer> {
    let settings = SyncConfig::load(&paths.sync_config_path());
    let Some(db_path) = db_override.or(settings.db_path) else {
        tracing::error!(
            "No game database configured; set db_path in {:?} or pass --db",
            paths.sync_config_path()
        );
        if let Err(e) = Snapshot::clear(&paths.snapshot_path()) {
            tracing::warn!("Failed clearing snapshot: {:#}", e);
        }
        return None;
    };

    Some(QuestSynchronizer::new(
        db_path,
        paths.snapshot_path(),
        Duration::from_secs(settings.scan_interval),
    ))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = AppPaths::resolve(cli.data_dir.as_deref())?;
    paths.extract_defaults()?;
    init_logging(&paths)?;
    tracing::info!("Questboard starting in {:?}", paths.base_dir());

    let command = cli.command.unwrap_or(Commands::Tui {
        no_sync: false,
        db: None,
    });

    match command {
        Commands::Sync { db, once: true } => run_sync_once(&paths, db),
        Commands::Sync { db, once: false } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async_run_sync(paths, db))
        }
        Commands::Render { once: true, output } => {
            let mut board = QuestBoard::open(&paths, EventBus::new())?;
            board.render_pass();
            let markup = board.markup().unwrap_or_default();
            MarkupWriter::new(output).write(markup)
        }
        Commands::Render { once: false, output } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async_run_render(paths, output))
        }
        Commands::Tui { no_sync, db } => {
            // Multi-threaded so blocking terminal polls never starve the actors
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async_run_tui(paths, no_sync, db))
        }
    }
}

fn run_sync_once(paths: &AppPaths, db: Option<PathBuf>) -> Result<()> {
    let Some(sync) = build_synchronizer(paths, db) else {
        anyhow::bail!("no game database configured");
    };
    let store = sync.open_store()?;
    let outcome = sync.poll_once(&store);
    store.close();

    match outcome? {
        CycleOutcome::Published {
            user_profile_id,
            quests,
        } => println!("Published {} quests for profile {}", quests, user_profile_id),
        CycleOutcome::Cleared => println!("No active player; snapshot cleared"),
    }
    Ok(())
}

async fn wait_for_ctrl_c(shutdown: &Shutdown) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
    }
    shutdown.stop();
}

async fn async_run_sync(paths: AppPaths, db: Option<PathBuf>) -> Result<()> {
    let Some(sync) = build_synchronizer(&paths, db) else {
        anyhow::bail!("no game database configured");
    };
    let shutdown = Shutdown::new();
    let mut handle = spawn_synchronizer(sync, &shutdown);

    // The synchronizer also ends by itself when the database cannot be opened
    tokio::select! {
        _ = wait_for_ctrl_c(&shutdown) => {
            handle.await.context("Synchronizer task failed")?;
        }
        joined = &mut handle => {
            joined.context("Synchronizer task failed")?;
        }
    }
    Ok(())
}

async fn async_run_render(paths: AppPaths, output: Option<PathBuf>) -> Result<()> {
    let shutdown = Shutdown::new();
    let board = QuestBoard::open(&paths, EventBus::new())?;
    let handle = spawn_board(board, MarkupWriter::new(output), &shutdown);

    wait_for_ctrl_c(&shutdown).await;
    handle.await.context("Render task failed")?;
    Ok(())
}

async fn async_run_tui(paths: AppPaths, no_sync: bool, db: Option<PathBuf>) -> Result<()> {
    let shutdown = Shutdown::new();
    let bus = EventBus::new();
    let board = QuestBoard::open(&paths, bus.clone())?;

    let sync_handle = if no_sync {
        None
    } else {
        build_synchronizer(&paths, db).map(|sync| spawn_synchronizer(sync, &shutdown))
    };

    let (view_tx, view_rx) = tokio::sync::mpsc::unbounded_channel::<RenderedView>();
    let board_handle = spawn_board(board, view_tx, &shutdown);

    let mut frontend = TuiFrontend::new()?;
    let result = tui_loop(&mut frontend, &bus, &shutdown, view_rx).await;

    // Teardown runs whether the loop ended normally or not
    shutdown.stop();
    frontend.cleanup()?;
    board_handle.await.context("Render task failed")?;
    if let Some(handle) = sync_handle {
        handle.await.context("Synchronizer task failed")?;
    }
    result
}

async fn tui_loop(
    frontend: &mut TuiFrontend,
    bus: &EventBus,
    shutdown: &Shutdown,
    mut view_rx: tokio::sync::mpsc::UnboundedReceiver<RenderedView>,
) -> Result<()> {
    let mut current: Option<RenderedView> = None;

    while !shutdown.is_stopped() {
        let mut needs_draw = false;
        while let Ok(view) = view_rx.try_recv() {
            current = Some(view);
            needs_draw = true;
        }

        for event in frontend.poll_events()? {
            if event.is_quit_key() {
                shutdown.stop();
                break;
            }
            match event {
                FrontendEvent::Key { code, modifiers } => {
                    let combo = format_key_combo(code, modifiers);
                    if combo.is_empty() {
                        continue;
                    }
                    let event_name = shortcut_event(&combo);
                    let delivered = bus.emit(&event_name);
                    tracing::debug!("{} delivered to {} handlers", event_name, delivered);
                }
                FrontendEvent::Resize { .. } => needs_draw = true,
            }
        }

        if needs_draw {
            if let Some(view) = &current {
                frontend.render(view)?;
            }
        }
        tokio::task::yield_now().await;
    }

    Ok(())
}
