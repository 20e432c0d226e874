//! Actor wiring
//!
//! Two periodic actors run side by side: the synchronizer (database to
//! snapshot file) and the render actor (snapshot file to host surface).
//! They share nothing in-process; a slow database never stalls rendering.

use crate::config::write_atomic;
use crate::core::board::QuestBoard;
use crate::render::RenderedView;
use crate::sync::QuestSynchronizer;
use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Heartbeat of the render actor
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Requests arriving within this window share one render pass
pub const RENDER_DEBOUNCE: Duration = Duration::from_millis(50);

/// Idempotent stop signal shared by every actor
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Signal every actor to stop. Returns true only for the first call.
    pub fn stop(&self) -> bool {
        let first = self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if first {
            tracing::info!("Shutdown requested");
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Where finished renders go
pub trait RenderSink: Send + 'static {
    fn present(&mut self, view: &RenderedView, markup: &str);
}

/// Hand views to a host surface running elsewhere
impl RenderSink for mpsc::UnboundedSender<RenderedView> {
    fn present(&mut self, view: &RenderedView, _markup: &str) {
        if self.send(view.clone()).is_err() {
            tracing::debug!("Host surface gone, dropping render");
        }
    }
}

/// Writes the markup document to a file (atomically) or stdout
pub struct MarkupWriter {
    output: Option<PathBuf>,
}

impl MarkupWriter {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self { output }
    }

    pub fn write(&self, markup: &str) -> Result<()> {
        match &self.output {
            Some(path) => write_atomic(path, markup.as_bytes()),
            None => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{}", markup)?;
                stdout.flush()?;
                Ok(())
            }
        }
    }
}

impl RenderSink for MarkupWriter {
    fn present(&mut self, _view: &RenderedView, markup: &str) {
        if let Err(e) = self.write(markup) {
            tracing::warn!("Failed to write rendered output: {:#}", e);
        }
    }
}

fn render_into(board: &mut QuestBoard, sink: &mut impl RenderSink) {
    if board.render_pass().is_none() {
        return;
    }
    if let (Some(view), Some(markup)) = (board.last_view(), board.markup()) {
        sink.present(view, markup);
    }
}

/// Render actor: ticks once a second, renders on demand with a short
/// debounce, and drops its shortcut bindings on the way out.
pub async fn run_board(mut board: QuestBoard, mut sink: impl RenderSink, shutdown: Shutdown) {
    let notify = board.render_notifier();
    let mut stop = shutdown.subscribe();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately
    ticker.tick().await;

    render_into(&mut board, &mut sink);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !board.tick() {
                    continue;
                }
            }
            _ = notify.notified() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        tokio::time::sleep(RENDER_DEBOUNCE).await;
        if shutdown.is_stopped() {
            break;
        }
        render_into(&mut board, &mut sink);
    }

    board.unbind_shortcuts();
    tracing::info!("Render actor stopped");
}

pub fn spawn_board(board: QuestBoard, sink: impl RenderSink, shutdown: &Shutdown) -> JoinHandle<()> {
    tokio::spawn(run_board(board, sink, shutdown.clone()))
}

pub fn spawn_synchronizer(sync: QuestSynchronizer, shutdown: &Shutdown) -> JoinHandle<()> {
    tokio::spawn(sync.run(shutdown.subscribe()))
}
