//! Frontend abstraction layer
//!
//! A host surface receives finished views from the render actor and turns
//! its own input into shortcut events. The core never draws anything.

pub mod events;
pub mod tui;

use crate::render::RenderedView;
use anyhow::Result;
pub use events::FrontendEvent;
pub use tui::TuiFrontend;

pub trait Frontend {
    /// Return all pending input events (empty if none)
    fn poll_events(&mut self) -> Result<Vec<FrontendEvent>>;

    /// Draw a rendered view
    fn render(&mut self, view: &RenderedView) -> Result<()>;

    /// Restore the terminal (or close windows) before exit
    fn cleanup(&mut self) -> Result<()>;
}
