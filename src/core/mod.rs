//! Core presentation logic
//!
//! Runtime state, shortcut dispatch, the quest board and the actors that
//! drive it. NO imports from frontend/.

pub mod board;
pub mod runtime;
pub mod shortcuts;
pub mod state;

pub use board::QuestBoard;
pub use runtime::Shutdown;
pub use shortcuts::EventBus;
