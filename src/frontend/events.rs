//! Frontend-agnostic input events.
//!
//! Frontends translate their native event streams into this enum so the
//! host loop only handles one event shape.

use crossterm::event::{KeyCode, KeyModifiers};

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendEvent {
    /// Keyboard input
    Key {
        code: KeyCode,
        modifiers: KeyModifiers,
    },
    /// Terminal resize; the view must be redrawn
    Resize { width: u16, height: u16 },
}

impl FrontendEvent {
    pub fn key(code: KeyCode, modifiers: KeyModifiers) -> Self {
        Self::Key { code, modifiers }
    }

    /// Plain `q` or `esc` ends the session
    pub fn is_quit_key(&self) -> bool {
        match self {
            Self::Key { code, modifiers } => {
                modifiers.is_empty() && matches!(code, KeyCode::Esc | KeyCode::Char('q'))
            }
            Self::Resize { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_keys() {
        assert!(FrontendEvent::key(KeyCode::Char('q'), KeyModifiers::NONE).is_quit_key());
        assert!(FrontendEvent::key(KeyCode::Esc, KeyModifiers::NONE).is_quit_key());
        assert!(!FrontendEvent::key(KeyCode::Char('q'), KeyModifiers::CONTROL).is_quit_key());
        assert!(!FrontendEvent::Resize { width: 1, height: 1 }.is_quit_key());
    }
}
