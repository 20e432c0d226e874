//! Terminal host surface (ratatui)
//!
//! Draws the board's styled lines and turns key presses into combo strings
//! that the host loop emits as `shortcut.<combo>` events.

use crate::frontend::{Frontend, FrontendEvent};
use crate::render::{RenderedLine, RenderedView};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use std::io;
use std::time::Duration;

pub struct TuiFrontend {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    poll_timeout: Duration,
    cleaned_up: bool,
}

impl TuiFrontend {
    /// Enter raw mode and the alternate screen
    pub fn new() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("Failed to setup terminal")?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;
        terminal.hide_cursor()?;

        Ok(Self {
            terminal,
            poll_timeout: Duration::from_millis(50),
            cleaned_up: false,
        })
    }

    fn convert_event(event: Event) -> Option<FrontendEvent> {
        match event {
            Event::Key(key_event) => {
                // Only key presses; repeats and releases are ignored
                if key_event.kind != KeyEventKind::Press {
                    return None;
                }
                Some(FrontendEvent::key(key_event.code, key_event.modifiers))
            }
            Event::Resize(width, height) => Some(FrontendEvent::Resize { width, height }),
            _ => None,
        }
    }
}

impl Frontend for TuiFrontend {
    fn poll_events(&mut self) -> Result<Vec<FrontendEvent>> {
        let mut events = Vec::new();
        if event::poll(self.poll_timeout)? {
            // Drain everything already buffered
            loop {
                if let Some(converted) = Self::convert_event(event::read()?) {
                    events.push(converted);
                }
                if !event::poll(Duration::ZERO)? {
                    break;
                }
            }
        }
        Ok(events)
    }

    fn render(&mut self, view: &RenderedView) -> Result<()> {
        let lines: Vec<Line<'static>> = view.lines.iter().map(to_line).collect();
        let title = format!(" Quests {}/{} ", view.page + 1, view.page_count);

        self.terminal.draw(|f| {
            let paragraph = Paragraph::new(lines)
                .block(Block::default().borders(Borders::ALL).title(title))
                .wrap(Wrap { trim: false });
            f.render_widget(paragraph, f.area());
        })?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for TuiFrontend {
    fn drop(&mut self) {
        // Restore the terminal even if cleanup() wasn't called
        let _ = self.cleanup();
    }
}

/// Parse a `#rrggbb` color
pub fn hex_to_color(hex: &str) -> Option<Color> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }

    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;

    Some(Color::Rgb(r, g, b))
}

/// Convert a rendered line into ratatui spans. Segment colors win over the
/// line color; font and size have no terminal equivalent.
pub fn to_line(line: &RenderedLine) -> Line<'static> {
    let mut base = Style::default();
    if let Some(color) = line.color.as_deref().and_then(hex_to_color) {
        base = base.fg(color);
    }
    if line.italic {
        base = base.add_modifier(Modifier::ITALIC);
    }

    let spans: Vec<Span<'static>> = line
        .segments
        .iter()
        .map(|segment| {
            let style = match segment.color.as_deref().and_then(hex_to_color) {
                Some(color) => base.fg(color),
                None => base,
            };
            Span::styled(segment.text.clone(), style)
        })
        .collect();

    Line::from(spans)
}

/// Key press as a combo string (`ctrl+alt+f`); empty for unhandled keys
pub fn format_key_combo(code: KeyCode, modifiers: KeyModifiers) -> String {
    let base_key = match code {
        KeyCode::Char(c) => c.to_lowercase().to_string(),
        KeyCode::Enter => "enter".to_string(),
        KeyCode::Esc => "esc".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Delete => "delete".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::Home => "home".to_string(),
        KeyCode::End => "end".to_string(),
        KeyCode::PageUp => "pageup".to_string(),
        KeyCode::PageDown => "pagedown".to_string(),
        KeyCode::F(n) => format!("f{}", n),
        _ => return String::new(),
    };

    let modifiers = format_modifiers(modifiers);
    if modifiers.is_empty() {
        base_key
    } else {
        format!("{}+{}", modifiers, base_key)
    }
}

fn format_modifiers(modifiers: KeyModifiers) -> String {
    let mut parts = Vec::new();

    if modifiers.contains(KeyModifiers::CONTROL) {
        parts.push("ctrl");
    }
    if modifiers.contains(KeyModifiers::ALT) {
        parts.push("alt");
    }
    if modifiers.contains(KeyModifiers::SHIFT) {
        parts.push("shift");
    }

    parts.join("+")
}
