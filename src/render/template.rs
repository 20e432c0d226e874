//! Template lines: single-pass `%token%` substitution and markup emission.
//!
//! A template is split once into literal and placeholder pieces. Each
//! placeholder is resolved against the quest's tokens, then the globals.
//! Resolved values are never scanned again, so a value that happens to
//! contain `%name%` text stays literal. `%%` writes a single percent sign
//! and anything that is not a well-formed known placeholder is kept as-is.

use crate::config::{Config, MembershipColors, TemplateLine};
use crate::render::format::time_color;
use quick_xml::escape::escape;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece<'a> {
    Literal(String),
    Token(&'a str),
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn push_literal(pieces: &mut Vec<Piece<'_>>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Piece::Literal(last)) = pieces.last_mut() {
        last.push_str(text);
    } else {
        pieces.push(Piece::Literal(text.to_string()));
    }
}

/// Split a template into literal and placeholder pieces
pub fn tokenize(template: &str) -> Vec<Piece<'_>> {
    let bytes = template.as_bytes();
    let mut pieces = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }

        if bytes.get(i + 1) == Some(&b'%') {
            // keep one of the two percent signs
            push_literal(&mut pieces, &template[literal_start..=i]);
            i += 2;
            literal_start = i;
            continue;
        }

        let rest = &template[i + 1..];
        match rest.find('%') {
            Some(end) if is_token_name(&rest[..end]) => {
                push_literal(&mut pieces, &template[literal_start..i]);
                pieces.push(Piece::Token(&rest[..end]));
                i += end + 2;
                literal_start = i;
            }
            _ => i += 1,
        }
    }

    push_literal(&mut pieces, &template[literal_start..]);
    pieces
}

/// Values a template line can reference. Quest tokens shadow globals.
#[derive(Debug, Clone, Copy)]
pub struct TokenScope<'a> {
    pub globals: &'a BTreeMap<String, String>,
    pub quest: Option<&'a BTreeMap<String, String>>,
    /// Signed seconds left, for the dynamic time color
    pub remaining: Option<i64>,
}

impl<'a> TokenScope<'a> {
    pub fn globals(globals: &'a BTreeMap<String, String>) -> Self {
        Self {
            globals,
            quest: None,
            remaining: None,
        }
    }

    fn get(&self, name: &str) -> Option<&'a str> {
        self.quest
            .and_then(|q| q.get(name))
            .or_else(|| self.globals.get(name))
            .map(String::as_str)
    }
}

/// Color and visibility rules applied to resolved tokens
#[derive(Debug, Clone, Copy)]
pub struct TokenStyle<'a> {
    pub config: &'a Config,
    pub display: &'a BTreeMap<String, bool>,
    pub active_sectors: &'a BTreeSet<String>,
    pub active_shops: &'a BTreeSet<String>,
}

impl TokenStyle<'_> {
    /// Fields default to shown
    pub fn is_shown(&self, field: &str) -> bool {
        self.display.get(field).copied().unwrap_or(true)
    }

    fn membership_color(
        &self,
        key: &str,
        raw: &str,
        table: &BTreeMap<String, MembershipColors>,
        active: &BTreeSet<String>,
    ) -> Option<String> {
        let code = raw.to_uppercase();
        let picked = table.get(&code).and_then(|colors| {
            if active.contains(&code) {
                colors.active.clone()
            } else {
                colors.inactive.clone()
            }
        });
        picked.or_else(|| self.config.token_colors.get(key).cloned())
    }

    pub fn color_for(&self, key: &str, raw: &str, remaining: Option<i64>) -> Option<String> {
        let color = match key {
            "sector" => self.membership_color(
                key,
                raw,
                &self.config.sector_token_colors,
                self.active_sectors,
            ),
            "shop" => {
                self.membership_color(key, raw, &self.config.shop_token_colors, self.active_shops)
            }
            _ => match self.config.token_colors.get(key).map(String::as_str) {
                Some("dynamic") if key.starts_with("time_remaining") => {
                    Some(time_color(remaining, &self.config.time_remaining_colors))
                }
                Some("dynamic") => None,
                other => other.map(str::to_string),
            },
        };
        color.filter(|c| !c.trim().is_empty())
    }
}

/// A run of text inside a rendered line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub color: Option<String>,
    /// Substituted value rather than template text
    pub is_value: bool,
}

impl Segment {
    fn literal(text: String) -> Self {
        Self {
            text,
            color: None,
            is_value: false,
        }
    }
}

/// Substitute every placeholder of `template` in one pass
pub fn substitute(template: &str, scope: &TokenScope<'_>, style: &TokenStyle<'_>) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();

    for piece in tokenize(template) {
        let segment = match piece {
            Piece::Literal(text) => Segment::literal(text),
            Piece::Token(name) => match scope.get(name) {
                Some(raw) if style.is_shown(name) => Segment {
                    text: raw.to_string(),
                    color: style.color_for(name, raw, scope.remaining),
                    is_value: true,
                },
                Some(_) => continue,
                None => Segment::literal(format!("%{}%", name)),
            },
        };

        match segments.last_mut() {
            Some(last) if !last.is_value && !segment.is_value => last.text.push_str(&segment.text),
            _ => segments.push(segment),
        }
    }

    segments
}

/// One laid-out line, for hosts that draw lines themselves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub font: String,
    pub size: u32,
    pub color: Option<String>,
    pub italic: bool,
    pub segments: Vec<Segment>,
}

impl RenderedLine {
    /// Render a configured template line with document-wide style fallbacks
    pub fn from_template(
        line: &TemplateLine,
        config: &Config,
        scope: &TokenScope<'_>,
        style: &TokenStyle<'_>,
    ) -> Self {
        Self {
            font: line.font.clone().unwrap_or_else(|| config.font.clone()),
            size: line.size.unwrap_or(config.font_size),
            color: line.color.clone(),
            italic: false,
            segments: substitute(&line.data, scope, style),
        }
    }

    /// The grey italic placeholder shown when nothing survives filtering
    pub fn placeholder(text: &str, config: &Config) -> Self {
        Self {
            font: config.font.clone(),
            size: config.font_size,
            color: Some("#888888".to_string()),
            italic: true,
            segments: vec![Segment::literal(text.to_string())],
        }
    }

    /// Plain text with styling stripped
    #[cfg(test)]
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn to_markup(&self) -> String {
        let mut body = String::new();
        for segment in &self.segments {
            let escaped = escape(segment.text.as_str());
            let text = if segment.is_value {
                escaped.replace(' ', "&nbsp;")
            } else {
                escaped.into_owned()
            };
            match &segment.color {
                Some(color) => {
                    body.push_str(&format!(
                        "<span style=\"color:{}\">{}</span>",
                        escape(color.as_str()),
                        text
                    ));
                }
                None => body.push_str(&text),
            }
        }

        if self.italic {
            body = format!("<i>{}</i>", body);
        }
        if let Some(color) = &self.color {
            body = format!("<span style=\"color:{}\">{}</span>", escape(color.as_str()), body);
        }

        format!(
            "<div style=\"font-family:{};font-size:{}pt\">{}</div>",
            escape(self.font.as_str()),
            self.size,
            body
        )
    }
}
