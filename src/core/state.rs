//! Runtime state
//!
//! The in-memory filter/sort/pagination/display state the board renders
//! from. Seeded from the Configuration Document, mutated only by queued
//! shortcut actions, and written back section by section.

use crate::config::{Config, ConfigSection, FilterConfig, SortConfig, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::core::shortcuts::ShortcutAction;
use crate::render::view::{clamp_page, SORT_KEY_OPTIONS};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeState {
    /// Filter section as it will be persisted (enabled flag and code maps)
    pub filter: FilterConfig,

    /// Sector codes currently shown (upper-case)
    pub active_sectors: BTreeSet<String>,

    /// Shop codes currently shown (upper-case)
    pub active_shops: BTreeSet<String>,

    /// Sort keys and order; may run ahead of the file until persisted
    pub sort: SortConfig,

    /// Per-field show/hide toggles
    pub display: BTreeMap<String, bool>,

    pub page_size: usize,

    /// Zero-based pagination cursor
    pub current_page: usize,

    /// Seconds counted locally since the snapshot timestamp last changed
    pub simulated_time: i64,

    /// False once the local clock reached the simulation duration
    pub simulation_active: bool,
}

fn active_codes(map: &BTreeMap<String, bool>) -> BTreeSet<String> {
    map.iter()
        .filter(|(_, on)| **on)
        .map(|(code, _)| code.to_uppercase())
        .collect()
}

/// Upper-case keys; a code listed twice in different case is on if either is
fn upper_keys(map: &BTreeMap<String, bool>) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    for (code, on) in map {
        let entry = out.entry(code.to_uppercase()).or_insert(false);
        *entry |= *on;
    }
    out
}

impl RuntimeState {
    pub fn from_config(config: &Config) -> Self {
        let mut state = Self {
            filter: FilterConfig::default(),
            active_sectors: BTreeSet::new(),
            active_shops: BTreeSet::new(),
            sort: config.sort.clone(),
            display: config.display.clone(),
            page_size: config.page_size,
            current_page: 0,
            simulated_time: 0,
            simulation_active: true,
        };
        state.apply_config(config);
        state
    }

    /// Re-derive state from a freshly loaded configuration.
    /// External edits win over anything changed at runtime.
    pub fn apply_config(&mut self, config: &Config) {
        self.filter = FilterConfig {
            enabled: config.filter.enabled,
            sectors: upper_keys(&config.filter.sectors),
            shops: upper_keys(&config.filter.shops),
        };
        self.active_sectors = active_codes(&self.filter.sectors);
        self.active_shops = active_codes(&self.filter.shops);
        self.sort = config.sort.clone();
        self.display = config.display.clone();
        if self.page_size != config.page_size {
            self.page_size = config.page_size;
            self.current_page = 0;
        }
    }

    /// Restart the local clock after a new snapshot timestamp
    pub fn reset_simulation(&mut self) {
        self.simulated_time = 0;
        self.simulation_active = true;
    }

    /// Advance the local clock by one tick
    pub fn advance_simulation(&mut self, seconds: i64, duration: u64) {
        if !self.simulation_active {
            return;
        }
        let duration = i64::try_from(duration).unwrap_or(i64::MAX);
        self.simulated_time = (self.simulated_time + seconds).min(duration);
        if self.simulated_time >= duration {
            self.simulation_active = false;
        }
    }

    /// Snapshot timestamp advanced by the local clock
    pub fn effective_timestamp(&self, snapshot_timestamp: Option<i64>) -> Option<i64> {
        snapshot_timestamp.map(|ts| ts + self.simulated_time)
    }

    pub fn is_shown(&self, field: &str) -> bool {
        self.display.get(field).copied().unwrap_or(true)
    }

    /// Apply one action. `visible` is the filtered quest count, used by the
    /// paging actions. Returns the config section the change must be
    /// persisted to, if any.
    pub fn apply(&mut self, action: &ShortcutAction, visible: usize) -> Option<ConfigSection> {
        match action {
            ShortcutAction::ToggleFilter => {
                self.filter.enabled = !self.filter.enabled;
                self.current_page = 0;
                Some(ConfigSection::Filter)
            }
            ShortcutAction::ToggleSector(code) => {
                toggle_code(&mut self.filter.sectors, &mut self.active_sectors, code);
                self.current_page = 0;
                Some(ConfigSection::Filter)
            }
            ShortcutAction::ToggleShop(code) => {
                toggle_code(&mut self.filter.shops, &mut self.active_shops, code);
                self.current_page = 0;
                Some(ConfigSection::Filter)
            }
            ShortcutAction::SetSortOrder(order) => {
                self.sort.order = *order;
                Some(ConfigSection::Sort)
            }
            ShortcutAction::CycleSortKey => {
                match self.sort.keys.last_mut() {
                    Some(last) => {
                        let next = SORT_KEY_OPTIONS
                            .iter()
                            .position(|k| k == last)
                            .map_or(0, |i| (i + 1) % SORT_KEY_OPTIONS.len());
                        *last = SORT_KEY_OPTIONS[next].to_string();
                    }
                    None => self.sort.keys.push(SORT_KEY_OPTIONS[0].to_string()),
                }
                Some(ConfigSection::Sort)
            }
            ShortcutAction::AddSortKey => {
                let unused = SORT_KEY_OPTIONS
                    .iter()
                    .find(|option| !self.sort.keys.iter().any(|k| k == *option))?;
                self.sort.keys.push(unused.to_string());
                Some(ConfigSection::Sort)
            }
            ShortcutAction::ClearSortKeys => {
                if self.sort.keys.len() <= 1 {
                    return None;
                }
                self.sort.keys.truncate(1);
                Some(ConfigSection::Sort)
            }
            ShortcutAction::ToggleDisplay(field) => {
                let shown = self.is_shown(field);
                self.display.insert(field.clone(), !shown);
                Some(ConfigSection::Display)
            }
            ShortcutAction::NextPage => {
                self.current_page = clamp_page(self.current_page + 1, visible, self.page_size);
                None
            }
            ShortcutAction::PrevPage => {
                self.current_page =
                    clamp_page(self.current_page.saturating_sub(1), visible, self.page_size);
                None
            }
            ShortcutAction::PageSizeUp => self.set_page_size(self.page_size + 1),
            ShortcutAction::PageSizeDown => self.set_page_size(self.page_size.saturating_sub(1)),
        }
    }

    fn set_page_size(&mut self, size: usize) -> Option<ConfigSection> {
        let size = size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        if size == self.page_size {
            return None;
        }
        self.page_size = size;
        self.current_page = 0;
        Some(ConfigSection::PageSize)
    }

    /// Keep the cursor inside the page range for `visible` quests
    pub fn clamp_cursor(&mut self, visible: usize) {
        self.current_page = clamp_page(self.current_page, visible, self.page_size);
    }

    /// JSON value of a section, ready for read-merge-write.
    ///
    /// `on_disk` is the section currently in the file. For the filter
    /// section, codes found on disk, in memory or in the active sets all
    /// end up in the written maps, each set to its runtime membership.
    pub fn section_value(&self, section: ConfigSection, on_disk: Option<&Value>) -> Value {
        match section {
            ConfigSection::Filter => {
                let disk_keys = |name: &str| -> Vec<String> {
                    on_disk
                        .and_then(|v| v.get(name))
                        .and_then(Value::as_object)
                        .map(|m| m.keys().map(|k| k.to_uppercase()).collect())
                        .unwrap_or_default()
                };
                let rebuild = |name: &str, memory: &BTreeMap<String, bool>, active: &BTreeSet<String>| {
                    let codes: BTreeSet<String> = disk_keys(name)
                        .into_iter()
                        .chain(memory.keys().cloned())
                        .chain(active.iter().cloned())
                        .collect();
                    codes
                        .into_iter()
                        .map(|code| {
                            let on = active.contains(&code);
                            (code, Value::Bool(on))
                        })
                        .collect::<Map<String, Value>>()
                };

                json!({
                    "enabled": self.filter.enabled,
                    "sectors": rebuild("sectors", &self.filter.sectors, &self.active_sectors),
                    "shops": rebuild("shops", &self.filter.shops, &self.active_shops),
                })
            }
            ConfigSection::Sort => json!({
                "keys": self.sort.keys,
                "order": self.sort.order.as_str(),
            }),
            ConfigSection::Display => json!(self.display),
            ConfigSection::PageSize => json!(self.page_size),
        }
    }
}

fn toggle_code(map: &mut BTreeMap<String, bool>, active: &mut BTreeSet<String>, code: &str) {
    let code = code.to_uppercase();
    if active.remove(&code) {
        map.insert(code, false);
    } else {
        active.insert(code.clone());
        map.insert(code, true);
    }
}
