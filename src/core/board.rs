//! Quest board: the presentation engine
//!
//! Owns the runtime state and everything it is rendered from. The render
//! actor is the only caller, so draining queued shortcut actions and
//! rendering happen in one place, in order.

use crate::config::{modified_time, AppPaths, ConfigSection, ConfigStore};
use crate::core::shortcuts::{
    action_channel, ActionReceiver, ActionSender, EventBus, ShortcutBindings,
};
use crate::core::state::RuntimeState;
use crate::render::translate::Translations;
use crate::render::{RenderedView, Renderer};
use crate::snapshot::{Snapshot, SnapshotReader};
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Notify;

pub struct QuestBoard {
    config: ConfigStore,
    state: RuntimeState,
    reader: SnapshotReader,
    snapshot: Snapshot,
    translations_path: PathBuf,
    translations: Translations,
    translations_mtime: Option<SystemTime>,
    sender: ActionSender,
    actions: ActionReceiver,
    bindings: ShortcutBindings,
    /// Local wall-clock time of the last snapshot re-read
    last_sync: Option<String>,
    last_view: Option<RenderedView>,
    last_markup: Option<String>,
    ticks: u64,
}

impl QuestBoard {
    /// Load config, snapshot and translations, and bind shortcuts on `bus`
    pub fn open(paths: &AppPaths, bus: EventBus) -> Result<Self> {
        let config = ConfigStore::open(paths.config_path())?;
        let state = RuntimeState::from_config(config.config());
        let (sender, actions) = action_channel();
        let mut bindings = ShortcutBindings::new(bus);
        let bound = bindings.register(&config.config().shortcuts, &sender);
        tracing::info!("Registered {} shortcuts", bound);

        let translations_path = paths.translations_path();
        let mut board = Self {
            config,
            state,
            reader: SnapshotReader::new(paths.snapshot_path()),
            snapshot: Snapshot::empty(),
            translations: Translations::load(&translations_path),
            translations_mtime: modified_time(&translations_path),
            translations_path,
            sender,
            actions,
            bindings,
            last_sync: None,
            last_view: None,
            last_markup: None,
            ticks: 0,
        };
        board.reload_snapshot(true);
        Ok(board)
    }

    /// Handle for queueing actions from other threads
    #[cfg(test)]
    pub fn sender(&self) -> ActionSender {
        self.sender.clone()
    }

    /// Signalled whenever a render is requested
    pub fn render_notifier(&self) -> Arc<Notify> {
        self.actions.notifier()
    }

    #[cfg(test)]
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn last_view(&self) -> Option<&RenderedView> {
        self.last_view.as_ref()
    }

    /// One-second heartbeat: advance the simulated clock and run the cheap
    /// freshness checks. Returns true when a render should follow.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        let duration = self.config.config().time_simulation_duration;
        self.state.advance_simulation(1, duration);

        let mut changed = self.reload_config();
        changed |= self.reload_translations();

        let refresh = self.config.config().refresh_interval.max(1);
        if self.ticks % refresh == 0 {
            changed |= self.reload_snapshot(false);
        }

        // The countdown moves while the simulation runs
        changed || self.state.simulation_active
    }

    /// Re-merge the config document after an external edit
    pub fn reload_config(&mut self) -> bool {
        if !self.config.reload_if_changed() {
            return false;
        }
        let config = self.config.config();
        self.state.apply_config(config);
        let bound = self.bindings.register(&config.shortcuts, &self.sender);
        tracing::info!("Config reloaded, {} shortcuts bound", bound);
        true
    }

    fn reload_translations(&mut self) -> bool {
        let mtime = modified_time(&self.translations_path);
        if mtime == self.translations_mtime {
            return false;
        }
        self.translations_mtime = mtime;
        self.translations = Translations::load(&self.translations_path);
        tracing::debug!("Translations reloaded from {:?}", self.translations_path);
        true
    }

    /// Re-read the snapshot when it changed on disk (or always with `force`)
    pub fn reload_snapshot(&mut self, force: bool) -> bool {
        let Some(snapshot) = self.reader.read_if_changed(force) else {
            return false;
        };

        if snapshot.timestamp != self.snapshot.timestamp {
            self.state.reset_simulation();
        }
        tracing::debug!(
            "Snapshot loaded: {} quests, timestamp {:?}",
            snapshot.quests.len(),
            snapshot.timestamp
        );
        self.snapshot = snapshot;
        self.last_sync = Some(chrono::Local::now().format("%H:%M:%S").to_string());
        true
    }

    fn renderer(&self) -> Renderer<'_> {
        Renderer {
            config: self.config.config(),
            state: &self.state,
            translations: &self.translations,
        }
    }

    /// Apply every queued action, then persist the touched sections.
    /// Returns how many actions were applied.
    pub fn drain_actions(&mut self) -> usize {
        let actions = self.actions.drain();
        if actions.is_empty() {
            return 0;
        }
        // Edits that landed since the last tick apply before the actions
        // and before persistence moves `last_mtime` past them
        self.reload_config();

        let mut dirty = BTreeSet::new();
        for action in &actions {
            let visible = if action.is_paging() {
                self.renderer().visible_count(&self.snapshot)
            } else {
                0
            };
            match self.state.apply(action, visible) {
                Some(ConfigSection::PageSize) => self.persist(ConfigSection::PageSize),
                Some(section) => {
                    dirty.insert(section);
                }
                None => {}
            }
            tracing::debug!("Applied shortcut action {:?}", action);
        }

        for section in dirty {
            self.persist(section);
        }
        actions.len()
    }

    fn persist(&mut self, section: ConfigSection) {
        let on_disk = self.config.on_disk_section(section);
        let value = self.state.section_value(section, on_disk.as_ref());
        if let Err(e) = self.config.persist_section(section, value) {
            tracing::warn!("Failed to persist '{}': {:#}", section.key(), e);
        }
    }

    /// Drain queued actions and render. Returns the new view only when its
    /// output differs from the previous pass.
    pub fn render_pass(&mut self) -> Option<&RenderedView> {
        self.drain_actions();

        let visible = self.renderer().visible_count(&self.snapshot);
        self.state.clamp_cursor(visible);

        let view = self.renderer().render(&self.snapshot, self.last_sync.as_deref());
        let markup = view.to_markup();
        if self.last_markup.as_deref() == Some(markup.as_str()) {
            return None;
        }

        self.last_markup = Some(markup);
        self.last_view = Some(view);
        self.last_view.as_ref()
    }

    /// Current markup document, if anything was rendered yet
    pub fn markup(&self) -> Option<&str> {
        self.last_markup.as_deref()
    }

    /// Drop every shortcut binding; further events are not delivered
    pub fn unbind_shortcuts(&mut self) {
        self.bindings.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::read_json_safe;
    use crate::config::test_support::TempDir;
    use crate::core::shortcuts::ShortcutAction;
    use crate::snapshot::Quest;
    use serde_json::json;
    use std::time::Duration;

    fn quest(id: i64, sector: &str, deadline: i64) -> Quest {
        Quest {
            id,
            sector: sector.to_string(),
            completion_deadline: deadline,
            quest_data_asset_path: format!("QuestSetup:T2_Bar_Task{}", id),
            auto_complete: false,
            data: None,
        }
    }

    fn board(dir: &TempDir) -> (QuestBoard, EventBus, AppPaths) {
        let paths = AppPaths::new(dir.path());
        let bus = EventBus::new();
        let board = QuestBoard::open(&paths, bus.clone()).unwrap();
        (board, bus, paths)
    }

    fn bump_mtime(path: &std::path::Path) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_change_suppression() {
        let dir = TempDir::new("board-suppress");
        let (mut board, _bus, _paths) = board(&dir);

        assert!(board.render_pass().is_some());
        assert!(board.render_pass().is_none());
        assert!(board.markup().unwrap().contains("No active quests"));
    }

    #[test]
    fn test_shortcut_events_apply_on_next_pass() {
        let dir = TempDir::new("board-shortcut");
        let (mut board, bus, paths) = board(&dir);
        Snapshot::for_session(1, Some(0), vec![quest(1, "A0", 10), quest(2, "B4", 20)])
            .write(&paths.snapshot_path())
            .unwrap();
        board.reload_snapshot(true);
        board.render_pass();
        assert_eq!(board.last_view().unwrap().visible, 2);

        // ctrl+alt+a toggles sector A0 in the default shortcut map
        bus.emit("shortcut.ctrl+alt+a");
        // Queued, not applied in place
        assert!(board.state().active_sectors.contains("A0"));

        let view = board.render_pass().expect("output changed");
        assert_eq!(view.visible, 1);
        assert!(!board.state().active_sectors.contains("A0"));

        let written = read_json_safe(&paths.config_path()).unwrap();
        assert_eq!(written["filter"]["sectors"]["A0"], json!(false));
        assert_eq!(written["filter"]["sectors"]["B4"], json!(true));
    }

    #[test]
    fn test_persist_keeps_external_edits() {
        let dir = TempDir::new("board-persist");
        let (mut board, _bus, paths) = board(&dir);

        let mut doc = read_json_safe(&paths.config_path()).unwrap();
        doc["empty_text"] = json!("Nothing to do");
        std::fs::write(paths.config_path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        let sender = board.sender();
        sender.send(ShortcutAction::SetSortOrder(crate::config::SortOrder::Desc));
        sender.send(ShortcutAction::PageSizeUp);
        board.render_pass();

        let written = read_json_safe(&paths.config_path()).unwrap();
        assert_eq!(written["empty_text"], json!("Nothing to do"));
        assert_eq!(written["sort"]["order"], json!("desc"));
        assert_eq!(written["page_size"], json!(11));
    }

    #[test]
    fn test_edit_between_ticks_survives_persist_in_memory() {
        let dir = TempDir::new("board-edit-between-ticks");
        let (mut board, _bus, paths) = board(&dir);
        board.render_pass();

        let mut doc = read_json_safe(&paths.config_path()).unwrap();
        doc["empty_text"] = json!("Nothing to do");
        std::fs::write(paths.config_path(), serde_json::to_vec(&doc).unwrap()).unwrap();
        bump_mtime(&paths.config_path());

        board.sender().send(ShortcutAction::SetSortOrder(crate::config::SortOrder::Desc));
        board.render_pass();
        for _ in 0..5 {
            board.tick();
        }
        board.render_pass();

        let written = read_json_safe(&paths.config_path()).unwrap();
        assert_eq!(written["empty_text"], json!("Nothing to do"));
        assert_eq!(written["sort"]["order"], json!("desc"));
        assert_eq!(board.config.config().empty_text, "Nothing to do");
        let markup = board.markup().unwrap();
        assert!(markup.contains("Nothing to do"));
        assert!(!markup.contains("No active quests"));
    }

    #[test]
    fn test_external_config_edit_wins_on_reload() {
        let dir = TempDir::new("board-reload");
        let (mut board, bus, paths) = board(&dir);
        board.sender().send(ShortcutAction::ToggleFilter);
        board.render_pass();
        assert!(!board.state().filter.enabled);

        std::fs::write(
            paths.config_path(),
            r#"{"filter": {"enabled": true, "sectors": {"B4": true}}, "shortcuts": {"next_page": "ctrl+x"}}"#,
        )
        .unwrap();
        bump_mtime(&paths.config_path());

        assert!(board.reload_config());
        assert!(board.state().filter.enabled);
        assert!(board.state().active_sectors.contains("B4"));
        // Merged, so the default sectors are still present
        assert!(board.state().active_sectors.contains("A0"));
        assert_eq!(bus.handler_count("shortcut.ctrl+x"), 1);
    }

    #[test]
    fn test_snapshot_timestamp_resets_simulation() {
        let dir = TempDir::new("board-sim");
        let (mut board, _bus, paths) = board(&dir);
        Snapshot::for_session(1, Some(100), vec![quest(1, "A0", 500)])
            .write(&paths.snapshot_path())
            .unwrap();
        board.reload_snapshot(true);

        board.state.advance_simulation(30, 120);
        assert_eq!(board.state().simulated_time, 30);

        // Same timestamp: clock keeps running
        board.reload_snapshot(true);
        assert_eq!(board.state().simulated_time, 30);

        Snapshot::for_session(1, Some(200), vec![quest(1, "A0", 500)])
            .write(&paths.snapshot_path())
            .unwrap();
        board.reload_snapshot(true);
        assert_eq!(board.state().simulated_time, 0);
        assert!(board.state().simulation_active);
    }

    #[test]
    fn test_unbind_stops_delivery() {
        let dir = TempDir::new("board-unbind");
        let (mut board, bus, _paths) = board(&dir);
        assert_eq!(bus.handler_count("shortcut.ctrl+alt+f"), 1);
        board.unbind_shortcuts();
        assert_eq!(bus.emit("shortcut.ctrl+alt+f"), 0);
    }
}
