//! Rendering engine
//!
//! Turns a snapshot plus runtime state into styled lines and a markup
//! document: filter, sort, paginate, enrich, then substitute tokens.

pub mod format;
pub mod template;
pub mod translate;
pub mod view;

pub use template::RenderedLine;

use crate::config::Config;
use crate::core::state::RuntimeState;
use crate::snapshot::Snapshot;
use std::collections::BTreeMap;
use template::{TokenScope, TokenStyle};
use translate::Translations;
use view::{clamp_page, filter_rows, page_count, page_slice, sort_rows, FilterView, QuestRow};

/// Output of one render pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedView {
    pub lines: Vec<RenderedLine>,
    /// Page actually shown, after clamping
    pub page: usize,
    pub page_count: usize,
    /// Quests left after filtering
    pub visible: usize,
}

impl RenderedView {
    /// The whole view as one markup document, one block per line
    pub fn to_markup(&self) -> String {
        self.lines
            .iter()
            .map(RenderedLine::to_markup)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct Renderer<'a> {
    pub config: &'a Config,
    pub state: &'a RuntimeState,
    pub translations: &'a Translations,
}

impl Renderer<'_> {
    fn filter_view(&self) -> FilterView<'_> {
        FilterView {
            enabled: self.state.filter.enabled,
            active_sectors: &self.state.active_sectors,
            active_shops: &self.state.active_shops,
        }
    }

    /// Filter and sort the snapshot's quests
    pub fn visible_rows(&self, snapshot: &Snapshot) -> Vec<QuestRow> {
        let rows = snapshot.quests.iter().cloned().map(QuestRow::new).collect();
        let mut rows = filter_rows(rows, &self.filter_view());
        let reference = self
            .state
            .effective_timestamp(snapshot.timestamp)
            .unwrap_or(0);
        sort_rows(&mut rows, &self.state.sort.keys, self.state.sort.order, reference);
        rows
    }

    /// Quests left after filtering, for cursor clamping
    pub fn visible_count(&self, snapshot: &Snapshot) -> usize {
        let filter = self.filter_view();
        snapshot
            .quests
            .iter()
            .filter(|quest| {
                let asset = translate::AssetInfo::parse(&quest.quest_data_asset_path);
                filter.retains(quest, &asset)
            })
            .count()
    }

    pub fn render(&self, snapshot: &Snapshot, last_sync: Option<&str>) -> RenderedView {
        let config = self.config;
        let state = self.state;
        let rows = self.visible_rows(snapshot);
        let visible = rows.len();
        let pages = page_count(visible, state.page_size);
        let page = clamp_page(state.current_page, visible, state.page_size);
        let effective = state.effective_timestamp(snapshot.timestamp);

        let globals = self.globals(snapshot, visible, page, pages, effective, last_sync);
        let style = TokenStyle {
            config,
            display: &state.display,
            active_sectors: &state.active_sectors,
            active_shops: &state.active_shops,
        };
        let line_enabled = |toggle: &Option<String>| {
            toggle.as_deref().map_or(true, |field| state.is_shown(field))
        };

        let mut lines = Vec::new();
        let header_scope = TokenScope::globals(&globals);
        for line in config.header.iter().filter(|l| line_enabled(&l.toggle)) {
            lines.push(RenderedLine::from_template(line, config, &header_scope, &style));
        }

        if rows.is_empty() {
            lines.push(RenderedLine::placeholder(&config.empty_text, config));
        }

        let offset = page * state.page_size;
        for (position, row) in page_slice(&rows, page, state.page_size).iter().enumerate() {
            let remaining = effective.map(|ts| row.quest.completion_deadline - ts);
            let tokens = self.quest_tokens(row, offset + position + 1, remaining);
            let scope = TokenScope {
                globals: &globals,
                quest: Some(&tokens),
                remaining,
            };
            for line in config.lines.iter().filter(|l| line_enabled(&l.toggle)) {
                lines.push(RenderedLine::from_template(line, config, &scope, &style));
            }
        }

        RenderedView {
            lines,
            page,
            page_count: pages,
            visible,
        }
    }

    fn globals(
        &self,
        snapshot: &Snapshot,
        visible: usize,
        page: usize,
        pages: usize,
        effective: Option<i64>,
        last_sync: Option<&str>,
    ) -> BTreeMap<String, String> {
        let state = self.state;
        let joined = |codes: &std::collections::BTreeSet<String>| {
            if codes.is_empty() {
                "ALL".to_string()
            } else {
                codes.iter().cloned().collect::<Vec<_>>().join(", ")
            }
        };
        let optional = |value: Option<i64>| value.map_or_else(|| "N/A".to_string(), |v| v.to_string());

        [
            ("quest_count", visible.to_string()),
            ("total_count", snapshot.quests.len().to_string()),
            ("timestamp", optional(effective)),
            ("user_profile_id", optional(snapshot.session_id)),
            ("filter_enabled", state.filter.enabled.to_string()),
            ("filter_active_sectors", joined(&state.active_sectors)),
            ("filter_active_shops", joined(&state.active_shops)),
            ("sort_keys", state.sort.keys.join(", ")),
            ("sort_order", state.sort.order.as_str().to_string()),
            ("page", (page + 1).to_string()),
            ("page_count", pages.to_string()),
            ("page_size", state.page_size.to_string()),
            ("last_sync", last_sync.unwrap_or("--:--:--").to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn quest_tokens(&self, row: &QuestRow, index: usize, remaining: Option<i64>) -> BTreeMap<String, String> {
        let quest = &row.quest;
        let asset = &row.asset;
        let mut tokens: BTreeMap<String, String> = [
            ("id", quest.id.to_string()),
            ("sector", quest.sector.clone()),
            ("completion_deadline", quest.completion_deadline.to_string()),
            ("quest_data_asset_path", quest.quest_data_asset_path.clone()),
            ("auto_complete", quest.auto_complete.to_string()),
            ("data", quest.data.clone().unwrap_or_default()),
            (
                "time_remaining",
                format::format_time_remaining(remaining, &self.config.time_remaining_format),
            ),
            (
                "time_remaining_seconds",
                remaining.map_or_else(|| "N/A".to_string(), |r| r.to_string()),
            ),
            ("tier", asset.tier.map(|t| t.to_string()).unwrap_or_default()),
            ("shop", asset.shop.clone().unwrap_or_default()),
            ("sort_name", asset.sort_name.clone().unwrap_or_default()),
            ("index", index.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let enrichment =
            self.translations
                .enrich(&quest.quest_data_asset_path, asset, &self.config.language);
        // Enrichment only fills fields the quest does not already carry
        let mut fill = |key: &str, value: String| {
            let slot = tokens.entry(key.to_string()).or_default();
            if slot.is_empty() {
                *slot = value;
            }
        };
        fill("name", enrichment.name);
        fill("description", enrichment.description);
        fill("requirements", enrichment.requirements);
        fill("rewards", enrichment.rewards);
        for (key, value) in enrichment.extra {
            fill(&key, value);
        }

        tokens
    }
}
