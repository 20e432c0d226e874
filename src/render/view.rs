//! Filter, multi-key sort and pagination over snapshot quests.

use crate::config::SortOrder;
use crate::render::translate::AssetInfo;
use crate::snapshot::Quest;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Sort keys reachable through the cycle/add shortcuts, in cycling order
pub const SORT_KEY_OPTIONS: [&str; 6] = [
    "id",
    "sector",
    "time_remaining",
    "completion_deadline",
    "quest_data_asset_path",
    "auto_complete",
];

/// Inputs of the filter step, borrowed from runtime state
#[derive(Debug, Clone, Copy)]
pub struct FilterView<'a> {
    pub enabled: bool,
    pub active_sectors: &'a BTreeSet<String>,
    pub active_shops: &'a BTreeSet<String>,
}

impl FilterView<'_> {
    /// A quest is dropped only by a dimension that has at least one active
    /// entry, so an all-off map never hides everything.
    pub fn retains(&self, quest: &Quest, asset: &AssetInfo) -> bool {
        if !self.enabled {
            return true;
        }

        if !self.active_sectors.is_empty()
            && !self.active_sectors.contains(&quest.sector.to_uppercase())
        {
            return false;
        }

        if !self.active_shops.is_empty() {
            let in_shop = asset
                .shop
                .as_ref()
                .is_some_and(|shop| self.active_shops.contains(shop));
            if !in_shop {
                return false;
            }
        }

        true
    }
}

/// A quest paired with its parsed asset path
#[derive(Debug, Clone, PartialEq)]
pub struct QuestRow {
    pub quest: Quest,
    pub asset: AssetInfo,
}

impl QuestRow {
    pub fn new(quest: Quest) -> Self {
        let asset = AssetInfo::parse(&quest.quest_data_asset_path);
        Self { quest, asset }
    }
}

pub fn filter_rows(rows: Vec<QuestRow>, filter: &FilterView<'_>) -> Vec<QuestRow> {
    rows.into_iter()
        .filter(|row| filter.retains(&row.quest, &row.asset))
        .collect()
}

/// Comparable value of one sort key. Missing sorts lowest, then numbers,
/// then case-folded text.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Missing,
    Number(f64),
    Text(String),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Missing => 0,
            Self::Number(_) => 1,
            Self::Text(_) => 2,
        }
    }

    fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(trimmed.to_lowercase()),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Resolve `key` on a row. `time_remaining` is measured against
/// `effective_timestamp`.
pub fn sort_value(row: &QuestRow, key: &str, effective_timestamp: i64) -> SortValue {
    let quest = &row.quest;
    match key {
        "time_remaining" | "time_remaining_seconds" => {
            SortValue::Number((quest.completion_deadline - effective_timestamp) as f64)
        }
        "id" => SortValue::Number(quest.id as f64),
        "completion_deadline" => SortValue::Number(quest.completion_deadline as f64),
        "auto_complete" => SortValue::Number(if quest.auto_complete { 1.0 } else { 0.0 }),
        "sector" => SortValue::from_text(&quest.sector),
        "quest_data_asset_path" => SortValue::from_text(&quest.quest_data_asset_path),
        "tier" => row
            .asset
            .tier
            .map(|t| SortValue::Number(t as f64))
            .unwrap_or(SortValue::Missing),
        "shop" => SortValue::from_text(row.asset.shop.as_deref().unwrap_or("")),
        "sort_name" => SortValue::from_text(row.asset.sort_name.as_deref().unwrap_or("")),
        "data" => SortValue::from_text(quest.data.as_deref().unwrap_or("")),
        _ => SortValue::Missing,
    }
}

/// Stable sort by the key tuple; `Desc` reverses the whole tuple ordering.
/// An empty key list keeps the input order.
pub fn sort_rows(rows: &mut [QuestRow], keys: &[String], order: SortOrder, effective_timestamp: i64) {
    if keys.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        let ordering = keys
            .iter()
            .map(|key| {
                sort_value(a, key, effective_timestamp)
                    .compare(&sort_value(b, key, effective_timestamp))
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal);

        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// Number of pages, never below one
pub fn page_count(total: usize, page_size: usize) -> usize {
    let size = page_size.max(1);
    total.div_ceil(size).max(1)
}

pub fn clamp_page(page: usize, total: usize, page_size: usize) -> usize {
    page.min(page_count(total, page_size) - 1)
}

/// The slice of `items` shown on `page` (already clamped by the caller)
pub fn page_slice<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let size = page_size.max(1);
    let start = (page * size).min(items.len());
    let end = (start + size).min(items.len());
    &items[start..end]
}
