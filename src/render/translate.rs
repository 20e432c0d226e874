//! Asset-path parsing and the optional translation side table.
//!
//! Quest asset paths look like `QuestSetup:T2_ShopA_Name` or
//! `/Game/Quests/T2_ShopA_Name.T2_ShopA_Name`. The last segment is the
//! quest identifier; it encodes tier, shop and a sortable name.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::config::read_json_safe;

/// Fields derived from a quest's asset path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInfo {
    /// Last path segment, used as the translation key fallback
    pub id: String,
    pub tier: Option<u32>,
    pub shop: Option<String>,
    pub sort_name: Option<String>,
}

fn identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T(\d+)_([^_]+)_(.+)$").ok())
        .as_ref()
}

impl AssetInfo {
    pub fn parse(asset_path: &str) -> Self {
        let id = asset_path
            .rsplit([':', '/', '.'])
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
            .to_string();

        let Some(caps) = identifier_regex().and_then(|re| re.captures(&id)) else {
            return Self {
                id,
                ..Default::default()
            };
        };

        Self {
            tier: caps[1].parse().ok(),
            shop: Some(caps[2].to_uppercase()),
            sort_name: Some(caps[3].to_string()),
            id,
        }
    }

    /// Readable name derived from the identifier: its separators become spaces
    pub fn fallback_name(&self) -> String {
        self.id
            .split(['_', ':', '/', '.'])
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A text entry that is either language-neutral or keyed by language code
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    ByLanguage(BTreeMap<String, String>),
}

impl LocalizedText {
    fn get(&self, language: &str) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text),
            Self::ByLanguage(map) => map.get(language).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TranslationEntry {
    #[serde(default)]
    pub name: Option<LocalizedText>,
    #[serde(default)]
    pub description: Option<LocalizedText>,
    #[serde(default)]
    pub requirements: Option<LocalizedText>,
    #[serde(default)]
    pub rewards: Option<LocalizedText>,
    /// Extra per-quest tokens
    #[serde(default)]
    pub translate_data: BTreeMap<String, Value>,
}

/// Text looked up for one quest, ready to merge into its token map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub name: String,
    pub description: String,
    pub requirements: String,
    pub rewards: String,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Translations {
    #[serde(default)]
    quests: BTreeMap<String, TranslationEntry>,
}

impl Translations {
    /// Load the table; absence or a malformed file yields an empty table
    pub fn load(path: &Path) -> Self {
        let Some(value) = read_json_safe(path) else {
            return Self::default();
        };
        match serde_json::from_value(value) {
            Ok(translations) => translations,
            Err(e) => {
                tracing::warn!("Ignoring translations {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }

    fn lookup(&self, asset_path: &str, info: &AssetInfo) -> Option<&TranslationEntry> {
        self.quests
            .get(asset_path)
            .or_else(|| self.quests.get(&info.id))
    }

    /// Resolve the text for one quest. A missing name falls back to the
    /// identifier-derived one; other missing fields stay empty.
    pub fn enrich(&self, asset_path: &str, info: &AssetInfo, language: &str) -> Enrichment {
        let entry = self.lookup(asset_path, info);
        let text = |field: Option<&LocalizedText>| {
            field
                .and_then(|t| t.get(language))
                .unwrap_or("")
                .to_string()
        };

        let Some(entry) = entry else {
            return Enrichment {
                name: info.fallback_name(),
                ..Default::default()
            };
        };

        let mut name = text(entry.name.as_ref());
        if name.is_empty() {
            name = info.fallback_name();
        }

        let extra = entry
            .translate_data
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    Value::Object(map) => map
                        .get(language)
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect();

        Enrichment {
            name,
            description: text(entry.description.as_ref()),
            requirements: text(entry.requirements.as_ref()),
            rewards: text(entry.rewards.as_ref()),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::TempDir;
    use serde_json::json;

    #[test]
    fn test_parse_colon_path() {
        let info = AssetInfo::parse("QuestSetup:T2_ShopA_Fetch_Wood");
        assert_eq!(info.id, "T2_ShopA_Fetch_Wood");
        assert_eq!(info.tier, Some(2));
        assert_eq!(info.shop.as_deref(), Some("SHOPA"));
        assert_eq!(info.sort_name.as_deref(), Some("Fetch_Wood"));
        assert_eq!(info.fallback_name(), "T2 ShopA Fetch Wood");
    }

    #[test]
    fn test_parse_object_path() {
        let info = AssetInfo::parse("/Game/Quests/T1_Armory_Hunt.T1_Armory_Hunt");
        assert_eq!(info.id, "T1_Armory_Hunt");
        assert_eq!(info.shop.as_deref(), Some("ARMORY"));
    }

    #[test]
    fn test_parse_unstructured() {
        let info = AssetInfo::parse("Misc:free_form");
        assert_eq!(info.id, "free_form");
        assert_eq!(info.tier, None);
        assert_eq!(info.shop, None);
        assert_eq!(info.fallback_name(), "free form");
        assert_eq!(AssetInfo::parse("").id, "");
    }

    fn table() -> Translations {
        serde_json::from_value(json!({
            "quests": {
                "QuestSetup:T2_ShopA_Fetch": {
                    "name": {"en": "Fetch the crate", "sk": "Prines debnu"},
                    "description": "Bring it back",
                    "translate_data": {"giver": "Trader", "amount": 3, "hint": {"en": "North"}}
                },
                "T1_Armory_Hunt": {
                    "name": {"sk": "Lov"}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_enrich_by_full_path_and_language() {
        let path = "QuestSetup:T2_ShopA_Fetch";
        let info = AssetInfo::parse(path);
        let en = table().enrich(path, &info, "en");
        assert_eq!(en.name, "Fetch the crate");
        assert_eq!(en.description, "Bring it back");
        assert_eq!(en.requirements, "");
        assert_eq!(en.extra["giver"], "Trader");
        assert_eq!(en.extra["amount"], "3");
        assert_eq!(en.extra["hint"], "North");

        assert_eq!(table().enrich(path, &info, "sk").name, "Prines debnu");
    }

    #[test]
    fn test_enrich_by_identifier_with_language_fallback() {
        let path = "/Game/T1_Armory_Hunt.T1_Armory_Hunt";
        let info = AssetInfo::parse(path);
        assert_eq!(table().enrich(path, &info, "sk").name, "Lov");
        // No English entry: derived name
        assert_eq!(table().enrich(path, &info, "en").name, "T1 Armory Hunt");
    }

    #[test]
    fn test_missing_table_is_empty() {
        let dir = TempDir::new("translations");
        let path = dir.path().join("translations.json");
        assert!(Translations::load(&path).is_empty());

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(Translations::load(&path).is_empty());

        let info = AssetInfo::parse("Q:T3_Bar_Drink");
        let enrichment = Translations::default().enrich("Q:T3_Bar_Drink", &info, "en");
        assert_eq!(enrichment.name, "T3 Bar Drink");
        assert!(enrichment.extra.is_empty());
    }
}
