//! Time-remaining formatting and the threshold color ladder.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Fallback color when no threshold rule applies
pub const DEFAULT_TIME_COLOR: &str = "#ffffff";

const FORMAT_PLACEHOLDERS: &[&str] = &["%dd", "%hh", "%mm", "%ss", "%d", "%h", "%m", "%s"];

fn placeholder_matcher() -> Option<&'static AhoCorasick> {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER
        .get_or_init(|| {
            AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostLongest)
                .build(FORMAT_PLACEHOLDERS)
                .ok()
        })
        .as_ref()
}

/// Format seconds using `%dd %hh %mm %ss` style placeholders.
///
/// The doubled forms append the unit letter (`05h`), the single forms print
/// the padded number only. Negative values display as zero; `None` as `N/A`.
pub fn format_time_remaining(seconds: Option<i64>, fmt: &str) -> String {
    let Some(seconds) = seconds else {
        return "N/A".to_string();
    };
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    let replacements = [
        format!("{:02}d", days),
        format!("{:02}h", hours),
        format!("{:02}m", minutes),
        format!("{:02}s", secs),
        format!("{:02}", days),
        format!("{:02}", hours),
        format!("{:02}", minutes),
        format!("{:02}", secs),
    ];

    match placeholder_matcher() {
        Some(matcher) => matcher.replace_all(fmt, &replacements),
        None => fmt.to_string(),
    }
}

/// Pick the color for `seconds_left` from a threshold ladder.
///
/// Thresholds are integer second counts; the rule with the smallest
/// threshold that is still >= the remaining time wins, so a value sitting
/// exactly on a boundary takes that boundary's color. Beyond the largest
/// threshold, the largest threshold's color applies.
pub fn time_color(seconds_left: Option<i64>, rules: &BTreeMap<String, String>) -> String {
    let Some(seconds_left) = seconds_left else {
        return rules
            .get("0")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TIME_COLOR.to_string());
    };

    let ladder: BTreeMap<i64, &String> = rules
        .iter()
        .filter_map(|(threshold, color)| threshold.trim().parse::<i64>().ok().map(|t| (t, color)))
        .collect();

    ladder
        .range(seconds_left..)
        .next()
        .or_else(|| ladder.iter().next_back())
        .map(|(_, color)| (*color).clone())
        .unwrap_or_else(|| DEFAULT_TIME_COLOR.to_string())
}
