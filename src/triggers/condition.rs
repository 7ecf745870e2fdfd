use regex::Regex;
use tracing::warn;

use super::types::{Trigger, TriggerCondition, CONDITION_PAGE_URL};

/// Build a predicate that is true iff the trigger declares a condition
/// named `condition_name`.
///
/// Pure: no state, no I/O. Callers use it to pre-filter triggers before
/// running heavier firing logic.
pub fn has_trigger_condition(condition_name: &str) -> impl Fn(&Trigger) -> bool + '_ {
    move |trigger| {
        trigger
            .conditions
            .iter()
            .any(|condition| condition.name == condition_name)
    }
}

/// Whether a `page-url` condition matches `href`.
///
/// The condition value is a regular expression. Returns `false`
/// (fail-closed) when the value is missing or not a valid pattern.
pub fn page_url_matches(condition: &TriggerCondition, href: &str) -> bool {
    if condition.name != CONDITION_PAGE_URL {
        return false;
    }
    let Some(pattern) = condition.value_str() else {
        return false;
    };
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(href),
        Err(e) => {
            warn!("trigger condition: invalid page-url pattern '{pattern}': {e}");
            false
        }
    }
}

/// Seconds to wait for a `time-on-site` condition, if it is well formed.
pub fn time_on_site_secs(condition: &TriggerCondition) -> Option<u64> {
    condition.value_str()?.trim().parse().ok()
}
