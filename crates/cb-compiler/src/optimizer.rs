//! Rule-level cleanup before compilation
//!
//! Duplicate removal and the modifiers untrusted lists may not use.

use std::collections::HashMap;

use cb_core::types::RuleRecord;

/// Modifiers only trusted lists may use.
const TRUSTED_ONLY_MODIFIERS: [&str; 4] = ["$hls", "$removeheader", "$removeparam", "$replace"];
const SCRIPT_MARKER: &str = "#%#";
const SCRIPTLET_MARKER: &str = "#%#//scriptlet";
const TRUSTED_SCRIPTLET_PREFIXES: [&str; 2] = ["//scriptlet('trusted-", "//scriptlet(\"trusted-"];

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    /// Duplicates whose enabled flag disagreed with the kept record
    pub conflicts: usize,
}

/// Pre-deduplicate records by text and owner.
///
/// The first occurrence keeps its position. When duplicates disagree on the
/// enabled flag, the kept record becomes enabled.
pub fn dedupe_rules(rules: &mut Vec<RuleRecord>) -> OptimizeStats {
    let before = rules.len();
    let mut first_seen: HashMap<(String, Option<i32>), usize> = HashMap::with_capacity(before);
    let mut kept: Vec<RuleRecord> = Vec::with_capacity(before);
    let mut conflicts = 0usize;

    for rule in rules.drain(..) {
        let key = (rule.text.clone(), rule.owner_filter_id);
        match first_seen.get(&key) {
            Some(&index) => {
                let existing = &mut kept[index];
                if existing.enabled != rule.enabled {
                    conflicts += 1;
                    existing.enabled = true;
                }
            }
            None => {
                first_seen.insert(key, kept.len());
                kept.push(rule);
            }
        }
    }

    *rules = kept;
    let after = rules.len();

    OptimizeStats {
        before,
        after,
        deduped: before - after,
        conflicts,
    }
}

/// Whether a rule may come from an untrusted (user-subscribed) list.
///
/// Untrusted lists lose rules that rewrite traffic, run arbitrary
/// JavaScript, or call trusted scriptlets.
pub fn is_allowed_for_untrusted(text: &str) -> bool {
    if TRUSTED_ONLY_MODIFIERS.iter().any(|modifier| text.contains(modifier)) {
        return false;
    }

    if let Some(pos) = text.find(SCRIPT_MARKER) {
        if !text[pos..].starts_with(SCRIPTLET_MARKER) {
            return false;
        }
        let body = &text[pos + SCRIPT_MARKER.len()..];
        if TRUSTED_SCRIPTLET_PREFIXES.iter().any(|prefix| body.starts_with(prefix)) {
            return false;
        }
    }

    true
}

/// Drop rules an untrusted list may not carry. Returns how many were dropped.
pub fn drop_untrusted(rules: &mut Vec<RuleRecord>) -> usize {
    let before = rules.len();
    rules.retain(|rule| is_allowed_for_untrusted(&rule.text));
    before - rules.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupes_by_text_and_owner() {
        let mut rules = vec![
            RuleRecord::new("||a.example^", true, Some(1)),
            RuleRecord::new("||b.example^", true, Some(1)),
            RuleRecord::new("||a.example^", true, Some(1)),
            RuleRecord::new("||a.example^", true, Some(2)),
        ];
        let stats = dedupe_rules(&mut rules);
        assert_eq!(stats.before, 4);
        assert_eq!(stats.after, 3);
        assert_eq!(stats.deduped, 1);
        assert_eq!(rules[0].text, "||a.example^");
        assert_eq!(rules[1].text, "||b.example^");
        assert_eq!(rules[2].owner_filter_id, Some(2));
    }

    #[test]
    fn conflicting_duplicates_resolve_to_enabled() {
        let mut rules = vec![
            RuleRecord::new("||a.example^", false, None),
            RuleRecord::new("||a.example^", true, None),
        ];
        let stats = dedupe_rules(&mut rules);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(rules, vec![RuleRecord::new("||a.example^", true, None)]);
    }

    #[test]
    fn untrusted_lists_lose_privileged_rules() {
        assert!(is_allowed_for_untrusted("||ads.example^"));
        assert!(is_allowed_for_untrusted("example.org##.ad"));
        assert!(is_allowed_for_untrusted("example.org#%#//scriptlet('abort-on-property-read', 'ads')"));

        assert!(!is_allowed_for_untrusted("||example.org^$removeparam=utm_source"));
        assert!(!is_allowed_for_untrusted("||example.org^$replace=/a/b/"));
        assert!(!is_allowed_for_untrusted("example.org#%#window.ads = false;"));
        assert!(!is_allowed_for_untrusted("example.org#%#//scriptlet('trusted-set-cookie', 'a', 'b')"));
        assert!(!is_allowed_for_untrusted("example.org#%#//scriptlet(\"trusted-click-element\", \"#x\")"));
    }

    #[test]
    fn drop_untrusted_counts_removed_rules() {
        let mut rules = vec![
            RuleRecord::user("||ads.example^"),
            RuleRecord::user("example.org#%#alert(1)"),
        ];
        assert_eq!(drop_untrusted(&mut rules), 1);
        assert_eq!(rules.len(), 1);
    }
}
