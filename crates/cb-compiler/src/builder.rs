//! Per-target compilation
//!
//! `compile` turns the enabled rules of a filter set into the payload one
//! target loads. It is a pure function: the same input always yields a
//! byte-identical payload, and nothing is dropped without being counted.

use cb_core::hash::fingerprint;
use cb_core::target::{DistributionTarget, TargetKind};
use cb_core::types::FilterSet;

use crate::advanced::BundleEntry;
use crate::parser::{convert_rule, ContentRule, ConvertedRule};

/// Payload for a content target with nothing to apply. Hosts reject `[]`,
/// so this is a single rule that matches no URL.
pub const EMPTY_PAYLOAD: &str =
    r#"[{"trigger":{"url-filter":"none"},"action":{"type":"ignore-previous-rules"}}]"#;

/// Payload for the scripted target with nothing to apply.
pub const EMPTY_BUNDLE: &str = "[]";

/// Serialized payload, tagged with the format the target consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// JSON rule list for a content target
    RuleList(String),
    /// JSON script bundle for the scripted target
    ScriptBundle(String),
}

impl Payload {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RuleList(json) | Self::ScriptBundle(json) => json,
        }
    }

    pub fn is_empty_payload(&self) -> bool {
        match self {
            Self::RuleList(json) => json == EMPTY_PAYLOAD,
            Self::ScriptBundle(json) => json == EMPTY_BUNDLE,
        }
    }
}

/// Outcome of compiling one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pub target: DistributionTarget,
    pub payload: Payload,
    /// Entries in the payload (the empty-payload placeholder counts as 0)
    pub applied_count: usize,
    /// Enabled rules handed to the compiler
    pub source_count: usize,
    /// Entries cut to fit the target ceiling
    pub discarded_count: usize,
    /// Rules the target cannot express
    pub error_count: usize,
    pub over_limit: bool,
    /// Rule texts only the scripted target can apply
    pub advanced_rules: Vec<String>,
    /// CRC32 of the payload
    pub fingerprint: u32,
}

/// Compile `rules` for `target`.
///
/// Only enabled rules participate. Content targets keep the first entries
/// up to their ceiling, in source order, and flag `over_limit` when anything
/// was cut. Advanced rules found while compiling a content target are
/// returned in `advanced_rules` for the scripted target.
pub fn compile(rules: &FilterSet, target: DistributionTarget) -> CompilationResult {
    match target.kind() {
        TargetKind::ContentRules => compile_content(rules, target),
        TargetKind::Scripted => compile_bundle(rules, target),
    }
}

/// Payload for a target while protection is globally off.
pub fn compile_disabled(target: DistributionTarget) -> CompilationResult {
    let payload = match target.kind() {
        TargetKind::ContentRules => Payload::RuleList(EMPTY_PAYLOAD.to_string()),
        TargetKind::Scripted => Payload::ScriptBundle(EMPTY_BUNDLE.to_string()),
    };
    finish(target, payload, Counts::default(), Vec::new())
}

#[derive(Debug, Default)]
struct Counts {
    applied: usize,
    source: usize,
    discarded: usize,
    errors: usize,
}

fn compile_content(rules: &FilterSet, target: DistributionTarget) -> CompilationResult {
    let mut counts = Counts::default();
    let mut entries: Vec<ContentRule> = Vec::new();
    let mut advanced_rules = Vec::new();

    for rule in rules.enabled_rules() {
        counts.source += 1;
        match convert_rule(&rule.text) {
            ConvertedRule::Content(entry) => entries.push(entry),
            ConvertedRule::Advanced(_) => advanced_rules.push(rule.text.clone()),
            ConvertedRule::Skipped => {}
            ConvertedRule::Unsupported => counts.errors += 1,
        }
    }

    if let Some(limit) = target.rule_limit() {
        if entries.len() > limit {
            counts.discarded = entries.len() - limit;
            entries.truncate(limit);
            log::warn!(
                "{}: {} entries over the {} limit were discarded",
                target,
                counts.discarded,
                limit
            );
        }
    }

    // Stable: ties keep source order
    entries.sort_by_key(|entry| entry.priority);
    counts.applied = entries.len();

    let payload = if entries.is_empty() {
        EMPTY_PAYLOAD.to_string()
    } else {
        serialize_or_empty(&entries, EMPTY_PAYLOAD)
    };

    log::debug!(
        "{}: {} source rules -> {} entries ({} unsupported, {} advanced)",
        target,
        counts.source,
        counts.applied,
        counts.errors,
        advanced_rules.len()
    );

    finish(target, Payload::RuleList(payload), counts, advanced_rules)
}

fn compile_bundle(rules: &FilterSet, target: DistributionTarget) -> CompilationResult {
    let mut counts = Counts::default();
    let mut entries: Vec<BundleEntry> = Vec::new();

    for rule in rules.enabled_rules() {
        counts.source += 1;
        match convert_rule(&rule.text) {
            ConvertedRule::Advanced(advanced) => entries.push(BundleEntry::from(advanced)),
            // Content entries belong to the content targets
            ConvertedRule::Content(_) | ConvertedRule::Skipped => {}
            ConvertedRule::Unsupported => counts.errors += 1,
        }
    }

    counts.applied = entries.len();
    let payload = if entries.is_empty() {
        EMPTY_BUNDLE.to_string()
    } else {
        serialize_or_empty(&entries, EMPTY_BUNDLE)
    };

    finish(target, Payload::ScriptBundle(payload), counts, Vec::new())
}

fn serialize_or_empty<T: serde::Serialize>(entries: &[T], empty: &str) -> String {
    match serde_json::to_string(entries) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize {} entries: {}", entries.len(), e);
            empty.to_string()
        }
    }
}

fn finish(
    target: DistributionTarget,
    payload: Payload,
    counts: Counts,
    advanced_rules: Vec<String>,
) -> CompilationResult {
    CompilationResult {
        target,
        fingerprint: fingerprint(payload.as_str()),
        payload,
        applied_count: counts.applied,
        source_count: counts.source,
        discarded_count: counts.discarded,
        error_count: counts.errors,
        over_limit: counts.discarded > 0,
        advanced_rules,
    }
}

#[cfg(test)]
mod tests {
    use cb_core::target::RULES_LIMIT;
    use cb_core::types::{Provenance, RuleRecord};

    use crate::parser::ContentRule;

    use super::*;

    fn set(lines: &[&str]) -> FilterSet {
        FilterSet::new(
            Provenance::Merged,
            lines.iter().map(|line| RuleRecord::user(*line)).collect(),
        )
    }

    fn generated(count: usize) -> FilterSet {
        FilterSet::new(
            Provenance::BaseFilter(2),
            (0..count)
                .map(|i| RuleRecord::new(format!("||tracker{i}.example^"), true, Some(2)))
                .collect(),
        )
    }

    #[test]
    fn empty_payload_matches_serialized_placeholder() {
        let json = serde_json::to_string(&[ContentRule::ignore_nothing()]).expect("serialize");
        assert_eq!(json, EMPTY_PAYLOAD);
    }

    #[test]
    fn compiles_enabled_rules_only() {
        let mut rules = set(&["||ads.example^", "||tracker.example^"]);
        rules.rules[1].enabled = false;

        let result = compile(&rules, DistributionTarget::General);
        assert_eq!(result.source_count, 1);
        assert_eq!(result.applied_count, 1);
        assert!(!result.over_limit);
        assert!(result.payload.as_str().contains(r"ads\\.example"));
        assert!(!result.payload.as_str().contains("tracker"));
    }

    #[test]
    fn empty_input_uses_empty_payload() {
        let result = compile(&set(&["! only a comment"]), DistributionTarget::Privacy);
        assert_eq!(result.payload, Payload::RuleList(EMPTY_PAYLOAD.to_string()));
        assert_eq!(result.applied_count, 0);
        assert!(result.payload.is_empty_payload());
    }

    #[test]
    fn disabled_protection_uses_empty_payload() {
        for target in DistributionTarget::CONTENT {
            let result = compile_disabled(target);
            assert_eq!(result.payload.as_str(), EMPTY_PAYLOAD);
            assert!(!result.over_limit);
        }
        let advanced = compile_disabled(DistributionTarget::Advanced);
        assert_eq!(advanced.payload, Payload::ScriptBundle(EMPTY_BUNDLE.to_string()));
    }

    #[test]
    fn truncates_to_ceiling_and_flags_over_limit() {
        let rules = generated(RULES_LIMIT + 25);
        let result = compile(&rules, DistributionTarget::General);

        assert!(result.over_limit);
        assert_eq!(result.applied_count, RULES_LIMIT);
        assert_eq!(result.discarded_count, 25);

        let entries: Vec<serde_json::Value> =
            serde_json::from_str(result.payload.as_str()).expect("payload should parse");
        assert_eq!(entries.len(), RULES_LIMIT);
        // Stable order: the last kept entry is the last rule under the ceiling
        let last = entries[RULES_LIMIT - 1]["trigger"]["url-filter"]
            .as_str()
            .expect("url-filter");
        assert!(last.contains(&format!("tracker{}", RULES_LIMIT - 1)));
    }

    #[test]
    fn at_ceiling_is_not_over_limit() {
        let result = compile(&generated(RULES_LIMIT), DistributionTarget::Custom);
        assert!(!result.over_limit);
        assert_eq!(result.applied_count, RULES_LIMIT);
        assert_eq!(result.discarded_count, 0);
    }

    #[test]
    fn compiling_twice_is_byte_identical() {
        let rules = set(&[
            "||ads.example^$third-party",
            "example.org##.banner",
            "@@||ads.example^$important",
            "example.org#%#window.x = 1;",
        ]);
        let first = compile(&rules, DistributionTarget::General);
        let second = compile(&rules, DistributionTarget::General);
        assert_eq!(first.payload, second.payload);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn orders_entries_by_priority() {
        let rules = set(&[
            "@@||cdn.example^$document",
            "||ads.example^",
            "##.banner",
            "@@||ads.example^",
        ]);
        let result = compile(&rules, DistributionTarget::General);
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(result.payload.as_str()).expect("payload should parse");
        let kinds: Vec<&str> = entries
            .iter()
            .map(|entry| entry["action"]["type"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(
            kinds,
            vec!["css-display-none", "block", "ignore-previous-rules", "ignore-previous-rules"]
        );
        assert_eq!(entries[3]["trigger"]["if-domain"][0], "*cdn.example");
    }

    #[test]
    fn collects_advanced_rules_and_counts_unsupported() {
        let rules = set(&[
            "example.org#%#window.x = 1;",
            "||ads.example^$redirect=noop.js",
            "||ads.example^",
        ]);
        let result = compile(&rules, DistributionTarget::General);
        assert_eq!(result.advanced_rules, vec!["example.org#%#window.x = 1;".to_string()]);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.applied_count, 1);
    }

    #[test]
    fn builds_script_bundle_for_advanced_target() {
        let rules = set(&[
            "example.org#%#window.x = 1;",
            "example.org#$#.popup { display: none; }",
            "||ads.example^",
        ]);
        let result = compile(&rules, DistributionTarget::Advanced);
        assert!(matches!(result.payload, Payload::ScriptBundle(_)));
        assert_eq!(result.applied_count, 2);
        assert!(!result.over_limit);
        assert!(result.payload.as_str().contains(r#""type":"script""#));
        assert!(result.payload.as_str().contains(r#""type":"css""#));
    }
}
