//! Legacy configuration mapping
//!
//! Older releases stored filter state as a map from filter id to an enabled
//! flag and user rules as loosely typed JSON. These functions bring both into
//! the current model. They never fail: a legacy file without usable filters
//! maps to an explicit "no filters" result.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use cb_core::types::RuleRecord;
use serde::{Deserialize, Deserializer, Serialize};

use crate::allowlist::{basic_allow_rule, inverted_allow_rule};
use crate::error::{CompileError, Result};

/// Deprecated aggregate filter, later split into its constituents.
pub const LEGACY_AGGREGATE_ID: i32 = 14;
/// Cookie notices, popups, mobile banners, other annoyances, widgets.
pub const AGGREGATE_CONSTITUENTS: [i32; 5] = [18, 19, 20, 21, 22];
/// Ids outside this range are not catalog filters.
pub const FILTER_INDEX_RANGE: RangeInclusive<i32> = 1..=999;

const SUPPORTED_PROTOCOL_MAJORS: [u32; 2] = [1, 2];

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyFilterMapping {
    /// False when the input had no id in the index range
    pub have_filters: bool,
    pub enabled_ids: BTreeSet<i32>,
    pub disabled_ids: BTreeSet<i32>,
    /// Ids that landed in both sets and were resolved to enabled
    pub conflicts: Vec<i32>,
}

impl LegacyFilterMapping {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Map legacy filter flags to enabled and disabled id sets.
///
/// The aggregate id always ends up disabled. When it was enabled, its
/// constituents are added to the enabled set. An id that ends up in both
/// sets is kept enabled and reported in `conflicts`.
pub fn map_filters(flags: &BTreeMap<i32, bool>) -> LegacyFilterMapping {
    let in_range: Vec<(i32, bool)> = flags
        .iter()
        .filter(|(id, _)| FILTER_INDEX_RANGE.contains(*id))
        .map(|(id, enabled)| (*id, *enabled))
        .collect();

    if in_range.is_empty() {
        log::warn!("Legacy configuration has no filters in the index range");
        return LegacyFilterMapping::empty();
    }

    let mut enabled_ids = BTreeSet::new();
    let mut disabled_ids = BTreeSet::new();
    let mut aggregate_enabled = false;

    for (id, enabled) in in_range {
        if id == LEGACY_AGGREGATE_ID {
            aggregate_enabled = enabled;
            disabled_ids.insert(id);
        } else if enabled {
            enabled_ids.insert(id);
        } else {
            disabled_ids.insert(id);
        }
    }

    if aggregate_enabled {
        enabled_ids.extend(AGGREGATE_CONSTITUENTS);
    }

    let conflicts: Vec<i32> = enabled_ids.intersection(&disabled_ids).copied().collect();
    for id in &conflicts {
        log::warn!("Legacy filter {} is both enabled and disabled, keeping enabled", id);
        disabled_ids.remove(id);
    }

    LegacyFilterMapping {
        have_filters: true,
        enabled_ids,
        disabled_ids,
        conflicts,
    }
}

// =============================================================================
// User Rules
// =============================================================================

/// Legacy user rule settings. Domain and rule lists were stored either as
/// arrays or as JSON-encoded strings; both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRulesConfig {
    #[serde(rename = "userrules-enabled", default)]
    pub user_rules_enabled: Option<bool>,
    #[serde(rename = "filter_0", default, deserialize_with = "string_list")]
    pub rules: Vec<String>,
    #[serde(rename = "disabled-rules", default, deserialize_with = "string_list")]
    pub disabled_rules: Vec<String>,
    #[serde(rename = "default-allowlist-mode", default)]
    pub default_allowlist_mode: Option<bool>,
    #[serde(rename = "allowlist-enabled", default)]
    pub allowlist_enabled: Option<bool>,
    #[serde(rename = "white-list-domains", default, deserialize_with = "string_list")]
    pub allowlist_domains: Vec<String>,
    #[serde(rename = "block-list-domains", default, deserialize_with = "string_list")]
    pub blocklist_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyUserRules {
    pub enabled: bool,
    pub rules: Vec<RuleRecord>,
}

/// Map legacy user rule settings to rule records.
///
/// Order is fixed: the inverted allowlist rule (if block-list domains
/// exist), one allow rule per allow-listed domain, then the literal user
/// rules. Missing flags default to enabled and allow mode.
pub fn map_user_rules(config: Option<&UserRulesConfig>) -> LegacyUserRules {
    let fallback = UserRulesConfig::default();
    let config = config.unwrap_or(&fallback);

    let user_rules_enabled = config.user_rules_enabled.unwrap_or(true);
    let allowlist_enabled = config.allowlist_enabled.unwrap_or(true);
    let allow_mode = config.default_allowlist_mode.unwrap_or(true);

    let mut rules = Vec::with_capacity(
        config.allowlist_domains.len() + config.rules.len() + 1,
    );

    if !config.blocklist_domains.is_empty() {
        rules.push(RuleRecord::new(
            inverted_allow_rule(&config.blocklist_domains),
            allowlist_enabled && !allow_mode,
            None,
        ));
    }

    for domain in &config.allowlist_domains {
        rules.push(RuleRecord::new(
            basic_allow_rule(domain),
            allowlist_enabled && allow_mode,
            None,
        ));
    }

    for rule in &config.rules {
        // The legacy app also enabled these whenever its allowlist was off;
        // here only the user-rules switch and the disabled list apply.
        let enabled = user_rules_enabled && !config.disabled_rules.contains(rule);
        rules.push(RuleRecord::new(rule.clone(), enabled, None));
    }

    LegacyUserRules {
        enabled: user_rules_enabled || allowlist_enabled,
        rules,
    }
}

fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::List(items)) => items,
        Some(Raw::Text(text)) => serde_json::from_str::<Vec<String>>(&text).unwrap_or_else(|_| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()
        }),
    })
}

// =============================================================================
// Import File
// =============================================================================

/// Settings export produced by the previous generation of the product.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyImportFile {
    #[serde(rename = "protocol-version")]
    pub protocol_version: String,
    /// Carried through untouched; nothing here affects distribution
    #[serde(rename = "general-settings", default)]
    pub general_settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub filters: LegacyFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LegacyFilters {
    #[serde(default)]
    pub enabled_groups: Vec<i32>,
    #[serde(default)]
    pub enabled_filters: Vec<i32>,
    #[serde(default)]
    pub custom_filters: Vec<LegacyCustomFilter>,
    #[serde(default)]
    pub user_filter: LegacyUserFilter,
    #[serde(default)]
    pub allowlist: LegacyAllowlist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCustomFilter {
    pub custom_url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub trusted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyUserFilter {
    /// Newline-separated rules
    #[serde(default)]
    pub rules: String,
    #[serde(rename = "disabled-rules", default)]
    pub disabled_rules: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LegacyUserFilter {
    fn default() -> Self {
        Self {
            rules: String::new(),
            disabled_rules: String::new(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LegacyAllowlist {
    /// True when the list restricts protection to `inverted-domains`
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub inverted_domains: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LegacyAllowlist {
    fn default() -> Self {
        Self {
            inverted: false,
            domains: Vec::new(),
            inverted_domains: Vec::new(),
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Everything an import file maps to.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyImport {
    pub filters: LegacyFilterMapping,
    pub enabled_groups: Vec<i32>,
    pub user_rules: LegacyUserRules,
    pub custom_filters: Vec<LegacyCustomFilter>,
}

impl LegacyImportFile {
    pub fn parse(json: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(json)?;
        let major = file
            .protocol_version
            .split('.')
            .next()
            .and_then(|major| major.trim().parse::<u32>().ok());
        match major {
            Some(major) if SUPPORTED_PROTOCOL_MAJORS.contains(&major) => Ok(file),
            _ => Err(CompileError::UnsupportedProtocol(file.protocol_version)),
        }
    }

    /// Only enabled filters are exported, so every flag is `true`.
    pub fn filter_flags(&self) -> BTreeMap<i32, bool> {
        self.filters
            .enabled_filters
            .iter()
            .map(|id| (*id, true))
            .collect()
    }

    pub fn user_rules_config(&self) -> UserRulesConfig {
        let user_filter = &self.filters.user_filter;
        let allowlist = &self.filters.allowlist;
        let lines = |text: &str| -> Vec<String> {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()
        };

        UserRulesConfig {
            user_rules_enabled: Some(user_filter.enabled),
            rules: lines(&user_filter.rules),
            disabled_rules: lines(&user_filter.disabled_rules),
            default_allowlist_mode: Some(!allowlist.inverted),
            allowlist_enabled: Some(allowlist.enabled),
            allowlist_domains: allowlist.domains.clone(),
            blocklist_domains: allowlist.inverted_domains.clone(),
        }
    }

    pub fn map(&self) -> LegacyImport {
        LegacyImport {
            filters: map_filters(&self.filter_flags()),
            enabled_groups: self.filters.enabled_groups.clone(),
            user_rules: map_user_rules(Some(&self.user_rules_config())),
            custom_filters: self.filters.custom_filters.clone(),
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every in-range id lands in exactly one set, and the aggregate is
        /// never enabled
        #[test]
        fn every_id_lands_in_exactly_one_set(
            flags in proptest::collection::btree_map(-5i32..1100, any::<bool>(), 0..40)
        ) {
            let mapping = map_filters(&flags);

            for id in flags.keys().filter(|id| FILTER_INDEX_RANGE.contains(*id)) {
                let enabled = mapping.enabled_ids.contains(id);
                let disabled = mapping.disabled_ids.contains(id);
                prop_assert!(enabled ^ disabled, "id {} enabled={} disabled={}", id, enabled, disabled);
            }
            prop_assert!(mapping.enabled_ids.is_disjoint(&mapping.disabled_ids));
            prop_assert!(!mapping.enabled_ids.contains(&LEGACY_AGGREGATE_ID));
            if flags.contains_key(&LEGACY_AGGREGATE_ID) {
                prop_assert!(mapping.disabled_ids.contains(&LEGACY_AGGREGATE_ID));
            }
        }
    }
}
