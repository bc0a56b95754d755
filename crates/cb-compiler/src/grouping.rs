//! Target grouping
//!
//! Routes every rule of the active configuration to the content targets
//! that should load it. Base filters follow their catalog group, custom
//! filters go to the custom target, and user and allowlist rules go to
//! every content target.
//!
//! A filter can override the routing of a block of rules:
//!
//! ```text
//! !#safari_cb_affinity(privacy,social)
//! ||tracker.example^
//! !#safari_cb_affinity
//! ```
//!
//! Rules inside the block go only to the listed targets and are appended
//! after that target's regular rules.

use std::collections::BTreeMap;

use cb_core::target::{DistributionTarget, TargetMask};
use cb_core::types::{FilterGroup, FilterSet, Provenance, RuleRecord};
use serde::{Deserialize, Serialize};

use crate::allowlist::AllowBlockList;
use crate::builder::CompilationResult;
use crate::error::Result;
use crate::optimizer::{dedupe_rules, drop_untrusted};

pub const AFFINITY_DIRECTIVE: &str = "!#safari_cb_affinity";

// =============================================================================
// Active Configuration
// =============================================================================

/// The user's declarative blocker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConfig {
    #[serde(default = "default_true")]
    pub protection_enabled: bool,
    #[serde(default = "default_true")]
    pub advanced_rules_enabled: bool,
    #[serde(default = "default_true")]
    pub language_specific_enabled: bool,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub user_rules: UserRules,
    #[serde(default)]
    pub allowlist: AllowBlockList,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            protection_enabled: true,
            advanced_rules_enabled: true,
            language_specific_enabled: true,
            filters: Vec::new(),
            user_rules: UserRules::default(),
            allowlist: AllowBlockList::default(),
        }
    }
}

impl ActiveConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One base or custom filter list with its downloaded rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub id: i32,
    pub group: FilterGroup,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only meaningful for custom filters; catalog filters are trusted
    #[serde(default)]
    pub trusted: bool,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl FilterConfig {
    pub fn is_custom(&self) -> bool {
        self.group == FilterGroup::Custom
    }

    fn provenance(&self) -> Provenance {
        if self.is_custom() {
            Provenance::CustomFilter(self.id)
        } else {
            Provenance::BaseFilter(self.id)
        }
    }

    fn to_filter_set(&self) -> FilterSet {
        let mut set = FilterSet::from_list_text(self.provenance(), &self.rules.join("\n"), true);
        if self.is_custom() && !self.trusted {
            let dropped = drop_untrusted(&mut set.rules);
            if dropped > 0 {
                log::info!(
                    "Custom filter {}: dropped {} rules reserved for trusted filters",
                    self.id,
                    dropped
                );
            }
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRules {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
}

impl Default for UserRules {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Grouping
// =============================================================================

#[derive(Debug, Default)]
struct Routed {
    regular: BTreeMap<DistributionTarget, Vec<RuleRecord>>,
    affinity: BTreeMap<DistributionTarget, Vec<RuleRecord>>,
}

impl Routed {
    /// Route `rules` to `home` unless an affinity block redirects them.
    /// Blocks never span sources.
    fn push_source(&mut self, rules: Vec<RuleRecord>, home: TargetMask) {
        let mut block = TargetMask::empty();

        for rule in rules {
            if let Some(mask) = parse_affinity(&rule.text) {
                block = mask;
                continue;
            }

            let (destination, mask) = if block.is_empty() {
                (&mut self.regular, home)
            } else {
                (&mut self.affinity, block)
            };
            for target in mask.targets() {
                destination.entry(target).or_default().push(rule.clone());
            }
        }
    }
}

/// Group the active configuration's rules by content target.
///
/// Every content target is present in the result, possibly empty. Within a
/// target, rules are pre-deduplicated by text and owner.
pub fn group_rules(config: &ActiveConfig) -> BTreeMap<DistributionTarget, FilterSet> {
    let mut routed = Routed::default();

    for filter in config.filters.iter().filter(|filter| filter.enabled) {
        if filter.group == FilterGroup::LanguageSpecific && !config.language_specific_enabled {
            log::debug!("Filter {}: language-specific filters are off", filter.id);
            continue;
        }
        let home = TargetMask::from(DistributionTarget::for_group(filter.group));
        routed.push_source(filter.to_filter_set().rules, home);
    }

    let mut user_rules = config.allowlist.rules();
    user_rules.extend(config.user_rules.rules.iter().map(|rule| RuleRecord {
        enabled: rule.enabled && config.user_rules.enabled,
        ..rule.clone()
    }));
    routed.push_source(user_rules, TargetMask::CONTENT);

    DistributionTarget::CONTENT
        .into_iter()
        .map(|target| {
            let mut rules = routed.regular.remove(&target).unwrap_or_default();
            rules.extend(routed.affinity.remove(&target).unwrap_or_default());

            let stats = dedupe_rules(&mut rules);
            if stats.conflicts > 0 {
                log::warn!(
                    "{}: {} duplicate rules disagreed on enabled state",
                    target,
                    stats.conflicts
                );
            }
            log::info!("{}: {} rules ({} duplicates removed)", target, stats.after, stats.deduped);

            (target, FilterSet::new(Provenance::Merged, rules))
        })
        .collect()
}

/// Rules for the scripted target, gathered from the content targets'
/// compilation results in target order.
pub fn advanced_rule_set(results: &[CompilationResult]) -> FilterSet {
    let mut rules: Vec<RuleRecord> = results
        .iter()
        .flat_map(|result| result.advanced_rules.iter())
        .map(RuleRecord::user)
        .collect();
    dedupe_rules(&mut rules);
    FilterSet::new(Provenance::Merged, rules)
}

/// Parse an affinity directive. An opening directive yields the targets it
/// names, a closing one yields an empty mask, anything else `None`.
pub fn parse_affinity(text: &str) -> Option<TargetMask> {
    let rest = text.strip_prefix(AFFINITY_DIRECTIVE)?;
    let Some(list) = rest.strip_prefix('(') else {
        return Some(TargetMask::empty());
    };
    let list = list.strip_suffix(')').unwrap_or(list);

    Some(
        list.split(',')
            .map(str::trim)
            .filter_map(|key| {
                let mask = affinity_mask(key);
                if mask.is_none() {
                    log::debug!("Unknown affinity key '{}'", key);
                }
                mask
            })
            .fold(TargetMask::empty(), |acc, mask| acc | mask),
    )
}

fn affinity_mask(key: &str) -> Option<TargetMask> {
    let mask = match key {
        "general" => TargetMask::GENERAL,
        "privacy" => TargetMask::PRIVACY,
        "security" => TargetMask::SECURITY,
        "social" | "socialWidgetsAndAnnoyances" => TargetMask::SOCIAL,
        "other" => TargetMask::OTHER,
        "custom" => TargetMask::CUSTOM,
        "all" => TargetMask::CONTENT,
        _ => return None,
    };
    Some(mask)
}
