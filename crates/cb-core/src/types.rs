//! Core type definitions
//!
//! Rule records and filter sets are rebuilt on every compilation pass and
//! never mutated in place. Distribution state is the only type here that
//! outlives a pass; it is persisted per target by the sync runtime.

use serde::{Deserialize, Serialize};

// =============================================================================
// Rule Records
// =============================================================================

/// One filter rule as an opaque text unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Raw rule text
    pub text: String,
    /// Disabled rules are carried but never compiled
    pub enabled: bool,
    /// Filter the rule came from; `None` for user and allowlist rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_filter_id: Option<i32>,
}

impl RuleRecord {
    pub fn new(text: impl Into<String>, enabled: bool, owner_filter_id: Option<i32>) -> Self {
        Self {
            text: text.into(),
            enabled,
            owner_filter_id,
        }
    }

    /// An enabled rule with no owning filter.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, true, None)
    }
}

// =============================================================================
// Filter Sets
// =============================================================================

/// Where the rules of a [`FilterSet`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Provenance {
    /// A catalog filter list
    BaseFilter(i32),
    /// A user-subscribed filter list
    CustomFilter(i32),
    /// Hand-written user rules and allowlist-derived rules
    User,
    /// Rules assembled for one target from several sources; ownership is
    /// kept on each record
    Merged,
}

/// Ordered rules plus their provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    pub provenance: Provenance,
    pub rules: Vec<RuleRecord>,
}

impl FilterSet {
    pub fn new(provenance: Provenance, rules: Vec<RuleRecord>) -> Self {
        Self { provenance, rules }
    }

    pub fn empty(provenance: Provenance) -> Self {
        Self::new(provenance, Vec::new())
    }

    /// Build a set from raw filter list text, one rule per line.
    ///
    /// Blank lines are dropped; everything else, comments included, is kept
    /// so directives survive until grouping.
    pub fn from_list_text(provenance: Provenance, text: &str, enabled: bool) -> Self {
        let owner = match provenance {
            Provenance::BaseFilter(id) | Provenance::CustomFilter(id) => Some(id),
            Provenance::User | Provenance::Merged => None,
        };
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| RuleRecord::new(line, enabled, owner))
            .collect();
        Self::new(provenance, rules)
    }

    /// Enabled rules in source order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &RuleRecord> {
        self.rules.iter().filter(|rule| rule.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_rules().count()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// =============================================================================
// Filter Groups
// =============================================================================

/// Catalog group a filter list belongs to. Groups decide which distribution
/// target a filter's rules are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FilterGroup {
    /// User-subscribed lists
    Custom = 0,
    AdBlocking = 1,
    Privacy = 2,
    SocialWidgets = 3,
    Annoyances = 4,
    Security = 5,
    Other = 6,
    LanguageSpecific = 7,
}

impl TryFrom<u8> for FilterGroup {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Custom),
            1 => Ok(Self::AdBlocking),
            2 => Ok(Self::Privacy),
            3 => Ok(Self::SocialWidgets),
            4 => Ok(Self::Annoyances),
            5 => Ok(Self::Security),
            6 => Ok(Self::Other),
            7 => Ok(Self::LanguageSpecific),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Distribution State
// =============================================================================

/// Error kinds recorded against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rules were truncated to the target ceiling; the partial payload was
    /// still applied
    CompilationOverLimit,
    /// A state or payload write did not commit
    PersistenceFailure,
    /// The host rejected or failed to apply the payload
    HostReloadFailure,
    /// A legacy id was both enabled and disabled
    LegacyConflict,
}

impl ErrorKind {
    /// Errors raised before the host is asked to reload.
    ///
    /// A later reload outcome does not overwrite these.
    pub fn is_compile_stage(self) -> bool {
        matches!(self, Self::CompilationOverLimit | Self::PersistenceFailure)
    }
}

/// Last known deployment state of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionState {
    pub last_applied_rule_count: usize,
    pub last_applied_over_limit: bool,
    pub last_reload_succeeded: bool,
    #[serde(default)]
    pub last_error: Option<ErrorKind>,
    /// CRC32 of the last saved payload
    #[serde(default)]
    pub payload_fingerprint: Option<u32>,
}

impl DistributionState {
    /// Merge a reload outcome into this state.
    ///
    /// A stored persistence failure stays sticky across reloads, and a
    /// successful reload keeps an over-limit warning. A host failure
    /// replaces any other error.
    pub fn with_reload_outcome(&self, succeeded: bool) -> Self {
        let last_error = match (self.last_error, succeeded) {
            (Some(ErrorKind::PersistenceFailure), _) => Some(ErrorKind::PersistenceFailure),
            (_, false) => Some(ErrorKind::HostReloadFailure),
            (Some(kind), true) if kind.is_compile_stage() => Some(kind),
            (_, true) => None,
        };
        Self {
            last_reload_succeeded: succeeded,
            last_error,
            ..self.clone()
        }
    }
}
