//! Distribution targets
//!
//! The host runs one sandboxed blocker per target. Targets are a closed
//! enum; everything a target carries (bundle identifier, rule ceiling,
//! kind, routed filter groups) lives in [`TARGET_TABLE`] and is looked up,
//! never computed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::FilterGroup;

/// Rule ceiling the host enforces for a content-rule blocker.
pub const RULES_LIMIT: usize = 50_000;

// =============================================================================
// Targets
// =============================================================================

/// One host blocker that receives a compiled payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DistributionTarget {
    General = 0,
    Privacy = 1,
    Security = 2,
    SocialWidgetsAndAnnoyances = 3,
    Other = 4,
    Custom = 5,
    /// Scripted rules, delivered over message passing
    Advanced = 6,
}

/// How a target consumes its rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// JSON rule list loaded by the host, bounded by a ceiling
    ContentRules,
    /// Script bundle served on request; reloading it is a no-op
    Scripted,
}

/// Static description of a target.
#[derive(Debug)]
pub struct TargetSpec {
    pub target: DistributionTarget,
    /// Short name used in file names, CLI flags and affinity directives
    pub id: &'static str,
    pub bundle_id: &'static str,
    pub rule_limit: Option<usize>,
    pub kind: TargetKind,
    pub groups: &'static [FilterGroup],
}

/// Indexed by `DistributionTarget as usize`.
pub static TARGET_TABLE: [TargetSpec; 7] = [
    TargetSpec {
        target: DistributionTarget::General,
        id: "general",
        bundle_id: "io.cbsync.blocker.general",
        rule_limit: Some(RULES_LIMIT),
        kind: TargetKind::ContentRules,
        groups: &[FilterGroup::AdBlocking, FilterGroup::LanguageSpecific],
    },
    TargetSpec {
        target: DistributionTarget::Privacy,
        id: "privacy",
        bundle_id: "io.cbsync.blocker.privacy",
        rule_limit: Some(RULES_LIMIT),
        kind: TargetKind::ContentRules,
        groups: &[FilterGroup::Privacy],
    },
    TargetSpec {
        target: DistributionTarget::Security,
        id: "security",
        bundle_id: "io.cbsync.blocker.security",
        rule_limit: Some(RULES_LIMIT),
        kind: TargetKind::ContentRules,
        groups: &[FilterGroup::Security],
    },
    TargetSpec {
        target: DistributionTarget::SocialWidgetsAndAnnoyances,
        id: "social",
        bundle_id: "io.cbsync.blocker.social",
        rule_limit: Some(RULES_LIMIT),
        kind: TargetKind::ContentRules,
        groups: &[FilterGroup::SocialWidgets, FilterGroup::Annoyances],
    },
    TargetSpec {
        target: DistributionTarget::Other,
        id: "other",
        bundle_id: "io.cbsync.blocker.other",
        rule_limit: Some(RULES_LIMIT),
        kind: TargetKind::ContentRules,
        groups: &[FilterGroup::Other],
    },
    TargetSpec {
        target: DistributionTarget::Custom,
        id: "custom",
        bundle_id: "io.cbsync.blocker.custom",
        rule_limit: Some(RULES_LIMIT),
        kind: TargetKind::ContentRules,
        groups: &[FilterGroup::Custom],
    },
    TargetSpec {
        target: DistributionTarget::Advanced,
        id: "advanced",
        bundle_id: "io.cbsync.blocker.advanced",
        rule_limit: None,
        kind: TargetKind::Scripted,
        groups: &[],
    },
];

impl DistributionTarget {
    pub const ALL: [Self; 7] = [
        Self::General,
        Self::Privacy,
        Self::Security,
        Self::SocialWidgetsAndAnnoyances,
        Self::Other,
        Self::Custom,
        Self::Advanced,
    ];

    /// Targets that receive a JSON rule list.
    pub const CONTENT: [Self; 6] = [
        Self::General,
        Self::Privacy,
        Self::Security,
        Self::SocialWidgetsAndAnnoyances,
        Self::Other,
        Self::Custom,
    ];

    #[inline]
    pub fn spec(self) -> &'static TargetSpec {
        &TARGET_TABLE[self as usize]
    }

    #[inline]
    pub fn id(self) -> &'static str {
        self.spec().id
    }

    #[inline]
    pub fn bundle_id(self) -> &'static str {
        self.spec().bundle_id
    }

    /// Rule ceiling, `None` for targets without content rules.
    #[inline]
    pub fn rule_limit(self) -> Option<usize> {
        self.spec().rule_limit
    }

    #[inline]
    pub fn kind(self) -> TargetKind {
        self.spec().kind
    }

    #[inline]
    pub fn is_content(self) -> bool {
        self.kind() == TargetKind::ContentRules
    }

    /// Target a filter group is routed to.
    pub fn for_group(group: FilterGroup) -> Self {
        TARGET_TABLE
            .iter()
            .find(|spec| spec.groups.contains(&group))
            .map(|spec| spec.target)
            .unwrap_or(Self::Other)
    }

    pub fn from_bundle_id(bundle_id: &str) -> Option<Self> {
        TARGET_TABLE
            .iter()
            .find(|spec| spec.bundle_id == bundle_id)
            .map(|spec| spec.target)
    }

    pub fn from_id(id: &str) -> Option<Self> {
        TARGET_TABLE
            .iter()
            .find(|spec| spec.id.eq_ignore_ascii_case(id))
            .map(|spec| spec.target)
    }
}

impl TryFrom<u8> for DistributionTarget {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(())
    }
}

impl fmt::Display for DistributionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown distribution target '{0}'")]
pub struct UnknownTarget(pub String);

impl FromStr for DistributionTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s)
            .or_else(|| Self::from_bundle_id(s))
            .ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

// =============================================================================
// Target Masks
// =============================================================================

bitflags::bitflags! {
    /// Set of targets, one bit per `DistributionTarget` discriminant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetMask: u8 {
        const GENERAL = 1 << 0;
        const PRIVACY = 1 << 1;
        const SECURITY = 1 << 2;
        const SOCIAL = 1 << 3;
        const OTHER = 1 << 4;
        const CUSTOM = 1 << 5;
        const ADVANCED = 1 << 6;

        /// Every content-rule target
        const CONTENT = Self::GENERAL.bits()
            | Self::PRIVACY.bits()
            | Self::SECURITY.bits()
            | Self::SOCIAL.bits()
            | Self::OTHER.bits()
            | Self::CUSTOM.bits();
    }
}

impl TargetMask {
    /// Targets in the mask, in table order.
    pub fn targets(self) -> impl Iterator<Item = DistributionTarget> {
        DistributionTarget::ALL
            .into_iter()
            .filter(move |target| self.contains(Self::from(*target)))
    }
}

impl From<DistributionTarget> for TargetMask {
    fn from(target: DistributionTarget) -> Self {
        Self::from_bits_truncate(1 << target as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_discriminant() {
        for target in DistributionTarget::ALL {
            assert_eq!(target.spec().target, target);
        }
    }

    #[test]
    fn test_bundle_id_round_trip() {
        for target in DistributionTarget::ALL {
            assert_eq!(DistributionTarget::from_bundle_id(target.bundle_id()), Some(target));
        }
        assert_eq!(DistributionTarget::from_bundle_id("io.cbsync.unknown"), None);
    }

    #[test]
    fn only_advanced_is_scripted() {
        for target in DistributionTarget::CONTENT {
            assert_eq!(target.rule_limit(), Some(RULES_LIMIT));
            assert!(target.is_content());
        }
        assert_eq!(DistributionTarget::Advanced.rule_limit(), None);
        assert_eq!(DistributionTarget::Advanced.kind(), TargetKind::Scripted);
    }

    #[test]
    fn groups_route_to_targets() {
        assert_eq!(DistributionTarget::for_group(FilterGroup::AdBlocking), DistributionTarget::General);
        assert_eq!(
            DistributionTarget::for_group(FilterGroup::LanguageSpecific),
            DistributionTarget::General
        );
        assert_eq!(
            DistributionTarget::for_group(FilterGroup::Annoyances),
            DistributionTarget::SocialWidgetsAndAnnoyances
        );
        assert_eq!(DistributionTarget::for_group(FilterGroup::Custom), DistributionTarget::Custom);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("privacy".parse::<DistributionTarget>(), Ok(DistributionTarget::Privacy));
        assert_eq!(
            "io.cbsync.blocker.social".parse::<DistributionTarget>(),
            Ok(DistributionTarget::SocialWidgetsAndAnnoyances)
        );
        assert!("nope".parse::<DistributionTarget>().is_err());
    }

    #[test]
    fn mask_lists_targets_in_order() {
        let mask = TargetMask::from(DistributionTarget::Custom) | TargetMask::GENERAL;
        let targets: Vec<_> = mask.targets().collect();
        assert_eq!(targets, vec![DistributionTarget::General, DistributionTarget::Custom]);
        assert_eq!(TargetMask::CONTENT.targets().count(), 6);
    }
}
