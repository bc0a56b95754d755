//! User-visible status derived from stored distribution state.

use cb_core::target::DistributionTarget;
use cb_core::types::{DistributionState, ErrorKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// A reload is in flight
    Loading,
    /// Never distributed
    Unknown,
    Ok,
    /// Applied, but rules were cut to the ceiling
    LimitExceeded,
    PersistenceError,
    HostError,
}

impl TargetStatus {
    /// In-progress wins, then a stored error, then over-limit. Over-limit
    /// only applies to content targets.
    pub fn derive(
        target: DistributionTarget,
        in_progress: bool,
        state: Option<&DistributionState>,
    ) -> Self {
        if in_progress {
            return Self::Loading;
        }
        let Some(state) = state else {
            return Self::Unknown;
        };

        match state.last_error {
            Some(ErrorKind::PersistenceFailure) => return Self::PersistenceError,
            Some(ErrorKind::HostReloadFailure) => return Self::HostError,
            _ => {}
        }

        let over_limit = state.last_applied_over_limit
            || state.last_error == Some(ErrorKind::CompilationOverLimit);
        if target.is_content() && over_limit {
            return Self::LimitExceeded;
        }

        if state.last_reload_succeeded {
            Self::Ok
        } else {
            Self::Unknown
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::PersistenceError | Self::HostError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ProtectionSummary {
    Off,
    Active,
    /// Some targets failed; the others still protect
    Degraded { failed: Vec<DistributionTarget> },
}

impl ProtectionSummary {
    /// Protection only reads as off when the global flag is off or every
    /// target failed.
    pub fn derive(protection_enabled: bool, statuses: &[(DistributionTarget, TargetStatus)]) -> Self {
        if !protection_enabled {
            return Self::Off;
        }

        let failed: Vec<DistributionTarget> = statuses
            .iter()
            .filter(|(_, status)| status.is_failure())
            .map(|(target, _)| *target)
            .collect();

        if failed.is_empty() {
            Self::Active
        } else if failed.len() == statuses.len() {
            Self::Off
        } else {
            Self::Degraded { failed }
        }
    }
}
