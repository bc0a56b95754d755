//! Content blocker core types
//!
//! This crate holds the data model shared by the compiler, the sync runtime
//! and the CLI: rule records and filter sets, the closed set of distribution
//! targets with their static table, and the per-target distribution state.
//!
//! # Modules
//!
//! - `types`: rule records, filter sets, filter groups, distribution state
//! - `target`: distribution targets, their static table and target masks
//! - `hash`: CRC32 used to fingerprint compiled payloads
//! - `url`: allocation-free host extraction and domain matching

pub mod hash;
pub mod target;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use hash::{crc32, fingerprint};
pub use target::{DistributionTarget, TargetKind, TargetMask, UnknownTarget, RULES_LIMIT};
pub use types::{
    DistributionState, ErrorKind, FilterGroup, FilterSet, Provenance, RuleRecord,
};
