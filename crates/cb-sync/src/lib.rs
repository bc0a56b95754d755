//! Content Blocker Synchronization Runtime
//!
//! The stateful side of distribution:
//!
//! - `store`: per-target distribution state and in-progress markers
//! - `orchestrator`: compile, save and single-flight reload of every target
//! - `debounce`: collapses bursts of configuration changes
//! - `cache`: TTL response cache for per-page lookups
//! - `lookup`: lookup protocol for the scripted target
//! - `status`: user-visible status derived from stored state
//! - `host`: seams to the platform host and payload storage

pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod host;
pub mod lookup;
pub mod orchestrator;
pub mod status;
pub mod store;

pub use cache::{CacheSettings, ResponseCache, SweepStats};
pub use config::SyncConfig;
pub use debounce::Debouncer;
pub use error::{Result, SyncError};
pub use host::{ContentBlockerHost, DirectoryStorage, MemoryRulesStorage, RulesStorage};
pub use lookup::{
    AdvancedRulesSource, LookupRequest, LookupService, PageRequestTracker, ScriptRequest,
    ScriptResponse, ADVANCED_BLOCKING_DATA,
};
pub use orchestrator::{
    compile_all, AggregateOutcome, DistributionOrchestrator, DistributionReport, ReloadOutcome,
    TargetReport,
};
pub use status::{ProtectionSummary, TargetStatus};
pub use store::{ExtensionStateStore, FilePersistence, MemoryPersistence, StatePersistence};
