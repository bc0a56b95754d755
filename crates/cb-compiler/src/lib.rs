//! Content Blocker Rule Compiler
//!
//! Pure transforms from the user's declarative blocker configuration to the
//! payload each distribution target loads:
//!
//! - `parser`: converts one filter rule into a content-blocker entry or an
//!   advanced (scripted) rule
//! - `builder`: compiles a filter set for one target, enforcing its ceiling
//! - `optimizer`: pre-deduplication and trusted-rule filtering
//! - `allowlist`: allow/block list rule shapes
//! - `grouping`: routes rules from the active configuration to targets
//! - `legacy`: maps legacy enable/disable configurations and import files
//! - `advanced`: per-URL lookup over a compiled script bundle
//!
//! Nothing here performs I/O or fails on well-formed rule input; degraded
//! outcomes are encoded in the returned values.

pub mod advanced;
pub mod allowlist;
pub mod builder;
pub mod error;
pub mod grouping;
pub mod legacy;
pub mod optimizer;
pub mod parser;

pub use advanced::{AdvancedBlockingData, AdvancedRulesIndex};
pub use allowlist::AllowBlockList;
pub use builder::{compile, compile_disabled, CompilationResult, Payload, EMPTY_PAYLOAD};
pub use error::{CompileError, Result};
pub use grouping::{advanced_rule_set, group_rules, ActiveConfig, FilterConfig, UserRules};
pub use legacy::{
    map_filters, map_user_rules, LegacyFilterMapping, LegacyImport, LegacyImportFile, LegacyUserRules,
    UserRulesConfig,
};
pub use optimizer::{dedupe_rules, is_allowed_for_untrusted};
pub use parser::{convert_rule, ConvertedRule};
