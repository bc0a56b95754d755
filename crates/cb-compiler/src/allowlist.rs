//! Allow/block list rules
//!
//! The allowlist feature works in one of two modes. In allow mode every
//! listed domain gets its own allow rule. In block mode protection is
//! limited to the listed domains through one inverted rule that allows every
//! other site. Only the rule shape of the active mode is ever enabled.

use cb_core::types::RuleRecord;
use serde::{Deserialize, Serialize};

const ALLOW_MODIFIERS: &str = "important,document";

/// `@@||domain^$important,document`
pub fn basic_allow_rule(domain: &str) -> String {
    format!("@@||{domain}^${ALLOW_MODIFIERS}")
}

/// `@@||*$document`, excluding the listed domains.
pub fn inverted_allow_rule(domains: &[String]) -> String {
    if domains.is_empty() {
        return "@@||*$document".to_string();
    }
    let excluded: Vec<String> = domains.iter().map(|domain| format!("~{domain}")).collect();
    format!("@@||*$document,domain={}", excluded.join("|"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowBlockList {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allow mode when true, block mode when false
    #[serde(default = "default_true")]
    pub default_allow_mode: bool,
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub block_domains: Vec<String>,
}

impl Default for AllowBlockList {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            default_allow_mode: default_true(),
            allow_domains: Vec::new(),
            block_domains: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl AllowBlockList {
    pub fn allow_mode_active(&self) -> bool {
        self.enabled && self.default_allow_mode
    }

    pub fn block_mode_active(&self) -> bool {
        self.enabled && !self.default_allow_mode
    }

    /// Rules for both shapes; only the active mode's rules are enabled.
    ///
    /// The inverted rule is emitted when block mode is active or a block
    /// domain list exists. Allow rules are emitted per allow-listed domain.
    pub fn rules(&self) -> Vec<RuleRecord> {
        let mut rules = Vec::with_capacity(self.allow_domains.len() + 1);

        if self.block_mode_active() || !self.block_domains.is_empty() {
            rules.push(RuleRecord::new(
                inverted_allow_rule(&self.block_domains),
                self.block_mode_active(),
                None,
            ));
        }

        let allow_enabled = self.allow_mode_active();
        rules.extend(
            self.allow_domains
                .iter()
                .map(|domain| RuleRecord::new(basic_allow_rule(domain), allow_enabled, None)),
        );

        rules
    }
}
