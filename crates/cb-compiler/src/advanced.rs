//! Script bundle format and per-URL lookup
//!
//! The scripted target does not load a rule list. Its compiled bundle is
//! indexed here and queried per page URL by the low-latency lookup path.

use cb_core::url::{extract_host, host_matches_domain};
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::parser::{AdvancedKind, AdvancedRule};

// =============================================================================
// Bundle Format
// =============================================================================

/// One entry of a compiled script bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub trigger: BundleTrigger,
    pub action: BundleAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTrigger {
    #[serde(rename = "url-filter")]
    pub url_filter: String,
    #[serde(rename = "if-domain", default, skip_serializing_if = "Vec::is_empty")]
    pub if_domain: Vec<String>,
    #[serde(rename = "unless-domain", default, skip_serializing_if = "Vec::is_empty")]
    pub unless_domain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BundleAction {
    Script { script: String },
    Scriptlet { script: String },
    Css { css: String },
}

impl From<AdvancedRule> for BundleEntry {
    fn from(rule: AdvancedRule) -> Self {
        let action = match rule.kind {
            AdvancedKind::Script => BundleAction::Script { script: rule.content },
            AdvancedKind::Scriptlet => BundleAction::Scriptlet { script: rule.content },
            AdvancedKind::Css => BundleAction::Css { css: rule.content },
        };
        Self {
            trigger: BundleTrigger {
                url_filter: ".*".to_string(),
                if_domain: rule.if_domain,
                unless_domain: rule.unless_domain,
            },
            action,
        }
    }
}

impl BundleTrigger {
    fn applies_to(&self, host: &str) -> bool {
        let included = self.if_domain.is_empty()
            || self.if_domain.iter().any(|domain| host_matches_domain(host, domain));
        included && !self.unless_domain.iter().any(|domain| host_matches_domain(host, domain))
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Everything the scripted target applies to one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedBlockingData {
    pub scripts: Vec<String>,
    pub scriptlets: Vec<String>,
    pub css: Vec<String>,
}

impl AdvancedBlockingData {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.scriptlets.is_empty() && self.css.is_empty()
    }

    /// One injectable script: every rule script in its own `try` block,
    /// followed by a style element carrying the CSS. Scriptlets need the
    /// page-side scriptlet library and are only delivered as data.
    pub fn render_script(&self) -> String {
        if self.scripts.is_empty() && self.css.is_empty() {
            return String::new();
        }

        let mut out = String::from("(function () {\n");
        for script in &self.scripts {
            out.push_str("try {\n");
            out.push_str(script);
            out.push_str("\n} catch (e) {}\n");
        }
        if !self.css.is_empty() {
            let css = self.css.join("\n");
            // A JSON string is a valid JS string literal
            let literal = serde_json::to_string(&css).unwrap_or_else(|_| "\"\"".to_string());
            out.push_str("var style = document.createElement('style');\n");
            out.push_str(&format!("style.textContent = {literal};\n"));
            out.push_str("(document.head || document.documentElement).appendChild(style);\n");
        }
        out.push_str("})();");
        out
    }
}

/// Compiled bundle indexed for lookups.
#[derive(Debug, Clone, Default)]
pub struct AdvancedRulesIndex {
    entries: Vec<BundleEntry>,
}

impl AdvancedRulesIndex {
    pub fn new(entries: Vec<BundleEntry>) -> Self {
        Self { entries }
    }

    pub fn from_bundle(json: &str) -> Result<Self> {
        let entries: Vec<BundleEntry> = serde_json::from_str(json)
            .map_err(|e| CompileError::InvalidBundle(e.to_string()))?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rules that apply to the page at `url`, in bundle order.
    ///
    /// URLs without a host get no rules.
    pub fn lookup(&self, url: &str) -> AdvancedBlockingData {
        let mut data = AdvancedBlockingData::default();
        let Some(host) = extract_host(url) else {
            return data;
        };

        for entry in self.entries.iter().filter(|entry| entry.trigger.applies_to(host)) {
            match &entry.action {
                BundleAction::Script { script } => data.scripts.push(script.clone()),
                BundleAction::Scriptlet { script } => data.scriptlets.push(script.clone()),
                BundleAction::Css { css } => data.css.push(css.clone()),
            }
        }

        data
    }
}
