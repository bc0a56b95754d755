//! Rule conversion
//!
//! Converts one filter rule into what a target can load: a content-blocker
//! entry (`trigger` + `action`) for network and element-hiding rules, or an
//! advanced rule (script, scriptlet, injected CSS) for the scripted target.

use std::net::IpAddr;

use cb_core::url::normalize_domain;
use serde::{Deserialize, Serialize};

/// Prefix `||` patterns expand to: any web scheme, any subdomain.
const HOST_ANCHOR_REGEX: &str = r"^[htpsw]+:\/\/([a-z0-9-]+\.)?";
/// The `^` separator placeholder.
const SEPARATOR_REGEX: &str = "[/:&?]?";
const MATCH_ALL: &str = ".*";

// =============================================================================
// Content Blocker Entries
// =============================================================================

/// One entry of a JSON rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub trigger: Trigger,
    pub action: Action,
    /// Position class used to order entries; not part of the wire format
    #[serde(skip)]
    pub priority: RulePriority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "url-filter")]
    pub url_filter: String,
    #[serde(rename = "url-filter-is-case-sensitive", default, skip_serializing_if = "is_false")]
    pub case_sensitive: bool,
    #[serde(rename = "if-domain", default, skip_serializing_if = "Vec::is_empty")]
    pub if_domain: Vec<String>,
    #[serde(rename = "unless-domain", default, skip_serializing_if = "Vec::is_empty")]
    pub unless_domain: Vec<String>,
    #[serde(rename = "resource-type", default, skip_serializing_if = "Vec::is_empty")]
    pub resource_type: Vec<ResourceType>,
    #[serde(rename = "load-type", default, skip_serializing_if = "Vec::is_empty")]
    pub load_type: Vec<LoadType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Block,
    CssDisplayNone,
    IgnorePreviousRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Document,
    Image,
    StyleSheet,
    Script,
    Font,
    Raw,
    SvgDocument,
    Media,
    Popup,
    Ping,
    Websocket,
    Other,
}

impl ResourceType {
    const ALL: [Self; 12] = [
        Self::Document,
        Self::Image,
        Self::StyleSheet,
        Self::Script,
        Self::Font,
        Self::Raw,
        Self::SvgDocument,
        Self::Media,
        Self::Popup,
        Self::Ping,
        Self::Websocket,
        Self::Other,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadType {
    FirstParty,
    ThirdParty,
}

/// Later classes override earlier ones in the host, so entries are emitted
/// in ascending order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RulePriority {
    CssHide,
    #[default]
    Block,
    Allow,
    ImportantBlock,
    ImportantAllow,
    DocumentAllow,
}

impl ContentRule {
    /// The entry hosts accept as "valid but does nothing".
    pub fn ignore_nothing() -> Self {
        Self {
            trigger: Trigger {
                url_filter: "none".to_string(),
                ..Default::default()
            },
            action: Action {
                kind: ActionType::IgnorePreviousRules,
                selector: None,
            },
            priority: RulePriority::Block,
        }
    }
}

// =============================================================================
// Advanced Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancedKind {
    Script,
    Scriptlet,
    Css,
}

/// A rule only the scripted target can apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedRule {
    pub kind: AdvancedKind,
    pub content: String,
    pub if_domain: Vec<String>,
    pub unless_domain: Vec<String>,
}

/// Result of converting one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertedRule {
    Content(ContentRule),
    Advanced(AdvancedRule),
    /// Comments, directives and blank lines
    Skipped,
    /// Syntax the targets cannot express
    Unsupported,
}

pub fn convert_rule(text: &str) -> ConvertedRule {
    let line = text.trim();
    if line.is_empty() || is_comment_line(line) {
        return ConvertedRule::Skipped;
    }

    if let Some((pos, marker_len, marker)) = find_cosmetic_marker(line) {
        let body = &line[pos + marker_len..];
        // "## Section" headers in hosts files
        if pos == 0 && body.starts_with(char::is_whitespace) {
            return ConvertedRule::Skipped;
        }
        return convert_cosmetic(&line[..pos], marker, body);
    }

    if line.starts_with('#') {
        return ConvertedRule::Skipped;
    }

    convert_network(line)
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[')
}

// =============================================================================
// Cosmetic Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CosmeticMarker {
    ElementHide,
    ExtendedCss,
    CssInject,
    Script,
    Exception,
}

/// Longest markers first so `#@%#` is not read as `#@#`-something.
const COSMETIC_MARKERS: [(&str, CosmeticMarker); 10] = [
    ("#@$?#", CosmeticMarker::Exception),
    ("#$?#", CosmeticMarker::CssInject),
    ("#@%#", CosmeticMarker::Exception),
    ("#%#", CosmeticMarker::Script),
    ("#@$#", CosmeticMarker::Exception),
    ("#$#", CosmeticMarker::CssInject),
    ("#@?#", CosmeticMarker::Exception),
    ("#?#", CosmeticMarker::ExtendedCss),
    ("#@#", CosmeticMarker::Exception),
    ("##", CosmeticMarker::ElementHide),
];

const EXTENDED_PSEUDO_CLASSES: [&str; 8] = [
    ":has(",
    ":has-text(",
    ":contains(",
    ":-abp-",
    ":matches-css",
    ":xpath(",
    ":upward(",
    ":remove(",
];

fn find_cosmetic_marker(line: &str) -> Option<(usize, usize, CosmeticMarker)> {
    for (pos, _) in line.match_indices('#') {
        let rest = &line[pos..];
        for (marker, kind) in COSMETIC_MARKERS {
            if rest.starts_with(marker) {
                return Some((pos, marker.len(), kind));
            }
        }
    }
    None
}

fn convert_cosmetic(domains_part: &str, marker: CosmeticMarker, body: &str) -> ConvertedRule {
    let body = body.trim();
    if body.is_empty() {
        return ConvertedRule::Unsupported;
    }

    let Some((include, exclude)) = parse_cosmetic_domains(domains_part) else {
        return ConvertedRule::Unsupported;
    };

    let advanced = |kind: AdvancedKind, content: String| {
        ConvertedRule::Advanced(AdvancedRule {
            kind,
            content,
            if_domain: include.clone(),
            unless_domain: exclude.clone(),
        })
    };

    match marker {
        CosmeticMarker::ElementHide => {
            if EXTENDED_PSEUDO_CLASSES.iter().any(|pseudo| body.contains(pseudo)) {
                return advanced(AdvancedKind::Css, hiding_css(body));
            }
            if !include.is_empty() && !exclude.is_empty() {
                return ConvertedRule::Unsupported;
            }
            ConvertedRule::Content(ContentRule {
                trigger: Trigger {
                    url_filter: MATCH_ALL.to_string(),
                    if_domain: wildcard_domains(&include),
                    unless_domain: wildcard_domains(&exclude),
                    ..Default::default()
                },
                action: Action {
                    kind: ActionType::CssDisplayNone,
                    selector: Some(body.to_string()),
                },
                priority: RulePriority::CssHide,
            })
        }
        CosmeticMarker::ExtendedCss => advanced(AdvancedKind::Css, hiding_css(body)),
        CosmeticMarker::CssInject => advanced(AdvancedKind::Css, body.to_string()),
        CosmeticMarker::Script => {
            if body.starts_with("//scriptlet(") {
                advanced(AdvancedKind::Scriptlet, body.to_string())
            } else {
                advanced(AdvancedKind::Script, body.to_string())
            }
        }
        CosmeticMarker::Exception => ConvertedRule::Unsupported,
    }
}

fn hiding_css(selector: &str) -> String {
    format!("{selector} {{ display: none !important; }}")
}

fn parse_cosmetic_domains(value: &str) -> Option<(Vec<String>, Vec<String>)> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in value.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let domain = normalize_domain(domain_raw)?;
        if is_exclude {
            exclude.push(domain);
        } else {
            include.push(domain);
        }
    }

    Some((include, exclude))
}

/// Hosts match `*domain` entries on the domain and all its subdomains.
fn wildcard_domains(domains: &[String]) -> Vec<String> {
    domains.iter().map(|domain| format!("*{domain}")).collect()
}

// =============================================================================
// Network Rules
// =============================================================================

fn convert_network(line: &str) -> ConvertedRule {
    if let Some(domain) = parse_hosts_file_domain(line) {
        return ConvertedRule::Content(ContentRule {
            trigger: Trigger {
                url_filter: host_anchor_filter(&domain),
                ..Default::default()
            },
            action: Action {
                kind: ActionType::Block,
                selector: None,
            },
            priority: RulePriority::Block,
        });
    }

    let (is_allow, line) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    let (pattern_part, options_text) = split_rule_options(line);
    let options = match options_text {
        Some(options_text) => match parse_options(options_text) {
            Some(options) => options,
            None => return ConvertedRule::Unsupported,
        },
        None => ParsedOptions::default(),
    };
    let pattern = pattern_part.trim();
    if pattern.contains(char::is_whitespace) {
        return ConvertedRule::Unsupported;
    }

    if !options.if_domain.is_empty() && !options.unless_domain.is_empty() {
        return ConvertedRule::Unsupported;
    }

    if is_allow && options.document {
        return convert_document_allow(pattern, &options);
    }

    let Some(url_filter) = pattern_to_url_filter(pattern) else {
        return ConvertedRule::Unsupported;
    };

    let unrestricted = url_filter == MATCH_ALL
        && options.if_domain.is_empty()
        && options.unless_domain.is_empty()
        && options.resource_types.is_empty();
    if unrestricted && !is_allow {
        return ConvertedRule::Unsupported;
    }

    let (kind, priority) = match (is_allow, options.important) {
        (false, false) => (ActionType::Block, RulePriority::Block),
        (false, true) => (ActionType::Block, RulePriority::ImportantBlock),
        (true, false) => (ActionType::IgnorePreviousRules, RulePriority::Allow),
        (true, true) => (ActionType::IgnorePreviousRules, RulePriority::ImportantAllow),
    };

    ConvertedRule::Content(ContentRule {
        trigger: Trigger {
            url_filter,
            case_sensitive: options.match_case,
            if_domain: wildcard_domains(&options.if_domain),
            unless_domain: wildcard_domains(&options.unless_domain),
            resource_type: options.resource_types,
            load_type: options.load_type,
        },
        action: Action { kind, selector: None },
        priority,
    })
}

/// `@@||site^$document` disables every rule on pages of `site`.
fn convert_document_allow(pattern: &str, options: &ParsedOptions) -> ConvertedRule {
    let mut if_domain = wildcard_domains(&options.if_domain);
    let unless_domain = wildcard_domains(&options.unless_domain);

    if let Some(domain) = parse_host_anchor_rule(pattern) {
        if !unless_domain.is_empty() {
            return ConvertedRule::Unsupported;
        }
        if_domain.push(format!("*{domain}"));
    } else if pattern_to_url_filter(pattern).as_deref() != Some(MATCH_ALL) {
        return ConvertedRule::Unsupported;
    }

    ConvertedRule::Content(ContentRule {
        trigger: Trigger {
            url_filter: MATCH_ALL.to_string(),
            if_domain,
            unless_domain,
            ..Default::default()
        },
        action: Action {
            kind: ActionType::IgnorePreviousRules,
            selector: None,
        },
        priority: RulePriority::DocumentAllow,
    })
}

#[derive(Debug, Clone, Default)]
struct ParsedOptions {
    important: bool,
    match_case: bool,
    document: bool,
    resource_types: Vec<ResourceType>,
    load_type: Vec<LoadType>,
    if_domain: Vec<String>,
    unless_domain: Vec<String>,
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    // Regex patterns may contain '$' themselves
    if line.len() > 1 && line.starts_with('/') && line.ends_with('/') {
        return (line, None);
    }
    if line.starts_with('/') {
        if let Some(end) = line.rfind("/$") {
            if end > 0 {
                return (&line[..end + 1], Some(&line[end + 2..]));
            }
        }
        return (line, None);
    }

    match line.find('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_options(text: &str) -> Option<ParsedOptions> {
    let mut options = ParsedOptions::default();
    let mut type_include: Vec<ResourceType> = Vec::new();
    let mut type_exclude: Vec<ResourceType> = Vec::new();
    let mut first_party = false;
    let mut third_party = false;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(options);
    }

    for raw in trimmed.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if raw_lower == "important" {
            options.important = true;
            continue;
        }

        if raw_lower == "match-case" {
            options.match_case = true;
            continue;
        }

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            let (include, exclude) = parse_domain_option(domain_value)?;
            options.if_domain.extend(include);
            options.unless_domain.extend(exclude);
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        match name {
            "third-party" | "3p" => {
                if negated {
                    first_party = true;
                } else {
                    third_party = true;
                }
                continue;
            }
            "first-party" | "1p" => {
                if negated {
                    third_party = true;
                } else {
                    first_party = true;
                }
                continue;
            }
            "document" | "doc" if !negated => {
                options.document = true;
                type_include.push(ResourceType::Document);
                continue;
            }
            _ => {}
        }

        let resource_type = request_resource_type(name)?;
        if negated {
            type_exclude.push(resource_type);
        } else {
            type_include.push(resource_type);
        }
    }

    options.resource_types = finalize_resource_types(type_include, type_exclude)?;
    options.load_type = match (first_party, third_party) {
        (true, false) => vec![LoadType::FirstParty],
        (false, true) => vec![LoadType::ThirdParty],
        _ => Vec::new(),
    };

    Some(options)
}

/// Empty result means "every type". `None` means the options exclude
/// everything.
fn finalize_resource_types(
    include: Vec<ResourceType>,
    exclude: Vec<ResourceType>,
) -> Option<Vec<ResourceType>> {
    if include.is_empty() && exclude.is_empty() {
        return Some(Vec::new());
    }

    let base: Vec<ResourceType> = if include.is_empty() {
        ResourceType::ALL.to_vec()
    } else {
        include
    };

    let mut types: Vec<ResourceType> = base
        .into_iter()
        .filter(|t| !exclude.contains(t))
        .collect();
    types.sort();
    types.dedup();

    if types.is_empty() {
        None
    } else {
        Some(types)
    }
}

fn request_resource_type(name: &str) -> Option<ResourceType> {
    match name {
        "script" => Some(ResourceType::Script),
        "image" => Some(ResourceType::Image),
        "stylesheet" | "css" => Some(ResourceType::StyleSheet),
        "font" => Some(ResourceType::Font),
        "media" => Some(ResourceType::Media),
        "document" | "doc" | "subdocument" | "frame" => Some(ResourceType::Document),
        "xmlhttprequest" | "xhr" | "fetch" => Some(ResourceType::Raw),
        "websocket" => Some(ResourceType::Websocket),
        "ping" | "beacon" => Some(ResourceType::Ping),
        "popup" => Some(ResourceType::Popup),
        "object" | "other" => Some(ResourceType::Other),
        _ => None,
    }
}

fn parse_domain_option(value: &str) -> Option<(Vec<String>, Vec<String>)> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let domain = normalize_domain(domain_raw)?;
        if is_exclude {
            exclude.push(domain);
        } else {
            include.push(domain);
        }
    }

    if include.is_empty() && exclude.is_empty() {
        return None;
    }

    Some((include, exclude))
}

fn parse_host_anchor_rule(pattern: &str) -> Option<String> {
    let rest = pattern.trim().strip_prefix("||")?;
    let rest = rest.strip_prefix('.').unwrap_or(rest);

    let mut end = rest.len();
    for (i, ch) in rest.char_indices() {
        if ch == '^' || ch == '|' {
            end = i;
            break;
        }
        if ch == '/' || ch == '?' || ch == '#' || ch == ':' || ch == '*' {
            return None;
        }
    }

    if !rest[end..].trim_start_matches(['^', '|']).is_empty() {
        return None;
    }

    normalize_domain(&rest[..end])
}

fn parse_hosts_file_domain(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if first.parse::<IpAddr>().is_err() {
        return None;
    }

    let domain = normalize_domain(second)?;
    // localhost-style entries carry no blocking intent
    if !domain.contains('.') {
        return None;
    }
    Some(domain)
}

fn host_anchor_filter(domain: &str) -> String {
    let mut out = String::from(HOST_ANCHOR_REGEX);
    push_escaped(&mut out, domain);
    out.push_str(SEPARATOR_REGEX);
    out
}

/// Translate a filter pattern into the regex subset hosts accept.
///
/// Returns `None` for patterns that need alternation or non-ASCII text.
fn pattern_to_url_filter(pattern: &str) -> Option<String> {
    if matches!(pattern, "" | "*" | "|*" | "||*" | "||") {
        return Some(MATCH_ALL.to_string());
    }

    if !pattern.is_ascii() {
        return None;
    }

    if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let body = &pattern[1..pattern.len() - 1];
        if body.contains('|') || body.contains("(?") || body.contains('{') {
            return None;
        }
        return Some(body.to_string());
    }

    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;

    if let Some(stripped) = rest.strip_prefix("||") {
        out.push_str(HOST_ANCHOR_REGEX);
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('|') {
        out.push('^');
        rest = stripped;
    }

    let (rest, right_anchor) = match rest.strip_suffix('|') {
        Some(stripped) => (stripped, true),
        None => (rest, false),
    };

    let rest = rest.trim_start_matches('*');
    for ch in rest.chars() {
        match ch {
            '*' => out.push_str(MATCH_ALL),
            '^' => out.push_str(SEPARATOR_REGEX),
            _ => push_escaped_char(&mut out, ch),
        }
    }

    if right_anchor {
        out.push('$');
    }

    if out.is_empty() {
        return Some(MATCH_ALL.to_string());
    }

    Some(out)
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        push_escaped_char(out, ch);
    }
}

fn push_escaped_char(out: &mut String, ch: char) {
    if matches!(
        ch,
        '.' | '+' | '?' | '$' | '{' | '}' | '(' | ')' | '[' | ']' | '\\' | '/' | '|'
    ) {
        out.push('\\');
    }
    out.push(ch);
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> ContentRule {
        match convert_rule(text) {
            ConvertedRule::Content(rule) => rule,
            other => panic!("expected content rule for {text:?}, got {other:?}"),
        }
    }

    fn advanced(text: &str) -> AdvancedRule {
        match convert_rule(text) {
            ConvertedRule::Advanced(rule) => rule,
            other => panic!("expected advanced rule for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn skips_comments_and_directives() {
        assert_eq!(convert_rule(""), ConvertedRule::Skipped);
        assert_eq!(convert_rule("! Title: list"), ConvertedRule::Skipped);
        assert_eq!(convert_rule("[Adblock Plus 2.0]"), ConvertedRule::Skipped);
        assert_eq!(convert_rule("!#safari_cb_affinity(general)"), ConvertedRule::Skipped);
        assert_eq!(convert_rule("# hosts comment"), ConvertedRule::Skipped);
        assert_eq!(convert_rule("## Section"), ConvertedRule::Skipped);
    }

    #[test]
    fn converts_host_anchor_block_rule() {
        let rule = content("||ads.example.com^");
        assert_eq!(rule.action.kind, ActionType::Block);
        assert_eq!(rule.trigger.url_filter, r"^[htpsw]+:\/\/([a-z0-9-]+\.)?ads\.example\.com[/:&?]?");
        assert_eq!(rule.priority, RulePriority::Block);
    }

    #[test]
    fn converts_options() {
        let rule = content("||tracker.example^$script,third-party,domain=news.example");
        assert_eq!(rule.trigger.resource_type, vec![ResourceType::Script]);
        assert_eq!(rule.trigger.load_type, vec![LoadType::ThirdParty]);
        assert_eq!(rule.trigger.if_domain, vec!["*news.example".to_string()]);
    }

    #[test]
    fn mixed_domain_constraints_are_unsupported() {
        assert_eq!(
            convert_rule("||a.example^$domain=b.example|~c.example"),
            ConvertedRule::Unsupported
        );
        assert_eq!(
            convert_rule("example.org,~shop.example.org##.ad-banner"),
            ConvertedRule::Unsupported
        );
    }

    #[test]
    fn negated_types_expand_to_the_rest() {
        let rule = content("/banner/*$~image,~script,~document");
        let types = rule.trigger.resource_type;
        assert!(!types.contains(&ResourceType::Image));
        assert!(!types.contains(&ResourceType::Script));
        assert!(types.contains(&ResourceType::StyleSheet));
    }

    #[test]
    fn unknown_options_are_unsupported() {
        assert_eq!(convert_rule("||example.com^$redirect=noop.js"), ConvertedRule::Unsupported);
        assert_eq!(convert_rule("||example.com^$removeparam=utm"), ConvertedRule::Unsupported);
        assert_eq!(convert_rule("example.com$$script[tag-content=\"ad\"]"), ConvertedRule::Unsupported);
    }

    #[test]
    fn allow_rules_ignore_previous_rules() {
        let rule = content("@@||cdn.example.com^$important");
        assert_eq!(rule.action.kind, ActionType::IgnorePreviousRules);
        assert_eq!(rule.priority, RulePriority::ImportantAllow);
    }

    #[test]
    fn document_allow_targets_the_site() {
        let rule = content("@@||shop.example^$important,document");
        assert_eq!(rule.trigger.url_filter, ".*");
        assert_eq!(rule.trigger.if_domain, vec!["*shop.example".to_string()]);
        assert!(rule.trigger.resource_type.is_empty());
        assert_eq!(rule.priority, RulePriority::DocumentAllow);
    }

    #[test]
    fn inverted_allowlist_rule_excludes_domains() {
        let rule = content("@@||*$document,domain=~a.com|~b.com");
        assert_eq!(rule.trigger.url_filter, ".*");
        assert!(rule.trigger.if_domain.is_empty());
        assert_eq!(rule.trigger.unless_domain, vec!["*a.com".to_string(), "*b.com".to_string()]);
        assert_eq!(rule.action.kind, ActionType::IgnorePreviousRules);

        let bare = content("@@||*$document");
        assert!(bare.trigger.unless_domain.is_empty());
    }

    #[test]
    fn unrestricted_block_is_unsupported() {
        assert_eq!(convert_rule("*"), ConvertedRule::Unsupported);
        assert_eq!(convert_rule("$third-party"), ConvertedRule::Unsupported);
    }

    #[test]
    fn converts_hosts_file_lines() {
        let rule = content("0.0.0.0 tracker.example");
        assert!(rule.trigger.url_filter.ends_with(r"tracker\.example[/:&?]?"));
        assert_eq!(convert_rule("127.0.0.1 localhost"), ConvertedRule::Unsupported);
    }

    #[test]
    fn converts_generic_and_scoped_element_hiding() {
        let generic = content("##.ad-banner");
        assert_eq!(generic.action.kind, ActionType::CssDisplayNone);
        assert_eq!(generic.action.selector.as_deref(), Some(".ad-banner"));
        assert_eq!(generic.trigger.url_filter, ".*");
        assert_eq!(generic.priority, RulePriority::CssHide);

        let scoped = content("example.org##.sidebar-ad");
        assert_eq!(scoped.trigger.if_domain, vec!["*example.org".to_string()]);
    }

    #[test]
    fn extended_css_goes_to_advanced() {
        let rule = advanced("example.org##div:has(> .sponsored)");
        assert_eq!(rule.kind, AdvancedKind::Css);
        assert_eq!(rule.content, "div:has(> .sponsored) { display: none !important; }");
        assert_eq!(rule.if_domain, vec!["example.org".to_string()]);

        let injected = advanced("example.org#$#body { overflow: auto !important; }");
        assert_eq!(injected.content, "body { overflow: auto !important; }");
    }

    #[test]
    fn scripts_and_scriptlets_go_to_advanced() {
        let script = advanced("example.org#%#window.adsLoaded = true;");
        assert_eq!(script.kind, AdvancedKind::Script);
        assert_eq!(script.content, "window.adsLoaded = true;");

        let scriptlet = advanced("~news.example#%#//scriptlet('abort-on-property-read', 'ads')");
        assert_eq!(scriptlet.kind, AdvancedKind::Scriptlet);
        assert_eq!(scriptlet.unless_domain, vec!["news.example".to_string()]);
    }

    #[test]
    fn cosmetic_exceptions_are_unsupported() {
        assert_eq!(convert_rule("example.org#@#.ad"), ConvertedRule::Unsupported);
        assert_eq!(convert_rule("example.org#@%#window.x = 1;"), ConvertedRule::Unsupported);
    }

    #[test]
    fn test_pattern_to_url_filter() {
        assert_eq!(pattern_to_url_filter("|https://ads.").as_deref(), Some(r"^https:\/\/ads\."));
        assert_eq!(pattern_to_url_filter("/banner/*.gif|").as_deref(), Some(r"\/banner\/.*\.gif$"));
        assert_eq!(pattern_to_url_filter("/ad[0-9]+\\.js/").as_deref(), Some("ad[0-9]+\\.js"));
        assert_eq!(pattern_to_url_filter("/(ads|track)/"), None);
        assert_eq!(pattern_to_url_filter("||пример.рф^"), None);
    }

    #[test]
    fn regex_rules_keep_dollar_inside_pattern() {
        let rule = content("/ads\\.js$/$script");
        assert_eq!(rule.trigger.url_filter, "ads\\.js$");
        assert_eq!(rule.trigger.resource_type, vec![ResourceType::Script]);
    }

    #[test]
    fn serializes_wire_format() {
        let rule = content("||ads.example^$script");
        let json = serde_json::to_string(&rule).expect("rule should serialize");
        assert!(json.starts_with(r#"{"trigger":{"url-filter":"#));
        assert!(json.contains(r#""resource-type":["script"]"#));
        assert!(json.ends_with(r#""action":{"type":"block"}}"#));
        assert!(!json.contains("priority"));
    }
}
