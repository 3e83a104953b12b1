//! Redirect rule entity, enums, DTOs, and URL normalization.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Site;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// HTTP redirect semantics of a rule. Discriminants are the status codes
/// stored in the `redirects.method` column.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum RedirectMethod {
    Permanent = 301,
    Temporary = 302,
    NotFound = 404,
}

impl RedirectMethod {
    pub const ALL: [RedirectMethod; 3] = [
        RedirectMethod::Permanent,
        RedirectMethod::Temporary,
        RedirectMethod::NotFound,
    ];

    /// Status code stored in the database.
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            301 => Some(RedirectMethod::Permanent),
            302 => Some(RedirectMethod::Temporary),
            404 => Some(RedirectMethod::NotFound),
            _ => None,
        }
    }

    /// Human-readable label used by admin listings.
    pub fn label(self) -> &'static str {
        match self {
            RedirectMethod::Permanent => "301 Permanent",
            RedirectMethod::Temporary => "302 Temporary",
            RedirectMethod::NotFound => "404 Not Found",
        }
    }

    /// Whether the rule counts against the edition quota.
    pub fn is_redirect(self) -> bool {
        self != RedirectMethod::NotFound
    }
}

impl From<RedirectMethod> for i16 {
    fn from(value: RedirectMethod) -> Self {
        value.code()
    }
}

impl TryFrom<i16> for RedirectMethod {
    type Error = String;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        RedirectMethod::from_code(code).ok_or_else(|| format!("Unknown redirect method: {code}"))
    }
}

impl fmt::Display for RedirectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Match strategy
// ---------------------------------------------------------------------------

/// How a rule's old URL is compared against a request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStrategy {
    #[default]
    #[serde(rename = "exactMatch")]
    ExactMatch,
    #[serde(rename = "regExMatch")]
    RegexMatch,
}

impl MatchStrategy {
    /// Value stored in the `redirects.match_strategy` column.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::ExactMatch => "exactMatch",
            MatchStrategy::RegexMatch => "regExMatch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exactMatch" => Some(MatchStrategy::ExactMatch),
            "regExMatch" => Some(MatchStrategy::RegexMatch),
            _ => None,
        }
    }

    pub fn is_pattern(self) -> bool {
        self == MatchStrategy::RegexMatch
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A persisted redirect rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub id: DbId,
    pub site_id: DbId,
    pub old_url: String,
    pub new_url: Option<String>,
    pub method: RedirectMethod,
    pub match_strategy: MatchStrategy,
    pub enabled: bool,
    pub count: i64,
    pub last_remote_ip_address: Option<String>,
    pub last_referrer: Option<String>,
    pub last_user_agent: Option<String>,
    pub date_last_used: Option<Timestamp>,
    /// Position within the site's ordering tree; `None` if the rule was read
    /// without structure information.
    pub position: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RedirectRule {
    /// Target URL resolved against the site base URL. Absolute targets are
    /// returned unchanged; a missing target resolves to the site root.
    pub fn absolute_new_url(&self, site: &Site) -> String {
        match self.new_url.as_deref() {
            Some(url) if is_absolute_url(url) => url.to_string(),
            Some(url) => join_base(&site.base_url, url),
            None => join_base(&site.base_url, ""),
        }
    }

    /// Link an administrator can follow to try the rule. Patterns have no
    /// single concrete URL, so regex rules get no link.
    pub fn test_link(&self, site: &Site) -> Option<String> {
        if self.match_strategy.is_pattern() {
            return None;
        }
        Some(join_base(&site.base_url, &self.old_url))
    }

    /// Whether this combination of status and method is allowed to persist.
    pub fn has_valid_status(&self) -> bool {
        !(self.enabled && self.method == RedirectMethod::NotFound)
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.old_url.is_empty() {
            write!(f, "#{}", self.id)
        } else {
            f.write_str(&self.old_url)
        }
    }
}

fn join_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/{}", path.trim_start_matches('/'))
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Draft for creating a new redirect rule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewRedirect {
    /// Site the rule belongs to; the current site when `None`.
    pub site_id: Option<DbId>,
    pub old_url: String,
    pub new_url: Option<String>,
    pub method: RedirectMethod,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewRedirect {
    pub fn new(old_url: impl Into<String>, new_url: Option<&str>, method: RedirectMethod) -> Self {
        Self {
            site_id: None,
            old_url: old_url.into(),
            new_url: new_url.map(str::to_string),
            method,
            match_strategy: MatchStrategy::ExactMatch,
            enabled: method.is_redirect(),
        }
    }
}

/// Changes applied by an admin update. All fields optional.
///
/// `new_url: Some("")` (or `Some("/")`) resets the target to the site root.
/// Telemetry fields are carried through unchanged unless set here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRedirect {
    pub old_url: Option<String>,
    pub new_url: Option<String>,
    pub method: Option<RedirectMethod>,
    pub match_strategy: Option<MatchStrategy>,
    pub enabled: Option<bool>,
    pub count: Option<i64>,
    pub last_remote_ip_address: Option<String>,
    pub last_referrer: Option<String>,
    pub last_user_agent: Option<String>,
    pub date_last_used: Option<Timestamp>,
}

/// Request details recorded by the dispatcher when a rule matches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HitDetails {
    pub remote_ip: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

/// Row values handed to a store for insertion, already normalized and
/// validated. The store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectRecord {
    pub site_id: DbId,
    pub old_url: String,
    pub new_url: Option<String>,
    pub method: RedirectMethod,
    pub match_strategy: MatchStrategy,
    pub enabled: bool,
    pub count: i64,
    pub last_remote_ip_address: Option<String>,
    pub last_referrer: Option<String>,
    pub last_user_agent: Option<String>,
    pub date_last_used: Option<Timestamp>,
}

impl From<&RedirectRule> for RedirectRecord {
    fn from(rule: &RedirectRule) -> Self {
        Self {
            site_id: rule.site_id,
            old_url: rule.old_url.clone(),
            new_url: rule.new_url.clone(),
            method: rule.method,
            match_strategy: rule.match_strategy,
            enabled: rule.enabled,
            count: rule.count,
            last_remote_ip_address: rule.last_remote_ip_address.clone(),
            last_referrer: rule.last_referrer.clone(),
            last_user_agent: rule.last_user_agent.clone(),
            date_last_used: rule.date_last_used,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Whether `url` carries an `http://` or `https://` scheme.
pub fn is_absolute_url(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Collapse any run of leading slashes into exactly one. Absolute URLs are
/// returned trimmed but otherwise untouched. Idempotent.
pub fn normalize_path(url: &str) -> String {
    let trimmed = url.trim();
    if is_absolute_url(trimmed) {
        return trimmed.to_string();
    }
    format!("/{}", trimmed.trim_start_matches('/'))
}

/// Normalize an old URL. Patterns are only trimmed, since a leading slash
/// may be part of the expression.
pub fn normalize_old_url(url: &str, strategy: MatchStrategy) -> String {
    if strategy.is_pattern() {
        url.trim().to_string()
    } else if url.trim().is_empty() {
        String::new()
    } else {
        normalize_path(url)
    }
}

/// Normalize a target URL. Blank values and a bare `/` both mean the site
/// root and are stored as `None`.
pub fn normalize_new_url(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    if url.is_empty() {
        return None;
    }
    let normalized = normalize_path(url);
    if normalized == "/" {
        None
    } else {
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn site() -> Site {
        Site {
            id: 1,
            handle: "default".to_string(),
            base_url: "https://example.com/".to_string(),
        }
    }

    fn rule(old_url: &str, new_url: Option<&str>, strategy: MatchStrategy) -> RedirectRule {
        let now = Utc::now();
        RedirectRule {
            id: 7,
            site_id: 1,
            old_url: old_url.to_string(),
            new_url: new_url.map(str::to_string),
            method: RedirectMethod::Permanent,
            match_strategy: strategy,
            enabled: true,
            count: 0,
            last_remote_ip_address: None,
            last_referrer: None,
            last_user_agent: None,
            date_last_used: None,
            position: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn method_codes_round_trip() {
        for method in RedirectMethod::ALL {
            assert_eq!(RedirectMethod::from_code(method.code()), Some(method));
        }
        assert_eq!(RedirectMethod::from_code(200), None);
        assert!(RedirectMethod::try_from(307).is_err());
    }

    #[test]
    fn only_not_found_is_not_a_redirect() {
        assert!(RedirectMethod::Permanent.is_redirect());
        assert!(RedirectMethod::Temporary.is_redirect());
        assert!(!RedirectMethod::NotFound.is_redirect());
    }

    #[test]
    fn match_strategy_storage_values() {
        assert_eq!(MatchStrategy::default(), MatchStrategy::ExactMatch);
        assert_eq!(MatchStrategy::parse("regExMatch"), Some(MatchStrategy::RegexMatch));
        assert_eq!(MatchStrategy::parse("glob"), None);
        assert_eq!(MatchStrategy::RegexMatch.as_str(), "regExMatch");
    }

    #[test]
    fn normalize_collapses_leading_slashes() {
        assert_eq!(normalize_path("//foo/"), "/foo/");
        assert_eq!(normalize_path("foo"), "/foo");
        assert_eq!(normalize_path("  /foo "), "/foo");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_path("//foo/");
        assert_eq!(normalize_path(&once), once);
        let once = normalize_old_url("///a/b", MatchStrategy::ExactMatch);
        assert_eq!(normalize_old_url(&once, MatchStrategy::ExactMatch), once);
    }

    #[test]
    fn normalize_leaves_absolute_urls() {
        assert_eq!(
            normalize_path("https://example.com/a"),
            "https://example.com/a"
        );
        assert!(is_absolute_url("HTTP://Example.com"));
        assert!(!is_absolute_url("//example.com"));
    }

    #[test]
    fn pattern_old_url_skips_slash_normalization() {
        assert_eq!(
            normalize_old_url(" old/(.*) ", MatchStrategy::RegexMatch),
            "old/(.*)"
        );
        assert_eq!(normalize_old_url("old", MatchStrategy::ExactMatch), "/old");
        assert_eq!(normalize_old_url("   ", MatchStrategy::ExactMatch), "");
    }

    #[test]
    fn new_url_root_becomes_none() {
        assert_eq!(normalize_new_url(None), None);
        assert_eq!(normalize_new_url(Some("")), None);
        assert_eq!(normalize_new_url(Some("/")), None);
        assert_eq!(normalize_new_url(Some("//")), None);
        assert_eq!(normalize_new_url(Some("new")), Some("/new".to_string()));
    }

    #[test]
    fn absolute_new_url_joins_site_base() {
        let site = site();
        assert_eq!(
            rule("/old", Some("/new"), MatchStrategy::ExactMatch).absolute_new_url(&site),
            "https://example.com/new"
        );
        assert_eq!(
            rule("/old", None, MatchStrategy::ExactMatch).absolute_new_url(&site),
            "https://example.com/"
        );
        assert_eq!(
            rule("/old", Some("http://other.com/x"), MatchStrategy::ExactMatch)
                .absolute_new_url(&site),
            "http://other.com/x"
        );
    }

    #[test]
    fn test_link_only_for_exact_rules() {
        let site = site();
        assert_eq!(
            rule("/old", None, MatchStrategy::ExactMatch).test_link(&site),
            Some("https://example.com/old".to_string())
        );
        assert_eq!(rule("old/(.*)", None, MatchStrategy::RegexMatch).test_link(&site), None);
    }

    #[test]
    fn display_falls_back_to_id() {
        assert_eq!(rule("/old", None, MatchStrategy::ExactMatch).to_string(), "/old");
        assert_eq!(rule("", None, MatchStrategy::ExactMatch).to_string(), "#7");
    }

    #[test]
    fn enabled_not_found_is_invalid_status() {
        let mut r = rule("/old", None, MatchStrategy::ExactMatch);
        assert!(r.has_valid_status());
        r.method = RedirectMethod::NotFound;
        assert!(!r.has_valid_status());
        r.enabled = false;
        assert!(r.has_valid_status());
    }
}
