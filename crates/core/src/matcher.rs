//! Request-path matching against a rule's old URL, pure logic.
//!
//! Exact rules compare slash-normalized paths literally. Regex rules compile
//! the old URL as a case-insensitive pattern anchored at both ends and
//! expose its capture groups; substituting them into the target URL is the
//! dispatcher's job. A pattern written without a leading slash is matched
//! against the path without one.

use regex::{Regex, RegexBuilder};

use crate::redirect::{normalize_path, MatchStrategy, RedirectRule};

/// Compile a regex-match old URL into an anchored, case-insensitive pattern.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
}

/// Whether `request_path` satisfies the rule under its match strategy.
///
/// A regex rule whose pattern does not compile never matches.
pub fn matches(rule: &RedirectRule, request_path: &str) -> bool {
    match rule.match_strategy {
        MatchStrategy::ExactMatch => normalize_path(&rule.old_url) == normalize_path(request_path),
        MatchStrategy::RegexMatch => compile_pattern(&rule.old_url)
            .map(|re| re.is_match(regex_subject(&rule.old_url, &normalize_path(request_path))))
            .unwrap_or(false),
    }
}

/// Capture groups of a match, index 0 being the whole path.
///
/// Returns `None` when the rule does not match. Exact rules yield just the
/// whole-path group.
pub fn captures(rule: &RedirectRule, request_path: &str) -> Option<Vec<Option<String>>> {
    let path = normalize_path(request_path);
    match rule.match_strategy {
        MatchStrategy::ExactMatch => {
            (normalize_path(&rule.old_url) == path).then(|| vec![Some(path)])
        }
        MatchStrategy::RegexMatch => {
            let re = compile_pattern(&rule.old_url).ok()?;
            let caps = re.captures(regex_subject(&rule.old_url, &path))?;
            Some(
                caps.iter()
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect(),
            )
        }
    }
}

/// The normalized path as a pattern expects to see it: with its leading
/// slash only when the pattern itself starts with one.
fn regex_subject<'a>(pattern: &str, path: &'a str) -> &'a str {
    if pattern.trim_start_matches('^').starts_with('/') {
        path
    } else {
        path.trim_start_matches('/')
    }
}
