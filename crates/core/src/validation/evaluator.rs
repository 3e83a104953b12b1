//! Evaluates a redirect record against every rule and collects violations.
//!
//! Every check runs on every call; violations accumulate so the caller sees
//! the complete set.

use super::rules::{
    FieldViolation, ValidationContext, RULE_ABSOLUTE_URL, RULE_EDITION, RULE_METHOD,
    RULE_PATTERN, RULE_REQUIRED, RULE_UNIQUE_URL,
};
use crate::matcher::compile_pattern;
use crate::quota::LITE_REDIRECT_LIMIT;
use crate::redirect::{is_absolute_url, RedirectMethod, RedirectRecord};
use crate::types::DbId;

/// Validate a normalized rule. `id` is `None` for a rule not yet persisted.
pub fn validate(
    id: Option<DbId>,
    rule: &RedirectRecord,
    ctx: &ValidationContext,
) -> Result<(), Vec<FieldViolation>> {
    let mut errors = Vec::new();

    errors.extend(validate_required(rule));
    errors.extend(validate_method(rule));
    errors.extend(validate_edition(rule, ctx));
    errors.extend(validate_unique_url(id, rule, ctx));
    errors.extend(validate_pattern(rule));
    if let Some(new_url) = rule.new_url.as_deref() {
        errors.extend(validate_absolute_url("new_url", new_url));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_required(rule: &RedirectRecord) -> Option<FieldViolation> {
    rule.old_url
        .trim()
        .is_empty()
        .then(|| FieldViolation::new("old_url", RULE_REQUIRED, "Old URL cannot be blank."))
}

/// A 404 rule is a marker for a missing page and may not be enabled.
pub fn validate_method(rule: &RedirectRecord) -> Option<FieldViolation> {
    (rule.enabled && rule.method == RedirectMethod::NotFound).then(|| {
        FieldViolation::new(
            "method",
            RULE_METHOD,
            "Cannot enable a 404 Redirect. Update Redirect method.",
        )
        .with_value(rule.method.code())
    })
}

fn validate_edition(rule: &RedirectRecord, ctx: &ValidationContext) -> Option<FieldViolation> {
    if !rule.method.is_redirect() || ctx.quota.can_create(ctx.other_non_404) {
        return None;
    }
    Some(
        FieldViolation::new(
            "method",
            RULE_EDITION,
            format!("Upgrade to PRO to manage more than {LITE_REDIRECT_LIMIT} redirect rules"),
        )
        .with_value(rule.method.code()),
    )
}

fn validate_unique_url(
    id: Option<DbId>,
    rule: &RedirectRecord,
    ctx: &ValidationContext,
) -> Option<FieldViolation> {
    match ctx.old_url_owner {
        Some(owner) if Some(owner) != id => Some(
            FieldViolation::new("old_url", RULE_UNIQUE_URL, "This url already exists.")
                .with_value(rule.old_url.clone()),
        ),
        _ => None,
    }
}

fn validate_pattern(rule: &RedirectRecord) -> Option<FieldViolation> {
    if !rule.match_strategy.is_pattern() || rule.old_url.trim().is_empty() {
        return None;
    }
    compile_pattern(&rule.old_url).err().map(|e| {
        FieldViolation::new(
            "old_url",
            RULE_PATTERN,
            format!("The old URL is not a valid regular expression: {e}"),
        )
        .with_value(rule.old_url.clone())
    })
}

/// Checks an absolute URL field: the host may not contain a capture-group
/// reference and the path must start with `/`. Relative values pass.
pub fn validate_absolute_url(field: &str, value: &str) -> Vec<FieldViolation> {
    if !is_absolute_url(value) {
        return Vec::new();
    }
    let (host, path) = split_absolute(value);
    let mut errors = Vec::new();

    if host.contains('$') {
        errors.push(
            FieldViolation::new(
                field,
                RULE_ABSOLUTE_URL,
                format!("The host name ({host}) of an absolute URL cannot contain capture groups."),
            )
            .with_value(value),
        );
    }
    if !path.starts_with('/') {
        errors.push(
            FieldViolation::new(
                field,
                RULE_ABSOLUTE_URL,
                format!("The host name ({host}) of an absolute URL must end with a slash."),
            )
            .with_value(value),
        );
    }
    errors
}

/// Split an `http(s)://` URL into its host and path. The path is empty when
/// the authority is followed directly by a query, fragment, or nothing.
fn split_absolute(url: &str) -> (&str, &str) {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let after = &rest[authority_end..];

    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = match host_port.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host_port,
    };

    let path_end = after.find(['?', '#']).unwrap_or(after.len());
    (host, &after[..path_end])
}
