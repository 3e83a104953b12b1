//! Validation violation and context types.

use serde::{Deserialize, Serialize};

use crate::quota::QuotaPolicy;
use crate::types::DbId;

pub const RULE_REQUIRED: &str = "required";
pub const RULE_METHOD: &str = "method";
pub const RULE_EDITION: &str = "edition";
pub const RULE_UNIQUE_URL: &str = "unique_url";
pub const RULE_PATTERN: &str = "pattern";
pub const RULE_ABSOLUTE_URL: &str = "absolute_url";

/// A single field-level rule violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub rule_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl FieldViolation {
    pub fn new(field: &str, rule_type: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule_type: rule_type.to_string(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Store-derived facts a rule is validated against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub quota: QuotaPolicy,
    /// Non-404 rules in the table, not counting the rule being validated.
    pub other_non_404: i64,
    /// Id of the rule currently holding the same `(site_id, old_url)`.
    pub old_url_owner: Option<DbId>,
}
