//! Admin listing sources and the bulk actions each one enables.
//!
//! Data-driven: callers look a source key up and receive its filter and
//! action set, rather than asking each action whether it applies.

use serde::Serialize;

use crate::query::RuleFilter;
use crate::redirect::RedirectMethod;

/// Key of the default source listing every real redirect.
pub const SOURCE_ALL: &str = "*";

/// Bulk operations offered in the admin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    SetStatus,
    Edit,
    ChangePermanentMethod,
    ChangeTemporaryMethod,
    HardDelete,
    ExcludeUrl,
}

impl BulkAction {
    pub fn label(self) -> &'static str {
        match self {
            BulkAction::SetStatus => "Set Status",
            BulkAction::Edit => "Edit Redirect",
            BulkAction::ChangePermanentMethod => "Update Method to 301",
            BulkAction::ChangeTemporaryMethod => "Update Method to 302",
            BulkAction::HardDelete => "Delete",
            BulkAction::ExcludeUrl => "Add to Excluded URLs",
        }
    }

    /// Method a method-change action moves rules to.
    pub fn target_method(self) -> Option<RedirectMethod> {
        match self {
            BulkAction::ChangePermanentMethod => Some(RedirectMethod::Permanent),
            BulkAction::ChangeTemporaryMethod => Some(RedirectMethod::Temporary),
            _ => None,
        }
    }
}

const COMMON_ACTIONS: &[BulkAction] = &[
    BulkAction::SetStatus,
    BulkAction::Edit,
    BulkAction::ChangePermanentMethod,
    BulkAction::ChangeTemporaryMethod,
    BulkAction::HardDelete,
];

const NOT_FOUND_ACTIONS: &[BulkAction] = &[
    BulkAction::SetStatus,
    BulkAction::Edit,
    BulkAction::ChangePermanentMethod,
    BulkAction::ChangeTemporaryMethod,
    BulkAction::HardDelete,
    BulkAction::ExcludeUrl,
];

/// One entry of the admin source list.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub key: String,
    pub label: String,
    pub methods: Vec<RedirectMethod>,
    #[serde(skip)]
    pub actions: &'static [BulkAction],
}

impl Source {
    /// Filter selecting this source's rules on a site, in structure order.
    pub fn filter(&self, site_id: i64) -> RuleFilter {
        RuleFilter::new().site(site_id).methods(&self.methods)
    }

    pub fn allows(&self, action: BulkAction) -> bool {
        self.actions.contains(&action)
    }
}

fn method_source_key(method: RedirectMethod) -> String {
    format!("method:{}", method.code())
}

/// All sources: every real redirect first, then one per method.
pub fn sources() -> Vec<Source> {
    let mut sources = vec![Source {
        key: SOURCE_ALL.to_string(),
        label: "All redirects".to_string(),
        methods: vec![RedirectMethod::Permanent, RedirectMethod::Temporary],
        actions: COMMON_ACTIONS,
    }];
    sources.extend(RedirectMethod::ALL.into_iter().map(|method| Source {
        key: method_source_key(method),
        label: method.label().to_string(),
        methods: vec![method],
        actions: if method == RedirectMethod::NotFound {
            NOT_FOUND_ACTIONS
        } else {
            COMMON_ACTIONS
        },
    }));
    sources
}

pub fn find_source(key: &str) -> Option<Source> {
    sources().into_iter().find(|s| s.key == key)
}

/// Actions enabled for a source key; unknown keys get the common set.
pub fn actions_for(key: &str) -> &'static [BulkAction] {
    find_source(key).map_or(COMMON_ACTIONS, |s| s.actions)
}
