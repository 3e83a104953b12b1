//! Read-side filter and sort criteria for redirect rules.
//!
//! A [`RuleFilter`] is built fluently and handed to
//! [`RuleStore::find`](crate::store::RuleStore::find). Stores translate it to
//! SQL; [`RuleFilter::accepts`] and [`RuleFilter::sort`] give the same
//! semantics for in-process data.

use std::cmp::Ordering;

use serde::Deserialize;

use crate::redirect::{MatchStrategy, RedirectMethod, RedirectRule};
use crate::types::DbId;

/// Which rules to return by enabled status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    Enabled,
    Disabled,
    #[default]
    All,
}

/// Sortable attributes. `Structure` is ordering-tree position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Structure,
    OldUrl,
    NewUrl,
    Method,
    Count,
    DateLastUsed,
    DateCreated,
    DateUpdated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Filter criteria. Empty lists and `None` fields do not constrain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleFilter {
    pub ids: Vec<DbId>,
    pub site_id: Option<DbId>,
    pub old_url: Option<String>,
    pub new_url: Option<String>,
    pub methods: Vec<RedirectMethod>,
    pub match_strategy: Option<MatchStrategy>,
    pub status: StatusFilter,
    /// Case-insensitive substring over old URL, new URL, method, and strategy.
    pub search: Option<String>,
    pub sort: SortField,
    pub direction: SortDirection,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled rules of one site in precedence order, as the dispatcher
    /// consults them.
    pub fn for_dispatch(site_id: DbId) -> Self {
        Self::new().site(site_id).status(StatusFilter::Enabled)
    }

    pub fn id(mut self, id: DbId) -> Self {
        self.ids.push(id);
        self
    }

    pub fn ids(mut self, ids: &[DbId]) -> Self {
        self.ids.extend_from_slice(ids);
        self
    }

    pub fn site(mut self, site_id: DbId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn old_url(mut self, old_url: impl Into<String>) -> Self {
        self.old_url = Some(old_url.into());
        self
    }

    pub fn new_url(mut self, new_url: impl Into<String>) -> Self {
        self.new_url = Some(new_url.into());
        self
    }

    pub fn method(mut self, method: RedirectMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn methods(mut self, methods: &[RedirectMethod]) -> Self {
        self.methods.extend_from_slice(methods);
        self
    }

    pub fn match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.match_strategy = Some(strategy);
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn order_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = field;
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether a rule satisfies every criterion.
    pub fn accepts(&self, rule: &RedirectRule) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&rule.id) {
            return false;
        }
        if self.site_id.is_some_and(|s| s != rule.site_id) {
            return false;
        }
        if self.old_url.as_ref().is_some_and(|u| *u != rule.old_url) {
            return false;
        }
        if self
            .new_url
            .as_ref()
            .is_some_and(|u| Some(u.as_str()) != rule.new_url.as_deref())
        {
            return false;
        }
        if !self.methods.is_empty() && !self.methods.contains(&rule.method) {
            return false;
        }
        if self.match_strategy.is_some_and(|s| s != rule.match_strategy) {
            return false;
        }
        match self.status {
            StatusFilter::Enabled if !rule.enabled => return false,
            StatusFilter::Disabled if rule.enabled => return false,
            _ => {}
        }
        if let Some(needle) = self.search.as_deref() {
            let needle = needle.to_lowercase();
            let haystacks = [
                rule.old_url.to_lowercase(),
                rule.new_url.as_deref().unwrap_or_default().to_lowercase(),
                rule.method.code().to_string(),
                rule.match_strategy.as_str().to_lowercase(),
            ];
            if !haystacks.iter().any(|h| h.contains(&needle)) {
                return false;
            }
        }
        true
    }

    /// Sort in place. Structure order falls back to id (insertion order) for
    /// rules without a position; ties always break on id.
    pub fn sort(&self, rules: &mut [RedirectRule]) {
        rules.sort_by(|a, b| {
            let primary = match self.sort {
                SortField::Structure => cmp_position(a.position, b.position),
                SortField::OldUrl => a.old_url.cmp(&b.old_url),
                SortField::NewUrl => a.new_url.cmp(&b.new_url),
                SortField::Method => a.method.cmp(&b.method),
                SortField::Count => a.count.cmp(&b.count),
                SortField::DateLastUsed => a.date_last_used.cmp(&b.date_last_used),
                SortField::DateCreated => a.created_at.cmp(&b.created_at),
                SortField::DateUpdated => a.updated_at.cmp(&b.updated_at),
            };
            let primary = match self.direction {
                SortDirection::Asc => primary,
                SortDirection::Desc => primary.reverse(),
            };
            primary.then(a.id.cmp(&b.id))
        });
    }

    /// Apply `offset`/`limit` to an already sorted list.
    pub fn paginate(&self, rules: Vec<RedirectRule>) -> Vec<RedirectRule> {
        let offset = self.offset.unwrap_or(0).max(0) as usize;
        let iter = rules.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit.max(0) as usize).collect(),
            None => iter.collect(),
        }
    }
}

/// Positioned rules first, in position order; unpositioned ones after.
fn cmp_position(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
