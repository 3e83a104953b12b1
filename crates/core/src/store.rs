//! Persistence boundary.
//!
//! [`RuleStore`] is the read side plus a transaction factory. Every write
//! happens on a transaction that implements both [`RuleTransaction`] (row
//! CRUD and settings) and [`OrderingTree`] (per-site precedence), so a rule
//! row and its structure node always commit or roll back together.
//! Dropping a transaction without committing rolls it back.

use std::future::Future;

use crate::error::StoreError;
use crate::query::RuleFilter;
use crate::redirect::{RedirectMethod, RedirectRecord, RedirectRule};
use crate::settings::RedirectSettings;
use crate::types::DbId;

/// Read access and transaction factory.
pub trait RuleStore: Send + Sync {
    type Tx: RuleTransaction + OrderingTree;

    /// Open a write transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Rules matching `filter`, in the filter's sort order.
    fn find(
        &self,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<Vec<RedirectRule>, StoreError>> + Send;

    /// Number of rules matching `filter`, ignoring pagination.
    fn count(&self, filter: &RuleFilter) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Currently persisted settings.
    fn load_settings(&self) -> impl Future<Output = Result<RedirectSettings, StoreError>> + Send;

    /// First rule matching `filter`.
    fn one(
        &self,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<Option<RedirectRule>, StoreError>> + Send {
        let filter = filter.clone().limit(1);
        async move { Ok(self.find(&filter).await?.into_iter().next()) }
    }
}

/// Row-level operations inside one transaction.
pub trait RuleTransaction: Send {
    fn find_by_id(
        &mut self,
        id: DbId,
    ) -> impl Future<Output = Result<Option<RedirectRule>, StoreError>> + Send;

    /// Rules among `ids` that exist, in id order.
    fn find_by_ids(
        &mut self,
        ids: &[DbId],
    ) -> impl Future<Output = Result<Vec<RedirectRule>, StoreError>> + Send;

    /// Id of the rule holding `old_url` on `site_id`, if any.
    fn find_owner(
        &mut self,
        site_id: DbId,
        old_url: &str,
    ) -> impl Future<Output = Result<Option<DbId>, StoreError>> + Send;

    /// Non-404 rules across all sites.
    fn count_non_404(&mut self) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn insert(
        &mut self,
        record: &RedirectRecord,
    ) -> impl Future<Output = Result<RedirectRule, StoreError>> + Send;

    /// Overwrite every mutable column of an existing rule. `site_id` is not
    /// changed.
    fn update(
        &mut self,
        id: DbId,
        record: &RedirectRecord,
    ) -> impl Future<Output = Result<RedirectRule, StoreError>> + Send;

    fn set_method(
        &mut self,
        id: DbId,
        method: RedirectMethod,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_enabled(
        &mut self,
        id: DbId,
        enabled: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Hard-delete a rule. Returns `false` if it did not exist.
    fn delete(&mut self, id: DbId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn load_settings(&mut self) -> impl Future<Output = Result<RedirectSettings, StoreError>> + Send;

    fn save_settings(
        &mut self,
        settings: &RedirectSettings,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Per-site precedence of rules.
///
/// New rules always go to the tail. Removing a node leaves the relative
/// order of its siblings unchanged.
pub trait OrderingTree: Send {
    /// Place `rule_id` last in `site_id`'s sequence, returning its position.
    fn append_to_root(
        &mut self,
        site_id: DbId,
        rule_id: DbId,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn remove(&mut self, rule_id: DbId) -> impl Future<Output = Result<(), StoreError>> + Send;
}
