//! Redirect rule orchestration: validation, quota, persistence.
//!
//! Every mutation runs in one store transaction. Errors roll the whole
//! transaction back before they reach the caller; the only partial outcome
//! is per-row rejection inside the bulk method and status changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{Site, SiteDirectory};
use crate::error::CoreError;
use crate::query::RuleFilter;
use crate::quota::{Capacity, QuotaPolicy, LITE_REDIRECT_LIMIT};
use crate::redirect::{
    normalize_new_url, normalize_old_url, HitDetails, NewRedirect, RedirectMethod,
    RedirectRecord, RedirectRule, UpdateRedirect,
};
use crate::settings::RedirectSettings;
use crate::store::{OrderingTree, RuleStore, RuleTransaction};
use crate::types::{DbId, Timestamp};
use crate::validation::evaluator::validate_method;
use crate::validation::{validate, FieldViolation, ValidationContext};

const ENTITY: &str = "redirect";

// ---------------------------------------------------------------------------
// Bulk outcomes
// ---------------------------------------------------------------------------

/// Why a single row of a bulk operation was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "errors", rename_all = "snake_case")]
pub enum BulkFailureReason {
    NotFound,
    Invalid(Vec<FieldViolation>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub id: DbId,
    pub reason: BulkFailureReason,
}

/// Result of a bulk method or status change that committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkOutcome {
    pub updated: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    /// Summary line for the admin listing.
    pub fn message(&self) -> String {
        if self.failures.is_empty() {
            "Redirects updated.".to_string()
        } else {
            format!(
                "{} redirects updated, {} could not be updated.",
                self.updated,
                self.failures.len()
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Entry point for every admin and dispatcher call into the rule table.
pub struct RuleService<S: RuleStore> {
    store: S,
    quota: QuotaPolicy,
    sites: Arc<dyn SiteDirectory>,
    settings: RwLock<RedirectSettings>,
}

impl<S: RuleStore> RuleService<S> {
    pub fn new(
        store: S,
        quota: QuotaPolicy,
        sites: Arc<dyn SiteDirectory>,
        settings: RedirectSettings,
    ) -> Self {
        Self {
            store,
            quota,
            sites,
            settings: RwLock::new(settings),
        }
    }

    /// Build a service with settings read from the store.
    pub async fn load(
        store: S,
        quota: QuotaPolicy,
        sites: Arc<dyn SiteDirectory>,
    ) -> Result<Self, CoreError> {
        let settings = store.load_settings().await?;
        Ok(Self::new(store, quota, sites, settings))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn quota(&self) -> QuotaPolicy {
        self.quota
    }

    pub async fn settings(&self) -> RedirectSettings {
        self.settings.read().await.clone()
    }

    /// Replace the cached settings with the persisted ones.
    pub async fn reload_settings(&self) -> Result<RedirectSettings, CoreError> {
        let fresh = self.store.load_settings().await?;
        *self.settings.write().await = fresh.clone();
        Ok(fresh)
    }

    pub async fn save_settings(&self, settings: RedirectSettings) -> Result<(), CoreError> {
        let mut tx = self.store.begin().await?;
        let result = tx.save_settings(&settings).await.map_err(CoreError::from);
        finish(tx, result).await?;
        *self.settings.write().await = settings;
        tracing::info!("Redirect settings saved");
        Ok(())
    }

    /// The given site, or the current site when `site_id` is `None`.
    pub fn resolve_site(&self, site_id: Option<DbId>) -> Result<Site, CoreError> {
        match site_id {
            Some(id) => self
                .sites
                .site(id)
                .ok_or_else(|| CoreError::Configuration(format!("Unknown site id {id}"))),
            None => self
                .sites
                .current_site()
                .ok_or_else(|| CoreError::Configuration("No current site".into())),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn find(&self, filter: &RuleFilter) -> Result<Vec<RedirectRule>, CoreError> {
        Ok(self.store.find(filter).await?)
    }

    pub async fn one(&self, filter: &RuleFilter) -> Result<Option<RedirectRule>, CoreError> {
        Ok(self.store.one(filter).await?)
    }

    pub async fn get(&self, id: DbId) -> Result<RedirectRule, CoreError> {
        self.store
            .one(&RuleFilter::new().id(id))
            .await?
            .ok_or(CoreError::NotFound { entity: ENTITY, id })
    }

    /// Enabled rules of a site in precedence order; the dispatcher takes the
    /// first that matches.
    pub async fn rules_for_dispatch(&self, site_id: DbId) -> Result<Vec<RedirectRule>, CoreError> {
        self.find(&RuleFilter::for_dispatch(site_id)).await
    }

    pub async fn remaining_capacity(&self) -> Result<Capacity, CoreError> {
        let existing = self
            .store
            .count(&RuleFilter::new().methods(&[RedirectMethod::Permanent, RedirectMethod::Temporary]))
            .await?;
        Ok(self.quota.remaining_capacity(existing))
    }

    // -----------------------------------------------------------------------
    // Single-rule mutations
    // -----------------------------------------------------------------------

    /// Validate and persist a new rule at the tail of its site's ordering.
    pub async fn create(&self, draft: NewRedirect) -> Result<RedirectRule, CoreError> {
        let site = self.resolve_site(draft.site_id)?;
        let record = RedirectRecord {
            site_id: site.id,
            old_url: normalize_old_url(&draft.old_url, draft.match_strategy),
            new_url: normalize_new_url(draft.new_url.as_deref()),
            method: draft.method,
            match_strategy: draft.match_strategy,
            enabled: draft.enabled,
            count: 0,
            last_remote_ip_address: None,
            last_referrer: None,
            last_user_agent: None,
            date_last_used: None,
        };

        let mut tx = self.store.begin().await?;
        let result = self.create_in(&mut tx, record).await;
        let rule = finish(tx, result).await?;

        tracing::info!(
            rule_id = rule.id,
            site_id = rule.site_id,
            method = rule.method.code(),
            "Redirect created",
        );
        Ok(rule)
    }

    async fn create_in(
        &self,
        tx: &mut S::Tx,
        record: RedirectRecord,
    ) -> Result<RedirectRule, CoreError> {
        let ctx = ValidationContext {
            quota: self.quota,
            other_non_404: tx.count_non_404().await?,
            old_url_owner: self.owner_of(tx, record.site_id, &record.old_url).await?,
        };
        check(validate(None, &record, &ctx))?;

        let mut rule = tx.insert(&record).await?;
        rule.position = Some(tx.append_to_root(rule.site_id, rule.id).await?);
        Ok(rule)
    }

    /// Re-validate and persist changes to an existing rule. `id` and
    /// `site_id` never change; telemetry is carried through unless set.
    pub async fn update(&self, id: DbId, changes: UpdateRedirect) -> Result<RedirectRule, CoreError> {
        let track_ip = self.settings.read().await.track_remote_ip;
        let mut tx = self.store.begin().await?;
        let result = self.update_in(&mut tx, id, changes, track_ip).await;
        let rule = finish(tx, result).await?;

        tracing::info!(rule_id = rule.id, site_id = rule.site_id, "Redirect updated");
        Ok(rule)
    }

    async fn update_in(
        &self,
        tx: &mut S::Tx,
        id: DbId,
        changes: UpdateRedirect,
        track_ip: bool,
    ) -> Result<RedirectRule, CoreError> {
        let existing = tx
            .find_by_id(id)
            .await?
            .ok_or(CoreError::NotFound { entity: ENTITY, id })?;

        let strategy = changes.match_strategy.unwrap_or(existing.match_strategy);
        let old_url = changes.old_url.as_deref().unwrap_or(&existing.old_url);
        let new_url = match changes.new_url.as_deref() {
            Some(url) => normalize_new_url(Some(url)),
            None => existing.new_url.clone(),
        };

        let mut record = RedirectRecord {
            site_id: existing.site_id,
            old_url: normalize_old_url(old_url, strategy),
            new_url,
            method: changes.method.unwrap_or(existing.method),
            match_strategy: strategy,
            enabled: changes.enabled.unwrap_or(existing.enabled),
            count: changes.count.unwrap_or(existing.count),
            last_remote_ip_address: changes
                .last_remote_ip_address
                .or(existing.last_remote_ip_address.clone()),
            last_referrer: changes.last_referrer.or(existing.last_referrer.clone()),
            last_user_agent: changes.last_user_agent.or(existing.last_user_agent.clone()),
            date_last_used: changes.date_last_used.or(existing.date_last_used),
        };
        if !track_ip {
            record.last_remote_ip_address = None;
        }

        let total = tx.count_non_404().await?;
        let ctx = ValidationContext {
            quota: self.quota,
            other_non_404: total - i64::from(existing.method.is_redirect()),
            old_url_owner: self.owner_of(tx, record.site_id, &record.old_url).await?,
        };
        check(validate(Some(id), &record, &ctx))?;

        let mut rule = tx.update(id, &record).await?;
        rule.position = existing.position;
        Ok(rule)
    }

    /// Count a dispatcher hit. No validation runs; only telemetry changes.
    pub async fn record_hit(
        &self,
        id: DbId,
        hit: HitDetails,
        at: Timestamp,
    ) -> Result<RedirectRule, CoreError> {
        let track_ip = self.settings.read().await.track_remote_ip;
        let mut tx = self.store.begin().await?;
        let result: Result<_, CoreError> = async {
            let existing = tx
                .find_by_id(id)
                .await?
                .ok_or(CoreError::NotFound { entity: ENTITY, id })?;
            let mut record = RedirectRecord::from(&existing);
            record.count += 1;
            record.date_last_used = Some(at);
            record.last_referrer = hit.referrer;
            record.last_user_agent = hit.user_agent;
            record.last_remote_ip_address = if track_ip { hit.remote_ip } else { None };
            let mut rule = tx.update(id, &record).await?;
            rule.position = existing.position;
            Ok(rule)
        }
        .await;
        let rule = finish(tx, result).await?;
        tracing::debug!(rule_id = rule.id, count = rule.count, "Redirect hit recorded");
        Ok(rule)
    }

    // -----------------------------------------------------------------------
    // Bulk mutations
    // -----------------------------------------------------------------------

    /// Move the selected rules to `method`, leaving `enabled` untouched.
    ///
    /// The quota is checked once, against the non-404 count the batch would
    /// leave behind, before any row changes; exceeding it aborts the whole
    /// batch. Rows that fail their own validation are skipped and reported
    /// while the rest commit.
    pub async fn bulk_change_method(
        &self,
        ids: &[DbId],
        method: RedirectMethod,
    ) -> Result<BulkOutcome, CoreError> {
        let mut tx = self.store.begin().await?;
        let result = self.change_method_in(&mut tx, &dedup(ids), method).await;
        let outcome = finish(tx, result).await?;

        tracing::info!(
            method = method.code(),
            updated = outcome.updated,
            skipped = outcome.failures.len(),
            "Bulk method change committed",
        );
        Ok(outcome)
    }

    async fn change_method_in(
        &self,
        tx: &mut S::Tx,
        ids: &[DbId],
        method: RedirectMethod,
    ) -> Result<BulkOutcome, CoreError> {
        let rules = tx.find_by_ids(ids).await?;
        let mut outcome = BulkOutcome {
            updated: 0,
            failures: missing(ids, &rules),
        };

        let mut eligible = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut record = RedirectRecord::from(&rule);
            record.method = method;
            match validate_method(&record) {
                Some(violation) => outcome.failures.push(BulkFailure {
                    id: rule.id,
                    reason: BulkFailureReason::Invalid(vec![violation]),
                }),
                None => eligible.push(rule),
            }
        }

        if method.is_redirect() {
            let current = tx.count_non_404().await?;
            let gained = eligible.iter().filter(|r| !r.method.is_redirect()).count() as i64;
            let projected = current + gained;
            if gained > 0 && !self.quota.admits(projected) {
                tracing::warn!(projected, "Bulk method change rejected by quota");
                return Err(CoreError::QuotaExceeded {
                    limit: LITE_REDIRECT_LIMIT,
                    projected,
                });
            }
        }

        for rule in &eligible {
            tx.set_method(rule.id, method).await?;
            outcome.updated += 1;
        }
        outcome.failures.sort_by_key(|f| f.id);
        Ok(outcome)
    }

    /// Enable or disable the selected rules. Enabling a 404 rule is rejected
    /// per row.
    pub async fn bulk_set_status(&self, ids: &[DbId], enabled: bool) -> Result<BulkOutcome, CoreError> {
        let ids = dedup(ids);
        let mut tx = self.store.begin().await?;
        let result: Result<_, CoreError> = async {
            let rules = tx.find_by_ids(&ids).await?;
            let mut outcome = BulkOutcome {
                updated: 0,
                failures: missing(&ids, &rules),
            };
            for rule in rules {
                let mut record = RedirectRecord::from(&rule);
                record.enabled = enabled;
                if let Some(violation) = validate_method(&record) {
                    outcome.failures.push(BulkFailure {
                        id: rule.id,
                        reason: BulkFailureReason::Invalid(vec![violation]),
                    });
                    continue;
                }
                tx.set_enabled(rule.id, enabled).await?;
                outcome.updated += 1;
            }
            outcome.failures.sort_by_key(|f| f.id);
            Ok(outcome)
        }
        .await;
        let outcome = finish(tx, result).await?;

        tracing::info!(enabled, updated = outcome.updated, "Bulk status change committed");
        Ok(outcome)
    }

    /// Hard-delete the selected rules and their ordering nodes. Returns the
    /// number deleted; unknown ids are ignored.
    pub async fn delete(&self, ids: &[DbId]) -> Result<usize, CoreError> {
        let ids = dedup(ids);
        let mut tx = self.store.begin().await?;
        let result: Result<usize, CoreError> = async {
            let mut deleted = 0;
            for &id in &ids {
                tx.remove(id).await?;
                if tx.delete(id).await? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        }
        .await;
        let deleted = finish(tx, result).await?;

        tracing::info!(deleted, "Redirects deleted");
        Ok(deleted)
    }

    /// Append each selected rule's old URL to the excluded URL patterns and
    /// delete the rule. All deletes and the settings save commit together
    /// or not at all.
    pub async fn exclude_and_delete(&self, ids: &[DbId]) -> Result<(), CoreError> {
        let ids = dedup(ids);
        let mut tx = self.store.begin().await?;
        let result: Result<_, CoreError> = async {
            let rules = tx.find_by_ids(&ids).await?;
            let mut settings = tx.load_settings().await?;
            for rule in &rules {
                settings.append_excluded_url(&rule.old_url);
                tx.remove(rule.id).await?;
                tx.delete(rule.id).await?;
            }
            tx.save_settings(&settings).await?;
            Ok((settings, rules.len()))
        }
        .await;

        match finish(tx, result).await {
            Ok((settings, excluded)) => {
                *self.settings.write().await = settings;
                tracing::info!(excluded, "Added to Excluded URL Patterns setting");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Unable to exclude redirects");
                Err(e)
            }
        }
    }

    async fn owner_of(
        &self,
        tx: &mut S::Tx,
        site_id: DbId,
        old_url: &str,
    ) -> Result<Option<DbId>, CoreError> {
        if old_url.is_empty() {
            return Ok(None);
        }
        Ok(tx.find_owner(site_id, old_url).await?)
    }
}

/// Commit on success, roll back on failure. A failed rollback is logged and
/// the original error returned.
async fn finish<T, X>(tx: X, result: Result<T, CoreError>) -> Result<T, CoreError>
where
    X: RuleTransaction,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

fn check(result: Result<(), Vec<FieldViolation>>) -> Result<(), CoreError> {
    result.map_err(|violations| {
        tracing::warn!(violations = violations.len(), "Redirect failed validation");
        CoreError::Validation(violations)
    })
}

fn dedup(ids: &[DbId]) -> Vec<DbId> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

fn missing(ids: &[DbId], found: &[RedirectRule]) -> Vec<BulkFailure> {
    ids.iter()
        .filter(|id| !found.iter().any(|r| r.id == **id))
        .map(|&id| BulkFailure {
            id,
            reason: BulkFailureReason::NotFound,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::memory::MemoryRuleStore;
    use crate::query::StatusFilter;
    use crate::redirect::MatchStrategy;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn sites() -> Arc<dyn SiteDirectory> {
        Arc::new(EngineConfig {
            sites: vec![
                Site {
                    id: 1,
                    handle: "default".to_string(),
                    base_url: "https://example.com/".to_string(),
                },
                Site {
                    id: 2,
                    handle: "fr".to_string(),
                    base_url: "https://example.fr/".to_string(),
                },
            ],
            pro_products: vec![],
            max_connections: 1,
        })
    }

    fn service(quota: QuotaPolicy) -> RuleService<MemoryRuleStore> {
        RuleService::new(
            MemoryRuleStore::new(),
            quota,
            sites(),
            RedirectSettings::default(),
        )
    }

    fn draft(old_url: &str, method: RedirectMethod) -> NewRedirect {
        NewRedirect::new(old_url, Some("/target"), method)
    }

    async fn all_ids(svc: &RuleService<MemoryRuleStore>) -> Vec<DbId> {
        svc.find(&RuleFilter::new().site(1))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn create_normalizes_and_appends() {
        let svc = service(QuotaPolicy::unlimited());
        let a = svc.create(draft("//foo/", RedirectMethod::Permanent)).await.unwrap();
        let b = svc.create(draft("bar", RedirectMethod::Temporary)).await.unwrap();

        assert_eq!(a.old_url, "/foo/");
        assert_eq!(a.site_id, 1);
        assert_eq!(b.old_url, "/bar");
        assert!(a.position < b.position);
        assert_eq!(all_ids(&svc).await, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn create_keeps_pattern_untouched() {
        let svc = service(QuotaPolicy::unlimited());
        let mut d = draft("blog/(\\d+)", RedirectMethod::Permanent);
        d.match_strategy = MatchStrategy::RegexMatch;
        let rule = svc.create(d).await.unwrap();
        assert_eq!(rule.old_url, "blog/(\\d+)");

        let dispatch = svc.rules_for_dispatch(1).await.unwrap();
        assert!(crate::matcher::matches(&dispatch[0], "/blog/42"));
        assert!(!crate::matcher::matches(&dispatch[0], "/blog/new"));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_without_writing() {
        let svc = service(QuotaPolicy::unlimited());
        svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let err = svc
            .create(draft("a", RedirectMethod::Temporary))
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].rule_type, "unique_url");
        assert_eq!(svc.store().count(&RuleFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_old_url_allowed_on_other_site() {
        let svc = service(QuotaPolicy::unlimited());
        svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let mut d = draft("/a", RedirectMethod::Permanent);
        d.site_id = Some(2);
        assert!(svc.create(d).await.is_ok());
    }

    #[tokio::test]
    async fn create_on_unknown_site_is_configuration_error() {
        let svc = service(QuotaPolicy::unlimited());
        let mut d = draft("/a", RedirectMethod::Permanent);
        d.site_id = Some(99);
        assert_matches!(svc.create(d).await, Err(CoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn fourth_redirect_exceeds_lite_quota() {
        let svc = service(QuotaPolicy::restricted());
        for url in ["/a", "/b", "/c"] {
            svc.create(draft(url, RedirectMethod::Permanent)).await.unwrap();
        }
        let err = svc
            .create(draft("/d", RedirectMethod::Temporary))
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].rule_type, "edition");
        assert_eq!(svc.store().count(&RuleFilter::new()).await.unwrap(), 3);

        let mut not_found = draft("/e", RedirectMethod::NotFound);
        not_found.enabled = false;
        assert!(svc.create(not_found).await.is_ok());
        assert_eq!(svc.remaining_capacity().await.unwrap(), Capacity::Limited(0));
    }

    #[tokio::test]
    async fn enabled_not_found_cannot_be_created() {
        let svc = service(QuotaPolicy::unlimited());
        let mut d = draft("/a", RedirectMethod::NotFound);
        d.enabled = true;
        let err = svc.create(d).await.unwrap_err();
        assert_eq!(err.violations()[0].rule_type, "method");
    }

    #[tokio::test]
    async fn absolute_new_url_is_validated() {
        let svc = service(QuotaPolicy::unlimited());
        let mut bad = draft("/a", RedirectMethod::Permanent);
        bad.new_url = Some("http://$1.example.com/path".to_string());
        assert_matches!(svc.create(bad).await, Err(CoreError::Validation(_)));

        let mut no_path = draft("/b", RedirectMethod::Permanent);
        no_path.new_url = Some("http://example.com".to_string());
        assert_matches!(svc.create(no_path).await, Err(CoreError::Validation(_)));

        let mut ok = draft("/c", RedirectMethod::Permanent);
        ok.new_url = Some("http://example.com/path".to_string());
        assert!(svc.create(ok).await.is_ok());
    }

    #[tokio::test]
    async fn update_missing_rule_is_not_found() {
        let svc = service(QuotaPolicy::unlimited());
        assert_matches!(
            svc.update(42, UpdateRedirect::default()).await,
            Err(CoreError::NotFound { id: 42, .. })
        );
    }

    #[tokio::test]
    async fn update_carries_telemetry_and_clears_ip_when_untracked() {
        let svc = service(QuotaPolicy::unlimited());
        let rule = svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        svc.save_settings(RedirectSettings {
            track_remote_ip: true,
            excluded_url_patterns: String::new(),
        })
        .await
        .unwrap();
        let hit = HitDetails {
            remote_ip: Some("10.0.0.1".to_string()),
            referrer: Some("https://ref.example/".to_string()),
            user_agent: Some("curl".to_string()),
        };
        svc.record_hit(rule.id, hit, Utc::now()).await.unwrap();

        svc.save_settings(RedirectSettings::default()).await.unwrap();
        let updated = svc
            .update(
                rule.id,
                UpdateRedirect {
                    new_url: Some("/elsewhere".to_string()),
                    ..UpdateRedirect::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.new_url.as_deref(), Some("/elsewhere"));
        assert_eq!(updated.count, 1);
        assert_eq!(updated.last_user_agent.as_deref(), Some("curl"));
        assert_eq!(updated.last_remote_ip_address, None);
        assert_eq!(updated.position, rule.position);
    }

    #[tokio::test]
    async fn update_into_collision_fails() {
        let svc = service(QuotaPolicy::unlimited());
        svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let b = svc.create(draft("/b", RedirectMethod::Permanent)).await.unwrap();
        let err = svc
            .update(
                b.id,
                UpdateRedirect {
                    old_url: Some("/a".to_string()),
                    ..UpdateRedirect::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].rule_type, "unique_url");
        assert_eq!(svc.get(b.id).await.unwrap().old_url, "/b");
    }

    #[tokio::test]
    async fn update_excludes_itself_from_quota() {
        let svc = service(QuotaPolicy::restricted());
        let mut ids = Vec::new();
        for url in ["/a", "/b", "/c"] {
            ids.push(svc.create(draft(url, RedirectMethod::Permanent)).await.unwrap().id);
        }
        let updated = svc
            .update(
                ids[0],
                UpdateRedirect {
                    method: Some(RedirectMethod::Temporary),
                    ..UpdateRedirect::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.method, RedirectMethod::Temporary);
    }

    #[tokio::test]
    async fn record_hit_drops_ip_when_untracked() {
        let svc = service(QuotaPolicy::unlimited());
        let rule = svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let at = Utc::now();
        let hit = HitDetails {
            remote_ip: Some("10.0.0.1".to_string()),
            referrer: None,
            user_agent: None,
        };
        let rule = svc.record_hit(rule.id, hit, at).await.unwrap();
        assert_eq!(rule.count, 1);
        assert_eq!(rule.date_last_used, Some(at));
        assert_eq!(rule.last_remote_ip_address, None);
    }

    #[tokio::test]
    async fn bulk_method_quota_aborts_whole_batch() {
        let svc = service(QuotaPolicy::restricted());
        let mut ids = Vec::new();
        svc.create(draft("/live", RedirectMethod::Permanent)).await.unwrap();
        for url in ["/a", "/b", "/c"] {
            let mut d = draft(url, RedirectMethod::NotFound);
            d.enabled = false;
            ids.push(svc.create(d).await.unwrap().id);
        }

        let err = svc
            .bulk_change_method(&ids, RedirectMethod::Permanent)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::QuotaExceeded { limit: 3, projected: 4 });

        let still_404 = svc
            .find(&RuleFilter::new().method(RedirectMethod::NotFound))
            .await
            .unwrap();
        assert_eq!(still_404.len(), 3);
    }

    #[tokio::test]
    async fn bulk_method_within_quota_commits() {
        let svc = service(QuotaPolicy::restricted());
        let mut ids = Vec::new();
        for url in ["/a", "/b"] {
            let mut d = draft(url, RedirectMethod::NotFound);
            d.enabled = false;
            ids.push(svc.create(d).await.unwrap().id);
        }
        let outcome = svc
            .bulk_change_method(&ids, RedirectMethod::Temporary)
            .await
            .unwrap();
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.message(), "Redirects updated.");
        let rules = svc.find(&RuleFilter::new()).await.unwrap();
        assert!(rules.iter().all(|r| r.method == RedirectMethod::Temporary && !r.enabled));
    }

    #[tokio::test]
    async fn bulk_method_to_not_found_skips_enabled_rows() {
        let svc = service(QuotaPolicy::unlimited());
        let enabled = svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let mut d = draft("/b", RedirectMethod::Permanent);
        d.enabled = false;
        let disabled = svc.create(d).await.unwrap();

        let outcome = svc
            .bulk_change_method(&[enabled.id, disabled.id, 999], RedirectMethod::NotFound)
            .await
            .unwrap();

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_matches!(outcome.failures[0].reason, BulkFailureReason::Invalid(_));
        assert_eq!(outcome.failures[0].id, enabled.id);
        assert_eq!(outcome.failures[1].reason, BulkFailureReason::NotFound);
        assert_eq!(svc.get(enabled.id).await.unwrap().method, RedirectMethod::Permanent);
        assert_eq!(svc.get(disabled.id).await.unwrap().method, RedirectMethod::NotFound);
        assert!(outcome.message().contains("1 redirects updated"));
    }

    #[tokio::test]
    async fn bulk_set_status_rejects_enabling_not_found() {
        let svc = service(QuotaPolicy::unlimited());
        let mut d = draft("/a", RedirectMethod::NotFound);
        d.enabled = false;
        let nf = svc.create(d).await.unwrap();
        let mut d = draft("/b", RedirectMethod::Permanent);
        d.enabled = false;
        let redirect = svc.create(d).await.unwrap();

        let outcome = svc.bulk_set_status(&[nf.id, redirect.id], true).await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.failures[0].id, nf.id);

        let enabled = svc
            .find(&RuleFilter::new().status(StatusFilter::Enabled))
            .await
            .unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, redirect.id);
    }

    #[tokio::test]
    async fn delete_preserves_sibling_order() {
        let svc = service(QuotaPolicy::unlimited());
        let a = svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let b = svc.create(draft("/b", RedirectMethod::Permanent)).await.unwrap();
        let c = svc.create(draft("/c", RedirectMethod::Permanent)).await.unwrap();

        assert_eq!(svc.delete(&[a.id, 12345]).await.unwrap(), 1);
        assert_eq!(all_ids(&svc).await, vec![b.id, c.id]);

        let d = svc.create(draft("/d", RedirectMethod::Permanent)).await.unwrap();
        assert_eq!(all_ids(&svc).await, vec![b.id, c.id, d.id]);
    }

    #[tokio::test]
    async fn exclude_and_delete_moves_urls_to_settings() {
        let svc = service(QuotaPolicy::unlimited());
        let mut ids = Vec::new();
        for url in ["/missing-1", "/missing-2"] {
            let mut d = draft(url, RedirectMethod::NotFound);
            d.enabled = false;
            ids.push(svc.create(d).await.unwrap().id);
        }

        svc.exclude_and_delete(&ids).await.unwrap();

        assert_eq!(svc.store().count(&RuleFilter::new()).await.unwrap(), 0);
        let expected = "/missing-1\n/missing-2";
        assert_eq!(svc.settings().await.excluded_url_patterns, expected);
        assert_eq!(
            svc.store().load_settings().await.unwrap().excluded_url_patterns,
            expected
        );
    }

    #[tokio::test]
    async fn exclude_same_url_on_two_sites_lists_it_once() {
        let svc = service(QuotaPolicy::unlimited());
        let a = svc.create(draft("/gone", RedirectMethod::NotFound)).await.unwrap();
        let mut d = draft("/gone", RedirectMethod::NotFound);
        d.site_id = Some(2);
        let b = svc.create(d).await.unwrap();

        svc.exclude_and_delete(&[a.id, b.id]).await.unwrap();

        assert_eq!(svc.settings().await.excluded_url_patterns, "/gone");
        assert_eq!(svc.store().count(&RuleFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exclude_and_delete_rolls_back_on_settings_failure() {
        let svc = service(QuotaPolicy::unlimited());
        let mut ids = Vec::new();
        for url in ["/x", "/y", "/z"] {
            let mut d = draft(url, RedirectMethod::NotFound);
            d.enabled = false;
            ids.push(svc.create(d).await.unwrap().id);
        }
        svc.store().fail_settings_save();

        let err = svc.exclude_and_delete(&ids).await.unwrap_err();
        assert_matches!(err, CoreError::Transaction(_));

        assert_eq!(all_ids(&svc).await, ids);
        assert_eq!(svc.settings().await.excluded_url_patterns, "");
        assert_eq!(
            svc.store().load_settings().await.unwrap().excluded_url_patterns,
            ""
        );
    }

    #[tokio::test]
    async fn dispatch_rules_are_enabled_and_ordered() {
        let svc = service(QuotaPolicy::unlimited());
        let a = svc.create(draft("/a", RedirectMethod::Permanent)).await.unwrap();
        let mut d = draft("/b", RedirectMethod::Permanent);
        d.enabled = false;
        svc.create(d).await.unwrap();
        let c = svc.create(draft("/c", RedirectMethod::Temporary)).await.unwrap();
        let mut other = draft("/a", RedirectMethod::Permanent);
        other.site_id = Some(2);
        svc.create(other).await.unwrap();

        let ids: Vec<_> = svc
            .rules_for_dispatch(1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![a.id, c.id]);

        let first = svc
            .one(&RuleFilter::new().site(1).old_url("/c"))
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.id), Some(c.id));
    }

    #[tokio::test]
    async fn load_reads_persisted_settings() {
        let store = MemoryRuleStore::with_settings(RedirectSettings {
            track_remote_ip: true,
            excluded_url_patterns: "/skip".to_string(),
        });
        let svc = RuleService::load(store, QuotaPolicy::unlimited(), sites())
            .await
            .unwrap();
        assert!(svc.settings().await.track_remote_ip);
        assert_eq!(svc.reload_settings().await.unwrap().excluded_url_patterns, "/skip");
    }
}
