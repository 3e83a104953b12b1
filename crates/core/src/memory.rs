//! In-process [`RuleStore`] for previews, embedding, and tests.
//!
//! Readers clone an immutable snapshot and never wait on writers. Writers
//! are serialized by a mutex held for the life of a transaction; each
//! transaction mutates a private copy that replaces the snapshot on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::StoreError;
use crate::query::RuleFilter;
use crate::redirect::{RedirectMethod, RedirectRecord, RedirectRule};
use crate::settings::RedirectSettings;
use crate::store::{OrderingTree, RuleStore, RuleTransaction};
use crate::types::DbId;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_id: DbId,
    rules: BTreeMap<DbId, RedirectRule>,
    /// Last position handed out per site.
    tails: HashMap<DbId, i64>,
    settings: RedirectSettings,
}

/// Shared-state in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    snapshot: Arc<RwLock<Arc<MemoryState>>>,
    writer: Arc<Mutex<()>>,
    fail_settings_save: Arc<AtomicBool>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: RedirectSettings) -> Self {
        let state = MemoryState {
            settings,
            ..MemoryState::default()
        };
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(state))),
            ..Self::default()
        }
    }

    /// Make every subsequent settings save fail.
    #[cfg(test)]
    pub(crate) fn fail_settings_save(&self) {
        self.fail_settings_save.store(true, Ordering::SeqCst);
    }

    async fn state(&self) -> Arc<MemoryState> {
        Arc::clone(&*self.snapshot.read().await)
    }
}

impl RuleStore for MemoryRuleStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let work = (*self.state().await).clone();
        Ok(MemoryTransaction {
            _guard: guard,
            snapshot: Arc::clone(&self.snapshot),
            work,
            fail_settings_save: self.fail_settings_save.load(Ordering::SeqCst),
        })
    }

    async fn find(&self, filter: &RuleFilter) -> Result<Vec<RedirectRule>, StoreError> {
        let state = self.state().await;
        let mut rules: Vec<RedirectRule> = state
            .rules
            .values()
            .filter(|r| filter.accepts(r))
            .cloned()
            .collect();
        filter.sort(&mut rules);
        Ok(filter.paginate(rules))
    }

    async fn count(&self, filter: &RuleFilter) -> Result<i64, StoreError> {
        let state = self.state().await;
        Ok(state.rules.values().filter(|r| filter.accepts(r)).count() as i64)
    }

    async fn load_settings(&self) -> Result<RedirectSettings, StoreError> {
        Ok(self.state().await.settings.clone())
    }
}

/// Write transaction over a private copy of the store state.
#[derive(Debug)]
pub struct MemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    snapshot: Arc<RwLock<Arc<MemoryState>>>,
    work: MemoryState,
    fail_settings_save: bool,
}

impl MemoryTransaction {
    fn rule_mut(&mut self, id: DbId) -> Result<&mut RedirectRule, StoreError> {
        self.work
            .rules
            .get_mut(&id)
            .ok_or_else(|| StoreError::backend(format!("redirect {id} does not exist")))
    }

    /// Mirrors the `(site_id, old_url)` unique constraint of the SQL schema.
    fn check_unique(&self, id: Option<DbId>, record: &RedirectRecord) -> Result<(), StoreError> {
        let clash = self.work.rules.values().any(|r| {
            Some(r.id) != id && r.site_id == record.site_id && r.old_url == record.old_url
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "duplicate old_url '{}' on site {}",
                record.old_url, record.site_id
            )));
        }
        Ok(())
    }

    fn check_status(rule: &RedirectRule) -> Result<(), StoreError> {
        if rule.has_valid_status() {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "redirect {} cannot be enabled with method 404",
                rule.id
            )))
        }
    }
}

impl RuleTransaction for MemoryTransaction {
    async fn find_by_id(&mut self, id: DbId) -> Result<Option<RedirectRule>, StoreError> {
        Ok(self.work.rules.get(&id).cloned())
    }

    async fn find_by_ids(&mut self, ids: &[DbId]) -> Result<Vec<RedirectRule>, StoreError> {
        Ok(self
            .work
            .rules
            .values()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn find_owner(&mut self, site_id: DbId, old_url: &str) -> Result<Option<DbId>, StoreError> {
        Ok(self
            .work
            .rules
            .values()
            .find(|r| r.site_id == site_id && r.old_url == old_url)
            .map(|r| r.id))
    }

    async fn count_non_404(&mut self) -> Result<i64, StoreError> {
        Ok(self
            .work
            .rules
            .values()
            .filter(|r| r.method.is_redirect())
            .count() as i64)
    }

    async fn insert(&mut self, record: &RedirectRecord) -> Result<RedirectRule, StoreError> {
        self.check_unique(None, record)?;
        self.work.last_id += 1;
        let now = Utc::now();
        let rule = RedirectRule {
            id: self.work.last_id,
            site_id: record.site_id,
            old_url: record.old_url.clone(),
            new_url: record.new_url.clone(),
            method: record.method,
            match_strategy: record.match_strategy,
            enabled: record.enabled,
            count: record.count,
            last_remote_ip_address: record.last_remote_ip_address.clone(),
            last_referrer: record.last_referrer.clone(),
            last_user_agent: record.last_user_agent.clone(),
            date_last_used: record.date_last_used,
            position: None,
            created_at: now,
            updated_at: now,
        };
        Self::check_status(&rule)?;
        self.work.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update(&mut self, id: DbId, record: &RedirectRecord) -> Result<RedirectRule, StoreError> {
        let site_id = self.rule_mut(id)?.site_id;
        self.check_unique(
            Some(id),
            &RedirectRecord {
                site_id,
                ..record.clone()
            },
        )?;
        let rule = self.rule_mut(id)?;
        rule.old_url = record.old_url.clone();
        rule.new_url = record.new_url.clone();
        rule.method = record.method;
        rule.match_strategy = record.match_strategy;
        rule.enabled = record.enabled;
        rule.count = record.count;
        rule.last_remote_ip_address = record.last_remote_ip_address.clone();
        rule.last_referrer = record.last_referrer.clone();
        rule.last_user_agent = record.last_user_agent.clone();
        rule.date_last_used = record.date_last_used;
        rule.updated_at = Utc::now();
        let rule = rule.clone();
        Self::check_status(&rule)?;
        Ok(rule)
    }

    async fn set_method(&mut self, id: DbId, method: RedirectMethod) -> Result<(), StoreError> {
        let rule = self.rule_mut(id)?;
        rule.method = method;
        rule.updated_at = Utc::now();
        let rule = rule.clone();
        Self::check_status(&rule)
    }

    async fn set_enabled(&mut self, id: DbId, enabled: bool) -> Result<(), StoreError> {
        let rule = self.rule_mut(id)?;
        rule.enabled = enabled;
        rule.updated_at = Utc::now();
        let rule = rule.clone();
        Self::check_status(&rule)
    }

    async fn delete(&mut self, id: DbId) -> Result<bool, StoreError> {
        Ok(self.work.rules.remove(&id).is_some())
    }

    async fn load_settings(&mut self) -> Result<RedirectSettings, StoreError> {
        Ok(self.work.settings.clone())
    }

    async fn save_settings(&mut self, settings: &RedirectSettings) -> Result<(), StoreError> {
        if self.fail_settings_save {
            return Err(StoreError::backend("settings save failed"));
        }
        self.work.settings = settings.clone();
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        *self.snapshot.write().await = Arc::new(self.work);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl OrderingTree for MemoryTransaction {
    async fn append_to_root(&mut self, site_id: DbId, rule_id: DbId) -> Result<i64, StoreError> {
        let tail = self.work.tails.entry(site_id).or_insert(0);
        *tail += 1;
        let position = *tail;
        self.rule_mut(rule_id)?.position = Some(position);
        Ok(position)
    }

    async fn remove(&mut self, rule_id: DbId) -> Result<(), StoreError> {
        if let Some(rule) = self.work.rules.get_mut(&rule_id) {
            rule.position = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::MatchStrategy;

    fn record(site_id: DbId, old_url: &str) -> RedirectRecord {
        RedirectRecord {
            site_id,
            old_url: old_url.to_string(),
            new_url: None,
            method: RedirectMethod::Permanent,
            match_strategy: MatchStrategy::ExactMatch,
            enabled: true,
            count: 0,
            last_remote_ip_address: None,
            last_referrer: None,
            last_user_agent: None,
            date_last_used: None,
        }
    }

    async fn insert(store: &MemoryRuleStore, site_id: DbId, old_url: &str) -> RedirectRule {
        let mut tx = store.begin().await.unwrap();
        let rule = tx.insert(&record(site_id, old_url)).await.unwrap();
        tx.append_to_root(site_id, rule.id).await.unwrap();
        tx.commit().await.unwrap();
        rule
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryRuleStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&record(1, "/a")).await.unwrap();
        assert_eq!(store.count(&RuleFilter::new()).await.unwrap(), 0);
        drop(tx);
        assert_eq!(store.count(&RuleFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn positions_are_per_site() {
        let store = MemoryRuleStore::new();
        insert(&store, 1, "/a").await;
        insert(&store, 2, "/a").await;
        insert(&store, 1, "/b").await;
        let site1 = store.find(&RuleFilter::new().site(1)).await.unwrap();
        assert_eq!(
            site1.iter().map(|r| r.position).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        let site2 = store.find(&RuleFilter::new().site(2)).await.unwrap();
        assert_eq!(site2[0].position, Some(1));
    }

    #[tokio::test]
    async fn duplicate_old_url_conflicts() {
        let store = MemoryRuleStore::new();
        insert(&store, 1, "/a").await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert(&record(1, "/a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn enabled_not_found_rejected_by_store() {
        let store = MemoryRuleStore::new();
        let rule = insert(&store, 1, "/a").await;
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .set_method(rule.id, RedirectMethod::NotFound)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn rollback_keeps_settings() {
        let store = MemoryRuleStore::with_settings(RedirectSettings {
            track_remote_ip: true,
            excluded_url_patterns: "/x".to_string(),
        });
        let mut tx = store.begin().await.unwrap();
        tx.save_settings(&RedirectSettings::default()).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.load_settings().await.unwrap().excluded_url_patterns, "/x");
    }
}
