//! Postgres implementation of the core store traits.

use sqlx::{Postgres, Transaction};
use waypoint_core::error::StoreError;
use waypoint_core::query::RuleFilter;
use waypoint_core::redirect::{RedirectMethod, RedirectRecord, RedirectRule};
use waypoint_core::settings::RedirectSettings;
use waypoint_core::store::{OrderingTree, RuleStore, RuleTransaction};
use waypoint_core::types::DbId;

use crate::models::redirect::into_rules;
use crate::repositories::{RedirectRepo, SettingsRepo, StructureRepo};
use crate::{store_error, DbPool};

/// Advisory lock key taken by every write transaction. Serializes writers so
/// quota counts and ordering tails read inside a transaction stay valid until
/// it commits.
const WRITE_LOCK_KEY: i64 = 0x7761_7970_6f69_6e74;

/// Rule store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgRuleStore {
    pool: DbPool,
}

impl PgRuleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl RuleStore for PgRuleStore {
    type Tx = PgRuleTransaction;

    async fn begin(&self) -> Result<PgRuleTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(WRITE_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        Ok(PgRuleTransaction { tx })
    }

    async fn find(&self, filter: &RuleFilter) -> Result<Vec<RedirectRule>, StoreError> {
        let rows = RedirectRepo::list(&self.pool, filter)
            .await
            .map_err(store_error)?;
        into_rules(rows)
    }

    async fn count(&self, filter: &RuleFilter) -> Result<i64, StoreError> {
        RedirectRepo::count(&self.pool, filter)
            .await
            .map_err(store_error)
    }

    async fn load_settings(&self) -> Result<RedirectSettings, StoreError> {
        SettingsRepo::load(&self.pool).await.map_err(store_error)
    }
}

/// An open write transaction. Dropping it without [`commit`] rolls back.
///
/// [`commit`]: RuleTransaction::commit
pub struct PgRuleTransaction {
    tx: Transaction<'static, Postgres>,
}

fn missing(id: DbId) -> StoreError {
    StoreError::backend(format!("redirect {id} does not exist"))
}

impl RuleTransaction for PgRuleTransaction {
    async fn find_by_id(&mut self, id: DbId) -> Result<Option<RedirectRule>, StoreError> {
        RedirectRepo::find_by_id(&mut *self.tx, id)
            .await
            .map_err(store_error)?
            .map(RedirectRule::try_from)
            .transpose()
    }

    async fn find_by_ids(&mut self, ids: &[DbId]) -> Result<Vec<RedirectRule>, StoreError> {
        let rows = RedirectRepo::find_by_ids(&mut *self.tx, ids)
            .await
            .map_err(store_error)?;
        into_rules(rows)
    }

    async fn find_owner(&mut self, site_id: DbId, old_url: &str) -> Result<Option<DbId>, StoreError> {
        RedirectRepo::find_owner(&mut *self.tx, site_id, old_url)
            .await
            .map_err(store_error)
    }

    async fn count_non_404(&mut self) -> Result<i64, StoreError> {
        RedirectRepo::count_non_404(&mut *self.tx)
            .await
            .map_err(store_error)
    }

    async fn insert(&mut self, record: &RedirectRecord) -> Result<RedirectRule, StoreError> {
        let row = RedirectRepo::create(&mut *self.tx, record)
            .await
            .map_err(store_error)?;
        RedirectRule::try_from(row)
    }

    async fn update(&mut self, id: DbId, record: &RedirectRecord) -> Result<RedirectRule, StoreError> {
        let row = RedirectRepo::update(&mut *self.tx, id, record)
            .await
            .map_err(store_error)?
            .ok_or_else(|| missing(id))?;
        RedirectRule::try_from(row)
    }

    async fn set_method(&mut self, id: DbId, method: RedirectMethod) -> Result<(), StoreError> {
        let updated = RedirectRepo::set_method(&mut *self.tx, id, method)
            .await
            .map_err(store_error)?;
        if updated {
            Ok(())
        } else {
            Err(missing(id))
        }
    }

    async fn set_enabled(&mut self, id: DbId, enabled: bool) -> Result<(), StoreError> {
        let updated = RedirectRepo::set_enabled(&mut *self.tx, id, enabled)
            .await
            .map_err(store_error)?;
        if updated {
            Ok(())
        } else {
            Err(missing(id))
        }
    }

    async fn delete(&mut self, id: DbId) -> Result<bool, StoreError> {
        RedirectRepo::delete(&mut *self.tx, id)
            .await
            .map_err(store_error)
    }

    async fn load_settings(&mut self) -> Result<RedirectSettings, StoreError> {
        SettingsRepo::load(&mut *self.tx).await.map_err(store_error)
    }

    async fn save_settings(&mut self, settings: &RedirectSettings) -> Result<(), StoreError> {
        SettingsRepo::save(&mut *self.tx, settings)
            .await
            .map_err(store_error)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(store_error)
    }
}

impl OrderingTree for PgRuleTransaction {
    async fn append_to_root(&mut self, site_id: DbId, rule_id: DbId) -> Result<i64, StoreError> {
        StructureRepo::append_to_root(&mut *self.tx, site_id, rule_id)
            .await
            .map_err(store_error)
    }

    async fn remove(&mut self, rule_id: DbId) -> Result<(), StoreError> {
        let removed = StructureRepo::remove(&mut *self.tx, rule_id)
            .await
            .map_err(store_error)?;
        if !removed {
            tracing::debug!(rule_id, "No structure node to remove");
        }
        Ok(())
    }
}
