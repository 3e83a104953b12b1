//! Repository for the `redirect_structure` table.
//!
//! Each rule has at most one node per site. Positions grow from the tail;
//! removing a node never renumbers its siblings.

use sqlx::PgExecutor;
use waypoint_core::types::DbId;

/// Maintains per-site rule precedence.
pub struct StructureRepo;

impl StructureRepo {
    /// Append `rule_id` after the last node of `site_id`, returning its
    /// position.
    pub async fn append_to_root<'e, E: PgExecutor<'e>>(
        executor: E,
        site_id: DbId,
        rule_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO redirect_structure (rule_id, site_id, position)
             SELECT $2, $1, COALESCE(MAX(position), 0) + 1
             FROM redirect_structure WHERE site_id = $1
             RETURNING position",
        )
        .bind(site_id)
        .bind(rule_id)
        .fetch_one(executor)
        .await
    }

    /// Drop the node for `rule_id`. Returns `true` if one existed.
    pub async fn remove<'e, E: PgExecutor<'e>>(
        executor: E,
        rule_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM redirect_structure WHERE rule_id = $1")
            .bind(rule_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Position of `rule_id`, if it has a node.
    pub async fn position_of<'e, E: PgExecutor<'e>>(
        executor: E,
        rule_id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT position FROM redirect_structure WHERE rule_id = $1")
            .bind(rule_id)
            .fetch_optional(executor)
            .await
    }
}
