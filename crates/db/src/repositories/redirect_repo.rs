//! Repository for the `redirects` table.

use sqlx::PgExecutor;
use waypoint_core::query::{RuleFilter, SortDirection, SortField, StatusFilter};
use waypoint_core::redirect::{RedirectMethod, RedirectRecord};
use waypoint_core::types::DbId;

use crate::models::redirect::RedirectRow;

/// Column list for reads, joined with the structure position.
const COLUMNS: &str = "r.id, r.site_id, r.old_url, r.new_url, r.method, r.match_strategy, \
    r.enabled, r.count, r.last_remote_ip_address, r.last_referrer, r.last_user_agent, \
    r.date_last_used, s.position, r.created_at, r.updated_at";

const FROM: &str = "redirects r LEFT JOIN redirect_structure s ON s.rule_id = r.id";

/// Column list for `RETURNING` clauses, which cannot see the structure table.
const RETURNING_COLUMNS: &str = "id, site_id, old_url, new_url, method, match_strategy, \
    enabled, count, last_remote_ip_address, last_referrer, last_user_agent, \
    date_last_used, NULL::BIGINT AS position, created_at, updated_at";

/// Provides CRUD operations for redirect rules.
pub struct RedirectRepo;

impl RedirectRepo {
    /// Insert a new rule. The returned row has no position yet.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &RedirectRecord,
    ) -> Result<RedirectRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO redirects (site_id, old_url, new_url, method, match_strategy, enabled,
                count, last_remote_ip_address, last_referrer, last_user_agent, date_last_used)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {RETURNING_COLUMNS}"
        );
        sqlx::query_as::<_, RedirectRow>(&query)
            .bind(input.site_id)
            .bind(&input.old_url)
            .bind(&input.new_url)
            .bind(input.method.code())
            .bind(input.match_strategy.as_str())
            .bind(input.enabled)
            .bind(input.count)
            .bind(&input.last_remote_ip_address)
            .bind(&input.last_referrer)
            .bind(&input.last_user_agent)
            .bind(input.date_last_used)
            .fetch_one(executor)
            .await
    }

    /// Find a rule by ID.
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<RedirectRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {FROM} WHERE r.id = $1");
        sqlx::query_as::<_, RedirectRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Rules among `ids` that exist, in id order. Locks the rows for the
    /// rest of the transaction.
    pub async fn find_by_ids<'e, E: PgExecutor<'e>>(
        executor: E,
        ids: &[DbId],
    ) -> Result<Vec<RedirectRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM {FROM} WHERE r.id = ANY($1) ORDER BY r.id FOR UPDATE OF r"
        );
        sqlx::query_as::<_, RedirectRow>(&query)
            .bind(ids)
            .fetch_all(executor)
            .await
    }

    /// Id of the rule holding `old_url` on `site_id`.
    pub async fn find_owner<'e, E: PgExecutor<'e>>(
        executor: E,
        site_id: DbId,
        old_url: &str,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT id FROM redirects WHERE site_id = $1 AND old_url = $2",
        )
        .bind(site_id)
        .bind(old_url)
        .fetch_optional(executor)
        .await
    }

    /// Rules that are real redirects, across all sites.
    pub async fn count_non_404<'e, E: PgExecutor<'e>>(executor: E) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM redirects WHERE method <> $1")
            .bind(RedirectMethod::NotFound.code())
            .fetch_one(executor)
            .await
    }

    /// List rules matching `filter`, sorted and paginated in SQL.
    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &RuleFilter,
    ) -> Result<Vec<RedirectRow>, sqlx::Error> {
        let (where_clause, mut bind_values, mut bind_idx) = build_filter(filter);
        let mut query = format!(
            "SELECT {COLUMNS} FROM {FROM} {where_clause} ORDER BY {}",
            order_clause(filter.sort, filter.direction)
        );
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT ${bind_idx}"));
            bind_idx += 1;
            bind_values.push(BindValue::BigInt(limit.max(0)));
        }
        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET ${bind_idx}"));
            bind_values.push(BindValue::BigInt(offset.max(0)));
        }
        let q = bind_values_as(sqlx::query_as::<_, RedirectRow>(&query), &bind_values);
        q.fetch_all(executor).await
    }

    /// Count rules matching `filter`, ignoring pagination.
    pub async fn count<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &RuleFilter,
    ) -> Result<i64, sqlx::Error> {
        let (where_clause, bind_values, _) = build_filter(filter);
        let query = format!("SELECT COUNT(*) FROM {FROM} {where_clause}");
        let q = bind_values_scalar(sqlx::query_scalar::<_, i64>(&query), &bind_values);
        q.fetch_one(executor).await
    }

    /// Overwrite every mutable column. `site_id` is never changed.
    pub async fn update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        input: &RedirectRecord,
    ) -> Result<Option<RedirectRow>, sqlx::Error> {
        let query = format!(
            "WITH updated AS (
                UPDATE redirects SET
                    old_url = $2,
                    new_url = $3,
                    method = $4,
                    match_strategy = $5,
                    enabled = $6,
                    count = $7,
                    last_remote_ip_address = $8,
                    last_referrer = $9,
                    last_user_agent = $10,
                    date_last_used = $11,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
             )
             SELECT {} FROM updated r LEFT JOIN redirect_structure s ON s.rule_id = r.id",
            COLUMNS
        );
        sqlx::query_as::<_, RedirectRow>(&query)
            .bind(id)
            .bind(&input.old_url)
            .bind(&input.new_url)
            .bind(input.method.code())
            .bind(input.match_strategy.as_str())
            .bind(input.enabled)
            .bind(input.count)
            .bind(&input.last_remote_ip_address)
            .bind(&input.last_referrer)
            .bind(&input.last_user_agent)
            .bind(input.date_last_used)
            .fetch_optional(executor)
            .await
    }

    /// Change only the method. Returns `true` if a row was updated.
    pub async fn set_method<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        method: RedirectMethod,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE redirects SET method = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(method.code())
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Change only the enabled flag. Returns `true` if a row was updated.
    pub async fn set_enabled<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        enabled: bool,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE redirects SET enabled = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(enabled)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hard-delete a rule. Returns `true` if a row was deleted.
    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM redirects WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers for dynamic query building
// ---------------------------------------------------------------------------

/// Typed bind value for dynamically-built rule queries.
enum BindValue {
    BigInt(i64),
    BigIntArray(Vec<i64>),
    SmallIntArray(Vec<i16>),
    Text(String),
    Bool(bool),
}

/// Build a WHERE clause and bind values from a [`RuleFilter`].
///
/// Returns `(where_clause, bind_values, next_bind_index)`.
/// The `where_clause` is empty if no filters are active, or starts with `WHERE `.
fn build_filter(filter: &RuleFilter) -> (String, Vec<BindValue>, u32) {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_idx = 1u32;
    let mut bind_values: Vec<BindValue> = Vec::new();

    if !filter.ids.is_empty() {
        conditions.push(format!("r.id = ANY(${bind_idx})"));
        bind_idx += 1;
        bind_values.push(BindValue::BigIntArray(filter.ids.clone()));
    }

    if let Some(site_id) = filter.site_id {
        conditions.push(format!("r.site_id = ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::BigInt(site_id));
    }

    if let Some(ref old_url) = filter.old_url {
        conditions.push(format!("r.old_url = ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::Text(old_url.clone()));
    }

    if let Some(ref new_url) = filter.new_url {
        conditions.push(format!("r.new_url = ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::Text(new_url.clone()));
    }

    if !filter.methods.is_empty() {
        conditions.push(format!("r.method = ANY(${bind_idx})"));
        bind_idx += 1;
        bind_values.push(BindValue::SmallIntArray(
            filter.methods.iter().map(|m| m.code()).collect(),
        ));
    }

    if let Some(strategy) = filter.match_strategy {
        conditions.push(format!("r.match_strategy = ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::Text(strategy.as_str().to_string()));
    }

    match filter.status {
        StatusFilter::Enabled | StatusFilter::Disabled => {
            conditions.push(format!("r.enabled = ${bind_idx}"));
            bind_idx += 1;
            bind_values.push(BindValue::Bool(filter.status == StatusFilter::Enabled));
        }
        StatusFilter::All => {}
    }

    if let Some(ref search) = filter.search {
        conditions.push(format!(
            "(r.old_url ILIKE ${bind_idx} OR COALESCE(r.new_url, '') ILIKE ${bind_idx} \
             OR r.method::TEXT ILIKE ${bind_idx} OR r.match_strategy ILIKE ${bind_idx})"
        ));
        bind_idx += 1;
        bind_values.push(BindValue::Text(format!("%{}%", escape_like(search))));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, bind_values, bind_idx)
}

/// ORDER BY body. Nullable columns put NULL first ascending so SQL and the
/// in-process sort agree; ties always break on id.
fn order_clause(field: SortField, direction: SortDirection) -> String {
    let dir = match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let (column, nullable) = match field {
        SortField::Structure => ("s.position", false),
        SortField::OldUrl => ("r.old_url COLLATE \"C\"", false),
        SortField::NewUrl => ("r.new_url COLLATE \"C\"", true),
        SortField::Method => ("r.method", false),
        SortField::Count => ("r.count", false),
        SortField::DateLastUsed => ("r.date_last_used", true),
        SortField::DateCreated => ("r.created_at", false),
        SortField::DateUpdated => ("r.updated_at", false),
    };
    let nulls = match (nullable, direction) {
        (true, SortDirection::Asc) => " NULLS FIRST",
        (true, SortDirection::Desc) => " NULLS LAST",
        (false, _) => "",
    };
    format!("{column} {dir}{nulls}, r.id ASC")
}

/// Escape LIKE metacharacters so search text matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Bind a slice of `BindValue` to a sqlx `QueryAs`.
fn bind_values_as<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    bind_values: &'q [BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for val in bind_values {
        match val {
            BindValue::BigInt(v) => q = q.bind(*v),
            BindValue::BigIntArray(v) => q = q.bind(v.as_slice()),
            BindValue::SmallIntArray(v) => q = q.bind(v.as_slice()),
            BindValue::Text(v) => q = q.bind(v.as_str()),
            BindValue::Bool(v) => q = q.bind(*v),
        }
    }
    q
}

/// Bind a slice of `BindValue` to a sqlx `QueryScalar`.
fn bind_values_scalar<'q>(
    mut q: sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments>,
    bind_values: &'q [BindValue],
) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments> {
    for val in bind_values {
        match val {
            BindValue::BigInt(v) => q = q.bind(*v),
            BindValue::BigIntArray(v) => q = q.bind(v.as_slice()),
            BindValue::SmallIntArray(v) => q = q.bind(v.as_slice()),
            BindValue::Text(v) => q = q.bind(v.as_str()),
            BindValue::Bool(v) => q = q.bind(*v),
        }
    }
    q
}
