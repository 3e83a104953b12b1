//! Row shapes for the `redirects` table joined with `redirect_structure`.

use sqlx::FromRow;
use waypoint_core::error::StoreError;
use waypoint_core::redirect::{MatchStrategy, RedirectMethod, RedirectRule};
use waypoint_core::types::{DbId, Timestamp};

/// A row from the `redirects` table, with the structure position when the
/// query joined it.
#[derive(Debug, Clone, FromRow)]
pub struct RedirectRow {
    pub id: DbId,
    pub site_id: DbId,
    pub old_url: String,
    pub new_url: Option<String>,
    pub method: i16,
    pub match_strategy: String,
    pub enabled: bool,
    pub count: i64,
    pub last_remote_ip_address: Option<String>,
    pub last_referrer: Option<String>,
    pub last_user_agent: Option<String>,
    pub date_last_used: Option<Timestamp>,
    pub position: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<RedirectRow> for RedirectRule {
    type Error = StoreError;

    fn try_from(row: RedirectRow) -> Result<Self, Self::Error> {
        let method = RedirectMethod::from_code(row.method).ok_or_else(|| {
            StoreError::backend(format!("redirect {} has unknown method {}", row.id, row.method))
        })?;
        let match_strategy = MatchStrategy::parse(&row.match_strategy).ok_or_else(|| {
            StoreError::backend(format!(
                "redirect {} has unknown match strategy {:?}",
                row.id, row.match_strategy
            ))
        })?;
        Ok(RedirectRule {
            id: row.id,
            site_id: row.site_id,
            old_url: row.old_url,
            new_url: row.new_url,
            method,
            match_strategy,
            enabled: row.enabled,
            count: row.count,
            last_remote_ip_address: row.last_remote_ip_address,
            last_referrer: row.last_referrer,
            last_user_agent: row.last_user_agent,
            date_last_used: row.date_last_used,
            position: row.position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Convert a batch of rows, failing on the first undecodable one.
pub fn into_rules(rows: Vec<RedirectRow>) -> Result<Vec<RedirectRule>, StoreError> {
    rows.into_iter().map(RedirectRule::try_from).collect()
}
