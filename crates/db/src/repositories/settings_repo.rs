//! Repository for the single-row `redirect_settings` table.

use sqlx::PgExecutor;
use waypoint_core::settings::RedirectSettings;

use crate::models::settings::SettingsRow;

const COLUMNS: &str = "track_remote_ip, excluded_url_patterns";

/// Reads and writes the global redirect settings.
pub struct SettingsRepo;

impl SettingsRepo {
    /// Load the settings row, falling back to defaults if it was never seeded.
    pub async fn load<'e, E: PgExecutor<'e>>(executor: E) -> Result<RedirectSettings, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM redirect_settings WHERE id = 1");
        let row = sqlx::query_as::<_, SettingsRow>(&query)
            .fetch_optional(executor)
            .await?;
        Ok(row.map(RedirectSettings::from).unwrap_or_default())
    }

    /// Upsert the settings row.
    pub async fn save<'e, E: PgExecutor<'e>>(
        executor: E,
        settings: &RedirectSettings,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO redirect_settings (id, track_remote_ip, excluded_url_patterns)
             VALUES (1, $1, $2)
             ON CONFLICT (id) DO UPDATE SET
                track_remote_ip = EXCLUDED.track_remote_ip,
                excluded_url_patterns = EXCLUDED.excluded_url_patterns,
                updated_at = NOW()",
        )
        .bind(settings.track_remote_ip)
        .bind(&settings.excluded_url_patterns)
        .execute(executor)
        .await?;
        Ok(())
    }
}
