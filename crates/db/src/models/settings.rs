//! Single-row `redirect_settings` table.

use sqlx::FromRow;
use waypoint_core::settings::RedirectSettings;

/// A row from the `redirect_settings` table.
#[derive(Debug, Clone, FromRow)]
pub struct SettingsRow {
    pub track_remote_ip: bool,
    pub excluded_url_patterns: String,
}

impl From<SettingsRow> for RedirectSettings {
    fn from(row: SettingsRow) -> Self {
        RedirectSettings {
            track_remote_ip: row.track_remote_ip,
            excluded_url_patterns: row.excluded_url_patterns,
        }
    }
}
