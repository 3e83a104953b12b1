//! Engine configuration and site context.

use crate::error::CoreError;
use crate::quota::{Edition, EditionLookup};
use crate::types::DbId;

/// A site rules can be scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: DbId,
    pub handle: String,
    pub base_url: String,
}

/// Resolves the current site and looks sites up by id.
pub trait SiteDirectory: Send + Sync {
    fn current_site(&self) -> Option<Site>;
    fn site(&self, id: DbId) -> Option<Site>;
}

/// Process-wide configuration loaded at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Known sites; the first entry is the current site.
    pub sites: Vec<Site>,
    /// Product handles licensed at the Pro edition.
    pub pro_products: Vec<String>,
    /// Connection pool size (default: `10`).
    pub max_connections: u32,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                      |
    /// |----------------------------|------------------------------|
    /// | `WAYPOINT_SITES`           | `1:default:http://localhost/`|
    /// | `WAYPOINT_PRO_PRODUCTS`    | *(empty)*                    |
    /// | `WAYPOINT_MAX_CONNECTIONS` | `10`                         |
    pub fn from_env() -> Result<Self, CoreError> {
        let sites = parse_sites(
            &std::env::var("WAYPOINT_SITES").unwrap_or_else(|_| "1:default:http://localhost/".into()),
        )?;

        let pro_products = parse_list(&std::env::var("WAYPOINT_PRO_PRODUCTS").unwrap_or_default());

        let max_connections: u32 = std::env::var("WAYPOINT_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .map_err(|_| {
                CoreError::Configuration("WAYPOINT_MAX_CONNECTIONS must be a valid u32".into())
            })?;

        Ok(Self {
            sites,
            pro_products,
            max_connections,
        })
    }
}

impl SiteDirectory for EngineConfig {
    fn current_site(&self) -> Option<Site> {
        self.sites.first().cloned()
    }

    fn site(&self, id: DbId) -> Option<Site> {
        self.sites.iter().find(|s| s.id == id).cloned()
    }
}

impl EditionLookup for EngineConfig {
    fn is_edition(&self, product: &str, edition: Edition) -> bool {
        let licensed = if self.pro_products.iter().any(|p| p == product) {
            Edition::Pro
        } else {
            Edition::Lite
        };
        licensed == edition
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `id:handle:baseUrl` entries. The base URL may itself contain `:`.
fn parse_sites(raw: &str) -> Result<Vec<Site>, CoreError> {
    let sites = parse_list(raw)
        .into_iter()
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let (Some(id), Some(handle), Some(base_url)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(CoreError::Configuration(format!(
                    "Invalid site entry '{entry}', expected id:handle:baseUrl"
                )));
            };
            let id = id.parse::<DbId>().map_err(|_| {
                CoreError::Configuration(format!("Invalid site id in entry '{entry}'"))
            })?;
            Ok(Site {
                id,
                handle: handle.to_string(),
                base_url: base_url.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if sites.is_empty() {
        return Err(CoreError::Configuration("WAYPOINT_SITES lists no sites".into()));
    }
    Ok(sites)
}
