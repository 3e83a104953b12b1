use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypoint_core::config::{EngineConfig, SiteDirectory};
use waypoint_core::error::CoreError;
use waypoint_core::query::RuleFilter;
use waypoint_core::quota::{Capacity, QuotaPolicy};
use waypoint_core::service::{BulkOutcome, RuleService};
use waypoint_core::sources::sources;
use waypoint_core::store::RuleStore;
use waypoint_db::PgRuleStore;

mod cli;

use cli::{Cli, Command};

#[derive(Debug, thiserror::Error)]
enum AdminError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypoint_admin=info,waypoint_core=info,waypoint_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), AdminError> {
    // --- Configuration ---
    let config = EngineConfig::from_env()?;
    tracing::debug!(sites = config.sites.len(), "Loaded engine configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| CoreError::Configuration("DATABASE_URL must be set".into()))?;
    let pool = waypoint_db::create_pool(&database_url, config.max_connections).await?;
    waypoint_db::health_check(&pool).await?;
    waypoint_db::run_migrations(&pool).await?;
    tracing::debug!("Database ready");

    let quota = QuotaPolicy::from_lookup(&config);
    let config = Arc::new(config);
    let service = RuleService::load(PgRuleStore::new(pool), quota, config.clone()).await?;

    execute(&service, config.as_ref(), command).await
}

async fn execute(
    service: &RuleService<PgRuleStore>,
    sites: &dyn SiteDirectory,
    command: Command,
) -> Result<(), AdminError> {
    match command {
        Command::Sources => {
            for source in sources() {
                let actions: Vec<_> = source.actions.iter().map(|a| a.label()).collect();
                println!("{:<12} {:<16} {}", source.key, source.label, actions.join(", "));
            }
        }
        Command::List { source, search } => {
            let site = service.resolve_site(None)?;
            let mut filter = source.filter(site.id);
            if let Some(text) = search {
                filter = filter.search(text);
            }
            for rule in service.find(&filter).await? {
                println!(
                    "{:>6}  {}  {:<8} {:<5} {} -> {}",
                    rule.id,
                    rule.method.code(),
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.count,
                    rule,
                    rule.absolute_new_url(&site),
                );
            }
        }
        Command::Stats => {
            let total = service
                .store()
                .count(&RuleFilter::new())
                .await
                .map_err(CoreError::from)?;
            let remaining = match service.remaining_capacity().await? {
                Capacity::Unlimited => "unlimited".to_string(),
                Capacity::Limited(n) => n.to_string(),
            };
            let current = sites.current_site().map(|s| s.handle).unwrap_or_default();
            println!("site: {current}\nrules: {total}\nremaining quota: {remaining}");
        }
        Command::Create { old, new, code, regex } => {
            let rule = service.create(Command::draft(&old, &new, code, regex)).await?;
            println!("Created redirect #{} ({rule})", rule.id);
        }
        Command::SetMethod { code, ids } => {
            report(&service.bulk_change_method(&ids, code).await?);
        }
        Command::Enable { ids } => {
            report(&service.bulk_set_status(&ids, true).await?);
        }
        Command::Disable { ids } => {
            report(&service.bulk_set_status(&ids, false).await?);
        }
        Command::Exclude { ids } => {
            service.exclude_and_delete(&ids).await?;
            println!("Excluded URLs updated.");
        }
        Command::Delete { ids } => {
            let deleted = service.delete(&ids).await?;
            println!("Deleted {deleted} redirect(s).");
        }
    }
    Ok(())
}

fn report(outcome: &BulkOutcome) {
    println!("{}", outcome.message());
    for failure in &outcome.failures {
        match serde_json::to_string(&failure.reason) {
            Ok(reason) => println!("  #{}: {reason}", failure.id),
            Err(_) => println!("  #{}: could not be updated", failure.id),
        }
    }
}
