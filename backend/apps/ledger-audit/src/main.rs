//! Ledger Audit Entry Point
//!
//! Recomputes every user's cached point total from the ledger and repairs
//! drift. Uses `anyhow` for startup errors; per-tenant failures are logged
//! and the run continues.

use std::env;
use std::sync::Arc;

use progression::{PgProgressionStore, PointLedger, ProgressionConfig};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_audit=info,progression=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set in environment"))?;
    let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
        Ok(raw) => raw.parse()?,
        Err(_) => 5,
    };

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let config = Arc::new(ProgressionConfig::from_env()?);
    let store = Arc::new(PgProgressionStore::new(pool));
    let ledger = PointLedger::new(Arc::clone(&store), config);

    let tenants = store.list_tenants().await?;
    let mut users_checked = 0;
    let mut repaired = 0;
    let mut failed_tenants = 0;

    for tenant in tenants {
        match ledger.audit_all(tenant).await {
            Ok(report) => {
                users_checked += report.users_checked;
                repaired += report.repaired.len();
            }
            Err(e) => {
                failed_tenants += 1;
                tracing::warn!(
                    tenant_id = %tenant,
                    error = %e,
                    "Tenant audit failed, continuing anyway"
                );
            }
        }
    }

    tracing::info!(users_checked, repaired, failed_tenants, "Ledger audit completed");

    if failed_tenants > 0 {
        anyhow::bail!("{failed_tenants} tenant audit(s) failed");
    }
    Ok(())
}
