use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hosting_billing::billing::{run_billing_sweep, spawn_billing_scheduler, SchedulerConfig, Sweep};
use hosting_billing::provisioning::{HttpProvisioningDriver, ProvisioningRegistry};
use hosting_billing::{config, telemetry, BillingService};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let sweep = match std::env::args().nth(1) {
        Some(arg) => Some(arg.parse::<Sweep>()?),
        None => None,
    };

    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let registry = ProvisioningRegistry::new().with_driver(
        "http",
        Arc::new(HttpProvisioningDriver::new(Duration::from_secs(
            *config::PROVISIONING_HTTP_TIMEOUT_SECS,
        ))),
    );
    tracing::info!(server_types = ?registry.server_types(), "provisioning drivers registered");
    let billing = BillingService::postgres(pool, registry);

    if let Some(sweep) = sweep {
        let errors = run_billing_sweep(&billing.processor, sweep, Utc::now()).await;
        if !errors.is_empty() {
            return Err(format!("{sweep} sweep finished with {} failed items", errors.len()).into());
        }
        return Ok(());
    }

    let config = SchedulerConfig::from_env();
    tracing::info!(?config, "starting billing scheduler");
    let handles = spawn_billing_scheduler(billing.processor.clone(), config);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; stopping billing scheduler");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
