//! Applies pending schema migrations and exits.

use anyhow::Context;
use storefront_api::{config, db};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;

    info!("Running migrations");
    db::run_migrations(&pool).await?;
    info!("Migrations complete");

    db::close_pool(pool).await?;
    Ok(())
}
