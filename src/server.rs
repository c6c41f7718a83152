use sqlx::mysql::MySqlPool;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::MySqlStore;
use crate::error::AppError;
use crate::routes::{self, AppState};

#[derive(Debug, Default, clap::Args)]
pub struct ServeArgs {
    /// Overrides APP_HOST
    #[arg(long)]
    pub host: Option<String>,
    /// Overrides APP_PORT
    #[arg(long)]
    pub port: Option<u16>,
}

pub async fn run(mut config: AppConfig, mut args: ServeArgs, pool: MySqlPool) -> Result<(), AppError> {
    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    let executor = MySqlStore::new(pool.clone(), config.database.query_timeout).into_executor();
    let state = AppState::new(executor, config.programs.clone(), config.auth.clone());
    let app = routes::router(state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        ?config.environment,
        %addr,
        auth = config.auth.jwt_secret.is_some(),
        "admissions dashboard ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("admissions dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
