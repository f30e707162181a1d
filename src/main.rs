//! caregate entry point.
//!
//! Order matters: the pool's startup probe runs before the listener is bound,
//! so a gateway without a working database never accepts a connection.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use caregate::middleware::{MemoryStore, DEFAULT_WINDOW};
use caregate::pool::postgres::PgConnector;
use caregate::{app, Config, Error, Pool, PoolConfig, Server};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }
}

async fn run(config: Config) -> Result<(), Error> {
    let pool_config = PoolConfig::default();
    info!(
        host = %config.db.host,
        port = config.db.port,
        database = config.db.name.as_deref().unwrap_or("<user default>"),
        ssl = config.db.ssl,
        max_connections = pool_config.max_connections,
        "connecting to PostgreSQL"
    );
    let pool = Pool::connect(PgConnector::new(&config.db), pool_config).await?;

    let store = Arc::new(MemoryStore::new());
    store.spawn_sweeper(DEFAULT_WINDOW.min(Duration::from_secs(60)));

    let app = app::build(&config, pool.clone(), store);
    let server = match Server::bind(config.listen_addr()).await {
        Ok(server) => server,
        Err(e) => {
            pool.close().await;
            return Err(e);
        }
    };
    info!(
        environment = %config.environment,
        port = config.port,
        "server running in {} mode on port {}",
        config.environment,
        config.port
    );

    let result = server.serve(app).await;
    info!(status = ?pool.status(), "closing connection pool");
    pool.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal in production.
    let _ = dotenvy::dotenv();

    let config = Config::parse();
    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            error!(error = %e, source = ?std::error::Error::source(&e), "PostgreSQL connection error, exiting");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
