//! Process configuration.
//!
//! Every option is a CLI flag and an environment variable. `main` loads a
//! `.env` file first, so values there behave like real environment variables
//! that were set before start-up.

use std::net::{Ipv4Addr, SocketAddr};

use clap::{Args, Parser};

pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_PORT: u16 = 5000;

/// Gateway configuration.
#[derive(Clone, Debug, Parser)]
#[command(name = "caregate", version, about = "HTTP gateway in front of PostgreSQL")]
pub struct Config {
    #[command(flatten)]
    pub db: DbConfig,

    /// Origins allowed to call the API, comma-separated.
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = DEFAULT_ALLOWED_ORIGIN
    )]
    pub allowed_origins: Vec<String>,

    /// Runtime environment. `production` turns request logging off.
    #[arg(long = "node-env", env = "NODE_ENV", default_value = "development")]
    pub environment: String,

    /// Port to listen on (all interfaces).
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json", env = "LOG_JSON")]
    pub json_logs: bool,
}

/// Database credentials and connection target.
#[derive(Clone, Debug, Args)]
pub struct DbConfig {
    #[arg(long = "db-user", env = "DB_USER")]
    pub user: String,

    #[arg(long = "db-password", env = "DB_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long = "db-host", env = "DB_HOST", default_value = DEFAULT_DB_HOST)]
    pub host: String,

    /// Database name. The server picks the user's name when unset.
    #[arg(long = "db-name", env = "DB_NAME")]
    pub name: Option<String>,

    #[arg(id = "db_port", long = "db-port", env = "DB_PORT", default_value_t = DEFAULT_DB_PORT)]
    pub port: u16,

    /// Require TLS to the database. The certificate is not verified.
    #[arg(long = "db-ssl", env = "DB_SSL")]
    pub ssl: bool,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn listen_addr(&self) -> SocketAddr {
        (Ipv4Addr::UNSPECIFIED, self.port).into()
    }

    /// The allow-list with blanks trimmed and empty entries dropped. Falls
    /// back to the default origin when nothing usable is left.
    pub fn origins(&self) -> Vec<String> {
        let origins: Vec<String> = self
            .allowed_origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_owned)
            .collect();
        if origins.is_empty() {
            vec![DEFAULT_ALLOWED_ORIGIN.to_owned()]
        } else {
            origins
        }
    }
}
