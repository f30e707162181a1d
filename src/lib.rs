//! # caregate
//!
//! A minimal HTTP gateway in front of PostgreSQL.
//!
//! Requests go through a fixed middleware pipeline (security headers, origin
//! check, rate limit, JSON body, request log) and reach one of two routes:
//! a liveness check and a database-clock probe that borrows a connection from
//! a bounded pool.
//!
//! ## Pieces
//!
//! - [`Pool`]: bounded connections, acquire timeout, idle reaping, fail-fast
//!   startup probe. Generic over a [`Connect`] seam; PostgreSQL lives in
//!   [`pool::postgres`].
//! - [`Pipeline`](middleware::Pipeline): ordered [`Stage`](middleware::Stage)s,
//!   each either passing the request on or answering it.
//! - [`Router`]: radix-tree dispatch via [`matchit`].
//! - [`fallback`]: not-found and unhandled-error terminal handlers.
//! - [`Server`]: hyper HTTP/1.1 + HTTP/2, graceful shutdown.
//!
//! ## Wiring it up
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use caregate::middleware::MemoryStore;
//! use caregate::pool::postgres::PgConnector;
//! use caregate::{app, Config, Pool, PoolConfig, Server};
//! use clap::Parser;
//!
//! # async fn run() -> Result<(), caregate::Error> {
//! let config = Config::parse();
//! let pool = Pool::connect(PgConnector::new(&config.db), PoolConfig::default()).await?;
//! let app = app::build(&config, pool.clone(), Arc::new(MemoryStore::new()));
//!
//! Server::bind(config.listen_addr()).await?.serve(app).await?;
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod app;
pub mod config;
pub mod fallback;
pub mod health;
pub mod middleware;
pub mod pool;

pub use config::{Config, DbConfig};
pub use error::{BoxError, Error, Failure, PoolError, Rejection};
pub use handler::Handler;
pub use method::Method;
pub use pool::{Connect, Connection, Pool, PoolConfig, PoolStatus, PooledConnection, Row};
pub use request::{Body, Request, RequestHead};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use status::Status;
