//! The gateway with one extra stage and one extra route.
//!
//! Run against a local PostgreSQL:
//!   DB_USER=postgres DB_PASSWORD=postgres RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:5000/
//!   curl -i http://localhost:5000/test-db
//!   curl -i http://localhost:5000/pool
//!   curl -i -H 'origin: https://evil.test' http://localhost:5000/

use std::sync::Arc;

use caregate::middleware::{Flow, MemoryStore, Pipeline, Stage};
use caregate::pool::postgres::PgConnector;
use caregate::{app, Config, Pool, PoolConfig, Request, RequestHead, Response, Server};
use clap::Parser;
use http::HeaderValue;

/// Tags every response with a sequential request number.
struct RequestCounter(std::sync::atomic::AtomicU64);

impl Stage for RequestCounter {
    fn name(&self) -> &'static str { "request_counter" }

    fn on_request(&self, _req: &mut Request) -> Flow {
        Flow::Continue
    }

    fn on_response(&self, _head: &RequestHead, res: &mut Response) {
        let n = self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        res.headers_mut().insert("x-request-number", HeaderValue::from(n));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let config = Config::parse();

    let pool = Pool::connect(PgConnector::new(&config.db), PoolConfig::default()).await?;

    // The standard routes plus a pool-status endpoint.
    let status_pool = pool.clone();
    let routes = app::routes(pool.clone()).get("/pool", move |_req: Request| {
        let status = status_pool.status();
        async move {
            Response::json(&serde_json::json!({
                "capacity": status.capacity,
                "open": status.open,
                "idle": status.idle,
                "checkedOut": status.checked_out,
            }))
        }
    });

    let app = Pipeline::standard(&config, Arc::new(MemoryStore::new()), routes)
        .stage(RequestCounter(Default::default()));

    Server::bind(config.listen_addr()).await?.serve(app).await?;
    pool.close().await;
    Ok(())
}
