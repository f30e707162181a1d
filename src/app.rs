//! Assembles the gateway: routes, pipeline, shared state.

use std::sync::Arc;

use crate::config::Config;
use crate::health;
use crate::middleware::{Pipeline, RateLimitStore};
use crate::pool::{Connect, Pool};
use crate::request::Request;
use crate::router::Router;

/// `GET /` and `GET /test-db`. The pool handle is moved into the route that
/// needs it; no handler reaches it any other way.
pub fn routes<C: Connect>(pool: Pool<C>) -> Router {
    Router::new()
        .get("/", health::liveness)
        .get("/test-db", move |_req: Request| {
            let pool = pool.clone();
            async move { health::db_time(&pool).await }
        })
}

/// The full application: [`routes`] behind [`Pipeline::standard`].
pub fn build<C: Connect>(config: &Config, pool: Pool<C>, store: Arc<dyn RateLimitStore>) -> Pipeline {
    Pipeline::standard(config, store, routes(pool))
}
