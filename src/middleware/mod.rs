//! Middleware pipeline.
//!
//! An ordered list of [`Stage`]s in front of the [`Router`]. The driver in
//! [`Pipeline::handle`] runs them one by one:
//!
//! ```text
//! Received ─▶ stage 1 ─▶ stage 2 ─▶ … ─▶ router ─┬─ handler ──────── Handled
//!               │           │                    └─ not_found ────── Unmatched
//!               └───────────┴── Flow::Respond ─────────────────────── ShortCircuited
//!                                                        │
//!          on_response, innermost entered stage first ◀──┘ ─▶ ResponseSent
//! ```
//!
//! Exactly one response leaves the pipeline per request. Once a stage answers
//! with [`Flow::Respond`], no later stage and no handler runs. Every stage that
//! was entered (including the one that answered) sees the final response once
//! in [`Stage::on_response`].

mod cors;
mod json;
mod logger;
mod rate_limit;
mod security;

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::request::{Request, RequestHead};
use crate::response::Response;
use crate::router::Router;

pub use cors::{OriginCheck, ALLOWED_METHODS};
pub use json::{JsonBody, DEFAULT_JSON_LIMIT};
pub use logger::RequestLogger;
pub use rate_limit::{Hit, MemoryStore, Quota, RateLimit, RateLimitStore, DEFAULT_LIMIT, DEFAULT_WINDOW};
pub use security::SecurityHeaders;

/// What a stage decided about the request.
#[derive(Debug)]
pub enum Flow {
    /// Hand the request to the next stage.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
}

/// One step of the pipeline.
///
/// Stages are built once at start-up and shared by every request. They hold
/// configuration, not per-request state; per-request values go into the
/// request's extensions.
pub trait Stage: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn on_request(&self, req: &mut Request) -> Flow;

    /// Annotates the outgoing response. Default: no-op.
    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        let _ = (head, res);
    }
}

/// The ordered stages plus the router they guard.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    router: Router,
}

impl Pipeline {
    /// A pipeline with no stages: every request goes straight to `router`.
    pub fn new(router: Router) -> Self {
        Self { stages: Vec::new(), router }
    }

    /// Appends a stage. Stages run in the order they were added.
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// The gateway's fixed order: security headers, origin check, rate limit,
    /// JSON body, then the request logger outside production.
    pub fn standard(config: &Config, store: Arc<dyn RateLimitStore>, router: Router) -> Self {
        let pipeline = Self::new(router)
            .stage(SecurityHeaders::default())
            .stage(OriginCheck::new(config.origins()))
            .stage(RateLimit::new(store, DEFAULT_LIMIT, DEFAULT_WINDOW))
            .stage(JsonBody::new(DEFAULT_JSON_LIMIT));
        if config.is_production() {
            pipeline
        } else {
            pipeline.stage(RequestLogger)
        }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs one request through the stages and the router.
    pub async fn handle(&self, mut req: Request) -> Response {
        let mut entered = 0;
        let mut short_circuit = None;
        for stage in &self.stages {
            entered += 1;
            if let Flow::Respond(res) = stage.on_request(&mut req) {
                debug!(stage = stage.name(), status = ?res.status_code(), "request short-circuited");
                short_circuit = Some(res);
                break;
            }
        }

        let head = req.head().clone();
        let mut response = match short_circuit {
            Some(res) => res,
            None => self.router.dispatch(req).await,
        };

        for stage in self.stages[..entered].iter().rev() {
            stage.on_response(&head, &mut response);
        }
        response
    }
}
