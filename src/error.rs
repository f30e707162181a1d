//! Error taxonomy.
//!
//! One type per layer:
//!
//! | Type | Raised by | Recovered at | Client sees |
//! |---|---|---|---|
//! | [`Error`] | bootstrap, listener | `main` (fatal for [`Error::Startup`]) | nothing, the process exits |
//! | [`PoolError`] | [`Pool`](crate::Pool) | the handler | `500 {"error":"Database error"}` |
//! | [`Rejection`] | middleware stages, router | the pipeline | the matching 4xx |
//! | [`Failure`] | handlers | the unhandled fallback | `500 {"error":"Internal Server Error"}` |
//!
//! Internal detail never crosses into a response body. It is logged instead.

use std::time::Duration;

use thiserror::Error;

use crate::response::{IntoResponse, Response};
use crate::status::Status;

/// Boxed error used where the concrete driver error type is erased.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Process-level failures: binding to a port, accepting a connection, or the
/// startup probe.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The startup acquire+release cycle failed. Serving traffic without a
    /// working pool is worse than not starting, so this one is fatal.
    #[error("database unavailable at startup: {0}")]
    Startup(#[source] PoolError),
}

impl Error {
    /// `true` when the process must stop instead of serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Startup(_))
    }
}

/// Failures of the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    #[error("timed out after {0:?} waiting for a database connection")]
    ConnectionTimeout(Duration),

    /// The database refused the connection attempt (credentials, network, TLS).
    #[error("database refused the connection: {0}")]
    ConnectionRefused(#[source] BoxError),

    /// The statement failed on a checked-out connection.
    #[error("query failed: {0}")]
    Query(#[source] BoxError),

    #[error("connection pool is closed")]
    Closed,
}

/// Requests turned away before reaching a handler.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("origin `{0}` is not allowed")]
    OriginNotAllowed(String),

    #[error("rate limit of {limit} requests exceeded, retry in {retry_after:?}")]
    RateLimited { limit: u32, retry_after: Duration },

    #[error("malformed JSON body: {0}")]
    MalformedBody(String),

    #[error("JSON body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },
}

impl Rejection {
    pub fn status(&self) -> Status {
        match self {
            Self::OriginNotAllowed(_) => Status::Forbidden,
            Self::RateLimited { .. } => Status::TooManyRequests,
            Self::MalformedBody(_) => Status::BadRequest,
            Self::PayloadTooLarge { .. } => Status::ContentTooLarge,
            Self::RouteNotFound { .. } => Status::NotFound,
        }
    }

    /// The message placed in the `{"error": …}` body.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::OriginNotAllowed(_) => "Origin not allowed",
            Self::RateLimited { .. } => "Too many requests from this IP, please try again later.",
            Self::MalformedBody(_) => "Malformed JSON body",
            Self::PayloadTooLarge { .. } => "Payload too large",
            Self::RouteNotFound { .. } => "Route not found",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        Response::error(self.status(), self.public_message())
    }
}

/// A handler failure nobody recovered. Rendered by
/// [`fallback::unhandled`](crate::fallback::unhandled).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Failure(#[source] BoxError);

impl Failure {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(err.into())
    }

    /// Builds a failure from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        Self(format!("panic: {msg}").into())
    }
}

impl From<PoolError> for Failure {
    fn from(err: PoolError) -> Self {
        Self(Box::new(err))
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Self(Box::new(err))
    }
}
