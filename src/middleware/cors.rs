use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD,
    ORIGIN, VARY,
};
use http::HeaderValue;
use tracing::warn;

use super::{Flow, Stage};
use crate::error::Rejection;
use crate::request::{Request, RequestHead};
use crate::response::{IntoResponse, Response};
use crate::status::Status;

/// Methods advertised to preflight requests.
pub const ALLOWED_METHODS: &str = "GET,POST,PUT,DELETE";

/// Origin allow-list.
///
/// A request that carries an `Origin` header outside the list is rejected
/// with `403` before it can reach a handler. Requests without `Origin`
/// (same-origin page loads, curl, probes) pass untouched.
pub struct OriginCheck {
    allowed: Vec<HeaderValue>,
}

impl OriginCheck {
    /// Entries that are not valid header values can never match and are dropped.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = origins
            .into_iter()
            .filter_map(|o| HeaderValue::from_str(o.as_ref()).ok())
            .collect();
        Self { allowed }
    }

    fn allows(&self, origin: &HeaderValue) -> bool {
        self.allowed.iter().any(|a| a == origin)
    }
}

fn is_preflight(req: &Request) -> bool {
    req.method() == http::Method::OPTIONS && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

impl Stage for OriginCheck {
    fn name(&self) -> &'static str { "origin_check" }

    fn on_request(&self, req: &mut Request) -> Flow {
        let Some(origin) = req.headers().get(ORIGIN) else {
            return Flow::Continue;
        };

        if !self.allows(origin) {
            let origin = String::from_utf8_lossy(origin.as_bytes()).into_owned();
            warn!(%origin, peer = %req.remote_addr(), "origin rejected");
            return Flow::Respond(Rejection::OriginNotAllowed(origin).into_response());
        }

        if is_preflight(req) {
            let mut builder = Response::builder()
                .status(Status::NoContent)
                .header(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
            if let Some(requested) = req.headers().get(ACCESS_CONTROL_REQUEST_HEADERS) {
                builder = builder.header(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            }
            return Flow::Respond(builder.no_body());
        }

        Flow::Continue
    }

    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        let Some(origin) = head.headers().get(ORIGIN) else { return };
        if !self.allows(origin) {
            return;
        }
        let headers = res.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}
