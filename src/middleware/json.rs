use http::header::CONTENT_TYPE;
use tracing::debug;

use super::{Flow, Stage};
use crate::error::Rejection;
use crate::request::{Body, Request};
use crate::response::IntoResponse;

/// Largest JSON body accepted, in bytes.
pub const DEFAULT_JSON_LIMIT: usize = 100 * 1024;

/// Parses `application/json` (and `*/*+json`) bodies into [`Request::json`].
///
/// Strict: the top-level value must be an object or an array. Anything else,
/// or text that is not JSON at all, is answered with `400`. Other content
/// types and empty bodies pass through unparsed.
pub struct JsonBody {
    limit: usize,
}

impl JsonBody {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json")
        || essence
            .rsplit_once('+')
            .is_some_and(|(_, suffix)| suffix.eq_ignore_ascii_case("json"))
}

fn reject(rejection: Rejection) -> Flow {
    debug!(%rejection, "JSON body rejected");
    Flow::Respond(rejection.into_response())
}

impl Stage for JsonBody {
    fn name(&self) -> &'static str { "json_body" }

    fn on_request(&self, req: &mut Request) -> Flow {
        if !req.header(CONTENT_TYPE.as_str()).is_some_and(is_json) {
            return Flow::Continue;
        }

        let bytes = match &req.body {
            Body::Full(bytes) => bytes,
            Body::TooLarge => return reject(Rejection::PayloadTooLarge { limit: self.limit }),
            Body::Unreadable => {
                return reject(Rejection::MalformedBody("body could not be read".into()));
            }
        };
        if bytes.len() > self.limit {
            return reject(Rejection::PayloadTooLarge { limit: self.limit });
        }
        if bytes.is_empty() {
            return Flow::Continue;
        }

        match bytes.iter().copied().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{' | b'[') => {}
            _ => {
                let detail = "top-level value must be an object or array";
                return reject(Rejection::MalformedBody(detail.into()));
            }
        }

        match serde_json::from_slice(bytes) {
            Ok(value) => {
                req.json = Some(value);
                Flow::Continue
            }
            Err(e) => reject(Rejection::MalformedBody(e.to_string())),
        }
    }
}
