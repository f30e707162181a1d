//! Terminal handlers. Always last in the pipeline.
//!
//! | Handler | Trigger | Response |
//! |---|---|---|
//! | [`not_found`] | no route matched | `404 {"error":"Route not found"}` |
//! | [`unhandled`] | a handler failed or panicked | `500 {"error":"Internal Server Error"}` |

use tracing::{debug, error};

use crate::error::{Failure, Rejection};
use crate::request::RequestHead;
use crate::response::{IntoResponse, Response};
use crate::status::Status;

pub fn not_found(head: &RequestHead) -> Response {
    let rejection = Rejection::RouteNotFound {
        method: head.method().to_string(),
        path: head.path().to_owned(),
    };
    debug!(%rejection, "unmatched request");
    rejection.into_response()
}

/// Logs the full failure chain server-side and answers with a generic body.
pub fn unhandled(failure: Failure) -> Response {
    error!(error = %failure, source = ?std::error::Error::source(&failure), "unhandled error");
    Response::error(Status::InternalServerError, "Internal Server Error")
}
