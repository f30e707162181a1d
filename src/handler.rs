//! Route handler trait and type erasure.
//!
//! The router stores handlers of different concrete types side by side, so
//! each one is wrapped and stored as a trait object:
//!
//! ```text
//! async fn db_time(req: Request) -> Response { … }   ← what you write
//!        ↓ router.get("/test-db", db_time)
//! Arc::new(FnHandler(db_time))                       ← BoxedHandler
//!        ↓ handler.call(req) per request
//! Box::pin(catch_unwind(db_time(req)))               ← BoxFuture<Response>
//! ```
//!
//! A handler that panics never takes the connection down with it: the panic
//! is caught at this boundary, both while the handler builds its future and
//! while the future runs, and rendered by [`fallback::unhandled`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::error::Failure;
use crate::fallback;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Heap-allocated, type-erased future resolving to the handler's [`Response`].
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the return type of
/// [`Handler::into_boxed_handler`].
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// Closures with the same shape qualify too, which is how handlers get hold
/// of the connection pool. The trait is sealed; only the blanket impl below
/// satisfies it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        // Closures can panic before they hand back a future.
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.0)(req))) {
            Ok(fut) => fut,
            Err(panic) => {
                let res = fallback::unhandled(Failure::from_panic(panic));
                return Box::pin(std::future::ready(res));
            }
        };
        Box::pin(async move {
            // Handlers own their request and return an owned response; nothing
            // observable is left half-updated when one unwinds.
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(res) => res.into_response(),
                Err(panic) => fallback::unhandled(Failure::from_panic(panic)),
            }
        })
    }
}
