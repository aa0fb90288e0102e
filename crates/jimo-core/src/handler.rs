//! Request handlers
//!
//! Any `Fn(Context) -> impl Future<Output = Result<Response>>` that is
//! `Send + Sync + 'static` is a handler.

use crate::{Context, Response, Result};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a type-erased handler
pub type HandlerFuture = BoxFuture<'static, Result<Response>>;

/// Terminal request handler
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin(self(ctx))
    }
}

/// Shared, type-erased handler
pub type BoxHandler = Arc<dyn Handler>;

/// Erase a handler's type
pub fn boxed(handler: impl Handler) -> BoxHandler {
    Arc::new(handler)
}
