//! Middleware composition
//!
//! A middleware transforms the next handler into a new handler. A chain
//! `[m1, m2, .., mn]` runs m1 outermost: its pre-logic first, its
//! post-logic last.

pub mod auth;
pub mod cookie;
pub mod csrf;
pub mod session;
pub mod trace;

// Re-exports for convenience
pub use auth::RequireAuth;
pub use cookie::{Cookie, SameSite};
pub use csrf::{Csrf, CsrfConfig};
pub use session::{MemoryStore, Session, SessionConfig, SessionData, SessionStore, Sessions};
pub use trace::{Trace, TraceConfig};

use crate::handler::{BoxHandler, HandlerFuture};
use crate::{Context, Response, Result};
use std::future::Future;
use std::sync::Arc;

/// Handler transformer
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxHandler) -> BoxHandler;
}

/// Shared, type-erased middleware
pub type BoxMiddleware = Arc<dyn Middleware>;

/// `None` leaves the chain untouched
impl<M: Middleware> Middleware for Option<M> {
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        match self {
            Some(middleware) => middleware.wrap(next),
            None => next,
        }
    }
}

impl Middleware for BoxMiddleware {
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        (**self).wrap(next)
    }
}

/// Wrap `handler` with `chain`, first entry outermost
pub fn compose(handler: BoxHandler, chain: &[BoxMiddleware]) -> BoxHandler {
    chain.iter().rev().fold(handler, |next, middleware| middleware.wrap(next))
}

/// The rest of the chain, as seen from a [`from_fn`] middleware
#[derive(Clone)]
pub struct Next {
    inner: BoxHandler,
}

impl Next {
    /// Continue with the inner handler
    pub fn run(self, ctx: Context) -> HandlerFuture {
        self.inner.call(ctx)
    }
}

/// Middleware built from an async function of `(Context, Next)`
pub struct FromFn<F> {
    f: Arc<F>,
}

/// Build a middleware from an async closure
///
/// ```
/// use jimo_core::middleware::{from_fn, Next};
/// use jimo_core::Context;
///
/// let stamp = from_fn(|ctx: Context, next: Next| async move {
///     let mut res = next.run(ctx).await?;
///     res.set_header("x-powered-by", "jimo");
///     Ok(res)
/// });
/// # let _ = stamp;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    FromFn { f: Arc::new(f) }
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        let f = Arc::clone(&self.f);
        Arc::new(move |ctx: Context| {
            let next = Next {
                inner: Arc::clone(&next),
            };
            f(ctx, next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::boxed;
    use crate::{Method, Request};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(name: &'static str, log: Log) -> BoxMiddleware {
        Arc::new(from_fn(move |ctx: Context, next: Next| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{}-before", name));
                let res = next.run(ctx).await;
                log.lock().push(format!("{}-after", name));
                res
            }
        }))
    }

    fn terminal(log: Log) -> BoxHandler {
        boxed(move |_ctx: Context| {
            let log = log.clone();
            async move {
                log.lock().push("H".to_string());
                Ok(Response::ok())
            }
        })
    }

    fn ctx() -> Context {
        Context::new(Request::new(Method::Get, "/"))
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log: Log = Arc::default();
        let chain = vec![recording("A", log.clone()), recording("B", log.clone())];

        let handler = compose(terminal(log.clone()), &chain);
        handler.call(ctx()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["A-before", "B-before", "H", "B-after", "A-after"]
        );
    }

    #[tokio::test]
    async fn test_none_entry_is_skipped() {
        let log: Log = Arc::default();
        let missing: Option<RequireAuth> = None;
        let chain: Vec<BoxMiddleware> = vec![
            recording("A", log.clone()),
            Arc::new(missing),
            recording("B", log.clone()),
        ];

        compose(terminal(log.clone()), &chain).call(ctx()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["A-before", "B-before", "H", "B-after", "A-after"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let log: Log = Arc::default();
        let deny: BoxMiddleware = Arc::new(from_fn(|_ctx: Context, _next: Next| async {
            Err::<Response, _>(crate::Error::from(crate::HttpError::forbidden("nope")))
        }));
        let chain = vec![recording("A", log.clone()), deny];

        let result = compose(terminal(log.clone()), &chain).call(ctx()).await;

        assert!(result.is_err());
        assert_eq!(*log.lock(), vec!["A-before", "A-after"]);
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let log: Log = Arc::default();
        compose(terminal(log.clone()), &[]).call(ctx()).await.unwrap();
        assert_eq!(*log.lock(), vec!["H"]);
    }
}
