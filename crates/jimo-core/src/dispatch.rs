//! Per-request dispatch
//!
//! Lookup runs under the router's read lock; the guard is dropped before the
//! handler chain is polled, so handlers never hold the lock. Every failure
//! inside the chain, panics included, ends here as a response.

use crate::handler::BoxHandler;
use crate::middleware::{compose, BoxMiddleware};
use crate::router::SharedState;
use crate::translate;
use crate::view::ViewRenderer;
use crate::{Context, Request, Response};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Everything a request needs from the route tree
struct Resolved {
    handler: BoxHandler,
    middleware: Vec<BoxMiddleware>,
    params: Vec<(String, String)>,
    views: Option<Arc<dyn ViewRenderer>>,
}

/// Request dispatcher
///
/// Cloning is cheap; clones share the router state.
#[derive(Clone)]
pub struct Dispatcher {
    state: SharedState,
}

impl Dispatcher {
    pub(crate) fn new(state: SharedState) -> Self {
        Self { state }
    }

    fn resolve(&self, req: &Request) -> Option<Resolved> {
        let state = self.state.read();
        let matched = state.tree.find(req.method.as_str(), &req.path)?;
        Some(Resolved {
            handler: Arc::clone(&matched.value.handler),
            middleware: matched.value.middleware.clone(),
            params: matched.params,
            views: state.views.clone(),
        })
    }

    /// Handle one request
    ///
    /// Unmatched method or path is a plain-text 404 and builds no context.
    pub async fn dispatch(&self, req: Request) -> Response {
        let Some(route) = self.resolve(&req) else {
            tracing::debug!(method = %req.method, path = %req.path, "no route matched");
            return Response::not_found();
        };

        let run = async move {
            let ctx = Context::new(req)
                .with_params(route.params)
                .with_views(route.views);
            let handler = if route.middleware.is_empty() {
                route.handler
            } else {
                compose(route.handler, &route.middleware)
            };
            handler.call(ctx).await
        };

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(res)) => res,
            Ok(Err(err)) => translate::error_response(err),
            Err(payload) => translate::panic_response(payload),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{from_fn, Next};
    use crate::{Error, HttpError, Method, RequestBuilder, Router, StatusCode, ValidationErrors};
    use parking_lot::Mutex;

    fn body_json(res: &Response) -> serde_json::Value {
        serde_json::from_slice(&res.body).unwrap()
    }

    #[tokio::test]
    async fn test_static_beats_param() {
        let router = Router::new();
        router.get("/users/new", |_ctx: Context| async { Ok(Response::text("new")) }).unwrap();
        router
            .get("/users/{id}", |ctx: Context| async move {
                Ok(Response::text(format!("user {}", ctx.param("id"))))
            })
            .unwrap();

        let res = router.dispatch(Request::new(Method::Get, "/users/new")).await;
        assert_eq!(res.body_string().as_deref(), Some("new"));

        let res = router.dispatch(Request::new(Method::Get, "/users/42")).await;
        assert_eq!(res.body_string().as_deref(), Some("user 42"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let router = Router::new();
        router.get("/users/{id}", |_ctx: Context| async { Ok(Response::ok()) }).unwrap();

        for req in [
            Request::new(Method::Get, "/users"),
            Request::new(Method::Get, "/users/1/extra"),
            Request::new(Method::Post, "/users/1"),
        ] {
            let res = router.dispatch(req).await;
            assert_eq!(res.status, StatusCode::NOT_FOUND);
            assert_eq!(res.body_string().as_deref(), Some("Not Found"));
        }
    }

    #[tokio::test]
    async fn test_path_cleanup() {
        let router = Router::new();
        router.get("/a/b", |_ctx: Context| async { Ok(Response::text("ab")) }).unwrap();

        let res = router.dispatch(Request::new(Method::Get, "//a///b/")).await;
        assert_eq!(res.body_string().as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_422() {
        let router = Router::new();
        router
            .post("/signup", |_ctx: Context| async {
                let mut errors = ValidationErrors::new();
                errors.add("email", "required");
                errors.into_result()?;
                Ok(Response::ok())
            })
            .unwrap();

        let res = router.dispatch(Request::new(Method::Post, "/signup")).await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(body_json(&res)["fields"], serde_json::json!({"email": "required"}));
    }

    #[tokio::test]
    async fn test_untyped_failure_is_500() {
        let router = Router::new();
        router
            .get("/boom", |_ctx: Context| async {
                Err::<Response, _>(Error::other(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "connection string postgres://secret",
                )))
            })
            .unwrap();

        let res = router.dispatch(Request::new(Method::Get, "/boom")).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&res), serde_json::json!({"message": "Internal Server Error"}));
    }

    #[tokio::test]
    async fn test_panics_are_recovered() {
        let router = Router::new();
        router
            .get("/panic", |_ctx: Context| async {
                if true {
                    panic!("secret detail");
                }
                Ok(Response::ok())
            })
            .unwrap();
        router
            .get("/typed", |_ctx: Context| async {
                if true {
                    std::panic::panic_any(HttpError::new(419, "CSRF token mismatch"));
                }
                Ok(Response::ok())
            })
            .unwrap();

        let res = router.dispatch(Request::new(Method::Get, "/panic")).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!res.body_string().unwrap().contains("secret"));

        let res = router.dispatch(Request::new(Method::Get, "/typed")).await;
        assert_eq!(res.status, StatusCode::PAGE_EXPIRED);
        assert_eq!(body_json(&res)["message"], "CSRF token mismatch");

        // The router keeps serving after a panic.
        let res = router.dispatch(Request::new(Method::Get, "/panic")).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_panic_in_middleware() {
        let mut router = Router::new();
        router.use_middleware(from_fn(|_ctx: Context, _next: Next| async {
            if true {
                panic!("middleware exploded");
            }
            Ok(Response::ok())
        }));
        router.get("/", |_ctx: Context| async { Ok(Response::ok()) }).unwrap();

        let res = router.dispatch(Request::new(Method::Get, "/")).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_middleware_order_through_router() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let record = |name: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
            from_fn(move |ctx: Context, next: Next| {
                let log = log.clone();
                async move {
                    log.lock().push(name);
                    let res = next.run(ctx).await;
                    log.lock().push(name);
                    res
                }
            })
        };

        let mut router = Router::new();
        router.use_middleware(record("A", log.clone()));
        router.use_middleware(record("B", log.clone()));
        let handler_log = log.clone();
        router
            .get("/", move |_ctx: Context| {
                let log = handler_log.clone();
                async move {
                    log.lock().push("H");
                    Ok(Response::ok())
                }
            })
            .unwrap();

        router.dispatch(Request::new(Method::Get, "/")).await;
        assert_eq!(*log.lock(), vec!["A", "B", "H", "B", "A"]);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch() {
        let router = Router::new();
        router
            .post("/echo/{id}", |ctx: Context| async move {
                tokio::task::yield_now().await;
                let body = String::from_utf8_lossy(&ctx.request().body).to_string();
                Ok(Response::text(format!("{}:{}", ctx.param("id"), body)))
            })
            .unwrap();

        let dispatcher = router.dispatcher();
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let req = RequestBuilder::new(Method::Post, format!("/echo/{}", i))
                        .body(format!("body-{}", i))
                        .build();
                    (i, dispatcher.dispatch(req).await)
                })
            })
            .collect();

        for task in tasks {
            let (i, res) = task.await.unwrap();
            assert_eq!(res.status, StatusCode::OK);
            assert_eq!(res.body_string().unwrap(), format!("{}:body-{}", i, i));
        }
    }

    #[tokio::test]
    async fn test_route_added_after_dispatcher_created() {
        let router = Router::new();
        let dispatcher = router.dispatcher();
        assert_eq!(
            dispatcher.dispatch(Request::new(Method::Get, "/late")).await.status,
            StatusCode::NOT_FOUND
        );

        router.get("/late", |_ctx: Context| async { Ok(Response::ok()) }).unwrap();
        assert_eq!(
            dispatcher.dispatch(Request::new(Method::Get, "/late")).await.status,
            StatusCode::OK
        );
    }
}
