//! Route registration and scoping
//!
//! A [`Router`] is a cheap, cloneable scope: a path prefix and a snapshot of
//! inherited middleware over shared [`RouterState`]. Child scopes created by
//! [`Router::group`] copy the parent's middleware at creation time, so
//! middleware added later to one scope never leaks into siblings or
//! ancestors.

use crate::dispatch::Dispatcher;
use crate::handler::{boxed, BoxHandler, Handler};
use crate::middleware::{BoxMiddleware, Middleware};
use crate::view::ViewRenderer;
use crate::{Error, Method, Request, Response, Result};
use jimo_router::{join_path, param_name, segments, RouteTree};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Terminal route data stored in the tree
pub(crate) struct Route {
    pub(crate) handler: BoxHandler,
    /// Scope middleware followed by route middleware, outermost first
    pub(crate) middleware: Vec<BoxMiddleware>,
    pub(crate) name: Option<String>,
    pub(crate) pattern: String,
}

/// Registration state shared by a root router and all of its scopes
#[derive(Default)]
pub(crate) struct RouterState {
    pub(crate) tree: RouteTree<Route>,
    /// Route name -> full pattern
    pub(crate) names: HashMap<String, String>,
    pub(crate) views: Option<Arc<dyn ViewRenderer>>,
}

pub(crate) type SharedState = Arc<RwLock<RouterState>>;

/// Per-route registration options
#[derive(Default, Clone)]
pub struct RouteOptions {
    name: Option<String>,
    middleware: Vec<BoxMiddleware>,
}

impl RouteOptions {
    /// Unnamed route with no extra middleware
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the route for reverse routing
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Middleware applied inside the scope's middleware
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }
}

/// Routing scope
///
/// ```
/// use jimo_core::{Context, Response, RouteOptions, Router};
///
/// let router = Router::new();
/// router
///     .group("/users", |users| {
///         users.get_with(
///             "/{id}",
///             |ctx: Context| async move { Ok(Response::text(ctx.param("id").to_string())) },
///             RouteOptions::new().name("user.show"),
///         )
///     })
///     .unwrap();
///
/// assert_eq!(router.url("user.show", &[("id", "7")]).as_deref(), Some("/users/7"));
/// ```
#[derive(Clone)]
pub struct Router {
    state: SharedState,
    prefix: String,
    middleware: Vec<BoxMiddleware>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a root router with fresh state
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RouterState::default())),
            prefix: String::new(),
            middleware: Vec::new(),
        }
    }

    /// Prefix applied to routes registered on this scope
    pub fn prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }

    /// Append middleware for routes registered on this scope from now on
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Register a route
    ///
    /// Fails when a parameter segment conflicts with an existing parameter
    /// edge, or when the route name is already bound to another pattern.
    /// Either failure leaves the router unchanged.
    pub fn route(&self, method: Method, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        let full = join_path(&self.prefix, pattern);
        let mut middleware = self.middleware.clone();
        middleware.extend(options.middleware);

        let route = Route {
            handler: boxed(handler),
            middleware,
            name: options.name.clone(),
            pattern: full.clone(),
        };

        let mut state = self.state.write();
        if let Some(ref name) = options.name {
            if let Some(existing) = state.names.get(name) {
                if *existing != full {
                    return Err(Error::DuplicateRouteName {
                        name: name.clone(),
                        existing: existing.clone(),
                        pattern: full,
                    });
                }
            }
        }

        let replaced = state.tree.insert(method.as_str(), &full, route)?;
        if let Some(name) = options.name {
            state.names.insert(name, full.clone());
        }
        if let Some(old) = replaced {
            tracing::warn!(
                method = %method,
                pattern = %old.pattern,
                name = old.name.as_deref().unwrap_or(""),
                "route registered twice, replacing previous handler"
            );
        }
        Ok(())
    }

    /// Register a GET route
    pub fn get(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.route(Method::Get, pattern, handler, RouteOptions::default())
    }

    /// Register a POST route
    pub fn post(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.route(Method::Post, pattern, handler, RouteOptions::default())
    }

    /// Register a PUT route
    pub fn put(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.route(Method::Put, pattern, handler, RouteOptions::default())
    }

    /// Register a PATCH route
    pub fn patch(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.route(Method::Patch, pattern, handler, RouteOptions::default())
    }

    /// Register a DELETE route
    pub fn delete(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.route(Method::Delete, pattern, handler, RouteOptions::default())
    }

    /// Register a GET route with a name or route middleware
    pub fn get_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.route(Method::Get, pattern, handler, options)
    }

    /// Register a POST route with a name or route middleware
    pub fn post_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.route(Method::Post, pattern, handler, options)
    }

    /// Register a PUT route with a name or route middleware
    pub fn put_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.route(Method::Put, pattern, handler, options)
    }

    /// Register a PATCH route with a name or route middleware
    pub fn patch_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.route(Method::Patch, pattern, handler, options)
    }

    /// Register a DELETE route with a name or route middleware
    pub fn delete_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.route(Method::Delete, pattern, handler, options)
    }

    /// Register routes under `prefix` in a child scope
    ///
    /// The child starts with a copy of this scope's middleware.
    pub fn group<F>(&self, prefix: &str, setup: F) -> Result<()>
    where
        F: FnOnce(&mut Router) -> Result<()>,
    {
        let mut child = Router {
            state: Arc::clone(&self.state),
            prefix: join_path(&self.prefix, prefix),
            middleware: self.middleware.clone(),
        };
        setup(&mut child)
    }

    /// Build a URL for a named route by plain `{key}` substitution
    ///
    /// `None` for an unknown name. Parameters are not checked against the
    /// pattern: unknown keys are ignored and missing ones stay as `{key}`.
    /// See [`Router::url_checked`] for the strict variant.
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Option<String> {
        let pattern = self.state.read().names.get(name)?.clone();
        Some(params.iter().fold(pattern, |url, (key, value)| {
            url.replace(&format!("{{{}}}", key), value)
        }))
    }

    /// Build a URL for a named route, requiring exactly the pattern's captures
    pub fn url_checked(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let pattern = self
            .state
            .read()
            .names
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownRoute(name.to_string()))?;

        let supplied: HashMap<&str, &str> = params.iter().copied().collect();
        let declared: BTreeSet<&str> = segments(&pattern).filter_map(param_name).collect();

        if let Some(extra) = supplied.keys().find(|key| !declared.contains(*key)) {
            return Err(Error::UrlParameter {
                name: name.to_string(),
                detail: format!("unexpected parameter `{}`", extra),
            });
        }

        let mut url = String::with_capacity(pattern.len());
        for segment in segments(&pattern) {
            url.push('/');
            match param_name(segment) {
                Some(param) => {
                    let value = supplied.get(param).ok_or_else(|| Error::UrlParameter {
                        name: name.to_string(),
                        detail: format!("missing parameter `{}`", param),
                    })?;
                    url.push_str(value);
                }
                None => url.push_str(segment),
            }
        }
        if url.is_empty() {
            url.push('/');
        }
        Ok(url)
    }

    /// Set the renderer handed to every request context
    pub fn set_views(&self, views: impl ViewRenderer + 'static) {
        self.state.write().views = Some(Arc::new(views));
    }

    /// Request dispatcher over this router's state
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.state))
    }

    /// Dispatch one request; never fails
    pub async fn dispatch(&self, req: Request) -> Response {
        self.dispatcher().dispatch(req).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}
