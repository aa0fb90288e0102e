//! Application kernel
//!
//! Owns the configuration, the service container and the root router.
//! Registration methods delegate to the router; `run` wires up logging, the
//! runtime and the native server.

use crate::config::Config;
use crate::container::Container;
use crate::handler::Handler;
use crate::middleware::{Csrf, Middleware, SessionConfig, SessionStore, Sessions, Trace};
use crate::router::{RouteOptions, Router};
use crate::view::ViewRenderer;
use crate::{Request, Response, Result};
use std::sync::Arc;
use std::time::Duration;

/// How often expired sessions are swept while serving
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Jimo application
#[derive(Clone)]
pub struct App {
    config: Config,
    router: Router,
    container: Container,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl App {
    /// Load `.env` and the process environment, then build the app
    pub fn new() -> Result<Self> {
        Ok(Self::with_config(Config::load()?))
    }

    /// Build with explicit configuration
    ///
    /// Every request is traced; see [`Trace`].
    pub fn with_config(config: Config) -> Self {
        let mut router = Router::new();
        router.use_middleware(Trace::default());
        Self {
            config,
            router,
            container: Container::new(),
            sessions: None,
        }
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root routing scope
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Service container shared by the whole app
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// `APP_ENV`
    pub fn env(&self) -> &str {
        &self.config.env
    }

    /// `APP_DEBUG`
    pub fn debug(&self) -> bool {
        self.config.debug
    }

    /// Enable the web stack: sessions backed by `store`, then CSRF checks
    ///
    /// While serving, `store` is swept for expired sessions every
    /// [`SESSION_SWEEP_INTERVAL`].
    pub fn web(&mut self, store: Arc<dyn SessionStore>) -> &mut Self {
        let sessions = SessionConfig::default().secure(self.config.is_production());
        self.router.use_middleware(Sessions::new(Arc::clone(&store), sessions));
        self.router.use_middleware(Csrf::default());
        self.sessions = Some(store);
        self
    }

    /// Append app-wide middleware
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.router.use_middleware(middleware);
        self
    }

    /// Register a GET route on the root scope
    pub fn get(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.router.get(pattern, handler)
    }

    /// Register a POST route on the root scope
    pub fn post(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.router.post(pattern, handler)
    }

    /// Register a PUT route on the root scope
    pub fn put(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.router.put(pattern, handler)
    }

    /// Register a PATCH route on the root scope
    pub fn patch(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.router.patch(pattern, handler)
    }

    /// Register a DELETE route on the root scope
    pub fn delete(&self, pattern: &str, handler: impl Handler) -> Result<()> {
        self.router.delete(pattern, handler)
    }

    /// GET route with options
    pub fn get_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.router.get_with(pattern, handler, options)
    }

    /// POST route with options
    pub fn post_with(&self, pattern: &str, handler: impl Handler, options: RouteOptions) -> Result<()> {
        self.router.post_with(pattern, handler, options)
    }

    /// Register routes in a child scope under `prefix`
    pub fn group<F>(&self, prefix: &str, setup: F) -> Result<()>
    where
        F: FnOnce(&mut Router) -> Result<()>,
    {
        self.router.group(prefix, setup)
    }

    /// Reverse-route a named route
    pub fn url(&self, name: &str, params: &[(&str, &str)]) -> Option<String> {
        self.router.url(name, params)
    }

    /// Install the view renderer used by `Context::view`
    pub fn views(&self, renderer: impl ViewRenderer + 'static) {
        self.router.set_views(renderer);
    }

    /// Dispatch a request without a transport
    pub async fn handle(&self, req: Request) -> Response {
        self.router.dispatch(req).await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("container", &self.container)
            .field("sessions", &self.sessions.is_some())
            .finish()
    }
}

#[cfg(feature = "native")]
impl App {
    /// Serve on the configured address until Ctrl-C
    pub async fn listen(&self) -> Result<()> {
        let sweeper = self
            .sessions
            .as_ref()
            .map(|store| tokio::spawn(sweep_sessions(Arc::clone(store), SESSION_SWEEP_INTERVAL)));

        let result = crate::server::serve(&self.router, &self.config.server, shutdown_signal()).await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }

    /// Install logging, start a runtime with the configured worker count and
    /// serve until Ctrl-C
    pub fn run(self) -> Result<()> {
        crate::logging::init(&self.config);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.server.workers)
            .enable_all()
            .build()?;

        tracing::info!(
            env = %self.config.env,
            workers = self.config.server.workers,
            "starting jimo"
        );
        runtime.block_on(self.listen())
    }
}

/// Drop expired sessions every `every` until aborted
#[cfg(feature = "native")]
async fn sweep_sessions(store: Arc<dyn SessionStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        store.cleanup();
        tracing::debug!("expired sessions swept");
    }
}

#[cfg(feature = "native")]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{MemoryStore, SessionStore};
    use crate::{Context, Method, RequestBuilder, StatusCode};

    fn app() -> App {
        App::with_config(Config::default())
    }

    #[tokio::test]
    async fn test_requests_are_traced() {
        let app = app();
        app.get("/", |_ctx: Context| async { Ok(Response::text("home")) }).unwrap();

        let res = app.handle(Request::new(Method::Get, "/")).await;
        assert_eq!(res.body_string().as_deref(), Some("home"));
        assert!(res.header("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_web_stack() {
        let mut app = app();
        app.web(Arc::new(MemoryStore::new()));
        app.get("/form", |ctx: Context| async move { Ok(Response::text(ctx.csrf_token())) })
            .unwrap();
        app.post("/posts", |_ctx: Context| async { Ok(Response::text("created")) })
            .unwrap();

        let res = app.handle(Request::new(Method::Get, "/form")).await;
        let token = res.body_string().unwrap();
        assert!(!token.is_empty());
        let cookie = res
            .header("set-cookie")
            .and_then(|c| c.split(';').next())
            .unwrap()
            .to_string();

        let res = app.handle(Request::new(Method::Post, "/posts")).await;
        assert_eq!(res.status, StatusCode::PAGE_EXPIRED);

        let req = RequestBuilder::new(Method::Post, "/posts")
            .header("cookie", cookie)
            .header("x-csrf-token", token)
            .build();
        let res = app.handle(req).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body_string().as_deref(), Some("created"));
    }

    #[tokio::test]
    async fn test_anonymous_traffic_leaves_store_empty() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app();
        app.web(store.clone());
        app.get("/", |_ctx: Context| async { Ok(Response::text("home")) }).unwrap();

        for _ in 0..1000 {
            let res = app.handle(Request::new(Method::Get, "/")).await;
            assert_eq!(res.status, StatusCode::OK);
            assert!(res.header("set-cookie").is_none());
        }
        assert!(store.is_empty());
    }

    #[cfg(feature = "native")]
    #[tokio::test]
    async fn test_sweeper_drops_expired_sessions() {
        use crate::middleware::SessionData;

        let store = Arc::new(MemoryStore::new());
        store.set("stale", SessionData::default(), Duration::ZERO);
        store.set("live", SessionData::default(), Duration::from_secs(60));

        let sweeper = tokio::spawn(sweep_sessions(store.clone(), Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(store.len(), 1);
        assert!(store.get("live").is_some());
    }

    #[tokio::test]
    async fn test_container_reaches_handlers() {
        #[derive(Clone)]
        struct Greeting(&'static str);

        let app = app();
        app.container().singleton(Greeting("hello")).unwrap();
        let container = app.container().clone();
        app.get("/greet", move |_ctx: Context| {
            let container = container.clone();
            async move { Ok(Response::text(container.resolve::<Greeting>()?.0)) }
        })
        .unwrap();

        let res = app.handle(Request::new(Method::Get, "/greet")).await;
        assert_eq!(res.body_string().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_login_flow() {
        use crate::middleware::{auth, RequireAuth};

        let mut app = app();
        app.web(Arc::new(MemoryStore::new()));
        app.post("/api/login", |ctx: Context| async move {
            auth::login(&ctx, 7)?;
            Ok(Response::ok())
        })
        .unwrap();
        app.group("/account", |account| {
            account.use_middleware(RequireAuth);
            account.get("/", |ctx: Context| async move {
                Ok(Response::text(auth::user_id(&ctx).unwrap_or_default().to_string()))
            })
        })
        .unwrap();

        let res = app.handle(Request::new(Method::Get, "/account")).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);

        let res = app.handle(Request::new(Method::Post, "/api/login")).await;
        let cookie = res
            .header("set-cookie")
            .and_then(|c| c.split(';').next())
            .unwrap()
            .to_string();

        let req = RequestBuilder::new(Method::Get, "/account").header("cookie", cookie).build();
        let res = app.handle(req).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body_string().as_deref(), Some("7"));
    }
}
