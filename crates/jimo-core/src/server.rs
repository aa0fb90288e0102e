//! Native HTTP server
//!
//! hyper HTTP/1.1 connections on a tuned tokio listener:
//! - SO_REUSEADDR / SO_REUSEPORT
//! - TCP_NODELAY for low latency
//! - header read deadline and request body limit
//! - connection tracking so shutdown can drain in-flight requests

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::{Error, Method, Request, Response, Result, Router, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Create a TCP socket with optimizations
pub fn create_optimized_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // SO_REUSEPORT - enable kernel load balancing across processes
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    // TCP_NODELAY - disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(1024)?;

    Ok(socket)
}

/// Convert a hyper request head and collected body into a [`Request`]
///
/// Fails for methods outside [`Method`]. Header values that are not visible
/// ASCII are dropped.
pub fn from_hyper_request(parts: http::request::Parts, body: Bytes) -> Result<Request> {
    let method: Method = parts.method.as_str().parse()?;

    let mut request = Request::new(method, parts.uri.path());
    request.query = parts.uri.query().map(str::to_string);
    request.body = body;
    for (name, value) in &parts.headers {
        if let Ok(v) = value.to_str() {
            request.headers.push((name.to_string(), v.to_string()));
        }
    }

    Ok(request)
}

/// Convert a [`Response`] into a hyper response
pub fn to_hyper_response(res: Response) -> Result<hyper::Response<Full<Bytes>>> {
    let mut builder = hyper::Response::builder().status(res.status.as_u16());

    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Full::new(res.body))
        .map_err(|e| Error::Hyper(e.to_string()))
}

async fn handle_request(
    dispatcher: Dispatcher,
    req: hyper::Request<Incoming>,
    max_body_size: usize,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let response = match Limited::new(body, max_body_size).collect().await {
        Err(e) if e.is::<LengthLimitError>() => {
            Response::text("Payload Too Large").with_status(StatusCode::PAYLOAD_TOO_LARGE)
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            Response::bad_request("Failed to read request body")
        }
        Ok(collected) => match from_hyper_request(parts, collected.to_bytes()) {
            Ok(request) => dispatcher.dispatch(request).await,
            // Methods the router cannot register never match a route.
            Err(_) => Response::not_found(),
        },
    };

    to_hyper_response(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "handler produced an invalid response head");
        let fallback = crate::translate::internal_error();
        let mut res = hyper::Response::new(Full::new(fallback.body));
        *res.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        res.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static(crate::response::JSON_CONTENT_TYPE),
        );
        res
    })
}

/// Tracks active connections for graceful shutdown
///
/// Connection tasks subscribe to the shutdown flag and stop keep-alive once
/// it flips.
#[derive(Debug)]
pub struct ConnectionTracker {
    active: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self {
            active: AtomicU64::new(0),
            shutdown: watch::channel(false).0,
        }
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Get current active connection count
    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal that shutdown is in progress
    pub fn start_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`start_shutdown`](Self::start_shutdown) was called
    pub async fn shutdown_started(&self) {
        let mut rx = self.shutdown.subscribe();
        // Err only when the sender is gone, which cannot outlive `self`.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Wait until no connection is open or `timeout` passes
    ///
    /// Returns true if all connections drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.count() == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Decrements the tracker when a connection task ends, panics included
struct ConnectionGuard(Arc<ConnectionTracker>);

impl ConnectionGuard {
    fn new(tracker: Arc<ConnectionTracker>) -> Self {
        tracker.increment();
        Self(tracker)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// A bound listener ready to serve a router
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    header_read_timeout: Duration,
    max_body_size: usize,
    tracker: Arc<ConnectionTracker>,
}

impl Server {
    /// Resolve and bind `config.hostname:config.port`
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = tokio::net::lookup_host(config.addr())
            .await?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve {}", config.addr())))?;

        let socket = create_optimized_socket(&addr)?;
        let listener = TcpListener::from_std(socket.into())?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            shutdown_timeout: config.shutdown_timeout,
            header_read_timeout: config.header_read_timeout,
            max_body_size: config.max_body_size,
            tracker: Arc::new(ConnectionTracker::new()),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle on the connection tracker
    pub fn connections(&self) -> Arc<ConnectionTracker> {
        Arc::clone(&self.tracker)
    }

    /// Serve until `shutdown` resolves, then drain open connections
    pub async fn serve(self, router: &Router, shutdown: impl Future<Output = ()>) -> Result<()> {
        let dispatcher = router.dispatcher();
        let tracker = self.tracker;
        tokio::pin!(shutdown);

        tracing::info!(addr = %self.local_addr, "listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::debug!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let dispatcher = dispatcher.clone();
                    let tracker = Arc::clone(&tracker);
                    let guard = ConnectionGuard::new(Arc::clone(&tracker));
                    let max_body_size = self.max_body_size;
                    let mut builder = http1::Builder::new();
                    builder
                        .timer(TokioTimer::new())
                        .header_read_timeout(self.header_read_timeout);

                    tokio::spawn(async move {
                        let _guard = guard;
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let dispatcher = dispatcher.clone();
                            async move { Ok::<_, Infallible>(handle_request(dispatcher, req, max_body_size).await) }
                        });

                        let conn = builder.serve_connection(io, service);
                        tokio::pin!(conn);
                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = tracker.shutdown_started() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = result {
                            tracing::debug!(%peer, error = %e, "connection error");
                        }
                    });
                }
                _ = &mut shutdown => break,
            }
        }

        // Stop accepting before waiting on open connections.
        drop(self.listener);
        tracker.start_shutdown();

        let open = tracker.count();
        if open > 0 {
            tracing::info!(open, "waiting for connections to close");
        }
        if !tracker.drain(self.shutdown_timeout).await {
            tracing::warn!(open = tracker.count(), "shutdown timeout reached, dropping connections");
        }

        tracing::info!("server stopped");
        Ok(())
    }
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(router: &Router, config: &ServerConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    Server::bind(config).await?.serve(router, shutdown).await
}
