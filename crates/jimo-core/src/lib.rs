//! jimo-core: routing, middleware and dispatch for the jimo web framework
//!
//! Routes live in a per-method segment trie ([`jimo_router`]). Scoped
//! [`Router`] values register handlers with flattened middleware chains, and
//! the [`Dispatcher`] turns every request into exactly one [`Response`],
//! translating typed failures, untyped failures and panics alike.
//!
//! ## Features
//! - `native` - tokio/hyper HTTP/1.1 server and [`App::run`]

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod app;
pub mod config;
pub mod container;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod router;
pub mod translate;
pub mod view;

#[cfg(feature = "native")]
pub mod server;

// Re-exports
pub use app::App;
pub use config::{Config, ServerConfig};
pub use container::Container;
pub use context::Context;
pub use dispatch::Dispatcher;
pub use error::{Error, FieldErrors, HttpError, Result, ValidationErrors};
pub use handler::{BoxHandler, Handler, HandlerFuture};
pub use request::{Method, Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, StatusCode};
pub use router::{RouteOptions, Router};
pub use view::{ViewError, ViewRenderer};

// Middleware re-exports
pub use middleware::{from_fn, BoxMiddleware, Middleware, Next};

#[cfg(feature = "native")]
pub use server::{create_optimized_socket, from_hyper_request, serve, to_hyper_response, ConnectionTracker, Server};
