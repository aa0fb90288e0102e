//! Request tracing middleware
//!
//! Adds request IDs and per-request spans.

use super::Middleware;
use crate::handler::BoxHandler;
use crate::{Context, Error};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Header name for request ID
    pub header_name: String,
    /// Generate request ID if not present
    pub generate_id: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Request-ID".to_string(),
            generate_id: true,
        }
    }
}

impl TraceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn generate_id(mut self, generate: bool) -> Self {
        self.generate_id = generate;
        self
    }
}

/// Request tracing middleware
#[derive(Debug, Clone, Default)]
pub struct Trace {
    config: Arc<TraceConfig>,
}

impl Trace {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Middleware for Trace {
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        let config = Arc::clone(&self.config);
        Arc::new(move |mut ctx: Context| {
            let next = Arc::clone(&next);
            let config = Arc::clone(&config);

            let request_id = ctx
                .header(&config.header_name)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .or_else(|| config.generate_id.then(|| uuid::Uuid::new_v4().to_string()));
            if let Some(ref id) = request_id {
                if ctx.header(&config.header_name).is_none() {
                    ctx.request_mut()
                        .headers
                        .push((config.header_name.clone(), id.clone()));
                }
            }

            let span = tracing::info_span!(
                "request",
                method = %ctx.method(),
                path = %ctx.path(),
                request_id = request_id.as_deref().unwrap_or(""),
            );

            async move {
                let start = Instant::now();
                let result = next.call(ctx).await;
                let latency = start.elapsed();

                match result {
                    Ok(mut res) => {
                        tracing::info!(status = res.status.as_u16(), ?latency, "request completed");
                        if let Some(id) = request_id {
                            res.set_header(config.header_name.clone(), id);
                        }
                        Ok(res)
                    }
                    Err(err) => {
                        let status = match &err {
                            Error::Http(e) => e.status().as_u16(),
                            _ => 500,
                        };
                        tracing::info!(status, ?latency, "request failed");
                        Err(err)
                    }
                }
            }
            .instrument(span)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::boxed;
    use crate::{Method, Request, RequestBuilder, Response};

    fn echo() -> BoxHandler {
        Trace::default().wrap(boxed(|ctx: Context| async move {
            Ok(Response::text(ctx.header("x-request-id").unwrap_or("").to_string()))
        }))
    }

    #[tokio::test]
    async fn test_generates_request_id() {
        let res = echo()
            .call(Context::new(Request::new(Method::Get, "/")))
            .await
            .unwrap();

        let id = res.header("x-request-id").unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_eq!(res.body_string().as_deref(), Some(id));
    }

    #[tokio::test]
    async fn test_propagates_request_id() {
        let req = RequestBuilder::new(Method::Get, "/")
            .header("X-Request-ID", "abc-123")
            .build();
        let res = echo().call(Context::new(req)).await.unwrap();

        assert_eq!(res.header("x-request-id"), Some("abc-123"));
        assert_eq!(res.body_string().as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_generation_disabled() {
        let handler = Trace::new(TraceConfig::new().generate_id(false))
            .wrap(boxed(|_ctx: Context| async { Ok(Response::ok()) }));
        let res = handler
            .call(Context::new(Request::new(Method::Get, "/")))
            .await
            .unwrap();

        assert!(res.header("x-request-id").is_none());
    }
}
