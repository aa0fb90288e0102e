//! CSRF (Cross-Site Request Forgery) protection middleware
//!
//! Verifies a synchronizer token stored in the session. Must run inside
//! [`Sessions`](super::Sessions); without a session it passes through.

use super::Middleware;
use crate::handler::BoxHandler;
use crate::{Context, HttpError, Request, StatusCode};
use std::sync::Arc;

/// CSRF configuration
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Header name for CSRF token
    pub header_name: String,
    /// Form field name for CSRF token
    pub field_name: String,
    /// Path prefixes that skip verification
    pub exempt_prefixes: Vec<String>,
    /// Skip verification for JSON request bodies
    pub skip_json: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            header_name: "X-CSRF-Token".to_string(),
            field_name: "_token".to_string(),
            exempt_prefixes: vec!["/api/".to_string()],
            skip_json: true,
        }
    }
}

impl CsrfConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    pub fn exempt(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_prefixes.push(prefix.into());
        self
    }

    pub fn skip_json(mut self, skip: bool) -> Self {
        self.skip_json = skip;
        self
    }

    fn is_exempt(&self, req: &Request) -> bool {
        if self.exempt_prefixes.iter().any(|p| req.path.starts_with(p.as_str())) {
            return true;
        }
        self.skip_json
            && req
                .content_type()
                .map(|ct| ct.starts_with("application/json"))
                .unwrap_or(false)
    }

    fn submitted_token(&self, req: &Request) -> Option<String> {
        req.header(&self.header_name)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| req.form_value(&self.field_name))
            .filter(|t| !t.is_empty())
    }
}

/// CSRF middleware
#[derive(Debug, Clone, Default)]
pub struct Csrf {
    config: Arc<CsrfConfig>,
}

impl Csrf {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Middleware for Csrf {
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        let config = Arc::clone(&self.config);
        Arc::new(move |mut ctx: Context| {
            let next = Arc::clone(&next);
            let config = Arc::clone(&config);
            async move {
                let Some(session) = ctx.session().cloned() else {
                    return next.call(ctx).await;
                };
                ctx.enable_csrf();

                let req = ctx.request();
                if config.is_exempt(req) || req.method.is_safe() {
                    return next.call(ctx).await;
                }

                // No token issued yet means nothing can match.
                let valid = match (session.existing_csrf_token(), config.submitted_token(req)) {
                    (Some(expected), Some(token)) => constant_time_eq(token.as_bytes(), expected.as_bytes()),
                    _ => false,
                };
                if !valid {
                    return Err(HttpError::new(StatusCode::PAGE_EXPIRED, "CSRF token mismatch").into());
                }
                next.call(ctx).await
            }
        })
    }
}

/// Constant-time comparison
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
