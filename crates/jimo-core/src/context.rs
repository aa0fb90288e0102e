//! Per-request context
//!
//! Built fresh by the dispatcher for every matched request and moved into
//! the middleware chain. Never shared between requests.

use crate::middleware::session::Session;
use crate::response::JSON_CONTENT_TYPE;
use crate::view::ViewRenderer;
use crate::{HttpError, Method, Request, Response, ResponseBuilder, Result, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Request context passed to handlers and middleware
pub struct Context {
    request: Request,
    params: HashMap<String, String>,
    views: Option<Arc<dyn ViewRenderer>>,
    session: Option<Session>,
    csrf: bool,
}

impl Context {
    /// Create a context for a request with no captured parameters
    pub fn new(request: Request) -> Self {
        Self {
            request,
            params: HashMap::new(),
            views: None,
            session: None,
            csrf: false,
        }
    }

    pub(crate) fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    pub(crate) fn with_views(mut self, views: Option<Arc<dyn ViewRenderer>>) -> Self {
        self.views = views;
        self
    }

    /// The request being handled
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access for middleware that rewrites the request
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Request method
    pub fn method(&self) -> Method {
        self.request.method
    }

    /// Request path, without the query string
    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Request header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Route parameter by name; empty when the route captured no such name
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or("")
    }

    /// All captured route parameters
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// The request session, present only under the `Sessions` middleware
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Attach a session handle for the rest of the chain
    pub fn attach_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Detach the session handle
    pub fn detach_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// CSRF token for forms; empty unless the `Csrf` middleware ran
    ///
    /// The token is issued on first call, which makes the session persist.
    pub fn csrf_token(&self) -> String {
        match &self.session {
            Some(session) if self.csrf => session.csrf_token(),
            _ => String::new(),
        }
    }

    /// Expose the session's CSRF token through [`csrf_token`](Self::csrf_token)
    pub fn enable_csrf(&mut self) {
        self.csrf = true;
    }

    /// JSON response
    ///
    /// Fails with a typed 500 when `data` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(&self, status: impl Into<StatusCode>, data: &T) -> Result<Response> {
        let mut body = serde_json::to_vec(data)
            .map_err(|e| HttpError::internal("Failed to encode JSON").with_source(e))?;
        body.push(b'\n');
        Ok(ResponseBuilder::new(status.into())
            .header("content-type", JSON_CONTENT_TYPE)
            .body(body)
            .build())
    }

    /// Plain-text response
    pub fn string(&self, status: impl Into<StatusCode>, text: impl Into<String>) -> Response {
        Response::text(text.into()).with_status(status)
    }

    /// Render a view through the configured renderer
    pub fn view<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> Result<Response> {
        let views = self
            .views
            .as_ref()
            .ok_or_else(|| HttpError::internal("View engine is not configured"))?;
        let data = serde_json::to_value(data)
            .map_err(|e| HttpError::internal("Failed to render view").with_source(e))?;
        let html = views
            .render(name, &data)
            .map_err(|e| HttpError::internal("Failed to render view").with_source(e))?;
        Ok(Response::html(html))
    }

    /// Decode the JSON request body
    ///
    /// Malformed JSON, trailing data and type mismatches fail with a typed
    /// 400. Unknown fields are rejected when `T` opts into
    /// `#[serde(deny_unknown_fields)]`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.request.body)
            .map_err(|e| HttpError::bad_request("Invalid JSON").with_source(e).into())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("params", &self.params)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ViewError;
    use crate::{Error, RequestBuilder};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Login {
        email: String,
    }

    struct Upper;

    impl ViewRenderer for Upper {
        fn render(&self, name: &str, data: &serde_json::Value) -> std::result::Result<String, ViewError> {
            match name {
                "hello" => Ok(format!("<p>{}</p>", data["name"].as_str().unwrap_or("").to_uppercase())),
                _ => Err(ViewError::new(format!("template {} not found", name))),
            }
        }
    }

    fn ctx_with_body(body: &'static str) -> Context {
        Context::new(
            RequestBuilder::new(Method::Post, "/login")
                .header("content-type", "application/json")
                .body(body)
                .build(),
        )
    }

    fn status_of(err: Error) -> u16 {
        match err {
            Error::Http(e) => e.status().as_u16(),
            other => panic!("expected typed failure, got {:?}", other),
        }
    }

    #[test]
    fn test_param_absent_is_empty() {
        let ctx = Context::new(Request::new(Method::Get, "/users/7"))
            .with_params(vec![("id".to_string(), "7".to_string())]);

        assert_eq!(ctx.param("id"), "7");
        assert_eq!(ctx.param("missing"), "");
        assert_eq!(Context::new(Request::new(Method::Get, "/")).param("id"), "");
    }

    #[test]
    fn test_json_response() {
        let ctx = Context::new(Request::new(Method::Get, "/"));
        let res = ctx.json(201, &serde_json::json!({"ok": true})).unwrap();

        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(res.body_string().unwrap(), "{\"ok\":true}\n");
    }

    #[test]
    fn test_bind() {
        let login: Login = ctx_with_body(r#"{"email":"a@b.c"}"#).bind().unwrap();
        assert_eq!(login.email, "a@b.c");

        assert_eq!(status_of(ctx_with_body("{").bind::<Login>().unwrap_err()), 400);
        assert_eq!(status_of(ctx_with_body(r#"{"email":"x","role":"admin"}"#).bind::<Login>().unwrap_err()), 400);
        assert_eq!(status_of(ctx_with_body(r#"{"email":"x"} {}"#).bind::<Login>().unwrap_err()), 400);
    }

    #[test]
    fn test_view() {
        let ctx = Context::new(Request::new(Method::Get, "/"));
        assert_eq!(status_of(ctx.view("hello", &()).unwrap_err()), 500);

        let ctx = ctx.with_views(Some(Arc::new(Upper)));
        let res = ctx.view("hello", &serde_json::json!({"name": "jimo"})).unwrap();
        assert_eq!(res.body_string().unwrap(), "<p>JIMO</p>");
        assert_eq!(res.content_type(), Some("text/html; charset=utf-8"));

        match ctx.view("missing", &()).unwrap_err() {
            Error::Http(e) => assert_eq!(e.message(), "Failed to render view"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_csrf_token_is_lazy() {
        let mut ctx = Context::new(Request::new(Method::Get, "/"));
        ctx.enable_csrf();
        assert_eq!(ctx.csrf_token(), "");

        let session = Session::new("sid", Default::default(), true);
        ctx.attach_session(session.clone());
        assert!(!session.is_dirty());

        let token = ctx.csrf_token();
        assert_eq!(token.len(), 43);
        assert_eq!(ctx.csrf_token(), token);
        assert!(session.is_dirty());
    }
}
