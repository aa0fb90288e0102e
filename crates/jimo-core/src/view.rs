//! View rendering contract
//!
//! Template engines live outside this crate. A renderer is registered on the
//! router and handed to every request context; handlers reach it through
//! [`Context::view`](crate::Context::view).

use thiserror::Error;

/// Renders a named template with data into an HTML body
pub trait ViewRenderer: Send + Sync {
    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, ViewError>;
}

/// Template lookup or rendering failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("view: {0}")]
pub struct ViewError(pub String);

impl ViewError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
