//! Failure to response translation
//!
//! Typed failures keep their status and message. Anything else becomes a
//! fixed 500 whose detail only reaches the log.

use crate::response::JSON_CONTENT_TYPE;
use crate::{Error, HttpError, Response, ResponseBuilder, StatusCode};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;

/// Client-facing message for untyped failures
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, String>>,
}

fn json_error(status: StatusCode, message: &str, fields: Option<&BTreeMap<String, String>>) -> Response {
    let mut body = serde_json::to_vec(&ErrorBody { message, fields })
        .unwrap_or_else(|_| br#"{"message":"Internal Server Error"}"#.to_vec());
    body.push(b'\n');
    ResponseBuilder::new(status)
        .header("content-type", JSON_CONTENT_TYPE)
        .body(body)
        .build()
}

/// JSON response for a typed failure
pub fn http_error_response(err: &HttpError) -> Response {
    if err.status().is_server_error() {
        tracing::error!(status = err.status().as_u16(), error = %err, "request failed");
    }
    json_error(err.status(), err.message(), err.fields())
}

/// Response for any failure returned from the handler chain
pub fn error_response(err: Error) -> Response {
    match err {
        Error::Http(e) => http_error_response(&e),
        other => {
            tracing::error!(error = %other, "unhandled error");
            internal_error()
        }
    }
}

/// Response for a panic recovered at the dispatch boundary
///
/// A payload raised with `std::panic::panic_any(HttpError)` is treated as a
/// typed failure.
pub fn panic_response(payload: Box<dyn Any + Send>) -> Response {
    let payload = match payload.downcast::<HttpError>() {
        Ok(err) => return http_error_response(&err),
        Err(payload) => payload,
    };

    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(panic = %detail, "handler panicked");
    internal_error()
}

/// The fixed 500 response
pub fn internal_error() -> Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationErrors;

    fn body_json(res: &Response) -> serde_json::Value {
        serde_json::from_slice(&res.body).unwrap()
    }

    #[test]
    fn test_typed_failure() {
        let res = error_response(HttpError::forbidden("Nope").into());

        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(res.body_string().unwrap(), "{\"message\":\"Nope\"}\n");
    }

    #[test]
    fn test_field_errors() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "required");
        let res = error_response(HttpError::from(errors).into());

        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(&res),
            serde_json::json!({"message": "Validation failed", "fields": {"email": "required"}})
        );
    }

    #[test]
    fn test_fields_from_wrapped_cause() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "required");
        let res = error_response(HttpError::unprocessable("Invalid input").with_source(errors).into());

        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(&res),
            serde_json::json!({"message": "Invalid input", "fields": {"email": "required"}})
        );
    }

    #[test]
    fn test_untyped_failure_does_not_leak() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "db password is hunter2");
        let res = error_response(Error::other(cause));

        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!res.body_string().unwrap().contains("hunter2"));
        assert_eq!(body_json(&res)["message"], INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn test_panic_payloads() {
        let res = panic_response(Box::new("boom"));
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!res.body_string().unwrap().contains("boom"));

        let res = panic_response(Box::new(HttpError::not_found("No such post")));
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(&res)["message"], "No such post");
    }
}
