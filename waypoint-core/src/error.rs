//! The error taxonomy (§7) and the Error Filter Pipeline that turns a
//! [`DispatchError`] into an HTTP response.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::enhance::Response;

/// The full error taxonomy named in the specification. Kinds that are
/// startup-only (`RouteConflict`, `PluginError`) never reach the Error
/// Filter Pipeline — they abort registration/install directly.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation failed for field `{field}`: {message}")]
    Validation { field: String, value: Option<Value>, message: String },
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("payload too large: {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("request cancelled")]
    RequestCancelled,
    #[error("route conflict: {0}")]
    RouteConflict(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("plugin error: {0}")]
    PluginError(String),
    #[error("next() called twice by the same middleware")]
    NextCalledTwice,
    #[error("{message}")]
    Custom { status: StatusCode, code: &'static str, message: String },
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// The HTTP status this kind maps to (§7). Startup-only kinds return the
    /// status that would make sense if they somehow reached a response (they
    /// never should — `register()`/`install()` surface them directly).
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::Validation { .. } => StatusCode::BAD_REQUEST,
            DispatchError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            DispatchError::Forbidden(_) => StatusCode::FORBIDDEN,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DispatchError::Conflict(_) => StatusCode::CONFLICT,
            DispatchError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DispatchError::RequestCancelled => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::RouteConflict(_)
            | DispatchError::InvalidPattern(_)
            | DispatchError::InvalidMethod(_)
            | DispatchError::PluginError(_)
            | DispatchError::NextCalledTwice => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::Custom { status, .. } => *status,
        }
    }

    /// The machine-readable code surfaced in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(_) => "BAD_REQUEST",
            DispatchError::Validation { .. } => "VALIDATION_ERROR",
            DispatchError::Unauthenticated(_) => "UNAUTHENTICATED",
            DispatchError::Forbidden(_) => "FORBIDDEN",
            DispatchError::NotFound(_) => "NOT_FOUND",
            DispatchError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            DispatchError::Conflict(_) => "CONFLICT",
            DispatchError::Unprocessable(_) => "UNPROCESSABLE_ENTITY",
            DispatchError::RateLimited { .. } => "RATE_LIMITED",
            DispatchError::Timeout(_) => "TIMEOUT",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
            DispatchError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            DispatchError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            DispatchError::RequestCancelled => "REQUEST_CANCELLED",
            DispatchError::RouteConflict(_) => "ROUTE_CONFLICT",
            DispatchError::InvalidPattern(_) => "INVALID_PATTERN",
            DispatchError::InvalidMethod(_) => "INVALID_METHOD",
            DispatchError::PluginError(_) => "PLUGIN_ERROR",
            DispatchError::NextCalledTwice => "NEXT_CALLED_TWICE",
            DispatchError::Custom { code, .. } => code,
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::BadRequest(err.to_string())
    }
}

/// Generate `From<E> for DispatchError` implementations for external error
/// types that should map to a single taxonomy kind.
#[macro_export]
macro_rules! map_dispatch_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::DispatchError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::DispatchError::$variant(err.to_string())
                }
            }
        )*
    };
}

/// Shape of the JSON body written for any error that reaches a response
/// (§7, "User-visible failure behavior").
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Serialize)]
struct ErrorBodyInner {
    name: &'static str,
    message: String,
    code: &'static str,
    #[serde(rename = "statusCode")]
    status_code: u16,
    timestamp: u128,
    path: String,
    method: String,
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

/// Render a [`DispatchError`] into a [`Response`], following the standard
/// JSON error envelope. `path`/`method`/`request_id` come from the Context
/// that was in flight when the error occurred.
pub fn render_error(err: &DispatchError, path: &str, method: &str, request_id: &str) -> Response {
    let mut extra = HashMap::new();
    let name = match err {
        DispatchError::Validation { field, value, .. } => {
            extra.insert("field".to_string(), Value::String(field.clone()));
            if let Some(v) = value {
                extra.insert("value".to_string(), v.clone());
            }
            "ValidationError"
        }
        DispatchError::RateLimited { retry_after } => {
            extra.insert("retryAfter".to_string(), Value::from(*retry_after));
            "RateLimitedError"
        }
        DispatchError::BadRequest(_) => "BadRequestError",
        DispatchError::Unauthenticated(_) => "UnauthenticatedError",
        DispatchError::Forbidden(_) => "ForbiddenError",
        DispatchError::NotFound(_) => "NotFoundError",
        DispatchError::MethodNotAllowed(_) => "MethodNotAllowedError",
        DispatchError::Conflict(_) => "ConflictError",
        DispatchError::Unprocessable(_) => "UnprocessableError",
        DispatchError::Timeout(_) => "TimeoutError",
        DispatchError::Internal(_) => "InternalError",
        DispatchError::ServiceUnavailable(_) => "ServiceUnavailableError",
        DispatchError::PayloadTooLarge { .. } => "PayloadTooLargeError",
        _ => "InternalError",
    };

    let body = ErrorBody {
        error: ErrorBodyInner {
            name,
            message: err.to_string(),
            code: err.code(),
            status_code: err.status().as_u16(),
            timestamp: crate::context::now_millis(),
            path: path.to_string(),
            method: method.to_string(),
            request_id: request_id.to_string(),
            extra,
        },
    };

    let mut response = Response::new(err.status());
    response.json(&body).expect("error body always serializes");
    if let DispatchError::RateLimited { retry_after } = err {
        response.set_header("retry-after", &retry_after.to_string());
    }
    response
}

/// A single entry in the Error Filter Pipeline: declares which kinds it
/// handles and how to render them. The first matching filter wins; filters
/// never call `next()` (§7) — they either handle the error or decline.
pub struct ErrorFilter {
    pub name: &'static str,
    matcher: Arc<dyn Fn(&DispatchError) -> bool + Send + Sync>,
    renderer: Arc<dyn Fn(&DispatchError, &str, &str, &str) -> Response + Send + Sync>,
}

impl ErrorFilter {
    pub fn new(
        name: &'static str,
        matcher: impl Fn(&DispatchError) -> bool + Send + Sync + 'static,
        renderer: impl Fn(&DispatchError, &str, &str, &str) -> Response + Send + Sync + 'static,
    ) -> Self {
        Self { name, matcher: Arc::new(matcher), renderer: Arc::new(renderer) }
    }

    pub fn matches(&self, err: &DispatchError) -> bool {
        (self.matcher)(err)
    }

    pub fn render(&self, err: &DispatchError, path: &str, method: &str, request_id: &str) -> Response {
        (self.renderer)(err, path, method, request_id)
    }
}

/// An ordered list of [`ErrorFilter`]s plus a terminal global filter that
/// handles anything unmatched as `Internal` (§7).
pub struct ErrorFilterPipeline {
    filters: Vec<ErrorFilter>,
}

impl ErrorFilterPipeline {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn add(&mut self, filter: ErrorFilter) {
        self.filters.push(filter);
    }

    /// Render `err` with the first matching filter, falling back to the
    /// default rendering of the error as-is (equivalent to the terminal
    /// global filter, since every `DispatchError` already maps to a status).
    pub fn render(&self, err: &DispatchError, path: &str, method: &str, request_id: &str) -> Response {
        for filter in &self.filters {
            if filter.matches(err) {
                return filter.render(err, path, method, request_id);
            }
        }
        render_error(err, path, method, request_id)
    }
}

impl Default for ErrorFilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker type used as a stable request id when none is available (e.g. in
/// isolated unit tests of the error pipeline).
pub fn fallback_request_id() -> String {
    Uuid::nil().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_field_and_value() {
        let err = DispatchError::Validation {
            field: "email".into(),
            value: Some(Value::String("not-an-email".into())),
            message: "must be a valid email".into(),
        };
        let resp = render_error(&err, "/users", "POST", "req-1");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["field"], "email");
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let err = DispatchError::RateLimited { retry_after: 30 };
        let resp = render_error(&err, "/x", "GET", "req-2");
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.get_header("retry-after"), Some("30".to_string()));
    }

    #[test]
    fn unmatched_pipeline_falls_back_to_internal_rendering() {
        let pipeline = ErrorFilterPipeline::new();
        let err = DispatchError::Internal("boom".into());
        let resp = pipeline.render(&err, "/x", "GET", "req-3");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn first_matching_filter_wins() {
        let mut pipeline = ErrorFilterPipeline::new();
        pipeline.add(ErrorFilter::new(
            "teapot-lover",
            |err| matches!(err, DispatchError::Custom { .. }),
            |_err, _path, _method, _rid| Response::new(StatusCode::IM_A_TEAPOT),
        ));
        let err = DispatchError::Custom { status: StatusCode::BAD_GATEWAY, code: "X", message: "y".into() };
        let resp = pipeline.render(&err, "/x", "GET", "req-4");
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    }
}
