//! The Request Context (§4.3): the single mutable object threaded through
//! global middleware, the matched route chain, and the handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, Method, Uri};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::enhance::Response;
use crate::error::{DispatchError, DispatchResult};

/// Milliseconds since the Unix epoch, used for timestamps in logs and error
/// bodies.
pub fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis()
}

/// Lazily-parsed request body. Parsing into JSON happens at most once per
/// request and the parsed value is cached for subsequent reads.
#[derive(Debug, Default)]
struct LazyBody {
    raw: Bytes,
    json: tokio::sync::OnceCell<Result<Value, String>>,
}

/// Per-request mutable context passed by value (as an owned `Context`, not a
/// shared reference) through the Middleware Chain Composer and into the
/// matched handler. Cloning is cheap: the heavy fields are `Arc`-backed.
#[derive(Clone)]
pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Arc<LazyBody>,
    params: Arc<HashMap<String, String>>,
    query: Arc<HashMap<String, String>>,
    state: Arc<DashMap<String, Value>>,
    request_id: Arc<str>,
    start: u128,
    cancellation: CancellationToken,
    response: Arc<tokio::sync::Mutex<Response>>,
    next_depth: Arc<std::sync::atomic::AtomicUsize>,
}

impl Context {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes, request_id: impl Into<Arc<str>>) -> Self {
        Self {
            method,
            uri,
            headers,
            body: Arc::new(LazyBody { raw: body, json: tokio::sync::OnceCell::new() }),
            params: Arc::new(HashMap::new()),
            query: Arc::new(HashMap::new()),
            state: Arc::new(DashMap::new()),
            request_id: request_id.into(),
            start: now_millis(),
            cancellation: CancellationToken::new(),
            response: Arc::new(tokio::sync::Mutex::new(Response::new(http::StatusCode::OK))),
            next_depth: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn started_at_millis(&self) -> u128 {
        self.start
    }

    pub fn elapsed_millis(&self) -> u128 {
        now_millis().saturating_sub(self.start)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.body.raw
    }

    /// Parse the body as JSON, caching the result so repeated calls (e.g.
    /// from multiple middleware) don't re-parse.
    pub async fn json_body(&self) -> DispatchResult<Value> {
        let result = self
            .body
            .json
            .get_or_init(|| async {
                if self.body.raw.is_empty() {
                    Ok(Value::Null)
                } else {
                    serde_json::from_slice(&self.body.raw).map_err(|e| e.to_string())
                }
            })
            .await;
        result.clone().map_err(DispatchError::BadRequest)
    }

    /// Shared request-scoped key/value state. `locals` in Express parlance.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.get(key).map(|entry| entry.value().clone())
    }

    /// Access to the response being assembled by the enhancers. Route
    /// handlers and middleware enhance this in place; the dispatcher reads
    /// it back once the chain completes.
    pub async fn response(&self) -> tokio::sync::MutexGuard<'_, Response> {
        self.response.lock().await
    }

    /// Attach matched route params and start a fresh `next()` generation
    /// counter. The route-local chain (built after the global chain has
    /// already run to completion or handed off) is a distinct call chain, so
    /// it gets its own call-once bookkeeping rather than inheriting the
    /// global chain's position.
    pub(crate) fn with_params(&self, params: HashMap<String, String>) -> Self {
        let mut ctx = self.clone();
        ctx.params = Arc::new(params);
        ctx.next_depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        ctx
    }

    pub(crate) fn next_depth_counter(&self) -> &std::sync::atomic::AtomicUsize {
        &self.next_depth
    }
}

/// Parse a URL-encoded query string into a flat map. Repeated keys keep the
/// last value, matching the teacher's enhancer semantics.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

impl Context {
    /// Build a context for an inbound request, extracting the query string
    /// from the URI and computing the request id up front (the `RequestId`
    /// plugin may overwrite it before dispatch begins).
    pub fn from_request(method: Method, uri: Uri, headers: HeaderMap, body: Bytes, request_id: String) -> Self {
        let query = uri.query().unwrap_or("");
        let mut ctx = Self::new(method, uri.clone(), headers, body, request_id);
        ctx.query = Arc::new(parse_query(query));
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str) -> Context {
        Context::from_request(
            Method::GET,
            uri.parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            "req-test".to_string(),
        )
    }

    #[test]
    fn parses_query_string_from_uri() {
        let c = ctx("/search?q=rust&page=2");
        assert_eq!(c.query("q"), Some("rust"));
        assert_eq!(c.query("page"), Some("2"));
        assert_eq!(c.query("missing"), None);
    }

    #[test]
    fn state_map_is_shared_across_clones() {
        let c = ctx("/x");
        let cloned = c.clone();
        c.set("user_id", "42");
        assert_eq!(cloned.get("user_id"), Some(Value::String("42".into())));
    }

    #[tokio::test]
    async fn json_body_parses_once_and_caches() {
        let c = Context::from_request(
            Method::POST,
            "/x".parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(b"{\"a\":1}"),
            "req".to_string(),
        );
        let v1 = c.json_body().await.unwrap();
        let v2 = c.json_body().await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1["a"], 1);
    }

    #[test]
    fn with_params_attaches_route_params_without_mutating_original() {
        let c = ctx("/users/:id");
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        let with = c.with_params(params);
        assert_eq!(with.param("id"), Some("42"));
        assert_eq!(c.param("id"), None);
    }
}
