//! The Dispatcher (§4.5): per-request orchestration tying the Route Index,
//! Middleware Chain Composer, and Error Filter Pipeline together.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::enhance::Response;
use crate::error::{DispatchError, ErrorFilterPipeline};
use crate::middleware::{apply_implicit_ok, run_chain, Middleware, TerminalHandler};
use crate::route::index::{Lookup, RouteIndex};
use waypoint_events::EventBus;

/// Everything the Dispatcher needs to serve one request: the Route Index,
/// the global middleware stack, the Error Filter Pipeline, and a handle to
/// the Event Bus for lifecycle events (§4.5, §4.6).
pub struct Dispatcher {
    pub routes: Arc<RouteIndex>,
    pub global_middleware: Vec<Arc<dyn Middleware>>,
    pub error_filters: Arc<ErrorFilterPipeline>,
    pub events: Arc<EventBus>,
    pub request_id_header: String,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteIndex>, global_middleware: Vec<Arc<dyn Middleware>>, error_filters: Arc<ErrorFilterPipeline>, events: Arc<EventBus>) -> Self {
        Self { routes, global_middleware, error_filters, events, request_id_header: "x-request-id".to_string() }
    }

    /// Serve a single request end to end: build the Context, emit
    /// `request.start`, run global middleware, look up the route, run the
    /// route chain and handler, apply error filtering and the implicit-200
    /// rule, then emit `request.end` (§4.5/§8).
    pub async fn dispatch(&self, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
        let request_id = headers
            .get(&self.request_id_header)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let ctx = Context::from_request(method.clone(), uri.clone(), headers, body, request_id.clone());

        self.events
            .emit(
                "request.start",
                serde_json::json!({ "method": method.as_str(), "path": ctx.path(), "requestId": request_id }),
            )
            .await;

        let outcome = self.run(&ctx).await;

        let mut response = match outcome {
            Ok(()) => {
                apply_implicit_ok(&ctx).await;
                ctx.response().await.clone()
            }
            Err(err) => {
                warn!(error = %err, path = ctx.path(), request_id = %request_id, "request failed");
                self.error_filters.render(&err, ctx.path(), method.as_str(), &request_id)
            }
        };
        response.set_header(&self.request_id_header, &request_id);

        info!(
            method = %method,
            path = ctx.path(),
            status = response.status().as_u16(),
            elapsed_ms = ctx.elapsed_millis() as u64,
            request_id = %request_id,
            "request complete"
        );

        self.events
            .emit(
                "request.end",
                serde_json::json!({
                    "method": method.as_str(),
                    "path": ctx.path(),
                    "status": response.status().as_u16(),
                    "requestId": request_id,
                }),
            )
            .await;

        response
    }

    /// Run the global middleware chain first, then consult the Route Index
    /// from inside its terminal step (§4.5 steps 3-4) — so a 404/405 still
    /// passes through every global middleware rather than short-circuiting
    /// ahead of it.
    async fn run(&self, ctx: &Context) -> Result<(), DispatchError> {
        if ctx.is_cancelled() {
            return Err(DispatchError::RequestCancelled);
        }

        let routes = self.routes.clone();
        let lookup_handler: Arc<dyn Middleware> = Arc::new(TerminalHandler::new(move |ctx: Context| {
            let routes = routes.clone();
            async move {
                match routes.lookup(ctx.method(), ctx.path()) {
                    Lookup::NotFound => {
                        Err(DispatchError::NotFound(format!("no route for {} {}", ctx.method(), ctx.path())))
                    }
                    Lookup::MethodNotAllowed(_methods) => Err(DispatchError::MethodNotAllowed(format!(
                        "{} not allowed on {}",
                        ctx.method(),
                        ctx.path()
                    ))),
                    Lookup::Matched(found) => {
                        let request_ctx = ctx.with_params(found.params);
                        run_chain(&[], &found.route.chain, found.route.handler.clone(), request_ctx).await
                    }
                }
            }
        }));

        run_chain(&self.global_middleware, &[], lookup_handler, ctx.clone()).await
    }
}

/// Render a response body for an unmatched method to set the `Allow` header
/// the way the original HTTP spec expects (§4.5 note), used by callers that
/// want a fully-compliant 405 rather than just the JSON error body.
pub fn allow_header_value(methods: &[Method]) -> String {
    methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorFilterPipeline;
    use crate::middleware::FnMiddleware;
    use crate::route::index::RoutingOptions;
    use std::sync::atomic::Ordering;

    fn dispatcher_with_routes() -> Dispatcher {
        let routes = Arc::new(RouteIndex::new(RoutingOptions::default()));
        let handler = Arc::new(TerminalHandler::new(|ctx: Context| async move {
            ctx.response().await.json(&serde_json::json!({"id": ctx.param("id")})).map(|_| ())
        }));
        routes.register(Method::GET, "/users/:id", vec![], handler).unwrap();

        let handler_err = Arc::new(TerminalHandler::new(|_ctx: Context| async move {
            Err(DispatchError::Forbidden("no".into()))
        }));
        routes.register(Method::GET, "/secret", vec![], handler_err).unwrap();

        Dispatcher::new(routes, vec![], Arc::new(ErrorFilterPipeline::new()), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn matched_route_returns_handler_response() {
        let dispatcher = dispatcher_with_routes();
        let resp = dispatcher.dispatch(Method::GET, "/users/9".parse().unwrap(), HeaderMap::new(), Bytes::new()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unmatched_route_returns_404() {
        let dispatcher = dispatcher_with_routes();
        let resp = dispatcher.dispatch(Method::GET, "/nope".parse().unwrap(), HeaderMap::new(), Bytes::new()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn handler_error_is_rendered_through_error_filters() {
        let dispatcher = dispatcher_with_routes();
        let resp = dispatcher.dispatch(Method::GET, "/secret".parse().unwrap(), HeaderMap::new(), Bytes::new()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn global_middleware_runs_before_route_handler() {
        let routes = Arc::new(RouteIndex::new(RoutingOptions::default()));
        let handler = Arc::new(TerminalHandler::new(|ctx: Context| async move {
            let marked = ctx.get("marked").is_some();
            ctx.response().await.json(&serde_json::json!({"marked": marked})).map(|_| ())
        }));
        routes.register(Method::GET, "/x", vec![], handler).unwrap();

        let mark = Arc::new(FnMiddleware::new(|ctx: Context, next: crate::middleware::Next| async move {
            ctx.set("marked", true);
            next.call(ctx).await
        }));

        let dispatcher = Dispatcher::new(routes, vec![mark], Arc::new(ErrorFilterPipeline::new()), Arc::new(EventBus::new()));
        let resp = dispatcher.dispatch(Method::GET, "/x".parse().unwrap(), HeaderMap::new(), Bytes::new()).await;
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["marked"], true);
    }

    #[tokio::test]
    async fn global_middleware_runs_even_on_unmatched_route() {
        let routes = Arc::new(RouteIndex::new(RoutingOptions::default()));
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let mark = Arc::new(FnMiddleware::new(move |ctx: Context, next: crate::middleware::Next| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                next.call(ctx).await
            }
        }));

        let dispatcher = Dispatcher::new(routes, vec![mark], Arc::new(ErrorFilterPipeline::new()), Arc::new(EventBus::new()));
        let resp = dispatcher.dispatch(Method::GET, "/nope".parse().unwrap(), HeaderMap::new(), Bytes::new()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(ran.load(Ordering::SeqCst), "global middleware must run even when the route lookup misses");
    }

    #[tokio::test]
    async fn response_echoes_request_id_header() {
        let dispatcher = dispatcher_with_routes();
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc-123".parse().unwrap());
        let resp = dispatcher.dispatch(Method::GET, "/users/9".parse().unwrap(), headers, Bytes::new()).await;
        assert_eq!(resp.get_header("x-request-id").as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn not_found_response_also_echoes_request_id_header() {
        let dispatcher = dispatcher_with_routes();
        let resp = dispatcher.dispatch(Method::GET, "/nope".parse().unwrap(), HeaderMap::new(), Bytes::new()).await;
        assert!(resp.get_header("x-request-id").is_some());
    }
}
