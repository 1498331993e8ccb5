//! Request-scoped tracing spans, the middleware equivalent of the
//! teacher's `tower-http` `TraceLayer` default (`layers::default_trace`),
//! ported to a plain [`crate::middleware::Middleware`] since there's no
//! `tower::Service` here to layer around.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::Instrument;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::middleware::{FnMiddleware, Next};
use crate::plugin::{Plugin, PluginContext};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wraps the rest of the chain in a `tracing::info_span!` carrying the
/// method, path, and request id, so every log line emitted downstream picks
/// them up as span fields.
pub struct Tracing;

impl Plugin for Tracing {
    fn name(&self) -> &str {
        "tracing"
    }

    fn install<'a>(&'a self, ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            ctx.middleware.push(Arc::new(FnMiddleware::new(|ctx: Context, next: Next| async move {
                let span = tracing::info_span!(
                    "request",
                    method = %ctx.method(),
                    path = ctx.path(),
                    request_id = ctx.request_id(),
                );
                next.call(ctx).instrument(span).await
            })));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::TerminalHandler;
    use crate::plugin::PluginRegistry;
    use crate::route::index::RoutingOptions;
    use crate::route::RouteIndex;
    use http::Method;
    use waypoint_events::EventBus;

    #[tokio::test]
    async fn wraps_the_chain_without_altering_its_outcome() {
        let events = Arc::new(EventBus::new());
        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(Tracing));
        let routes = Arc::new(RouteIndex::new(RoutingOptions::default()));
        let mut plugin_ctx = PluginContext { middleware: Vec::new(), routes, events };
        registry.install_all(&mut plugin_ctx).await.unwrap();

        let handler = Arc::new(TerminalHandler::new(|ctx: Context| async move {
            ctx.response().await.text("ok");
            Ok(())
        }));
        let ctx = Context::from_request(Method::GET, "/x".parse().unwrap(), http::HeaderMap::new(), bytes::Bytes::new(), "r".into());
        crate::middleware::run_chain(&plugin_ctx.middleware, &[], handler, ctx.clone()).await.unwrap();
        assert_eq!(ctx.response().await.body().as_ref(), b"ok");
    }
}
