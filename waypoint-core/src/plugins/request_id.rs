//! Mirrors `quarlus-core`'s `RequestId` extension (see
//! `quarlus-core/src/request_id.rs` and the behavior pinned down in
//! `r2e-core/tests/request_id.rs`): the request id itself is generated and
//! echoed by the [`crate::dispatch::Dispatcher`] before any middleware runs
//! (it has to exist before plugin-contributed global middleware does), so
//! this plugin's only job is to make it easy to reach from handler code as
//! request-scoped state rather than via `ctx.request_id()` alone.

use std::future::Future;
use std::pin::Pin;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::middleware::{FnMiddleware, Next};
use crate::plugin::{Plugin, PluginContext};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Copies `ctx.request_id()` into request-scoped state under the `request_id`
/// key on every request, so it shows up alongside other locals set by
/// application middleware.
pub struct RequestId;

impl Plugin for RequestId {
    fn name(&self) -> &str {
        "request_id"
    }

    fn install<'a>(&'a self, ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            ctx.middleware.push(std::sync::Arc::new(FnMiddleware::new(|ctx: Context, next: Next| async move {
                ctx.set("request_id", ctx.request_id());
                next.call(ctx).await
            })));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginRegistry;
    use crate::route::index::RoutingOptions;
    use crate::route::RouteIndex;
    use std::sync::Arc;
    use waypoint_events::EventBus;

    #[tokio::test]
    async fn installs_one_global_middleware() {
        let events = Arc::new(EventBus::new());
        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(RequestId));

        let mut plugin_ctx =
            PluginContext { middleware: Vec::new(), routes: Arc::new(RouteIndex::new(RoutingOptions::default())), events };
        registry.install_all(&mut plugin_ctx).await.unwrap();
        assert_eq!(plugin_ctx.middleware.len(), 1);
    }
}
