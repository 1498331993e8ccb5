//! Demonstrates `Plugin::should_be_last()`: this plugin has to see the
//! request after every other global middleware has had a chance to run, but
//! before the Route Index lookup that the Dispatcher nests inside the global
//! chain's terminal step, so it needs to be the innermost link.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::middleware::{FnMiddleware, Next};
use crate::plugin::{Plugin, PluginContext};
use crate::route::index::Lookup;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// If the exact request path has no match but the path with its trailing
/// slash toggled does, redirects to the canonical path instead of letting
/// the request 404. Useful with `strict` routing enabled, where `/users` and
/// `/users/` are normally registered as distinct routes.
pub struct NormalizePath;

impl Plugin for NormalizePath {
    fn name(&self) -> &str {
        "normalize_path"
    }

    fn should_be_last(&self) -> bool {
        true
    }

    fn install<'a>(&'a self, ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            let routes = ctx.routes.clone();
            ctx.middleware.push(Arc::new(FnMiddleware::new(move |ctx: Context, next: Next| {
                let routes = routes.clone();
                async move {
                    let path = ctx.path();
                    let toggled = if path.len() > 1 && path.ends_with('/') {
                        path.trim_end_matches('/').to_string()
                    } else {
                        format!("{path}/")
                    };

                    let exact_matches = matches!(routes.lookup(ctx.method(), path), Lookup::Matched(_));
                    let toggled_matches = matches!(routes.lookup(ctx.method(), &toggled), Lookup::Matched(_));

                    if !exact_matches && toggled_matches {
                        let mut response = ctx.response().await;
                        response.redirect_with_status(http::StatusCode::PERMANENT_REDIRECT, &toggled);
                        return Ok(());
                    }

                    next.call(ctx).await
                }
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
    async fn redirects_to_the_slash_variant_that_actually_matches() {
        let routes = Arc::new(RouteIndex::new(RoutingOptions { case_sensitive: false, strict: true }));
        let handler = Arc::new(TerminalHandler::new(|_ctx: Context| async move { Ok(()) }));
        routes.register(Method::GET, "/users/", vec![], handler).unwrap();

        let events = Arc::new(EventBus::new());
        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(NormalizePath));
        let mut plugin_ctx = PluginContext { middleware: Vec::new(), routes, events };
        registry.install_all(&mut plugin_ctx).await.unwrap();

        let lookup_handler = Arc::new(TerminalHandler::new(|_ctx: Context| async move {
            Err(crate::error::DispatchError::NotFound("no route".into()))
        }));
        let ctx = Context::from_request(Method::GET, "/users".parse().unwrap(), http::HeaderMap::new(), bytes::Bytes::new(), "r".into());
        crate::middleware::run_chain(&plugin_ctx.middleware, &[], lookup_handler, ctx.clone()).await.unwrap();

        let response = ctx.response().await;
        assert_eq!(response.status(), http::StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.get_header("location").as_deref(), Some("/users/"));
    }
}
