//! A minimal CORS plugin: reflects the configured origin list, handles
//! preflight `OPTIONS` requests by short-circuiting the chain, and stamps
//! `Access-Control-*` headers on every response otherwise.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::Method;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::middleware::{FnMiddleware, Next};
use crate::plugin::{Plugin, PluginContext};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone)]
pub struct CorsOptions {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: Option<u64>,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".into(), "POST".into(), "PUT".into(), "PATCH".into(), "DELETE".into()],
            allowed_headers: vec!["content-type".into(), "authorization".into()],
            allow_credentials: false,
            max_age_secs: Some(600),
        }
    }
}

impl CorsOptions {
    fn allow_origin_for(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            if self.allow_credentials {
                Some(origin.to_string())
            } else {
                Some("*".to_string())
            }
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_string())
        } else {
            None
        }
    }
}

/// Global middleware applying the configured [`CorsOptions`]. Intercepts
/// `OPTIONS` preflight requests directly rather than handing them to the
/// route chain, since no application route is expected to answer them.
pub struct Cors {
    options: CorsOptions,
}

impl Cors {
    pub fn new(options: CorsOptions) -> Self {
        Self { options }
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self::new(CorsOptions::default())
    }
}

impl Plugin for Cors {
    fn name(&self) -> &str {
        "cors"
    }

    fn install<'a>(&'a self, ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            let options = self.options.clone();
            ctx.middleware.push(Arc::new(FnMiddleware::new(move |ctx: Context, next: Next| {
                let options = options.clone();
                async move {
                    let origin = ctx.header("origin").map(|s| s.to_string());
                    let allow_origin = origin.as_deref().and_then(|o| options.allow_origin_for(o));

                    if ctx.method() == Method::OPTIONS {
                        let mut response = ctx.response().await;
                        if let Some(allow_origin) = &allow_origin {
                            response.set_header("access-control-allow-origin", allow_origin);
                            response.set_header("access-control-allow-methods", &options.allowed_methods.join(", "));
                            response.set_header("access-control-allow-headers", &options.allowed_headers.join(", "));
                            if let Some(max_age) = options.max_age_secs {
                                response.set_header("access-control-max-age", &max_age.to_string());
                            }
                            if options.allow_credentials {
                                response.set_header("access-control-allow-credentials", "true");
                            }
                        }
                        response.status_mut(http::StatusCode::NO_CONTENT);
                        response.send(bytes::Bytes::new());
                        return Ok(());
                    }

                    let outcome = next.call(ctx.clone()).await;
                    if let Some(allow_origin) = &allow_origin {
                        let mut response = ctx.response().await;
                        response.set_header("access-control-allow-origin", allow_origin);
                        if options.allow_credentials {
                            response.set_header("access-control-allow-credentials", "true");
                        }
                    }
                    outcome
                }
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
    use waypoint_events::EventBus;

    async fn installed_middleware(options: CorsOptions) -> Vec<Arc<dyn crate::middleware::Middleware>> {
        let events = Arc::new(EventBus::new());
        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(Cors::new(options)));
        let routes = Arc::new(RouteIndex::new(RoutingOptions::default()));
        let mut plugin_ctx = PluginContext { middleware: Vec::new(), routes, events };
        registry.install_all(&mut plugin_ctx).await.unwrap();
        plugin_ctx.middleware
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_204() {
        let middleware = installed_middleware(CorsOptions::default()).await;
        let handler = Arc::new(crate::middleware::TerminalHandler::new(|_ctx: Context| async move {
            panic!("handler must not run for an OPTIONS preflight")
        }));

        let mut headers = http::HeaderMap::new();
        headers.insert("origin", "https://example.com".parse().unwrap());
        let ctx = Context::from_request(Method::OPTIONS, "/x".parse().unwrap(), headers, bytes::Bytes::new(), "r".into());
        crate::middleware::run_chain(&middleware, &[], handler, ctx.clone()).await.unwrap();

        let response = ctx.response().await;
        assert_eq!(response.status(), http::StatusCode::NO_CONTENT);
        assert_eq!(response.get_header("access-control-allow-origin").as_deref(), Some("*"));
    }

    #[tokio::test]
    async fn disallowed_origin_gets_no_cors_headers() {
        let options = CorsOptions { allowed_origins: vec!["https://allowed.example".into()], ..Default::default() };
        let middleware = installed_middleware(options).await;
        let handler = Arc::new(crate::middleware::TerminalHandler::new(|_ctx: Context| async move { Ok(()) }));

        let mut headers = http::HeaderMap::new();
        headers.insert("origin", "https://evil.example".parse().unwrap());
        let ctx = Context::from_request(Method::GET, "/x".parse().unwrap(), headers, bytes::Bytes::new(), "r".into());
        crate::middleware::run_chain(&middleware, &[], handler, ctx.clone()).await.unwrap();

        let response = ctx.response().await;
        assert!(response.get_header("access-control-allow-origin").is_none());
    }
}
