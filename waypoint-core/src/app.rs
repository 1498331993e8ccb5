//! Application-level API surface (§6): `AppBuilder` assembles routes,
//! middleware, plugins, and configuration; `build()` turns that into a
//! running [`App`] with a [`crate::dispatch::Dispatcher`] at its center.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use tracing::info;

use crate::config::WaypointConfig;
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::enhance::Response;
use crate::error::{DispatchError, DispatchResult, ErrorFilter, ErrorFilterPipeline};
use crate::middleware::{Middleware, Next, TerminalHandler};
use crate::plugin::{Plugin, PluginContext, PluginRegistry};
use crate::route::index::RoutingOptions;
use crate::route::{Pattern, RouteIndex};
use waypoint_events::EventBus;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const STANDARD_METHODS: &[Method] =
    &[Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD, Method::OPTIONS];

/// A standalone, mountable group of routes (`router` in `mount(prefix,
/// router)`, §6). Has its own Route Index but no middleware or plugins of
/// its own — those are only meaningful once merged into an [`AppBuilder`].
pub struct Router {
    routes: Arc<RouteIndex>,
}

impl Router {
    pub fn new() -> Self {
        Self::with_options(RoutingOptions::default())
    }

    pub fn with_options(options: RoutingOptions) -> Self {
        Self { routes: Arc::new(RouteIndex::new(options)) }
    }

    pub fn route<H, Fut>(
        &self,
        method: Method,
        path: &str,
        middleware: Vec<Arc<dyn Middleware>>,
        handler: H,
    ) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.routes.register(method, path, middleware, Arc::new(TerminalHandler::new(handler)))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `inner` only when the request path starts with `prefix`,
/// otherwise passes straight through to `next` — the path-scoped form of
/// `use([path,] mw)` (§6).
struct PrefixScoped {
    prefix: String,
    inner: Arc<dyn Middleware>,
}

impl Middleware for PrefixScoped {
    fn call<'a>(&'a self, ctx: Context, next: Next) -> BoxFuture<'a, DispatchResult<()>> {
        if ctx.path().starts_with(self.prefix.as_str()) {
            self.inner.call(ctx, next)
        } else {
            next.call(ctx)
        }
    }
}

/// Assembles a running application (§6's Application API). Route
/// registration, middleware, plugins, and error filters are all configured
/// here before calling [`AppBuilder::build`].
pub struct AppBuilder {
    routes: Arc<RouteIndex>,
    global_middleware: Vec<Arc<dyn Middleware>>,
    error_filters: ErrorFilterPipeline,
    events: Arc<EventBus>,
    plugins: PluginRegistry,
    config: WaypointConfig,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::with_config(WaypointConfig::default())
    }

    pub fn with_config(config: WaypointConfig) -> Self {
        let options = RoutingOptions { case_sensitive: config.case_sensitive(), strict: config.strict() };
        let events = Arc::new(EventBus::new());
        Self {
            routes: Arc::new(RouteIndex::new(options)),
            global_middleware: Vec::new(),
            error_filters: ErrorFilterPipeline::new(),
            events: events.clone(),
            plugins: PluginRegistry::new(events),
            config,
        }
    }

    /// `use(mw)` — append unscoped global middleware.
    pub fn use_middleware(&mut self, mw: Arc<dyn Middleware>) -> &mut Self {
        self.global_middleware.push(mw);
        self
    }

    /// `use(path, mw)` — append middleware that only runs for requests whose
    /// path starts with `path`.
    pub fn use_scoped(&mut self, path: impl Into<String>, mw: Arc<dyn Middleware>) -> &mut Self {
        self.global_middleware.push(Arc::new(PrefixScoped { prefix: path.into(), inner: mw }));
        self
    }

    pub fn plugin(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.register(plugin);
        self
    }

    pub fn error_filter(&mut self, filter: ErrorFilter) -> &mut Self {
        self.error_filters.add(filter);
        self
    }

    fn register<H, Fut>(
        &mut self,
        method: Method,
        path: &str,
        middleware: Vec<Arc<dyn Middleware>>,
        handler: H,
    ) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.routes.register(method, path, middleware, Arc::new(TerminalHandler::new(handler)))
    }

    pub fn get<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::GET, path, middleware, handler)
    }

    pub fn post<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::POST, path, middleware, handler)
    }

    pub fn put<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::PUT, path, middleware, handler)
    }

    pub fn delete<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::DELETE, path, middleware, handler)
    }

    pub fn patch<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::PATCH, path, middleware, handler)
    }

    pub fn head<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::HEAD, path, middleware, handler)
    }

    pub fn options<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.register(Method::OPTIONS, path, middleware, handler)
    }

    /// `all(path, [mw…], handler)` — register the same handler for every
    /// standard method.
    pub fn all<H, Fut>(&mut self, path: &str, middleware: Vec<Arc<dyn Middleware>>, handler: H) -> DispatchResult<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        for method in STANDARD_METHODS {
            self.register(method.clone(), path, middleware.clone(), handler.clone())?;
        }
        Ok(())
    }

    /// `mount(prefix, router)` — merge a [`Router`]'s routes under `prefix`.
    pub fn mount(&mut self, prefix: &str, router: Router) -> DispatchResult<()> {
        let options = RoutingOptions { case_sensitive: self.config.case_sensitive(), strict: self.config.strict() };
        let pattern = Pattern::parse(prefix, options.case_sensitive, options.strict)?;
        self.routes.mount(&pattern, &router.routes)
    }

    /// Install every registered plugin (in dependency order) and hand back a
    /// runnable [`App`]. Plugin-contributed middleware lands after every
    /// middleware added directly via `use`/`use_scoped`.
    pub async fn build(mut self) -> DispatchResult<App> {
        let mut plugin_ctx =
            PluginContext { middleware: Vec::new(), routes: self.routes.clone(), events: self.events.clone() };
        self.plugins.install_all(&mut plugin_ctx).await?;
        self.global_middleware.extend(plugin_ctx.middleware);

        let dispatcher = Dispatcher {
            routes: self.routes,
            global_middleware: self.global_middleware,
            error_filters: Arc::new(self.error_filters),
            events: self.events.clone(),
            request_id_header: self.config.request_id_header(),
        };

        Ok(App { dispatcher: Arc::new(dispatcher), plugins: Arc::new(self.plugins), events: self.events, config: self.config })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built, runnable application. `listen`/`close` manage the plugin
/// lifecycle; actual socket acceptance is the host HTTP stack's job (§1
/// Non-goals) — `dispatch` is the entry point it calls per request.
pub struct App {
    dispatcher: Arc<Dispatcher>,
    plugins: Arc<PluginRegistry>,
    events: Arc<EventBus>,
    config: WaypointConfig,
}

impl App {
    pub fn config(&self) -> &WaypointConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Serve one request through the configured Dispatcher.
    pub async fn dispatch(&self, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
        self.dispatcher.dispatch(method, uri, headers, body).await
    }

    /// `listen(port [,host])` — starts every plugin's runtime resources and
    /// emits `application:server-created`. Binding a real socket is left to
    /// the host HTTP stack integrating this dispatcher.
    pub async fn listen(&self, port: u16, host: Option<&str>) -> DispatchResult<()> {
        self.plugins.start_all().await?;
        let host = host.unwrap_or("0.0.0.0");
        info!(host, port, "application ready to accept requests");
        self.events
            .emit("application:server-created", serde_json::json!({ "host": host, "port": port }))
            .await;
        Ok(())
    }

    /// `close([cb])` — stops every plugin (reverse install order) and emits
    /// `application:closed`.
    pub async fn close(&self) -> DispatchResult<()> {
        self.plugins.stop_all().await?;
        self.events.emit("application:closed", serde_json::json!({})).await;
        Ok(())
    }

    pub fn on<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> uuid::Uuid
    where
        F: Fn(Arc<waypoint_events::Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), waypoint_events::EventHandlerError>> + Send + 'static,
    {
        self.events.on(event_type, handler)
    }

    pub fn once<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> uuid::Uuid
    where
        F: Fn(Arc<waypoint_events::Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), waypoint_events::EventHandlerError>> + Send + 'static,
    {
        self.events.once(event_type, handler)
    }

    pub fn off(&self, id: uuid::Uuid) {
        self.events.off(id);
    }

    pub async fn emit(&self, event_type: impl Into<String>, data: serde_json::Value) {
        self.events.emit(event_type, data).await;
    }
}

#[allow(dead_code)]
fn _assert_dispatch_error_is_error(_: &DispatchError) {}
