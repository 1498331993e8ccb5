//! Waypoint's request dispatch core: the Route Index, Middleware Chain
//! Composer, Request Context, Enhancers, Dispatcher, Plugin Registry, and
//! Error Filter Pipeline that sit behind any host HTTP stack.
//!
//! TCP/TLS acceptance, body-parsing implementations, static file serving,
//! and templating are out of scope — this crate only answers "given a
//! method/URI/headers/body, what response comes back", leaving the socket
//! to the embedding application.

pub mod app;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod enhance;
pub mod error;
pub mod layers;
pub mod middleware;
pub mod plugin;
pub mod plugins;
pub mod route;

pub use app::{App, AppBuilder, Router};
pub use config::{ConfigError, ConfigValue, FromConfigValue, WaypointConfig};
pub use context::Context;
pub use dispatch::Dispatcher;
pub use enhance::{CookieOptions, Response};
pub use error::{DispatchError, DispatchResult, ErrorFilter, ErrorFilterPipeline};
pub use middleware::{ExpressMiddleware, ExpressNext, FnMiddleware, Middleware, Next, TerminalHandler};
pub use plugin::{Plugin, PluginContext, PluginRegistry};
pub use route::{Pattern, Route, RouteIndex, RouteMatch};

/// Re-exported so applications only need to depend on `waypoint-core`.
pub use waypoint_events as events;

pub mod prelude {
    pub use crate::{
        app::{App, AppBuilder, Router},
        config::WaypointConfig,
        context::Context,
        error::{DispatchError, DispatchResult},
        middleware::{ExpressMiddleware, ExpressNext, FnMiddleware, Middleware, Next, TerminalHandler},
        plugin::{Plugin, PluginContext},
    };
    pub use waypoint_events::prelude::*;
}
