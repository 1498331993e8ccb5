//! Plugin Registry & Lifecycle (§4.7): install, start, and stop plugins in
//! dependency order, and publish lifecycle events on the Event Bus.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};
use waypoint_events::EventBus;

use crate::error::{DispatchError, DispatchResult};
use crate::middleware::Middleware;
use crate::route::index::RouteIndex;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a plugin needs to install itself: the global middleware
/// stack, the Route Index, and the Event Bus.
pub struct PluginContext {
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub routes: Arc<RouteIndex>,
    pub events: Arc<EventBus>,
}

/// A framework extension with an install/start/stop lifecycle (§4.7).
/// `name` and `depends_on` drive dependency-ordered install; `install` is
/// the only phase permitted to register middleware or routes — `start`/
/// `stop` are for runtime resources (background tasks, connections).
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn depends_on(&self) -> &[&str] {
        &[]
    }

    /// Plugins that must end up outermost in the global middleware stack —
    /// e.g. a path normalizer that has to see the raw request before any
    /// other middleware gets a chance to reject it — return `true` here.
    /// They still install in dependency order among themselves, just after
    /// every plugin that returns `false`.
    fn should_be_last(&self) -> bool {
        false
    }

    fn install<'a>(&'a self, ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>>;

    fn start<'a>(&'a self) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stop<'a>(&'a self) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Holds registered plugins and drives their lifecycle in three phases:
/// install all (in dependency order), start all (same order), stop all
/// (reverse order) — per §4.7's lifecycle invariant.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    events: Arc<EventBus>,
}

impl PluginRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { plugins: Vec::new(), events }
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Topologically order plugins by `depends_on`, then call `install` on
    /// each in that order. Fails with
    /// [`DispatchError::PluginError`] if a dependency is missing or a cycle
    /// is detected.
    pub async fn install_all(&self, ctx: &mut PluginContext) -> DispatchResult<()> {
        let ordered = self.dependency_order()?;
        for plugin in &ordered {
            debug!(plugin = plugin.name(), "installing plugin");
            plugin.install(ctx).await?;
            self.events.emit("plugin:installed", serde_json::json!({ "name": plugin.name() })).await;
        }
        Ok(())
    }

    pub async fn start_all(&self) -> DispatchResult<()> {
        let ordered = self.dependency_order()?;
        for plugin in &ordered {
            plugin.start().await?;
            info!(plugin = plugin.name(), "plugin started");
            self.events.emit("plugin:started", serde_json::json!({ "name": plugin.name() })).await;
        }
        Ok(())
    }

    /// Stop plugins in the reverse of install order, so a plugin's
    /// dependencies are always still running while it tears down.
    pub async fn stop_all(&self) -> DispatchResult<()> {
        let mut ordered = self.dependency_order()?;
        ordered.reverse();
        for plugin in &ordered {
            plugin.stop().await?;
            info!(plugin = plugin.name(), "plugin stopped");
            self.events.emit("plugin:stopped", serde_json::json!({ "name": plugin.name() })).await;
        }
        Ok(())
    }

    /// Dependency order, with every plugin whose `should_be_last()` returns
    /// `true` pushed after every plugin that doesn't — dependency order is
    /// otherwise preserved within each of the two partitions.
    fn dependency_order(&self) -> DispatchResult<Vec<Arc<dyn Plugin>>> {
        let by_name: std::collections::HashMap<&str, &Arc<dyn Plugin>> =
            self.plugins.iter().map(|p| (p.name(), p)).collect();

        for plugin in &self.plugins {
            for dep in plugin.depends_on() {
                if !by_name.contains_key(dep) {
                    return Err(DispatchError::PluginError(format!(
                        "plugin `{}` depends on unregistered plugin `{}`",
                        plugin.name(),
                        dep
                    )));
                }
            }
        }

        let mut ordered = Vec::with_capacity(self.plugins.len());
        let mut visited: HashSet<&str> = HashSet::new();
        let mut visiting: HashSet<&str> = HashSet::new();

        fn visit<'a>(
            name: &'a str,
            by_name: &std::collections::HashMap<&'a str, &'a Arc<dyn Plugin>>,
            visited: &mut HashSet<&'a str>,
            visiting: &mut HashSet<&'a str>,
            ordered: &mut Vec<Arc<dyn Plugin>>,
        ) -> DispatchResult<()> {
            if visited.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name) {
                return Err(DispatchError::PluginError(format!("dependency cycle detected at plugin `{name}`")));
            }
            let plugin = by_name[name];
            for dep in plugin.depends_on() {
                visit(dep, by_name, visited, visiting, ordered)?;
            }
            visiting.remove(name);
            visited.insert(name);
            ordered.push((*plugin).clone());
            Ok(())
        }

        for plugin in &self.plugins {
            visit(plugin.name(), &by_name, &mut visited, &mut visiting, &mut ordered)?;
        }

        let (last, rest): (Vec<_>, Vec<_>) = ordered.into_iter().partition(|p| p.should_be_last());
        let mut ordered = rest;
        ordered.extend(last);

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::index::RoutingOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct RecordingPlugin {
        name: &'static str,
        deps: Vec<&'static str>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Plugin for RecordingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn depends_on(&self) -> &[&str] {
            &self.deps
        }

        fn install<'a>(&'a self, _ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
            Box::pin(async move {
                self.log.lock().await.push(self.name);
                Ok(())
            })
        }
    }

    fn ctx(events: Arc<EventBus>) -> PluginContext {
        PluginContext { middleware: Vec::new(), routes: Arc::new(RouteIndex::new(RoutingOptions::default())), events }
    }

    #[tokio::test]
    async fn installs_in_dependency_order() {
        let events = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(RecordingPlugin { name: "b", deps: vec!["a"], log: log.clone() }));
        registry.register(Arc::new(RecordingPlugin { name: "a", deps: vec![], log: log.clone() }));

        let mut plugin_ctx = ctx(events);
        registry.install_all(&mut plugin_ctx).await.unwrap();

        assert_eq!(*log.lock().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn missing_dependency_is_a_plugin_error() {
        let events = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(RecordingPlugin { name: "b", deps: vec!["missing"], log }));

        let mut plugin_ctx = ctx(events);
        let err = registry.install_all(&mut plugin_ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::PluginError(_)));
    }

    #[tokio::test]
    async fn stop_runs_in_reverse_order() {
        struct CountingStopPlugin {
            name: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Plugin for CountingStopPlugin {
            fn name(&self) -> &str {
                self.name
            }
            fn install<'a>(&'a self, _ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn stop<'a>(&'a self) -> BoxFuture<'a, DispatchResult<()>> {
                Box::pin(async move {
                    self.order.lock().await.push(self.name);
                    Ok(())
                })
            }
        }

        let events = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new(events);
        registry.register(Arc::new(CountingStopPlugin { name: "first", order: order.clone() }));
        registry.register(Arc::new(CountingStopPlugin { name: "second", order: order.clone() }));

        registry.stop_all().await.unwrap();
        assert_eq!(*order.lock().await, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn should_be_last_plugins_install_after_everything_else() {
        struct LastPlugin {
            log: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Plugin for LastPlugin {
            fn name(&self) -> &str {
                "last"
            }
            fn should_be_last(&self) -> bool {
                true
            }
            fn install<'a>(&'a self, _ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
                Box::pin(async move {
                    self.log.lock().await.push("last");
                    Ok(())
                })
            }
        }

        let events = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut registry = PluginRegistry::new(events.clone());
        registry.register(Arc::new(LastPlugin { log: log.clone() }));
        registry.register(Arc::new(RecordingPlugin { name: "early", deps: vec![], log: log.clone() }));

        let mut plugin_ctx = ctx(events);
        registry.install_all(&mut plugin_ctx).await.unwrap();

        assert_eq!(*log.lock().await, vec!["early", "last"]);
    }
}
