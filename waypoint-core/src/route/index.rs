//! The Route Index (§4.1): a static table for literal routes, a
//! parameterized trie for routes with `:param` segments, and a bounded
//! match cache in front of both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use http::Method;

use crate::error::{DispatchError, DispatchResult};
use crate::middleware::Middleware;
use crate::route::cache::{cache_key, MatchCache, DEFAULT_CAPACITY};
use crate::route::pattern::Pattern;
use crate::route::route::Route;
use crate::route::trie::ParamTrie;

/// A successful match: the route that matched plus the parameters captured
/// from the path.
#[derive(Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// The outcome of a lookup (§4.1/§4.5): distinguishing "no route for this
/// path at all" from "a route exists for this path under a different
/// method" lets the Dispatcher return 404 vs 405 correctly.
pub enum Lookup {
    Matched(RouteMatch),
    NotFound,
    MethodNotAllowed(Vec<Method>),
}

/// Case-sensitivity and trailing-slash behavior applied uniformly to every
/// pattern registered on this index (§6 config keys `case_sensitive_routing`
/// and `strict_routing`).
#[derive(Clone, Copy)]
pub struct RoutingOptions {
    pub case_sensitive: bool,
    pub strict: bool,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self { case_sensitive: false, strict: false }
    }
}

pub struct RouteIndex {
    options: RoutingOptions,
    static_table: DashMap<(Method, String), Arc<Route>>,
    tries: DashMap<Method, ParamTrie<Route>>,
    cache: MatchCache<RouteMatch>,
    route_count: AtomicUsize,
}

impl RouteIndex {
    pub fn new(options: RoutingOptions) -> Self {
        Self {
            options,
            static_table: DashMap::new(),
            tries: DashMap::new(),
            cache: MatchCache::new(DEFAULT_CAPACITY),
            route_count: AtomicUsize::new(0),
        }
    }

    /// Register a route. Fails with [`DispatchError::RouteConflict`] if an
    /// identical method+pattern is already registered, or
    /// [`DispatchError::InvalidPattern`] if `raw_pattern` doesn't parse.
    pub fn register(
        &self,
        method: Method,
        raw_pattern: &str,
        chain: Vec<Arc<dyn Middleware>>,
        handler: Arc<dyn Middleware>,
    ) -> DispatchResult<()> {
        let pattern = Pattern::parse(raw_pattern, self.options.case_sensitive, self.options.strict)?;
        let route = Arc::new(Route::new(method.clone(), pattern.clone(), chain, handler));

        if pattern.is_static() {
            let key = (method.clone(), pattern.raw.clone());
            if self.static_table.contains_key(&key) {
                return Err(DispatchError::RouteConflict(format!("{method} {} already registered", pattern.raw)));
            }
            self.static_table.insert(key, route);
        } else {
            let mut trie = self.tries.entry(method.clone()).or_insert_with(ParamTrie::new);
            let inserted = trie.insert(
                &pattern,
                Route::new(route.method.clone(), route.pattern.clone(), route.chain.clone(), route.handler.clone()),
            );
            if !inserted {
                return Err(DispatchError::RouteConflict(format!("{method} {} already registered", pattern.raw)));
            }
        }

        self.route_count.fetch_add(1, Ordering::Relaxed);
        self.cache.clear();
        Ok(())
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        // `normalized` keeps the caller's original casing: it is both what
        // gets bound into captured parameters and the cache key, so two
        // requests that fold to the same path under case-insensitive
        // routing (`/users/ABC` vs `/users/abc`) never collide in the cache
        // and overwrite each other's captures (§4.1 cache-hit invariant).
        let normalized = crate::route::pattern::normalize_path(path, self.options.strict);
        // `match_path` is only used for literal/structural matching against
        // the static table and trie; it must never be used to populate
        // `params`.
        let match_path = if self.options.case_sensitive { normalized.clone() } else { normalized.to_lowercase() };
        let key = cache_key(method.as_str(), &normalized);

        if let Some(hit) = self.cache.get(&key) {
            return Lookup::Matched(hit);
        }

        if let Some(route) = self.static_table.get(&(method.clone(), match_path.clone())) {
            let found = RouteMatch { route: route.clone(), params: HashMap::new() };
            self.cache.insert(key, found.clone());
            return Lookup::Matched(found);
        }

        let match_segments = split_segments(&match_path);
        let original_segments = split_segments(&normalized);

        if let Some(trie) = self.tries.get(method) {
            if let Some((route, params)) = trie.lookup(&match_segments, &original_segments) {
                let found = RouteMatch { route, params };
                self.cache.insert(key, found.clone());
                return Lookup::Matched(found);
            }
        }

        let other_methods = self.methods_for_path(&match_path, &match_segments);
        if other_methods.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::MethodNotAllowed(other_methods)
        }
    }

    /// Which methods, if any, have a route registered (static or
    /// parameterized) that matches `match_path`/`match_segments` under a
    /// method other than the one that just missed. Scans the static table
    /// and every method's trie directly rather than a separate "methods by
    /// path" index, so it works for parameterized routes too: a concrete
    /// request path like `/users/42` only ever exists as segments to match
    /// against the trie, never as a literal key equal to the registered
    /// pattern `/users/:id`.
    fn methods_for_path(&self, match_path: &str, match_segments: &[&str]) -> Vec<Method> {
        let mut methods: Vec<Method> = self
            .static_table
            .iter()
            .filter(|entry| entry.key().1 == match_path)
            .map(|entry| entry.key().0.clone())
            .collect();

        for entry in self.tries.iter() {
            let method = entry.key();
            if methods.contains(method) {
                continue;
            }
            if entry.value().contains(match_segments) {
                methods.push(method.clone());
            }
        }

        methods
    }

    /// Mount a sub-index's routes under `prefix`, used by `App::mount` (§6).
    pub fn mount(&self, prefix: &Pattern, other: &RouteIndex) -> DispatchResult<()> {
        for entry in other.static_table.iter() {
            let ((method, _), route) = entry.pair();
            let combined = route.pattern.with_prefix(prefix);
            self.register(method.clone(), &combined.raw, route.chain.clone(), route.handler.clone())?;
        }
        Ok(())
    }

    pub fn cache_stats(&self) -> crate::route::cache::CacheStats {
        self.cache.stats()
    }

    pub fn route_count(&self) -> usize {
        self.route_count.load(Ordering::Relaxed)
    }
}

fn split_segments(normalized: &str) -> Vec<&str> {
    if normalized == "/" {
        Vec::new()
    } else {
        normalized.trim_start_matches('/').split('/').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::TerminalHandler;

    fn index() -> RouteIndex {
        RouteIndex::new(RoutingOptions::default())
    }

    fn noop_handler() -> Arc<dyn Middleware> {
        Arc::new(TerminalHandler::new(|_ctx| async move { Ok(()) }))
    }

    #[test]
    fn registers_and_matches_a_static_route() {
        let idx = index();
        idx.register(Method::GET, "/health", vec![], noop_handler()).unwrap();
        match idx.lookup(&Method::GET, "/health") {
            Lookup::Matched(m) => assert!(m.params.is_empty()),
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn registers_and_matches_a_parameterized_route() {
        let idx = index();
        idx.register(Method::GET, "/users/:id", vec![], noop_handler()).unwrap();
        match idx.lookup(&Method::GET, "/users/42") {
            Lookup::Matched(m) => assert_eq!(m.params.get("id"), Some(&"42".to_string())),
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn duplicate_static_registration_conflicts() {
        let idx = index();
        idx.register(Method::GET, "/health", vec![], noop_handler()).unwrap();
        let err = idx.register(Method::GET, "/health", vec![], noop_handler()).unwrap_err();
        assert!(matches!(err, DispatchError::RouteConflict(_)));
    }

    #[test]
    fn unknown_path_is_not_found() {
        let idx = index();
        idx.register(Method::GET, "/health", vec![], noop_handler()).unwrap();
        assert!(matches!(idx.lookup(&Method::GET, "/nope"), Lookup::NotFound));
    }

    #[test]
    fn known_path_wrong_method_is_method_not_allowed() {
        let idx = index();
        idx.register(Method::GET, "/users", vec![], noop_handler()).unwrap();
        idx.register(Method::POST, "/users", vec![], noop_handler()).unwrap();
        match idx.lookup(&Method::DELETE, "/users") {
            Lookup::MethodNotAllowed(methods) => {
                assert!(methods.contains(&Method::GET));
                assert!(methods.contains(&Method::POST));
            }
            _ => panic!("expected MethodNotAllowed"),
        }
    }

    #[test]
    fn parameterized_path_wrong_method_is_method_not_allowed() {
        let idx = index();
        idx.register(Method::GET, "/users/:id", vec![], noop_handler()).unwrap();
        match idx.lookup(&Method::DELETE, "/users/42") {
            Lookup::MethodNotAllowed(methods) => assert!(methods.contains(&Method::GET)),
            _ => panic!("expected MethodNotAllowed"),
        }
    }

    #[test]
    fn case_insensitive_match_preserves_param_casing() {
        let idx = RouteIndex::new(RoutingOptions { case_sensitive: false, strict: false });
        idx.register(Method::GET, "/users/:id", vec![], noop_handler()).unwrap();
        match idx.lookup(&Method::GET, "/users/ABC") {
            Lookup::Matched(m) => assert_eq!(m.params.get("id"), Some(&"ABC".to_string())),
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn repeated_lookup_is_served_from_cache() {
        let idx = index();
        idx.register(Method::GET, "/users/:id", vec![], noop_handler()).unwrap();
        idx.lookup(&Method::GET, "/users/7");
        idx.lookup(&Method::GET, "/users/7");
        assert_eq!(idx.cache_stats().hits, 1);
    }

    #[test]
    fn registering_a_route_invalidates_the_cache() {
        let idx = index();
        idx.register(Method::GET, "/a", vec![], noop_handler()).unwrap();
        idx.lookup(&Method::GET, "/a");
        idx.register(Method::GET, "/b", vec![], noop_handler()).unwrap();
        // cache was cleared by the second register, so this is a fresh miss
        idx.lookup(&Method::GET, "/a");
        assert_eq!(idx.cache_stats().hits, 0);
    }
}
