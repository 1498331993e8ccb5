//! A registered route: method, pattern, and the middleware/handler chain
//! that runs when it matches (§4.1, §4.2).

use std::sync::Arc;

use http::Method;

use crate::middleware::Middleware;
use crate::route::pattern::Pattern;

/// A single registered route. `chain` is route-local middleware that runs
/// after global middleware but before `handler` (§4.2). `handler` is the
/// terminal link — it never calls `next`.
pub struct Route {
    pub method: Method,
    pub pattern: Pattern,
    pub chain: Vec<Arc<dyn Middleware>>,
    pub handler: Arc<dyn Middleware>,
    pub name: Option<String>,
}

impl Route {
    pub fn new(method: Method, pattern: Pattern, chain: Vec<Arc<dyn Middleware>>, handler: Arc<dyn Middleware>) -> Self {
        Self { method, pattern, chain, handler, name: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
