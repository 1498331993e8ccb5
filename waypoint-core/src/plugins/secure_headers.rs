//! Ported from `r2e-core`'s `SecureHeaders`: a small set of response headers
//! that are safe defaults for almost every application.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::middleware::{FnMiddleware, Next};
use crate::plugin::{Plugin, PluginContext};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone)]
struct HeaderDirective {
    name: &'static str,
    value: String,
}

/// Global middleware that stamps a fixed set of security-relevant headers
/// onto every response. Build one with [`SecureHeadersBuilder`].
pub struct SecureHeaders {
    headers: Vec<HeaderDirective>,
}

impl SecureHeaders {
    pub fn builder() -> SecureHeadersBuilder {
        SecureHeadersBuilder::new()
    }
}

impl Default for SecureHeaders {
    fn default() -> Self {
        SecureHeadersBuilder::new().build()
    }
}

impl Plugin for SecureHeaders {
    fn name(&self) -> &str {
        "secure_headers"
    }

    fn install<'a>(&'a self, ctx: &'a mut PluginContext) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            let headers = self.headers.clone();
            ctx.middleware.push(Arc::new(FnMiddleware::new(move |ctx: Context, next: Next| {
                let headers = headers.clone();
                async move {
                    let outcome = next.call(ctx.clone()).await;
                    let mut response = ctx.response().await;
                    for h in &headers {
                        response.set_header(h.name, &h.value);
                    }
                    outcome
                }
            })));
            Ok(())
        })
    }
}

/// Builder mirroring the teacher's fluent header-by-header configuration.
pub struct SecureHeadersBuilder {
    headers: Vec<HeaderDirective>,
}

impl SecureHeadersBuilder {
    pub fn new() -> Self {
        Self {
            headers: vec![
                HeaderDirective { name: "x-content-type-options", value: "nosniff".into() },
                HeaderDirective { name: "x-frame-options", value: "DENY".into() },
                HeaderDirective {
                    name: "strict-transport-security",
                    value: "max-age=31536000; includeSubDomains".into(),
                },
                HeaderDirective { name: "x-xss-protection", value: "0".into() },
                HeaderDirective { name: "referrer-policy", value: "strict-origin-when-cross-origin".into() },
            ],
        }
    }

    fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.retain(|h| h.name != name);
        self.headers.push(HeaderDirective { name, value: value.into() });
        self
    }

    fn remove(mut self, name: &'static str) -> Self {
        self.headers.retain(|h| h.name != name);
        self
    }

    pub fn content_type_options(self) -> Self {
        self.set("x-content-type-options", "nosniff")
    }

    pub fn frame_options(self, value: impl Into<String>) -> Self {
        self.set("x-frame-options", value)
    }

    pub fn no_frame_options(self) -> Self {
        self.remove("x-frame-options")
    }

    pub fn hsts(self) -> Self {
        self.set("strict-transport-security", "max-age=31536000; includeSubDomains")
    }

    pub fn hsts_max_age(self, seconds: u64) -> Self {
        self.set("strict-transport-security", format!("max-age={seconds}"))
    }

    pub fn hsts_include_subdomains(self, seconds: u64) -> Self {
        self.set("strict-transport-security", format!("max-age={seconds}; includeSubDomains"))
    }

    pub fn xss_protection(self) -> Self {
        self.set("x-xss-protection", "0")
    }

    pub fn referrer_policy(self, value: impl Into<String>) -> Self {
        self.set("referrer-policy", value)
    }

    pub fn content_security_policy(self, value: impl Into<String>) -> Self {
        self.set("content-security-policy", value)
    }

    pub fn permissions_policy(self, value: impl Into<String>) -> Self {
        self.set("permissions-policy", value)
    }

    pub fn build(self) -> SecureHeaders {
        SecureHeaders { headers: self.headers }
    }
}

impl Default for SecureHeadersBuilder {
    fn default() -> Self {
        Self::new()
    }
}
