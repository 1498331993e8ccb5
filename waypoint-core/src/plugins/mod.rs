//! Built-in plugins (§4.8): small, optional extensions built entirely out of
//! the public [`crate::plugin::Plugin`]/[`crate::middleware::Middleware`]
//! surface — nothing here reaches into dispatcher internals.

mod cors;
mod normalize_path;
mod observability;
mod request_id;
mod secure_headers;

pub use cors::{Cors, CorsOptions};
pub use normalize_path::NormalizePath;
pub use observability::Tracing;
pub use request_id::RequestId;
pub use secure_headers::{SecureHeaders, SecureHeadersBuilder};
