pub mod cache;
pub mod index;
pub mod pattern;
pub mod route;
pub mod trie;

pub use index::{RouteIndex, RouteMatch};
pub use pattern::{Pattern, Segment};
pub use route::Route;
