//! In-process event bus used for both framework lifecycle events
//! (`request.start`, `plugin:installed`, ...) and user domain events.
//!
//! [`EventBus`] exposes three layers over the same registry:
//!
//! - A typed/CQRS surface ([`EventBus::emit_event`], [`EventBus::emit_domain`])
//!   for callers that build a full [`Event`] envelope.
//! - An ordered pipeline stage model ([`Pipeline`], [`PipelineStage`]) that
//!   can filter, transform, or short-circuit an event before any subscriber
//!   sees it.
//! - A simple, Express-style facade ([`EventBus::on`], [`EventBus::once`],
//!   [`EventBus::off`], [`EventBus::emit`]) for string-keyed listeners.

mod bus;
mod error;
mod event;
mod pipeline;
mod subscription;

pub use bus::{EventBus, EventBusSnapshot};
pub use error::{EventHandlerError, PipelineError};
pub use event::{DomainEnvelope, Event, EventMetadata};
pub use pipeline::{ErrorMode, Filter, Pipeline, PipelineMiddleware, PipelineNext, PipelineStage, Transformer};
pub use subscription::{EventTypeMatch, RetryPolicy, Subscription, SubscriptionDef};

pub mod prelude {
    pub use crate::{ErrorMode, Event, EventBus, Pipeline, PipelineStage, RetryPolicy, SubscriptionDef};
}
