use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::EventHandlerError;
use crate::event::Event;

pub(crate) type Handler =
    Arc<dyn Fn(Arc<Event>) -> Pin<Box<dyn Future<Output = Result<(), EventHandlerError>> + Send>> + Send + Sync>;

/// Backoff policy applied between retry attempts of a failed subscriber
/// invocation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff_multiplier: Option<f64>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_multiplier: None,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// Delay to wait before the given (1-indexed) retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff_multiplier {
            None => self.delay,
            Some(mult) => {
                let factor = mult.powi(attempt.saturating_sub(1) as i32);
                Duration::from_secs_f64((self.delay.as_secs_f64() * factor).max(0.0))
            }
        }
    }
}

/// Per-subscription configuration.
#[derive(Clone)]
pub struct SubscriptionDef {
    pub timeout: Duration,
    pub once: bool,
    pub retry: Option<RetryPolicy>,
}

impl Default for SubscriptionDef {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            once: false,
            retry: None,
        }
    }
}

impl SubscriptionDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// What event type(s) a [`Subscription`] matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTypeMatch {
    Exact(String),
    Wildcard,
}

impl EventTypeMatch {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventTypeMatch::Exact(t) => t == event_type,
            EventTypeMatch::Wildcard => true,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventTypeMatch::Exact(t) => t.as_str(),
            EventTypeMatch::Wildcard => "*",
        }
    }
}

/// A registered listener.
///
/// Inactive subscriptions receive no events; a periodic sweep
/// ([`EventBus::sweep`](crate::EventBus::sweep)) removes them from the
/// registry entirely.
pub struct Subscription {
    pub id: Uuid,
    pub event_type: EventTypeMatch,
    pub(crate) handler: Handler,
    pub def: SubscriptionDef,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(event_type: EventTypeMatch, handler: Handler, def: SubscriptionDef) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            handler,
            def,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}
