use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EventHandlerError, PipelineError};
use crate::event::Event;
use crate::pipeline::Pipeline;
use crate::subscription::{EventTypeMatch, Handler, RetryPolicy, Subscription, SubscriptionDef};

#[derive(Default)]
struct Metrics {
    events_emitted: AtomicU64,
    events_filtered: AtomicU64,
    pipeline_aborts: AtomicU64,
    subscriber_failures: AtomicU64,
}

/// Point-in-time counters for observability. Cheap to read; not itself part
/// of the dispatch hot path.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventBusSnapshot {
    pub events_emitted: u64,
    pub events_filtered: u64,
    pub pipeline_aborts: u64,
    pub subscriber_failures: u64,
    pub active_subscriptions: u64,
}

struct Inner {
    subscriptions: DashMap<Uuid, Arc<Subscription>>,
    pipelines: DashMap<String, Vec<Pipeline>>,
    aggregate_sequences: DashMap<String, u64>,
    metrics: Metrics,
}

/// In-process publish/subscribe bus.
///
/// `EventBus` is cheap to clone (an `Arc` handle) and is the single shared
/// instance an application wires into its dispatcher and plugins. Within one
/// `emit`, attached pipelines run sequentially in registration order;
/// subscribers then run concurrently with independent failure (a failing or
/// slow subscriber never affects its siblings). Across separate `emit` calls
/// there is no ordering guarantee.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscriptions: DashMap::new(),
                pipelines: DashMap::new(),
                aggregate_sequences: DashMap::new(),
                metrics: Metrics::default(),
            }),
        }
    }

    // ── Typed / CQRS surface ────────────────────────────────────────────

    /// Emit a fully-constructed [`Event`] through its pipelines, then to
    /// matching subscribers.
    pub async fn emit_event(&self, event: Event) {
        self.inner.metrics.events_emitted.fetch_add(1, Ordering::Relaxed);
        let event = match self.run_pipelines(event).await {
            Some(event) => event,
            None => return,
        };
        self.dispatch_to_subscribers(event).await;
    }

    /// Emit a domain event, assigning a monotonic `sequence_number` for its
    /// `aggregate_id` if the caller did not already set one higher than the
    /// last observed value.
    pub async fn emit_domain(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
    ) {
        let aggregate_id = aggregate_id.into();
        let mut event = Event::domain(event_type, data, aggregate_id.clone(), aggregate_type);
        let mut seq = self.inner.aggregate_sequences.entry(aggregate_id).or_insert(0);
        *seq += 1;
        if let Some(domain) = event.domain.as_mut() {
            domain.sequence_number = *seq;
        }
        drop(seq);
        self.emit_event(event).await;
    }

    async fn run_pipelines(&self, event: Event) -> Option<Event> {
        let mut pipelines: Vec<Pipeline> = Vec::new();
        if let Some(specific) = self.inner.pipelines.get(&event.event_type) {
            pipelines.extend(specific.value().iter().cloned());
        }
        if event.event_type != "*" {
            if let Some(wildcard) = self.inner.pipelines.get("*") {
                pipelines.extend(wildcard.value().iter().cloned());
            }
        }
        let mut current = event;
        for pipeline in &pipelines {
            match pipeline.run(current.clone()).await {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    self.inner.metrics.events_filtered.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Err(err) => {
                    self.inner.metrics.pipeline_aborts.fetch_add(1, Ordering::Relaxed);
                    warn!(pipeline = %pipeline.name, error = %err, "pipeline aborted emission");
                    return None;
                }
            }
        }
        Some(current)
    }

    async fn dispatch_to_subscribers(&self, event: Event) {
        let event = Arc::new(event);
        let matching: Vec<Arc<Subscription>> = self
            .inner
            .subscriptions
            .iter()
            .filter(|entry| entry.value().is_active() && entry.value().event_type.matches(&event.event_type))
            .map(|entry| entry.value().clone())
            .collect();

        let mut tasks = Vec::with_capacity(matching.len());
        for sub in matching {
            let event = event.clone();
            let bus = self.clone();
            tasks.push(tokio::spawn(async move {
                bus.invoke_subscriber(sub, event).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn invoke_subscriber(&self, sub: Arc<Subscription>, event: Arc<Event>) {
        let policy: Option<RetryPolicy> = sub.def.retry;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(sub.def.timeout, (sub.handler)(event.clone())).await;
            let outcome = match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(EventHandlerError::TimedOut),
            };
            match outcome {
                Ok(()) => break,
                Err(err) => {
                    self.inner.metrics.subscriber_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(attempt, error = %err, "event subscriber invocation failed");
                    if let Some(policy) = policy {
                        if attempt < policy.max_attempts {
                            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }
        if sub.def.once {
            sub.deactivate();
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    pub fn subscribe<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> Uuid
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventHandlerError>> + Send + 'static,
    {
        self.subscribe_with_options(event_type, handler, SubscriptionDef::default())
    }

    pub fn subscribe_with_options<F, Fut>(
        &self,
        event_type: impl Into<String>,
        handler: F,
        def: SubscriptionDef,
    ) -> Uuid
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventHandlerError>> + Send + 'static,
    {
        let event_type = event_type.into();
        let matcher = if event_type == "*" {
            EventTypeMatch::Wildcard
        } else {
            EventTypeMatch::Exact(event_type)
        };
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        let sub = Arc::new(Subscription::new(matcher, handler, def));
        let id = sub.id;
        self.inner.subscriptions.insert(id, sub);
        id
    }

    /// Deactivate and remove a single subscription by id.
    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.subscriptions.remove(&id);
    }

    /// Deactivate and remove every subscription registered for `event_type`
    /// (exact match only — does not touch wildcard subscribers).
    pub fn unsubscribe_all(&self, event_type: &str) {
        self.inner
            .subscriptions
            .retain(|_, sub| sub.event_type.as_str() != event_type);
    }

    /// Remove every registered subscription, irrespective of event type.
    pub fn remove_all_listeners(&self, event_type: Option<&str>) {
        match event_type {
            Some(t) => self.unsubscribe_all(t),
            None => self.inner.subscriptions.clear(),
        }
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| entry.value().event_type.as_str().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .iter()
            .filter(|entry| entry.value().is_active() && entry.value().event_type.matches(event_type))
            .count()
    }

    // ── Simple (Express-style) facade ──────────────────────────────────

    pub fn on<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> Uuid
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventHandlerError>> + Send + 'static,
    {
        self.subscribe(event_type, handler)
    }

    pub fn once<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> Uuid
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventHandlerError>> + Send + 'static,
    {
        self.subscribe_with_options(event_type, handler, SubscriptionDef::new().once())
    }

    pub fn off(&self, id: Uuid) {
        self.unsubscribe(id);
    }

    /// Emit a named event with an opaque JSON payload — the facade
    /// counterpart of [`EventBus::emit_event`]. Maps to the typed surface
    /// internally (`emit_named` in the design notes).
    pub async fn emit(&self, event_type: impl Into<String>, data: serde_json::Value) {
        self.emit_event(Event::new(event_type, data)).await;
    }

    // ── Pipelines ───────────────────────────────────────────────────────

    pub fn add_pipeline(&self, event_type: impl Into<String>, pipeline: Pipeline) {
        self.inner
            .pipelines
            .entry(event_type.into())
            .or_default()
            .push(pipeline);
    }

    pub fn remove_pipeline(&self, event_type: &str, name: &str) {
        if let Some(mut pipelines) = self.inner.pipelines.get_mut(event_type) {
            pipelines.retain(|p| p.name != name);
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Remove inactive subscriptions from the registry. Cheap and safe to
    /// call on a timer via [`EventBus::start_cleanup_sweep`].
    pub fn sweep(&self) {
        let before = self.inner.subscriptions.len();
        self.inner.subscriptions.retain(|_, sub| sub.is_active());
        let removed = before - self.inner.subscriptions.len();
        if removed > 0 {
            debug!(removed, "swept inactive event subscriptions");
        }
    }

    /// Spawn a background task that calls [`EventBus::sweep`] on `interval`.
    /// Aborting the returned handle stops the sweep.
    pub fn start_cleanup_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                bus.sweep();
            }
        })
    }

    pub fn metrics(&self) -> EventBusSnapshot {
        EventBusSnapshot {
            events_emitted: self.inner.metrics.events_emitted.load(Ordering::Relaxed),
            events_filtered: self.inner.metrics.events_filtered.load(Ordering::Relaxed),
            pipeline_aborts: self.inner.metrics.pipeline_aborts.load(Ordering::Relaxed),
            subscriber_failures: self.inner.metrics.subscriber_failures.load(Ordering::Relaxed),
            active_subscriptions: self.inner.subscriptions.len() as u64,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
fn _assert_pipeline_error_is_error(_: &PipelineError) {}
