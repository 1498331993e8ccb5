use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::event::Event;

/// A predicate stage. Returning `false` aborts the event before subscribers
/// ever see it.
pub type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A pure transform stage. Transformers run in registration order, each
/// receiving the previous transformer's output.
pub type Transformer = Arc<dyn Fn(Event) -> Event + Send + Sync>;

type NextFn = Box<dyn FnOnce(Event) -> BoxPipelineFuture + Send>;
type BoxPipelineFuture = Pin<Box<dyn Future<Output = Result<Event, PipelineError>> + Send>>;

/// Classic `(event, next)` middleware. Call `next(event)` to advance with a
/// (possibly modified) event; return without calling it to abort.
pub type PipelineMiddleware =
    Arc<dyn Fn(Event, PipelineNext) -> BoxPipelineFuture + Send + Sync>;

/// Handle passed to [`PipelineMiddleware`] to advance the stage chain.
#[derive(Clone)]
pub struct PipelineNext {
    inner: Arc<dyn Fn(Event) -> BoxPipelineFuture + Send + Sync>,
}

impl PipelineNext {
    fn terminal() -> Self {
        Self {
            inner: Arc::new(|event| Box::pin(async move { Ok(event) })),
        }
    }

    fn wrap(following: PipelineMiddleware, rest: PipelineNext) -> Self {
        Self {
            inner: Arc::new(move |event| {
                let following = following.clone();
                let rest = rest.clone();
                Box::pin(async move { following(event, rest).await })
            }),
        }
    }

    pub async fn call(&self, event: Event) -> Result<Event, PipelineError> {
        (self.inner)(event).await
    }
}

#[allow(dead_code)]
fn _unused(_: NextFn) {}

/// One stage of a [`Pipeline`]: filters, then transformers, then middleware,
/// all run in that order.
#[derive(Default, Clone)]
pub struct PipelineStage {
    pub filters: Vec<Filter>,
    pub transformers: Vec<Transformer>,
    pub middleware: Vec<PipelineMiddleware>,
}

impl PipelineStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(f));
        self
    }

    pub fn transform(mut self, f: impl Fn(Event) -> Event + Send + Sync + 'static) -> Self {
        self.transformers.push(Arc::new(f));
        self
    }

    pub fn middleware<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Event, PipelineNext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Event, PipelineError>> + Send + 'static,
    {
        self.middleware.push(Arc::new(move |event, next| Box::pin(f(event, next))));
        self
    }

    async fn run(&self, mut event: Event) -> Result<Event, PipelineError> {
        for filter in &self.filters {
            if !filter(&event) {
                return Err(PipelineError::Filtered);
            }
        }
        for transformer in &self.transformers {
            event = transformer(event);
        }
        if self.middleware.is_empty() {
            return Ok(event);
        }
        let mut next = PipelineNext::terminal();
        for mw in self.middleware.iter().rev() {
            next = PipelineNext::wrap(mw.clone(), next);
        }
        next.call(event).await
    }
}

/// How a [`Pipeline`] reacts when one of its stages errors (not a filter
/// rejection — that always aborts regardless of mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Abort the whole emission; subscribers are not invoked.
    Stop,
    /// Log the error and continue to the next pipeline / subscriber stage.
    Continue,
    /// Re-run the pipeline from its first stage, up to `max_retries` times.
    Retry { max_retries: u32 },
}

/// An ordered list of stages attached to one event type.
#[derive(Clone)]
pub struct Pipeline {
    pub name: String,
    pub stages: Vec<PipelineStage>,
    pub error_mode: ErrorMode,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            error_mode: ErrorMode::Stop,
        }
    }

    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Run every stage against `event`, honoring `error_mode` on failure.
    /// Returns `Ok(None)` when a filter rejected the event (abort, not an
    /// error worth logging) and `Ok(Some(event))` otherwise.
    pub(crate) async fn run(&self, event: Event) -> Result<Option<Event>, PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            let mut current = event.clone();
            let mut failed = false;
            for stage in &self.stages {
                match stage.run(current).await {
                    Ok(next) => current = next,
                    Err(PipelineError::Filtered) => {
                        debug!(pipeline = %self.name, "event filtered out of pipeline");
                        return Ok(None);
                    }
                    Err(err) => {
                        failed = true;
                        match self.error_mode {
                            ErrorMode::Stop => return Err(err),
                            ErrorMode::Continue => {
                                warn!(pipeline = %self.name, error = %err, "pipeline stage failed, continuing");
                                return Ok(Some(event));
                            }
                            ErrorMode::Retry { max_retries } => {
                                if attempt >= max_retries {
                                    return Err(PipelineError::RetryBudgetExhausted);
                                }
                            }
                        }
                        break;
                    }
                }
            }
            if !failed {
                return Ok(Some(current));
            }
            attempt += 1;
        }
    }
}
