//! The Middleware Chain Composer (§4.2): builds a single async call chain
//! out of global middleware, route-local middleware, and the terminal
//! handler, with Express-style `next()` semantics.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A link in the chain. Implementors either enhance the context/response and
/// call `next.call(ctx)` to continue, or terminate the chain by returning
/// without calling `next` (in which case the composer applies the
/// implicit-200 rule unless the response was already marked sent).
pub trait Middleware: Send + Sync {
    fn call<'a>(&'a self, ctx: Context, next: Next) -> BoxFuture<'a, DispatchResult<()>>;

    /// Diagnostic label recording which calling convention a middleware was
    /// originally authored against (§4.2: the composer "normalizes both
    /// shapes to the context form at registration time and records the
    /// original for error diagnostics"). Defaults to the canonical two-arg
    /// shape; [`ExpressMiddleware`] overrides it.
    fn kind(&self) -> &'static str {
        "context"
    }
}

/// The continuation handed to each middleware. Calling `next.call(ctx)` more
/// than once is an invariant violation (§8) and surfaces as
/// [`DispatchError::NextCalledTwice`] instead of silently re-running the
/// remainder of the chain.
#[derive(Clone)]
pub struct Next {
    remaining: Arc<[Arc<dyn Middleware>]>,
    position: usize,
}

impl Next {
    fn new(chain: Arc<[Arc<dyn Middleware>]>) -> Self {
        Self { remaining: chain, position: 0 }
    }

    pub fn call(&self, ctx: Context) -> BoxFuture<'static, DispatchResult<()>> {
        let guard = ctx.next_depth_counter();
        let generation = guard.fetch_add(1, Ordering::SeqCst);
        if generation != self.expected_generation() {
            return Box::pin(async move { Err(DispatchError::NextCalledTwice) });
        }

        match self.remaining.get(self.position) {
            Some(middleware) => {
                let middleware = middleware.clone();
                let next = Next { remaining: self.remaining.clone(), position: self.position + 1 };
                Box::pin(async move { middleware.call(ctx, next).await })
            }
            None => Box::pin(async move { Ok(()) }),
        }
    }

    /// Each position in the chain is only ever allowed to invoke `next()`
    /// once; the context's shared counter tracks the cumulative number of
    /// `next()` calls made so far across the whole chain, so a link calling
    /// it twice always observes a generation it didn't just hand out.
    fn expected_generation(&self) -> usize {
        self.position
    }
}

/// Compose `global`, then route-local `chain`, then `handler`, into a single
/// runnable chain and invoke it against `ctx`. This is the entry point the
/// Dispatcher calls once per request (§4.5).
pub async fn run_chain(
    global: &[Arc<dyn Middleware>],
    chain: &[Arc<dyn Middleware>],
    handler: Arc<dyn Middleware>,
    ctx: Context,
) -> DispatchResult<()> {
    let mut full: Vec<Arc<dyn Middleware>> = Vec::with_capacity(global.len() + chain.len() + 1);
    full.extend(global.iter().cloned());
    full.extend(chain.iter().cloned());
    full.push(handler);
    let next = Next::new(Arc::from(full.into_boxed_slice()));
    next.call(ctx).await
}

/// Adapts a plain two-arg async closure `Fn(Context, Next) -> Future<Output
/// = DispatchResult<()>>` into a [`Middleware`]. This is the "two-arg"
/// calling convention (§4.2); most framework-authored middleware is written
/// this way.
pub struct FnMiddleware<F> {
    f: Arc<F>,
}

impl<F> FnMiddleware<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync,
    Fut: Future<Output = DispatchResult<()>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: Context, next: Next) -> BoxFuture<'a, DispatchResult<()>> {
        let f = self.f.clone();
        Box::pin(async move { f(ctx, next).await })
    }
}

/// Adapts a terminal handler `Fn(Context) -> Future<Output =
/// DispatchResult<()>>` (no `next` parameter) into a [`Middleware`] that
/// never calls `next` — the "dual-arity" convention's other half: handlers
/// are written as if they were the end of the chain, because inserted as
/// the last link, they always are.
pub struct TerminalHandler<F> {
    f: Arc<F>,
}

impl<F> TerminalHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F, Fut> Middleware for TerminalHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = DispatchResult<()>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: Context, _next: Next) -> BoxFuture<'a, DispatchResult<()>> {
        let f = self.f.clone();
        Box::pin(async move { f(ctx).await })
    }
}

/// The continuation handed to an [`ExpressMiddleware`]. Calling it with `None`
/// advances the chain exactly like [`Next::call`]; calling it with `Some(err)`
/// aborts the chain with that error without ever touching the shared `next()`
/// generation counter, matching the three-argument `(req, res, next)`
/// convention's `next(err?)` semantics (§4.2 "Express-style adaptation").
#[derive(Clone)]
pub struct ExpressNext {
    next: Next,
}

impl ExpressNext {
    pub fn call(&self, ctx: Context, err: Option<DispatchError>) -> BoxFuture<'static, DispatchResult<()>> {
        match err {
            Some(err) => Box::pin(async move { Err(err) }),
            None => self.next.call(ctx),
        }
    }
}

/// Adapts a three-argument Express-style middleware `Fn(Context, ExpressNext)
/// -> Future<Output = DispatchResult<()>>` into a [`Middleware`]. The
/// composer treats it identically to [`FnMiddleware`] at call time; the only
/// difference is the continuation type the closure is handed, so both
/// conventions are freely composable in the same chain (§4.2).
pub struct ExpressMiddleware<F> {
    f: Arc<F>,
}

impl<F> ExpressMiddleware<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F, Fut> Middleware for ExpressMiddleware<F>
where
    F: Fn(Context, ExpressNext) -> Fut + Send + Sync,
    Fut: Future<Output = DispatchResult<()>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: Context, next: Next) -> BoxFuture<'a, DispatchResult<()>> {
        let f = self.f.clone();
        Box::pin(async move { f(ctx, ExpressNext { next }).await })
    }

    fn kind(&self) -> &'static str {
        "express"
    }
}

/// Apply the implicit-200 rule (§4.4/§8): if the chain ran to completion
/// without any enhancer marking the response as sent, the dispatcher calls
/// this to finalize an empty `200 OK`.
pub async fn apply_implicit_ok(ctx: &Context) {
    let mut response = ctx.response().await;
    if !response.is_sent() {
        response.status_mut(http::StatusCode::OK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};
    use std::sync::atomic::AtomicUsize;
    use bytes::Bytes;

    fn ctx() -> Context {
        Context::from_request(Method::GET, "/x".parse().unwrap(), HeaderMap::new(), Bytes::new(), "req".into())
    }

    #[tokio::test]
    async fn chain_runs_in_order() {
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let mw1 = Arc::new(FnMiddleware::new(move |ctx: Context, next: Next| {
            let o1 = o1.clone();
            async move {
                o1.lock().await.push(1);
                next.call(ctx).await
            }
        }));

        let o2 = order.clone();
        let mw2 = Arc::new(FnMiddleware::new(move |ctx: Context, next: Next| {
            let o2 = o2.clone();
            async move {
                o2.lock().await.push(2);
                next.call(ctx).await
            }
        }));

        let o3 = order.clone();
        let handler = Arc::new(TerminalHandler::new(move |_ctx: Context| {
            let o3 = o3.clone();
            async move {
                o3.lock().await.push(3);
                Ok(())
            }
        }));

        run_chain(&[mw1], &[mw2], handler, ctx()).await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn middleware_that_does_not_call_next_short_circuits() {
        let reached = Arc::new(AtomicUsize::new(0));

        let short_circuit = Arc::new(FnMiddleware::new(|ctx: Context, _next: Next| async move {
            ctx.response().await.status_mut(http::StatusCode::FORBIDDEN);
            Ok(())
        }));

        let r = reached.clone();
        let handler = Arc::new(TerminalHandler::new(move |_ctx: Context| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let context = ctx();
        run_chain(&[short_circuit], &[], handler, context.clone()).await.unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 0, "handler must not run once a middleware short-circuits");
        assert_eq!(context.response().await.status(), http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn calling_next_twice_is_rejected() {
        let mw = Arc::new(FnMiddleware::new(|ctx: Context, next: Next| async move {
            next.call(ctx.clone()).await?;
            next.call(ctx).await
        }));
        let handler = Arc::new(TerminalHandler::new(|_ctx: Context| async move { Ok(()) }));

        let err = run_chain(&[mw], &[], handler, ctx()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NextCalledTwice));
    }

    #[tokio::test]
    async fn express_style_next_with_no_error_advances() {
        let reached = Arc::new(AtomicUsize::new(0));
        let r = reached.clone();
        let mw = Arc::new(ExpressMiddleware::new(move |ctx: Context, next: ExpressNext| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                next.call(ctx, None).await
            }
        }));
        let handler = Arc::new(TerminalHandler::new(|_ctx: Context| async move { Ok(()) }));

        run_chain(&[mw], &[], handler, ctx()).await.unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn express_style_next_with_error_aborts_the_chain() {
        let reached = Arc::new(AtomicUsize::new(0));
        let mw = Arc::new(ExpressMiddleware::new(|ctx: Context, next: ExpressNext| async move {
            next.call(ctx, Some(DispatchError::Forbidden("blocked".into()))).await
        }));
        let r = reached.clone();
        let handler = Arc::new(TerminalHandler::new(move |_ctx: Context| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let err = run_chain(&[mw], &[], handler, ctx()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));
        assert_eq!(reached.load(Ordering::SeqCst), 0, "handler must not run once express-style next aborts");
    }

    #[tokio::test]
    async fn two_arg_and_three_arg_middleware_compose_in_the_same_chain() {
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let two_arg = Arc::new(FnMiddleware::new(move |ctx: Context, next: Next| {
            let o1 = o1.clone();
            async move {
                o1.lock().await.push("two-arg");
                next.call(ctx).await
            }
        }));

        let o2 = order.clone();
        let three_arg = Arc::new(ExpressMiddleware::new(move |ctx: Context, next: ExpressNext| {
            let o2 = o2.clone();
            async move {
                o2.lock().await.push("three-arg");
                next.call(ctx, None).await
            }
        }));

        let o3 = order.clone();
        let handler = Arc::new(TerminalHandler::new(move |_ctx: Context| {
            let o3 = o3.clone();
            async move {
                o3.lock().await.push("handler");
                Ok(())
            }
        }));

        run_chain(&[two_arg, three_arg], &[], handler, ctx()).await.unwrap();
        assert_eq!(*order.lock().await, vec!["two-arg", "three-arg", "handler"]);
    }

    #[tokio::test]
    async fn implicit_ok_only_applies_when_nothing_was_sent() {
        let context = ctx();
        apply_implicit_ok(&context).await;
        assert_eq!(context.response().await.status(), http::StatusCode::OK);

        let context = ctx();
        context.response().await.status_mut(http::StatusCode::CREATED);
        context.response().await.send(Bytes::from_static(b"{}"));
        apply_implicit_ok(&context).await;
        assert_eq!(context.response().await.status(), http::StatusCode::CREATED);
    }
}
