//! mcpredact_kernel
//!
//! The middleware composition kernel: Koa-style onion layering over a
//! terminal operation. `Req`/`Res`/`Err` are generic so the same kernel
//! backs both the tool pipeline (`audit ▸ pii-tool ▸ backend`) and the
//! resource pipeline (`pii-resource ▸ backend`).

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type StepFn<Req, Res, Err> = dyn Fn(Req) -> BoxFuture<'static, Result<Res, Err>> + Send + Sync;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("middleware called `next` more than once in a single invocation")]
    DoubleNextCall,
}

/// One onion layer. Implementations may transform `req` before calling
/// `next`, transform or replace the result after, short-circuit by
/// returning without calling `next`, or catch/transform an error `next`
/// raised.
#[async_trait]
pub trait Middleware<Req, Res, Err>: Send + Sync
where
    Req: Send + 'static,
    Res: Send + 'static,
    Err: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Res, Err>) -> Result<Res, Err>;
}

/// The one-shot continuation into the rest of the chain. A second call
/// within the same invocation returns `KernelError::DoubleNextCall`.
pub struct Next<Req, Res, Err> {
    inner: Arc<StepFn<Req, Res, Err>>,
    called: Arc<AtomicBool>,
}

impl<Req, Res, Err> Next<Req, Res, Err>
where
    Req: Send + 'static,
    Res: Send + 'static,
    Err: Send + 'static + From<KernelError>,
{
    pub async fn call(self, req: Req) -> Result<Res, Err> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Err(KernelError::DoubleNextCall.into());
        }
        (self.inner)(req).await
    }
}

/// Wrap a plain async function as the chain's terminal operation.
pub fn terminal<Req, Res, Err, F, Fut>(f: F) -> Arc<StepFn<Req, Res, Err>>
where
    Req: Send + 'static,
    Res: Send + 'static,
    Err: Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, Err>> + Send + 'static,
{
    Arc::new(move |req: Req| Box::pin(f(req)) as BoxFuture<'static, Result<Res, Err>>)
}

/// A fully composed onion: `run` drives a request through every layer and
/// the terminal operation.
pub struct Pipeline<Req, Res, Err> {
    chain: Arc<StepFn<Req, Res, Err>>,
}

impl<Req, Res, Err> Pipeline<Req, Res, Err>
where
    Req: Send + 'static,
    Res: Send + 'static,
    Err: Send + 'static + From<KernelError>,
{
    /// `layers[0]` is outermost: it starts first and finishes last.
    pub fn new(layers: Vec<Arc<dyn Middleware<Req, Res, Err>>>, terminal: Arc<StepFn<Req, Res, Err>>) -> Self {
        let chain = layers.into_iter().rev().fold(terminal, |inner, layer| {
            Arc::new(move |req: Req| {
                let layer = Arc::clone(&layer);
                let inner = Arc::clone(&inner);
                Box::pin(async move {
                    let next = Next {
                        inner,
                        called: Arc::new(AtomicBool::new(false)),
                    };
                    layer.handle(req, next).await
                }) as BoxFuture<'static, Result<Res, Err>>
            }) as Arc<StepFn<Req, Res, Err>>
        });
        Pipeline { chain }
    }

    pub async fn run(&self, req: Req) -> Result<Res, Err> {
        (self.chain)(req).await
    }
}
