//! Owns the one-second timer tick (§6) as a background `tokio` task, so an
//! embedding application does not have to hand-roll its own interval loop.
//! Grounded in `styrene-rns-transport::transport::jobs::manage_transport`'s
//! pattern of spawning a `tokio::time::sleep`-in-a-loop task guarded by a
//! `tokio_util::sync::CancellationToken`.
//!
//! The tick itself drives the (out-of-scope, §1) topology layer — hello
//! protocol retransmission, link-state flooding, shortest-path recompute.
//! This crate has no topology implementation to call, so the tick is
//! expressed as a callback the embedding application supplies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::trace;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::router::RouterCore;

/// Anything invoked once per timer tick. Implemented by the embedding
/// application's topology layer; the router core itself has no tick-driven
/// work of its own (every table it owns is mutated synchronously by the
/// `on_*` handlers in [`crate::router`]).
pub trait TickHandler: Send + Sync + 'static {
    fn on_tick(&self, router: &RouterCore);
}

impl<F> TickHandler for F
where
    F: Fn(&RouterCore) + Send + Sync + 'static,
{
    fn on_tick(&self, router: &RouterCore) {
        self(router)
    }
}

/// A no-op tick handler for embedding applications with no topology layer
/// (e.g. a standalone router with only directly-attached endpoints).
pub struct NullTickHandler;

impl TickHandler for NullTickHandler {
    fn on_tick(&self, _router: &RouterCore) {}
}

/// Spawns the timer task and holds the handle needed to stop it cleanly.
/// Dropping a `RouterRuntime` without calling [`RouterRuntime::shutdown`]
/// still stops the task (the `CancellationToken` has no other owner), but
/// `shutdown` additionally waits for the in-flight tick, if any, to finish.
pub struct RouterRuntime {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RouterRuntime {
    /// Starts the tick loop at `router.config().timer_tick` intervals,
    /// calling `handler.on_tick(&router)` on each fire until cancelled.
    pub fn spawn(router: Arc<RouterCore>, handler: Arc<dyn TickHandler>) -> Self {
        let cancel = CancellationToken::new();
        let tick_cancel = cancel.clone();
        let interval = router.config().timer_tick;

        let task = tokio::spawn(async move {
            run_tick_loop(router, handler, interval, tick_cancel).await;
        });

        Self { cancel, task: Some(task) }
    }

    /// Signals the tick loop to stop and waits for it to finish its current
    /// iteration, mirroring the teacher's `cancel.cancelled()` branch inside
    /// each `tokio::select!`.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RouterRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_tick_loop(
    router: Arc<RouterCore>,
    handler: Arc<dyn TickHandler>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = tokio::time::sleep(interval) => {
                trace!("router timer tick");
                handler.on_tick(&router);
            }
        }
    }
}

/// Runs `fut` to completion unless `cancel` fires first, mirroring the
/// `tokio::select! { _ = cancel.cancelled() => ..., _ = fut => ... }` shape
/// used throughout the teacher's job loops. Exposed for embedding
/// applications that want to race their own topology I/O against the same
/// cancellation signal a `RouterRuntime` uses.
pub async fn run_until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
