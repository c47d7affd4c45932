use std::panic;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, TryStreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::store::{ActivationLookup, BindingApi, ChannelApi, SubscriptionStore};
use crate::types::SubscriptionKey;

pub mod queue;
pub use queue::WorkQueue;

/// Reconciles every key yielded by `triggers` until the stream ends or
/// `cancel` fires.
///
/// Keys are processed by `config().workers` concurrent workers, never more
/// than one at a time per key. A failed reconcile re-enqueues its key after
/// an exponential backoff.
///
/// When the stream ends, keys already queued are still processed before this
/// returns. When `cancel` fires, in-flight reconciles are cancelled.
pub async fn run<S, C, B, T, E>(
    reconciler: Arc<Reconciler<S, C, B>>,
    triggers: T,
    cancel: CancellationToken,
) -> Result<(), RunError<E>>
where
    S: SubscriptionStore + ActivationLookup + 'static,
    C: ChannelApi + 'static,
    B: BindingApi + 'static,
    T: Stream<Item = Result<SubscriptionKey, E>>,
{
    let config = reconciler.config().clone();
    let queue = Arc::new(WorkQueue::new(config.backoff_base, config.backoff_max));
    let workers_cancel = cancel.child_token();

    let workers: Vec<Worker> = (0..config.workers.max(1))
        .map(|id| Worker {
            join_handle: tokio::spawn(work(
                id,
                Arc::clone(&reconciler),
                Arc::clone(&queue),
                workers_cancel.clone(),
            )),
        })
        .collect();
    log::info!("started {} reconcile workers", workers.len());

    let result = feed(&queue, triggers, &cancel).await;
    if result.is_err() {
        workers_cancel.cancel();
    }
    queue.shutdown();

    for worker in workers {
        worker.join().await;
    }
    log::info!("reconcile workers stopped");
    result
}

/// The error type returned by [`run`].
#[derive(Debug, thiserror::Error)]
pub enum RunError<E> {
    #[error("trigger stream failed: {0}")]
    Subscribe(#[source] E),
}

async fn feed<T, E>(
    queue: &WorkQueue<SubscriptionKey>,
    triggers: T,
    cancel: &CancellationToken,
) -> Result<(), RunError<E>>
where
    T: Stream<Item = Result<SubscriptionKey, E>>,
{
    let mut triggers = pin!(triggers);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            next = triggers.try_next() => match next.map_err(RunError::Subscribe)? {
                Some(key) => queue.add(key),
                None => return Ok(()),
            },
        }
    }
}

async fn work<S, C, B>(
    id: usize,
    reconciler: Arc<Reconciler<S, C, B>>,
    queue: Arc<WorkQueue<SubscriptionKey>>,
    cancel: CancellationToken,
) where
    S: SubscriptionStore + ActivationLookup,
    C: ChannelApi,
    B: BindingApi,
{
    let timeout = reconciler.config().reconcile_timeout;
    while let Some(key) = queue.next().await {
        match reconcile_with_deadline(&reconciler, &key, timeout, &cancel).await {
            Ok(()) => queue.forget(&key),
            Err(Error::Cancelled) if cancel.is_cancelled() => {}
            Err(err) => {
                log::warn!(
                    "worker {id}: reconciling {key} failed after {} retries: {err}",
                    queue.failures(&key)
                );
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
}

/// Runs one reconcile, cancelling it if it has not finished within `timeout`.
pub(crate) async fn reconcile_with_deadline<S, C, B>(
    reconciler: &Reconciler<S, C, B>,
    key: &SubscriptionKey,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: SubscriptionStore + ActivationLookup,
    C: ChannelApi,
    B: BindingApi,
{
    let child = cancel.child_token();
    match tokio::time::timeout(timeout, reconciler.reconcile(key, &child)).await {
        Ok(result) => result,
        Err(_) => {
            child.cancel();
            Err(Error::Deadline { timeout })
        }
    }
}

struct Worker {
    join_handle: JoinHandle<()>,
}

impl Worker {
    async fn join(self) {
        if let Err(err) = self.join_handle.await {
            if let Ok(panic) = err.try_into_panic() {
                panic::resume_unwind(panic)
            }
        }
    }
}
