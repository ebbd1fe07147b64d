//! Bounded-parallelism task runner.
//!
//! [`run_bounded`] drives a worker over a list of items with at most
//! `concurrency` items in flight. `concurrency` lanes each pull the next
//! unstarted item from a shared FIFO queue when they finish the previous one,
//! so dispatch order follows input order rather than lane position.
//!
//! Each item runs on its own tokio task. A per-item timeout fails the item but
//! does not abort the task: the work is left to finish in the background and
//! its result is dropped. Cancellation is cooperative and checked before every
//! dispatch; items that never started resolve to [`TaskError::Aborted`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Knobs for one [`run_bounded`] pass.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            timeout: None,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// Why an item did not produce a worker result.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    #[error("operation aborted")]
    Aborted,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(E),
}

impl<E> TaskError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::TimedOut(_))
    }
}

pub type TaskResult<R, E> = std::result::Result<R, TaskError<E>>;

/// Run `worker` over every item, at most `options.concurrency` at a time.
///
/// The returned vector is in input order and has exactly one entry per item.
/// A concurrency of zero is treated as one.
pub async fn run_bounded<T, R, E, F, Fut>(
    items: Vec<T>,
    options: &RunOptions,
    worker: F,
) -> Vec<TaskResult<R, E>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
        Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
    let slots: Arc<Mutex<Vec<Option<TaskResult<R, E>>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let worker = Arc::new(worker);
    let lanes = options.concurrency.max(1).min(total);

    let lane_futures = (0..lanes).map(|lane| {
        let queue = Arc::clone(&queue);
        let slots = Arc::clone(&slots);
        let worker = Arc::clone(&worker);
        let options = options.clone();
        async move {
            loop {
                if options.is_cancelled() {
                    break;
                }
                let Some((index, item)) = queue.lock().pop_front() else {
                    break;
                };
                tracing::trace!(lane, index, "dispatching item");
                let result = run_one(&options, Arc::clone(&worker), item).await;
                slots.lock()[index] = Some(result);
            }
        }
    });
    futures::future::join_all(lane_futures).await;

    let results: Vec<TaskResult<R, E>> = slots
        .lock()
        .iter_mut()
        .map(|slot| slot.take().unwrap_or(Err(TaskError::Aborted)))
        .collect();
    results
}

async fn run_one<T, R, E, F, Fut>(options: &RunOptions, worker: Arc<F>, item: T) -> TaskResult<R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    let handle = tokio::spawn(async move { worker(item).await });

    let joined = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            // Dropping the JoinHandle detaches the task; it keeps running.
            Err(_) => return Err(TaskError::TimedOut(limit)),
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::Failed(e)),
        Err(join_err) if join_err.is_panic() => Err(TaskError::Panicked(join_err.to_string())),
        Err(_) => Err(TaskError::Aborted),
    }
}
