use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, OwnedPermit, error::TrySendError};
use tokio::time::sleep;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct BatchPolicy {
    /// Largest number of tasks assembled into one batch.
    pub max_batch_size: usize,
    /// Bound on batches admitted but not yet executed; admission is
    /// rejected beyond this instead of queuing unboundedly.
    pub max_enqueued_batches: usize,
    /// How long a partially filled batch may wait for siblings before
    /// it closes anyway.
    pub batch_timeout: Duration,
}

/// A closed batch: an immutable sequence of tasks in admission order.
#[derive(Debug)]
pub struct Batch<T> {
    tasks: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<T> {
        self.tasks
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(tasks: Vec<T>) -> Self {
        Self { tasks }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError<T> {
    /// The closed-batch queue is full. The task is handed back to the
    /// caller untouched so that one request can be failed without
    /// disturbing the others.
    #[error("the batch scheduling queue is full (max {max} enqueued batches)")]
    QueueFull { max: usize, task: T },
    /// The consumer side of the pipeline is gone.
    #[error("the batch pipeline has shut down")]
    Shutdown(T),
}

impl<T> ScheduleError<T> {
    pub fn into_task(self) -> T {
        match self {
            Self::QueueFull { task, .. } => task,
            Self::Shutdown(task) => task,
        }
    }
}

struct OpenBatch<T> {
    tasks: Vec<T>,
    /// Slot reserved in the closed-batch queue when this batch was
    /// opened. Consumed on close; sending through it cannot fail or
    /// block.
    permit: Option<OwnedPermit<Batch<T>>>,
    generation: u64,
}

/// Groups individually scheduled tasks into batches, decoupling request
/// arrival from execution.
///
/// A batch closes when it reaches `max_batch_size` or when
/// `batch_timeout` expires for a partially filled batch. Closed batches
/// are delivered through the receiver returned by [`new`](Self::new),
/// so the caller that triggered the close never runs the executor
/// synchronously. Must be used inside a tokio runtime (the close timer
/// is a spawned task).
pub struct BatchScheduler<T> {
    policy: BatchPolicy,
    tx: mpsc::Sender<Batch<T>>,
    open: Mutex<OpenBatch<T>>,
}

impl<T: Send + 'static> BatchScheduler<T> {
    pub fn new(policy: BatchPolicy) -> (Arc<Self>, mpsc::Receiver<Batch<T>>) {
        assert!(policy.max_batch_size >= 1, "max_batch_size must be >= 1");
        assert!(
            policy.max_enqueued_batches >= 1,
            "max_enqueued_batches must be >= 1"
        );
        let (tx, rx) = mpsc::channel(policy.max_enqueued_batches);
        let scheduler = Arc::new(Self {
            policy,
            tx,
            open: Mutex::new(OpenBatch {
                tasks: Vec::new(),
                permit: None,
                generation: 0,
            }),
        });
        (scheduler, rx)
    }

    /// Append `task` to the open batch, opening one if necessary.
    /// Holds the internal lock only briefly and never blocks on I/O.
    pub fn schedule(self: &Arc<Self>, task: T) -> Result<(), ScheduleError<T>> {
        let mut open = self.open.lock().unwrap();

        if open.tasks.is_empty() {
            // Opening a batch reserves its queue slot up front, so an
            // overloaded server rejects at admission time.
            let permit = match self.tx.clone().try_reserve_owned() {
                Ok(permit) => permit,
                Err(TrySendError::Full(_)) => {
                    return Err(ScheduleError::QueueFull {
                        max: self.policy.max_enqueued_batches,
                        task,
                    });
                }
                Err(TrySendError::Closed(_)) => return Err(ScheduleError::Shutdown(task)),
            };
            open.permit = Some(permit);
            open.generation += 1;

            let generation = open.generation;
            let scheduler = Arc::clone(self);
            let timeout = self.policy.batch_timeout;
            tokio::spawn(async move {
                sleep(timeout).await;
                scheduler.close_if_current(generation);
            });
        }

        open.tasks.push(task);
        if open.tasks.len() >= self.policy.max_batch_size {
            Self::close(&mut open);
        }
        Ok(())
    }

    fn close_if_current(&self, generation: u64) {
        let mut open = self.open.lock().unwrap();
        if open.generation == generation && !open.tasks.is_empty() {
            Self::close(&mut open);
        }
    }

    fn close(open: &mut OpenBatch<T>) {
        let tasks = std::mem::take(&mut open.tasks);
        let permit = open
            .permit
            .take()
            .expect("open batch without a queue reservation");
        debug!(batch = tasks.len(), "closing batch");
        permit.send(Batch { tasks });
    }
}
