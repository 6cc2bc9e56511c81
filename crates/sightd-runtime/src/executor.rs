use std::sync::mpsc;
use std::thread;

use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// The worker is gone (shutdown, or a previous job panicked) and
    /// the submitted work will never run.
    #[error("serial executor worker is gone; job canceled")]
    Canceled,
}

enum Job<S> {
    Run(Box<dyn FnOnce(&mut S) + Send>),
    Stop,
}

/// Funnels every call into a non-reentrant state `S` through one
/// dedicated worker thread.
///
/// `S` is constructed on the worker by the init closure and never
/// leaves it, so it does not need to be `Send`. Jobs execute strictly
/// in submission order and never overlap. Dropping the executor queues
/// a stop message behind any pending jobs and joins the worker; jobs
/// submitted after that resolve with [`ExecutorError::Canceled`].
pub struct SerialExecutor<S> {
    tx: mpsc::Sender<Job<S>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<S: 'static> SerialExecutor<S> {
    /// Spawn the worker thread and build `S` on it. An init failure
    /// tears the worker down and is returned to the spawner.
    pub fn spawn<F>(name: &str, init: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> anyhow::Result<S> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job<S>>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(f) => f(&mut state),
                        Job::Stop => break,
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx,
                worker: Some(worker),
            }),
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                anyhow::bail!("serial executor worker died during init")
            }
        }
    }

    /// Run `f` on the worker and block the calling thread (on a channel
    /// recv, no busy-wait) until it has completed, returning its result.
    pub fn run<R, F>(&self, f: F) -> Result<R, ExecutorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job = Job::Run(Box::new(move |state: &mut S| {
            let _ = done_tx.send(f(state));
        }));
        self.tx.send(job).map_err(|_| ExecutorError::Canceled)?;
        done_rx.recv().map_err(|_| ExecutorError::Canceled)
    }
}

impl<S> Drop for SerialExecutor<S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
