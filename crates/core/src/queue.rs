//! Single-concurrency FIFO queue for plugin work.
//!
//! Tasks are executed one at a time in submission order by a dedicated
//! worker. Each task runs under a timeout; a task that exceeds it is
//! abandoned and the worker moves on to the next one. Submission never
//! waits for the task to run, so a task may itself enqueue follow-up work.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

type BoxTask = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Discarded,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("processing queue is shut down")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: bool,
    pub discarded: usize,
}

/// Waits for the outcome of one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    pub id: u64,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub async fn outcome(self) -> TaskOutcome {
        self.receiver.await.unwrap_or(TaskOutcome::Discarded)
    }
}

struct QueuedTask {
    id: u64,
    label: String,
    task: BoxTask,
    done: oneshot::Sender<TaskOutcome>,
}

pub struct ProcessingQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    current: Arc<Mutex<Option<AbortHandle>>>,
    depth: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessingQueue {
    /// Starts the worker on the current tokio runtime.
    pub fn new(task_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        let depth = Arc::new(AtomicUsize::new(0));
        let worker =
            tokio::spawn(run_worker(receiver, task_timeout, current.clone(), depth.clone()));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            current,
            depth,
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of tasks submitted but not yet finished, including the one
    /// currently running.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn enqueue<F, E>(&self, label: impl Into<String>, task: F) -> Result<TaskHandle, QueueError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let label = label.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done, receiver) = oneshot::channel();
        let task: BoxTask = Box::pin(async move { task.await.map_err(|error| error.to_string()) });

        let sender = guard(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(QueueError::Closed);
        };

        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if sender.send(QueuedTask { id, label: label.clone(), task, done }).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }

        debug!(event_name = "queue.task.enqueued", task_id = id, label = %label, depth, "task enqueued");
        Ok(TaskHandle { id, receiver })
    }

    /// Stops accepting work, waits up to `drain` for submitted tasks to
    /// finish, then discards whatever is left.
    pub async fn shutdown(&self, drain: Duration) -> ShutdownReport {
        guard(&self.sender).take();
        let worker = guard(&self.worker).take();
        let Some(mut worker) = worker else {
            return ShutdownReport { drained: true, discarded: 0 };
        };

        let pending = self.depth();
        info!(event_name = "queue.shutdown.started", pending, drain_ms = drain.as_millis() as u64, "draining processing queue");

        if tokio::time::timeout(drain, &mut worker).await.is_ok() {
            info!(event_name = "queue.shutdown.drained", "processing queue drained");
            return ShutdownReport { drained: true, discarded: 0 };
        }

        let discarded = self.depth.swap(0, Ordering::SeqCst);
        if let Some(current) = guard(&self.current).take() {
            current.abort();
        }
        worker.abort();
        warn!(
            event_name = "queue.shutdown.discarded",
            discarded,
            "drain window elapsed; discarding remaining tasks"
        );
        ShutdownReport { drained: false, discarded }
    }
}

impl Drop for ProcessingQueue {
    fn drop(&mut self) {
        if let Some(worker) = guard(&self.worker).take() {
            worker.abort();
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    task_timeout: Duration,
    current: Arc<Mutex<Option<AbortHandle>>>,
    depth: Arc<AtomicUsize>,
) {
    while let Some(queued) = receiver.recv().await {
        let QueuedTask { id, label, task, done } = queued;
        let mut running = tokio::spawn(task);
        *guard(&current) = Some(running.abort_handle());

        let outcome = match tokio::time::timeout(task_timeout, &mut running).await {
            Ok(Ok(Ok(()))) => TaskOutcome::Completed,
            Ok(Ok(Err(message))) => {
                warn!(event_name = "queue.task.failed", task_id = id, label = %label, error = %message, "queued task failed");
                TaskOutcome::Failed(message)
            }
            Ok(Err(join_error)) => {
                warn!(event_name = "queue.task.panicked", task_id = id, label = %label, error = %join_error, "queued task panicked");
                TaskOutcome::Failed(join_error.to_string())
            }
            Err(_) => {
                running.abort();
                warn!(
                    event_name = "queue.task.timed_out",
                    task_id = id,
                    label = %label,
                    timeout_ms = task_timeout.as_millis() as u64,
                    "queued task timed out; skipping to next task"
                );
                TaskOutcome::TimedOut
            }
        };

        guard(&current).take();
        let _ = depth.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
        let _ = done.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::{ProcessingQueue, QueueError, TaskOutcome};

    #[tokio::test]
    async fn depth_counts_running_and_waiting_tasks() {
        let queue = ProcessingQueue::new(Duration::from_secs(5));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let first = queue
            .enqueue("blocked", async move {
                let _ = gate.await;
                Ok::<(), String>(())
            })
            .map_err(|error| error.to_string());
        let second = queue.enqueue("waiting", async { Ok::<(), String>(()) }).map_err(|error| error.to_string());
        assert_eq!(queue.depth(), 2);

        let _ = release.send(());
        for handle in [first, second] {
            match handle {
                Ok(handle) => assert_eq!(handle.outcome().await, TaskOutcome::Completed),
                Err(error) => panic!("enqueue failed: {error}"),
            }
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn tasks_complete_in_submission_order_without_overlap() {
        let queue = ProcessingQueue::new(Duration::from_secs(5));
        let completed = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for index in 0..12u64 {
            let completed = completed.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            let handle = queue
                .enqueue(format!("task-{index}"), async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(12 - index)).await;
                    completed.lock().await.push(index);
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                })
                .map_err(|error| error.to_string());
            handles.push(handle);
        }

        for handle in handles {
            let handle = match handle {
                Ok(handle) => handle,
                Err(error) => panic!("enqueue failed: {error}"),
            };
            assert_eq!(handle.outcome().await, TaskOutcome::Completed);
        }

        assert_eq!(*completed.lock().await, (0..12).collect::<Vec<_>>());
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn hung_task_times_out_and_queue_moves_on() {
        let queue = ProcessingQueue::new(Duration::from_millis(50));

        let hung = queue
            .enqueue("hung", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<(), String>(())
            })
            .map_err(|error| error.to_string());
        let next = queue.enqueue("next", async { Ok::<(), String>(()) }).map_err(|e| e.to_string());

        let (Ok(hung), Ok(next)) = (hung, next) else {
            panic!("enqueue should succeed");
        };
        assert_eq!(hung.outcome().await, TaskOutcome::TimedOut);
        assert_eq!(next.outcome().await, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_the_queue() {
        let queue = ProcessingQueue::new(Duration::from_secs(5));

        let failing = queue.enqueue("failing", async { Err::<(), _>("model unavailable") });
        let panicking = queue.enqueue("panicking", async {
            let outcome: Result<(), String> = Err("unreachable".to_string());
            if outcome.is_err() {
                panic!("plugin bug");
            }
            outcome
        });
        let healthy = queue.enqueue("healthy", async { Ok::<(), String>(()) });

        let (Ok(failing), Ok(panicking), Ok(healthy)) = (failing, panicking, healthy) else {
            panic!("enqueue should succeed");
        };
        assert_eq!(failing.outcome().await, TaskOutcome::Failed("model unavailable".to_string()));
        assert!(matches!(panicking.outcome().await, TaskOutcome::Failed(_)));
        assert_eq!(healthy.outcome().await, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn shutdown_drains_submitted_tasks_then_rejects_new_ones() {
        let queue = ProcessingQueue::new(Duration::from_secs(5));
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let counter = counter.clone();
            if let Ok(handle) = queue.enqueue("count", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }) {
                handles.push(handle);
            }
        }

        let report = queue.shutdown(Duration::from_secs(2)).await;
        assert!(report.drained);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        for handle in handles {
            assert_eq!(handle.outcome().await, TaskOutcome::Completed);
        }

        let rejected = queue.enqueue("late", async { Ok::<(), String>(()) });
        assert!(matches!(rejected, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_discards_tasks_left_after_drain_window() {
        let queue = ProcessingQueue::new(Duration::from_secs(60));

        let slow = queue.enqueue("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), String>(())
        });
        let waiting = queue.enqueue("waiting", async { Ok::<(), String>(()) });

        let report = queue.shutdown(Duration::from_millis(50)).await;
        assert!(!report.drained);
        assert_eq!(report.discarded, 2);

        let (Ok(slow), Ok(waiting)) = (slow, waiting) else {
            panic!("enqueue should succeed");
        };
        assert_eq!(slow.outcome().await, TaskOutcome::Discarded);
        assert_eq!(waiting.outcome().await, TaskOutcome::Discarded);
    }
}
