use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use dsf_core::{panic_payload_to_str, DsfError, DsfResult};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

/// What happens to tasks that are still queued when the executor shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Run every task submitted before `shutdown()` and then stop.
    #[default]
    RunPending,
    /// Drop queued tasks without running them.
    DiscardPending,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub thread_name: String,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "dsf-executor".to_owned(),
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

struct ExecutorInner {
    id: u64,
    name: String,
    policy: ShutdownPolicy,
    // Held for reading while enqueueing so that no task can slip in behind the
    // terminal `Shutdown` message.
    accepting: RwLock<bool>,
    tx: mpsc::UnboundedSender<Message>,
    timers: tokio::runtime::Handle,
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct WorkerShared {
    thread_id: OnceLock<ThreadId>,
    discard: AtomicBool,
}

/// Single-threaded, FIFO task executor bound to one session.
///
/// Tasks never run concurrently and run in the order they were submitted.
/// Submitting from inside a running task simply appends to the queue. A task
/// that panics is logged and the worker keeps going.
#[derive(Clone)]
pub struct DsfExecutor {
    inner: Arc<ExecutorInner>,
}

impl DsfExecutor {
    pub fn new(config: ExecutorConfig) -> std::io::Result<Self> {
        // The worker drives a current-thread runtime; it is only used for the
        // timers behind `schedule`.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let timers = runtime.handle().clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(WorkerShared {
            thread_id: OnceLock::new(),
            discard: AtomicBool::new(false),
        });

        let id = NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed);
        let name = config.thread_name;
        let worker = {
            let shared = Arc::clone(&shared);
            let name = name.clone();
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let _ = shared.thread_id.set(std::thread::current().id());
                    runtime.block_on(worker_loop(name, rx, shared));
                })?
        };

        tracing::debug!(target: "dsf.executor", executor = %name, id, "executor started");

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                id,
                name,
                policy: config.shutdown_policy,
                accepting: RwLock::new(true),
                tx,
                timers,
                shared,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Process-unique identifier of this executor.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_in_executor_thread(&self) -> bool {
        self.inner.shared.thread_id.get() == Some(&std::thread::current().id())
    }

    pub fn is_shutdown(&self) -> bool {
        !*self.inner.accepting.read()
    }

    pub fn execute<F>(&self, task: F) -> DsfResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit(Box::new(task))
    }

    /// Runs `task` on the executor once `delay` has elapsed.
    ///
    /// The delay is measured from this call. If the executor has shut down by
    /// the time the delay elapses, the task is dropped.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> DsfResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            return self.execute(task);
        }
        if self.is_shutdown() {
            return Err(DsfError::Rejected);
        }

        let inner: Weak<ExecutorInner> = Arc::downgrade(&self.inner);
        let task: Task = Box::new(task);
        self.inner.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.submit(task).is_err() {
                tracing::debug!(
                    target: "dsf.executor",
                    executor = %inner.name,
                    "dropping delayed task scheduled before shutdown"
                );
            }
        });
        Ok(())
    }

    /// Shuts the executor down using the configured [`ShutdownPolicy`].
    pub fn shutdown(&self) {
        self.shutdown_with(self.inner.policy);
    }

    /// Stops accepting new tasks, lets the worker drain (or discard) the queue,
    /// then stops it.
    ///
    /// When called from a foreign thread this waits for the worker to exit;
    /// when called from a task on this executor it returns immediately and the
    /// worker stops after the current task. Calling it more than once is a
    /// no-op.
    pub fn shutdown_with(&self, policy: ShutdownPolicy) {
        {
            let mut accepting = self.inner.accepting.write();
            if !*accepting {
                return;
            }
            *accepting = false;
            if policy == ShutdownPolicy::DiscardPending {
                self.inner.shared.discard.store(true, Ordering::SeqCst);
            }
            let _ = self.inner.tx.send(Message::Shutdown);
        }

        tracing::debug!(
            target: "dsf.executor",
            executor = %self.inner.name,
            ?policy,
            "executor shutting down"
        );

        if self.is_in_executor_thread() {
            return;
        }
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(
                    target: "dsf.executor",
                    executor = %self.inner.name,
                    "executor worker thread panicked"
                );
            }
        }
    }
}

impl ExecutorInner {
    fn submit(&self, task: Task) -> DsfResult<()> {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(DsfError::Rejected);
        }
        self.tx
            .send(Message::Run(task))
            .map_err(|_| DsfError::Rejected)
    }
}

impl std::fmt::Debug for DsfExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsfExecutor")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

async fn worker_loop(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Message>,
    shared: Arc<WorkerShared>,
) {
    let mut discarded = 0usize;
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run(task) => {
                if shared.discard.load(Ordering::SeqCst) {
                    discarded += 1;
                    continue;
                }
                run_task(&name, task);
            }
            Message::Shutdown => break,
        }
    }

    if discarded > 0 {
        tracing::debug!(
            target: "dsf.executor",
            executor = %name,
            discarded,
            "discarded queued tasks on shutdown"
        );
    }
    tracing::debug!(target: "dsf.executor", executor = %name, "executor stopped");
}

fn run_task(name: &str, task: Task) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        tracing::error!(
            target: "dsf.executor",
            executor = %name,
            panic = %panic_payload_to_str(&*panic),
            "task panicked"
        );
    }
}
