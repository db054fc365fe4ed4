use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use dsf_core::{DsfError, DsfResult};

use crate::{DataRequestMonitor, DsfExecutor};

struct QueryState<T> {
    result: Option<DsfResult<T>>,
    interrupted: bool,
}

struct QueryShared<T> {
    state: Mutex<QueryState<T>>,
    ready: Condvar,
}

impl<T> QueryShared<T> {
    fn complete(&self, result: DsfResult<T>) {
        self.state.lock().result = Some(result);
        self.ready.notify_all();
    }
}

trait Interruptible: Send + Sync {
    fn interrupt(&self);
    fn is_interrupted(&self) -> bool;
}

impl<T: Send> Interruptible for QueryShared<T> {
    fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.ready.notify_all();
    }

    fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }
}

/// Handle that wakes a thread blocked on a [`Query`] with
/// [`DsfError::Interrupted`]. Interrupting a query that already completed has
/// no effect on its result.
#[derive(Clone)]
pub struct QueryInterrupt {
    shared: Arc<dyn Interruptible>,
}

impl QueryInterrupt {
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.is_interrupted()
    }
}

impl fmt::Debug for QueryInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryInterrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Lets a thread that is not the session executor wait for session-bound
/// asynchronous work.
///
/// The work closure is submitted to the executor as soon as the query is
/// created and receives the [`DataRequestMonitor`] it must complete. The
/// creating thread then blocks in [`get`](Self::get) or
/// [`get_timeout`](Self::get_timeout).
///
/// Waiting on the executor's own thread would deadlock, so `get` fails fast
/// with [`DsfError::WrongThread`] there.
pub struct Query<T> {
    shared: Arc<QueryShared<T>>,
    executor: DsfExecutor,
    monitor_cancel: CancellationToken,
}

impl<T: Send + 'static> Query<T> {
    pub fn new<F>(executor: &DsfExecutor, work: F) -> Self
    where
        F: FnOnce(DataRequestMonitor<T>) + Send + 'static,
    {
        let shared = Arc::new(QueryShared {
            state: Mutex::new(QueryState {
                result: None,
                interrupted: false,
            }),
            ready: Condvar::new(),
        });

        let on_done = Arc::clone(&shared);
        let rm = DataRequestMonitor::immediate(move |completion| {
            on_done.complete(completion.into_result());
        });
        let monitor_cancel = rm.cancel_token();

        if let Err(err) = executor.execute(move || work(rm)) {
            tracing::debug!(target: "dsf.query", error = %err, "query rejected by executor");
            shared.complete(Err(err));
        }

        Self {
            shared,
            executor: executor.clone(),
            monitor_cancel,
        }
    }

    /// Handle that makes a blocked `get` return [`DsfError::Interrupted`].
    pub fn interrupt_token(&self) -> QueryInterrupt {
        QueryInterrupt {
            shared: Arc::clone(&self.shared) as Arc<dyn Interruptible>,
        }
    }

    /// Requests cooperative cancellation of the wrapped monitor.
    pub fn cancel(&self) {
        self.monitor_cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.lock().result.is_some()
    }

    /// Blocks until the work completes or the query is interrupted.
    pub fn get(self) -> DsfResult<T> {
        self.wait(None)
    }

    /// Blocks until the work completes, the query is interrupted, or
    /// `timeout` elapses. A timed-out query cancels its monitor.
    pub fn get_timeout(self, timeout: Duration) -> DsfResult<T> {
        self.wait(Some(timeout))
    }

    fn wait(self, timeout: Option<Duration>) -> DsfResult<T> {
        if self.executor.is_in_executor_thread() {
            tracing::error!(
                target: "dsf.query",
                executor = %self.executor.name(),
                "Query::get called on the executor thread it waits for"
            );
            return Err(DsfError::WrongThread);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }

            if state.interrupted {
                self.monitor_cancel.cancel();
                return Err(DsfError::Interrupted);
            }

            match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    if self.shared.ready.wait_until(&mut state, deadline).timed_out()
                        && state.result.is_none()
                        && !state.interrupted
                    {
                        self.monitor_cancel.cancel();
                        return Err(DsfError::Timeout(timeout));
                    }
                }
                _ => self.shared.ready.wait(&mut state),
            }
        }
    }
}
