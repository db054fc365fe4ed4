use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use dsf_core::{DsfError, DsfResult, Status, StatusCode};

use crate::DsfExecutor;

type Continuation<T> = Box<dyn FnOnce(Completion<T>) + Send + 'static>;

/// A monitor for operations that produce no value.
pub type RequestMonitor = DataRequestMonitor<()>;

/// The terminal state handed to a monitor's continuation.
#[derive(Debug)]
pub struct Completion<T> {
    status: Status,
    data: Option<T>,
}

impl<T> Completion<T> {
    pub fn new(status: Status, data: Option<T>) -> Self {
        Self { status, data }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.is_cancel()
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// The data on success; `Cancelled`/`Failed` otherwise.
    ///
    /// A successful completion without data is reported as an internal error,
    /// except for unit monitors which always carry `()`.
    pub fn into_result(self) -> DsfResult<T> {
        self.status.clone().into_result()?;
        self.data.ok_or_else(|| {
            DsfError::Failed(Status::error(
                StatusCode::InternalError,
                "request completed successfully without data",
            ))
        })
    }
}

impl<T: Clone> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status.clone(),
            data: self.data.clone(),
        }
    }
}

/// Receives completion notifications from child monitors of any data type.
trait ChildSink: Send + Sync {
    fn link_child(&self) -> bool;
    fn child_completed(&self, status: &Status);
}

struct MonitorState<T> {
    status: Status,
    data: Option<T>,
    own_done: bool,
    completed: bool,
    pending_children: usize,
    continuation: Option<Continuation<T>>,
}

struct MonitorInner<T> {
    executor: Option<DsfExecutor>,
    parent: Option<Arc<dyn ChildSink>>,
    cancel: CancellationToken,
    state: Mutex<MonitorState<T>>,
}

/// One-shot completion token for an asynchronous operation.
///
/// The implementer of an operation sets the status and/or data and calls
/// [`done`](Self::done) exactly once. The continuation supplied at
/// construction then runs on the monitor's executor (or inline for monitors
/// created with [`immediate`](Self::immediate)).
///
/// Monitors compose: a monitor created with a parent counts as one of the
/// parent's pending children. A parent completes once its own `done()` has
/// been called *and* every child has completed. The first child to complete
/// with a CANCEL or ERROR status determines the parent's status, unless the
/// parent already recorded a failure of its own.
///
/// Cancellation is cooperative. [`cancel`](Self::cancel) only raises a flag
/// (a [`CancellationToken`] shared with every descendant); long-running
/// implementers poll [`is_cancelled`](Self::is_cancelled) and complete with
/// [`Status::cancelled`].
pub struct DataRequestMonitor<T> {
    inner: Arc<MonitorInner<T>>,
}

impl<T> Clone for DataRequestMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> DataRequestMonitor<T> {
    /// A monitor whose continuation runs on `executor`.
    pub fn new<F>(executor: &DsfExecutor, on_done: F) -> Self
    where
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        Self::build(
            Some(executor.clone()),
            None,
            CancellationToken::new(),
            Some(Box::new(on_done)),
        )
    }

    /// A monitor whose continuation runs inline on the thread calling `done()`.
    pub fn immediate<F>(on_done: F) -> Self
    where
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        Self::build(None, None, CancellationToken::new(), Some(Box::new(on_done)))
    }

    /// A child of `parent` whose continuation runs on `executor`.
    pub fn with_parent<P, F>(
        executor: &DsfExecutor,
        parent: &DataRequestMonitor<P>,
        on_done: F,
    ) -> Self
    where
        P: Send + 'static,
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        Self::linked(Some(executor.clone()), parent, Some(Box::new(on_done)))
    }

    /// A child of `parent` whose continuation runs inline.
    pub fn immediate_with_parent<P, F>(parent: &DataRequestMonitor<P>, on_done: F) -> Self
    where
        P: Send + 'static,
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        Self::linked(None, parent, Some(Box::new(on_done)))
    }

    /// A child of `parent` with no continuation of its own: its status simply
    /// rolls up into the parent.
    pub fn child_of<P>(parent: &DataRequestMonitor<P>) -> Self
    where
        P: Send + 'static,
    {
        Self::linked(None, parent, None)
    }

    /// A monitor that shares cancellation with `token` but is not linked to
    /// any parent.
    pub(crate) fn with_cancel_token<F>(
        executor: &DsfExecutor,
        token: CancellationToken,
        on_done: F,
    ) -> Self
    where
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        Self::build(Some(executor.clone()), None, token, Some(Box::new(on_done)))
    }

    fn linked<P>(
        executor: Option<DsfExecutor>,
        parent: &DataRequestMonitor<P>,
        continuation: Option<Continuation<T>>,
    ) -> Self
    where
        P: Send + 'static,
    {
        let sink: Arc<dyn ChildSink> = parent.inner.clone();
        let sink = if sink.link_child() {
            Some(sink)
        } else {
            tracing::warn!(
                target: "dsf.monitor",
                "child monitor created for an already completed parent; it will not be linked"
            );
            None
        };
        Self::build(executor, sink, parent.inner.cancel.child_token(), continuation)
    }

    fn build(
        executor: Option<DsfExecutor>,
        parent: Option<Arc<dyn ChildSink>>,
        cancel: CancellationToken,
        continuation: Option<Continuation<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                executor,
                parent,
                cancel,
                state: Mutex::new(MonitorState {
                    status: Status::ok(),
                    data: None,
                    own_done: false,
                    completed: false,
                    pending_children: 0,
                    continuation,
                }),
            }),
        }
    }

    pub fn set_status(&self, status: Status) {
        self.inner.state.lock().status = status;
    }

    pub fn set_data(&self, data: T) {
        self.inner.state.lock().data = Some(data);
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().status.clone()
    }

    pub fn executor(&self) -> Option<&DsfExecutor> {
        self.inner.executor.as_ref()
    }

    /// Whether `done()` has been called on this monitor.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().own_done
    }

    /// Whether the continuation has been released (own work and all children finished).
    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Marks the monitor's own work as finished.
    ///
    /// Returns [`DsfError::DoubleCompletion`] if it was already called; that is
    /// a bug in the implementer, not a recoverable condition.
    pub fn try_done(&self) -> DsfResult<()> {
        let ready = {
            let mut state = self.inner.state.lock();
            if state.own_done {
                return Err(DsfError::DoubleCompletion);
            }
            state.own_done = true;
            if state.pending_children == 0 {
                Some(take_completion(&mut state))
            } else {
                None
            }
        };

        if let Some((continuation, completion)) = ready {
            self.inner.release(continuation, completion);
        }
        Ok(())
    }

    /// Like [`try_done`](Self::try_done) but logs a double completion instead
    /// of returning it.
    pub fn done(&self) {
        if let Err(err) = self.try_done() {
            tracing::error!(target: "dsf.monitor", error = %err, "request monitor completed twice");
        }
    }

    pub fn done_with_status(&self, status: Status) {
        self.set_status(status);
        self.done();
    }

    pub fn done_with_data(&self, data: T) {
        self.set_data(data);
        self.done();
    }

    /// Completes with an ERROR status built from `code` and `message`.
    pub fn done_with_error(&self, code: StatusCode, message: impl Into<String>) {
        self.done_with_status(Status::error(code, message));
    }

    /// Copies a finished completion (status and data) into this monitor and
    /// calls `done()`.
    pub fn done_with_completion(&self, completion: Completion<T>) {
        {
            let mut state = self.inner.state.lock();
            state.status = completion.status;
            if let Some(data) = completion.data {
                state.data = Some(data);
            }
        }
        self.done();
    }
}

fn take_completion<T: 'static>(
    state: &mut MonitorState<T>,
) -> (Option<Continuation<T>>, Completion<T>) {
    state.completed = true;
    let status = state.status.clone();
    let data = state.data.take().or_else(|| unit_data::<T>());
    (state.continuation.take(), Completion { status, data })
}

/// `Some(())` when `T` is the unit type, so plain request monitors always
/// complete with data.
fn unit_data<T: 'static>() -> Option<T> {
    let unit: Box<dyn Any> = Box::new(());
    unit.downcast::<T>().ok().map(|data| *data)
}

impl<T: Send + 'static> MonitorInner<T> {
    fn release(&self, continuation: Option<Continuation<T>>, completion: Completion<T>) {
        let parent = self.parent.clone();
        let deliver = move || {
            let status = completion.status.clone();
            if let Some(continuation) = continuation {
                continuation(completion);
            }
            if let Some(parent) = parent {
                parent.child_completed(&status);
            }
        };

        match &self.executor {
            Some(executor) => {
                if let Err(err) = executor.execute(deliver) {
                    // The closure was dropped by the rejected submission; the
                    // continuation is lost and the parent would hang, so tell the
                    // parent directly.
                    tracing::warn!(
                        target: "dsf.monitor",
                        executor = %executor.name(),
                        error = %err,
                        "could not deliver request monitor completion"
                    );
                    if let Some(parent) = &self.parent {
                        parent.child_completed(&err.to_status());
                    }
                }
            }
            None => deliver(),
        }
    }
}

impl<T: Send + 'static> ChildSink for MonitorInner<T> {
    fn link_child(&self) -> bool {
        let mut state = self.state.lock();
        if state.completed {
            return false;
        }
        state.pending_children += 1;
        true
    }

    fn child_completed(&self, status: &Status) {
        let ready = {
            let mut state = self.state.lock();
            state.pending_children = state.pending_children.saturating_sub(1);
            if !status.is_success() && state.status.is_success() {
                state.status = status.clone();
            }
            if state.own_done && state.pending_children == 0 && !state.completed {
                Some(take_completion(&mut state))
            } else {
                None
            }
        };

        if let Some((continuation, completion)) = ready {
            self.release(continuation, completion);
        }
    }
}

impl<T> fmt::Debug for DataRequestMonitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DataRequestMonitor")
            .field("status", &state.status)
            .field("done", &state.own_done)
            .field("completed", &state.completed)
            .field("pending_children", &state.pending_children)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}
