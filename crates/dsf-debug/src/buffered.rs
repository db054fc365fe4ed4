use dsf_concurrent::{Completion, DataRequestMonitor, DsfExecutor};
use dsf_core::DmContext;

use crate::command::CommandControl;

/// Delays every reply of the wrapped control by a number of executor
/// dispatches.
///
/// Backends typically report state changes (events) and command replies on
/// different paths. Re-submitting each reply to the executor `depth` times
/// lets events that arrived just before it be processed first, so services
/// never act on a reply that is older than the last event they saw.
pub struct BufferedCommandControl<C> {
    inner: C,
    executor: DsfExecutor,
    depth: usize,
}

impl<C: CommandControl> BufferedCommandControl<C> {
    pub fn new(executor: &DsfExecutor, inner: C, depth: usize) -> Self {
        Self {
            inner,
            executor: executor.clone(),
            depth,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<C: CommandControl> CommandControl for BufferedCommandControl<C> {
    type Command = C::Command;
    type Output = C::Output;

    fn context(&self) -> &DmContext {
        self.inner.context()
    }

    fn queue_command(&self, command: Self::Command, rm: DataRequestMonitor<Self::Output>) {
        let executor = self.executor.clone();
        let depth = self.depth;
        let reply = DataRequestMonitor::immediate(move |completion| {
            forward(executor, depth, rm, completion);
        });
        self.inner.queue_command(command, reply);
    }
}

fn forward<R: Send + 'static>(
    executor: DsfExecutor,
    remaining: usize,
    rm: DataRequestMonitor<R>,
    completion: Completion<R>,
) {
    if remaining == 0 {
        rm.done_with_completion(completion);
        return;
    }

    let fallback = rm.clone();
    let next = executor.clone();
    if let Err(err) = executor.execute(move || forward(next, remaining - 1, rm, completion)) {
        tracing::warn!(
            target: "dsf.cache",
            executor = %executor.name(),
            error = %err,
            "could not re-dispatch buffered reply"
        );
        fallback.done_with_status(err.to_status());
    }
}
