use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use dsf_concurrent::{Completion, DataRequestMonitor, DsfExecutor, ExecutorConfig, Query};
use dsf_core::{DmContext, DsfResult, SessionId};
use dsf_debug::{CommandCache, MockCommand, MockCommandControl};

mod service;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Connection;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Thread(pub(crate) u32);

pub(crate) struct Fixture {
    pub(crate) executor: DsfExecutor,
    pub(crate) control: Arc<MockCommandControl>,
    pub(crate) cache: CommandCache<Arc<MockCommandControl>>,
    pub(crate) connection: DmContext,
    pub(crate) thread1: DmContext,
    pub(crate) thread2: DmContext,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let executor = DsfExecutor::new(ExecutorConfig::default()).expect("executor should start");
        Self::with_executor(executor, SessionId::new(1))
    }

    pub(crate) fn with_executor(executor: DsfExecutor, session: SessionId) -> Self {
        let connection = DmContext::new(session, Vec::new(), Connection);
        let thread1 = connection.child(Thread(1));
        let thread2 = connection.child(Thread(2));

        let control = Arc::new(MockCommandControl::new(&executor, connection.clone()));
        // Every reply is distinct so that re-issued commands are observable.
        let counter = AtomicUsize::new(0);
        control.respond_with(move |command| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{} #{n}", command.operation()))
        });
        let cache = CommandCache::new(&executor, control.clone());

        Self {
            executor,
            control,
            cache,
            connection,
            thread1,
            thread2,
        }
    }

    pub(crate) fn command(&self, context: &DmContext, operation: &str) -> MockCommand {
        MockCommand::new(context, operation)
    }

    /// Executes `command` through the cache from a foreign thread and waits
    /// for the result.
    pub(crate) fn fetch(&self, command: MockCommand) -> DsfResult<String> {
        let cache = self.cache.clone();
        Query::new(&self.executor, move |rm: DataRequestMonitor<String>| {
            cache.execute(command, rm)
        })
        .get_timeout(WAIT)
    }

    /// Issues `command` on the executor without waiting; the completion is
    /// sent on the returned channel.
    pub(crate) fn submit(&self, command: MockCommand) -> mpsc::Receiver<Completion<String>> {
        let (tx, rx) = mpsc::channel();
        let cache = self.cache.clone();
        let executor = self.executor.clone();
        self.on_executor(move || {
            let rm = DataRequestMonitor::new(&executor, move |completion| {
                let _ = tx.send(completion);
            });
            cache.execute(command, rm);
        });
        rx
    }

    pub(crate) fn on_executor<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        Query::new(&self.executor, move |rm: DataRequestMonitor<T>| rm.done_with_data(f()))
            .get_timeout(WAIT)
            .expect("executor task should run")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.executor.shutdown();
    }
}
