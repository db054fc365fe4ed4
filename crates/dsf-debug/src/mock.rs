//! Deterministic in-process command control for tests.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use dsf_concurrent::{DataRequestMonitor, DsfExecutor};
use dsf_core::{DmContext, Status};

use crate::command::{Command, CommandControl};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockCommand {
    context: DmContext,
    operation: String,
}

impl MockCommand {
    pub fn new(context: &DmContext, operation: impl Into<String>) -> Self {
        Self {
            context: context.clone(),
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Command for MockCommand {
    fn context(&self) -> &DmContext {
        &self.context
    }
}

type Responder = Box<dyn Fn(&MockCommand) -> Result<String, Status> + Send + Sync>;

struct MockState {
    issued: Vec<MockCommand>,
    held: VecDeque<(MockCommand, DataRequestMonitor<String>)>,
    hold: bool,
}

/// Replies to [`MockCommand`]s with whatever the installed responder returns.
///
/// By default replies are posted to the executor as soon as a command is
/// queued. With [`hold_replies`](Self::hold_replies) they are kept back until
/// released, in FIFO order, which makes in-flight states observable.
pub struct MockCommandControl {
    context: DmContext,
    executor: DsfExecutor,
    responder: Mutex<Responder>,
    state: Mutex<MockState>,
}

impl MockCommandControl {
    pub fn new(executor: &DsfExecutor, context: DmContext) -> Self {
        Self {
            context,
            executor: executor.clone(),
            responder: Mutex::new(Box::new(|command: &MockCommand| {
                Ok(format!("{} result", command.operation))
            })),
            state: Mutex::new(MockState {
                issued: Vec::new(),
                held: VecDeque::new(),
                hold: false,
            }),
        }
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&MockCommand) -> Result<String, Status> + Send + Sync + 'static,
    {
        *self.responder.lock() = Box::new(responder);
    }

    pub fn hold_replies(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Every command queued so far, in order.
    pub fn issued(&self) -> Vec<MockCommand> {
        self.state.lock().issued.clone()
    }

    pub fn issued_count(&self) -> usize {
        self.state.lock().issued.len()
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Replies to the oldest held command on the calling thread.
    pub fn release_next(&self) -> bool {
        let next = self.state.lock().held.pop_front();
        match next {
            Some((command, rm)) => {
                self.reply(&command, rm);
                true
            }
            None => false,
        }
    }

    pub fn release_all(&self) -> usize {
        let mut released = 0;
        while self.release_next() {
            released += 1;
        }
        released
    }

    fn reply(&self, command: &MockCommand, rm: DataRequestMonitor<String>) {
        let result = (self.responder.lock())(command);
        match result {
            Ok(output) => rm.done_with_data(output),
            Err(status) => rm.done_with_status(status),
        }
    }
}

impl CommandControl for MockCommandControl {
    type Command = MockCommand;
    type Output = String;

    fn context(&self) -> &DmContext {
        &self.context
    }

    fn queue_command(&self, command: MockCommand, rm: DataRequestMonitor<String>) {
        let result = {
            let mut state = self.state.lock();
            state.issued.push(command.clone());
            if state.hold {
                state.held.push_back((command, rm));
                return;
            }
            (self.responder.lock())(&command)
        };

        let fallback = rm.clone();
        let submitted = self.executor.execute(move || match result {
            Ok(output) => rm.done_with_data(output),
            Err(status) => rm.done_with_status(status),
        });
        if let Err(err) = submitted {
            fallback.done_with_status(err.to_status());
        }
    }
}

impl fmt::Debug for MockCommandControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockCommandControl")
            .field("context", &self.context)
            .field("issued", &state.issued.len())
            .field("held", &state.held.len())
            .finish()
    }
}
