use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use dsf_core::{panic_payload_to_str, DsfResult, Status, StatusCode};

use crate::{DsfExecutor, RequestMonitor};

/// One step of a [`Sequence`].
///
/// `execute` and `rollback` are always invoked on the sequence's executor and
/// must eventually call `done()` on the monitor they are given.
pub trait Step: Send + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn execute(&mut self, rm: RequestMonitor);

    fn rollback(&mut self, rm: RequestMonitor) {
        rm.done();
    }
}

type StepFn = Box<dyn FnMut(RequestMonitor) + Send + 'static>;

/// A [`Step`] built from closures.
pub struct FnStep {
    name: String,
    execute: StepFn,
    rollback: Option<StepFn>,
}

impl FnStep {
    pub fn new<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: FnMut(RequestMonitor) + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Box::new(execute),
            rollback: None,
        }
    }

    pub fn with_rollback<F>(mut self, rollback: F) -> Self
    where
        F: FnMut(RequestMonitor) + Send + 'static,
    {
        self.rollback = Some(Box::new(rollback));
        self
    }

    pub fn boxed(self) -> Box<dyn Step> {
        Box::new(self)
    }
}

impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, rm: RequestMonitor) {
        (self.execute)(rm)
    }

    fn rollback(&mut self, rm: RequestMonitor) {
        match &mut self.rollback {
            Some(rollback) => rollback(rm),
            None => rm.done(),
        }
    }
}

/// An ordered list of asynchronous steps run one after the other on an
/// executor.
///
/// Step `i + 1` starts only after step `i` completed successfully. On the
/// first CANCEL or ERROR the sequence stops and rolls back, in reverse order,
/// the failing step and every step before it, waiting for each rollback to
/// finish before starting the previous one. The sequence's own monitor then
/// completes with the status that triggered the rollback.
///
/// Cancelling the sequence's monitor is observed before each step starts and
/// triggers the same rollback with a CANCEL status.
pub struct Sequence {
    driver: Arc<Driver>,
}

struct Driver {
    executor: DsfExecutor,
    steps: Mutex<Vec<Option<Box<dyn Step>>>>,
    rm: RequestMonitor,
}

impl Sequence {
    pub fn new(executor: &DsfExecutor, steps: Vec<Box<dyn Step>>, rm: RequestMonitor) -> Self {
        Self {
            driver: Arc::new(Driver {
                executor: executor.clone(),
                steps: Mutex::new(steps.into_iter().map(Some).collect()),
                rm,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.driver.steps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submits the sequence to its executor.
    pub fn start(self) -> DsfResult<()> {
        let driver = self.driver;
        let executor = driver.executor.clone();
        executor.execute(move || driver.run_step(0))
    }
}

impl Driver {
    /// Runs `f` against step `index` with the step's monitor `rm`.
    ///
    /// Returns `false` if the step is already running. A panic inside `f` is
    /// caught and, unless the step managed to complete first, fails `rm` with
    /// an `InternalError` so the sequence still rolls back and completes.
    fn with_step(
        &self,
        index: usize,
        rm: RequestMonitor,
        f: impl FnOnce(&mut dyn Step, RequestMonitor),
    ) -> bool {
        // Take the step out while it runs so that a completion delivered inline
        // cannot observe the lock held.
        let Some(mut step) = self.steps.lock().get_mut(index).and_then(Option::take) else {
            return false;
        };

        let watch = rm.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| f(step.as_mut(), rm)));
        let name = step.name().to_owned();
        if let Some(slot) = self.steps.lock().get_mut(index) {
            *slot = Some(step);
        }

        if let Err(panic) = outcome {
            let message = panic_payload_to_str(&*panic);
            tracing::error!(
                target: "dsf.sequence",
                step = index,
                %name,
                panic = %message,
                "sequence step panicked"
            );
            if !watch.is_done() {
                watch.done_with_error(
                    StatusCode::InternalError,
                    format!("step `{name}` panicked: {message}"),
                );
            }
        }
        true
    }

    fn step_name(&self, index: usize) -> String {
        self.steps
            .lock()
            .get(index)
            .and_then(|step| step.as_ref().map(|step| step.name().to_owned()))
            .unwrap_or_default()
    }

    fn run_step(self: Arc<Self>, index: usize) {
        let total = self.steps.lock().len();
        if index == total {
            tracing::debug!(target: "dsf.sequence", steps = total, "sequence completed");
            self.rm.done();
            return;
        }

        if self.rm.is_cancelled() {
            tracing::debug!(target: "dsf.sequence", step = index, "sequence cancelled");
            self.rollback(index.checked_sub(1), Status::cancelled_with("sequence cancelled"));
            return;
        }

        tracing::debug!(
            target: "dsf.sequence",
            step = index,
            name = %self.step_name(index),
            "executing step"
        );

        let driver = Arc::clone(&self);
        let token = self.rm.cancel_token().child_token();
        let rm = RequestMonitor::with_cancel_token(&self.executor, token, move |completion| {
            let status = completion.status().clone();
            if status.is_success() {
                driver.run_step(index + 1);
            } else {
                tracing::debug!(
                    target: "dsf.sequence",
                    step = index,
                    %status,
                    "step failed; rolling back"
                );
                driver.rollback(Some(index), status);
            }
        });

        if !self.with_step(index, rm, |step, rm| step.execute(rm)) {
            tracing::error!(target: "dsf.sequence", step = index, "step is already running");
            self.rollback(
                index.checked_sub(1),
                Status::error(StatusCode::InternalError, "sequence step re-entered"),
            );
        }
    }

    /// Rolls back `index`, then `index - 1`, ... down to step 0, then completes
    /// the sequence with `failure`.
    fn rollback(self: Arc<Self>, index: Option<usize>, failure: Status) {
        let Some(index) = index else {
            self.rm.done_with_status(failure);
            return;
        };

        tracing::debug!(
            target: "dsf.sequence",
            step = index,
            name = %self.step_name(index),
            "rolling back step"
        );

        let driver = Arc::clone(&self);
        let rollback_failure = failure.clone();
        let rm = RequestMonitor::new(&self.executor, move |completion| {
            if !completion.is_success() {
                tracing::warn!(
                    target: "dsf.sequence",
                    step = index,
                    status = %completion.status(),
                    "step rollback failed"
                );
            }
            driver.rollback(index.checked_sub(1), rollback_failure);
        });

        if !self.with_step(index, rm, |step, rm| step.rollback(rm)) {
            tracing::error!(target: "dsf.sequence", step = index, "step is already running");
            self.rollback(index.checked_sub(1), failure);
        }
    }
}
