//! Concurrency primitives for DSF sessions.
//!
//! Every session owns one [`DsfExecutor`]: a dedicated worker thread that runs
//! submitted tasks one at a time, in submission order. Asynchronous operations
//! report back through [`DataRequestMonitor`]s whose continuations are
//! delivered on that executor, multi-step workflows are expressed as a
//! [`Sequence`], and foreign threads wait for session-bound work with a
//! [`Query`].

mod executor;
mod monitor;
mod query;
mod sequence;

pub use executor::{DsfExecutor, ExecutorConfig, ShutdownPolicy};
pub use monitor::{Completion, DataRequestMonitor, RequestMonitor};
pub use query::{Query, QueryInterrupt};
pub use sequence::{FnStep, Sequence, Step};

pub use dsf_core::{DsfError, DsfResult, Status, StatusCode};
pub use tokio_util::sync::CancellationToken;
