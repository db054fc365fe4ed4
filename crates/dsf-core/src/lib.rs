//! Shared value types for the DSF session framework.
//!
//! Everything in here is plain data: the [`Status`] carried by every request
//! monitor, the [`DsfError`] returned by fallible framework calls, and the
//! immutable [`DmContext`] identities that services use to address debug
//! entities (threads, frames, variables, ...).
//!
//! This crate is intentionally small and has no runtime dependencies beyond
//! `thiserror`.

mod context;
mod error;
mod status;

use std::any::Any;
use std::fmt;

pub use context::{ContextData, DmContext};
pub use error::{DsfError, DsfResult};
pub use status::{Severity, Status, StatusCode};

/// Identifier of a debug session in the process-wide session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Best-effort extraction of a human readable message from a panic payload.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return message;
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.as_str();
    }
    "<non-string panic payload>"
}
