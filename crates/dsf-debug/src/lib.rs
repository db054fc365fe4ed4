//! Debugger-facing building blocks for DSF services.
//!
//! Services talk to the backend through a [`CommandControl`]. Wrapping it in a
//! [`CommandCache`] avoids repeating commands whose answer cannot have changed
//! and coalesces identical requests that are still in flight. Run-control
//! events ([`ResumedEvent`], [`SuspendedEvent`]) tell the cache when its
//! contents go stale.

mod buffered;
mod cache;
mod command;
mod events;
#[cfg(feature = "test-support")]
mod mock;

pub use buffered::BufferedCommandControl;
pub use cache::{CachingService, CommandCache};
pub use command::{Command, CommandControl};
pub use events::{DmEvent, ResumedEvent, StateChangeReason, SuspendedEvent};
#[cfg(feature = "test-support")]
pub use mock::{MockCommand, MockCommandControl};
