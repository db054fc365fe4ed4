use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dsf_concurrent::DataRequestMonitor;
use dsf_core::DmContext;

/// A debugger command. Two equal commands are interchangeable, which is what
/// lets [`CommandCache`](crate::CommandCache) share and replay their results.
pub trait Command: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// The debug entity the command is issued against.
    fn context(&self) -> &DmContext;
}

/// The collaborator that talks to the debugger backend.
///
/// Implementations must reply exactly once to every queued command, in the
/// order the commands were queued.
pub trait CommandControl: Send + Sync + 'static {
    type Command: Command;
    type Output: Clone + Send + 'static;

    /// The context of the connection itself; the root of every command
    /// context this control serves.
    fn context(&self) -> &DmContext;

    fn queue_command(&self, command: Self::Command, rm: DataRequestMonitor<Self::Output>);
}

impl<C: CommandControl + ?Sized> CommandControl for Arc<C> {
    type Command = C::Command;
    type Output = C::Output;

    fn context(&self) -> &DmContext {
        (**self).context()
    }

    fn queue_command(&self, command: Self::Command, rm: DataRequestMonitor<Self::Output>) {
        (**self).queue_command(command, rm)
    }
}
