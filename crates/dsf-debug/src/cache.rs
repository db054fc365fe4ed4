use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use dsf_concurrent::{Completion, DataRequestMonitor, DsfExecutor};
use dsf_core::{DmContext, Status, StatusCode};

use crate::command::{Command, CommandControl};
use crate::events::StateChangeReason;

/// Implemented by services that keep cached debugger state.
pub trait CachingService: Send + Sync {
    /// Drops cached data for `context` and its descendants, or everything
    /// when `context` is `None`.
    fn flush_cache(&self, context: Option<&DmContext>);
}

struct PendingRequest<R> {
    listeners: Mutex<Vec<DataRequestMonitor<R>>>,
}

/// Per-context availability.
///
/// A context inherits the value of its nearest recorded ancestor and is
/// available when nothing is recorded. Only values that differ from the
/// inherited one are kept, so the map stays as small as the set of contexts
/// whose state actually diverges from their parents'.
#[derive(Debug, Default)]
struct Availability {
    recorded: HashMap<DmContext, bool>,
}

impl Availability {
    fn get(&self, context: &DmContext) -> bool {
        self.lookup(context).unwrap_or(true)
    }

    fn lookup(&self, context: &DmContext) -> Option<bool> {
        if let Some(available) = self.recorded.get(context) {
            return Some(*available);
        }
        self.inherited(context)
    }

    fn inherited(&self, context: &DmContext) -> Option<bool> {
        context
            .parents()
            .iter()
            .find_map(|parent| self.lookup(parent))
    }

    fn set(&mut self, context: &DmContext, available: bool) {
        if !available {
            // Nothing below an unavailable context may still claim to be available.
            self.recorded
                .retain(|other, _| !context.is_ancestor_of(other));
        }
        self.recorded.remove(context);
        if self.inherited(context).unwrap_or(true) != available {
            self.recorded.insert(context.clone(), available);
        }
        self.prune_below(context);
    }

    /// Drops recorded descendants of `context` whose value now matches what
    /// they would inherit anyway.
    fn prune_below(&mut self, context: &DmContext) {
        let redundant: Vec<DmContext> = self
            .recorded
            .iter()
            .filter(|(other, available)| {
                *other != context
                    && context.is_ancestor_of(other)
                    && self.inherited(other).unwrap_or(true) == **available
            })
            .map(|(other, _)| other.clone())
            .collect();
        for other in redundant {
            self.recorded.remove(&other);
        }
    }

    fn len(&self) -> usize {
        self.recorded.len()
    }
}

struct CacheState<C: CommandControl> {
    valid: HashMap<C::Command, Completion<C::Output>>,
    pending: HashMap<C::Command, Arc<PendingRequest<C::Output>>>,
    availability: Availability,
}

impl<C: CommandControl> CacheState<C> {
    fn drop_entries_under(&mut self, context: &DmContext) -> usize {
        let before = self.valid.len() + self.pending.len();
        self.valid
            .retain(|command, _| !context.is_ancestor_of(command.context()));
        self.pending
            .retain(|command, _| !context.is_ancestor_of(command.context()));
        before - (self.valid.len() + self.pending.len())
    }
}

struct CacheInner<C: CommandControl> {
    executor: DsfExecutor,
    control: C,
    state: Mutex<CacheState<C>>,
}

/// Memoizes command results and coalesces identical in-flight commands.
///
/// Results are keyed by command (which carries its context). A second
/// request for a command that is still in flight is attached to it instead of
/// being sent again; when the reply arrives every attached monitor receives
/// it in attachment order.
///
/// ERROR results are cached like successes, except `TargetBusy` and
/// `Timeout`, which only describe the moment they were produced. CANCEL
/// results are never cached.
///
/// While a context is marked unavailable (its target is running) requests for
/// it or its descendants fail with `TargetBusy` and nothing is cached for
/// them. Replies to commands whose entry was dropped by a reset are still
/// delivered but not stored.
///
/// A cache belongs to one session and is meant to be used on its executor.
pub struct CommandCache<C: CommandControl> {
    inner: Arc<CacheInner<C>>,
}

impl<C: CommandControl> Clone for CommandCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: CommandControl> CommandCache<C> {
    /// Wraps `control`; command replies are processed on `executor`. Every
    /// context starts out available.
    pub fn new(executor: &DsfExecutor, control: C) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                executor: executor.clone(),
                control,
                state: Mutex::new(CacheState {
                    valid: HashMap::new(),
                    pending: HashMap::new(),
                    availability: Availability::default(),
                }),
            }),
        }
    }

    pub fn control(&self) -> &C {
        &self.inner.control
    }

    pub fn execute(&self, command: C::Command, rm: DataRequestMonitor<C::Output>) {
        let pending = {
            let mut state = self.inner.state.lock();

            if !state.availability.get(command.context()) {
                drop(state);
                tracing::debug!(
                    target: "dsf.cache",
                    ?command,
                    "target unavailable; request rejected"
                );
                rm.done_with_error(StatusCode::TargetBusy, "target is running");
                return;
            }

            if let Some(completion) = state.valid.get(&command) {
                let completion = completion.clone();
                drop(state);
                tracing::trace!(target: "dsf.cache", ?command, "cache hit");
                rm.done_with_completion(completion);
                return;
            }

            if let Some(pending) = state.pending.get(&command) {
                tracing::trace!(target: "dsf.cache", ?command, "joined in-flight request");
                pending.listeners.lock().push(rm);
                return;
            }

            let pending = Arc::new(PendingRequest {
                listeners: Mutex::new(vec![rm]),
            });
            state.pending.insert(command.clone(), Arc::clone(&pending));
            pending
        };

        tracing::trace!(target: "dsf.cache", ?command, "cache miss; queueing command");
        let inner = Arc::clone(&self.inner);
        let key = command.clone();
        let reply = DataRequestMonitor::new(&self.inner.executor, move |completion| {
            inner.complete(key, pending, completion);
        });
        self.inner.control.queue_command(command, reply);
    }

    pub fn is_target_available(&self, context: &DmContext) -> bool {
        self.inner.state.lock().availability.get(context)
    }

    /// Marks the control's own context (and so, by default, every context
    /// below it) available or unavailable.
    pub fn set_target_available(&self, available: bool) {
        let context = self.inner.control.context().clone();
        self.set_context_available(&context, available);
    }

    /// Records availability for `context` and its descendants. Making a
    /// context unavailable overrides whatever was recorded below it and drops
    /// everything cached under it.
    pub fn set_context_available(&self, context: &DmContext, available: bool) {
        let mut state = self.inner.state.lock();
        state.availability.set(context, available);
        if !available {
            let dropped = state.drop_entries_under(context);
            tracing::debug!(target: "dsf.cache", %context, dropped, "context unavailable");
        }
    }

    /// Drops every entry, valid or pending.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.valid.len() + state.pending.len();
        state.valid.clear();
        state.pending.clear();
        tracing::debug!(target: "dsf.cache", dropped, "cache reset");
    }

    /// Drops the entries of `context` and its descendants.
    pub fn reset_context(&self, context: &DmContext) {
        let dropped = self.inner.state.lock().drop_entries_under(context);
        tracing::debug!(target: "dsf.cache", %context, dropped, "context entries reset");
    }

    /// Standard reaction to a resumed event: the context becomes unavailable
    /// and, unless the resume is a step, the whole cache is reset.
    pub fn on_resumed(&self, context: &DmContext, reason: StateChangeReason) {
        self.set_context_available(context, false);
        if reason != StateChangeReason::Step {
            self.reset();
        }
    }

    /// Standard reaction to a suspended event: the context becomes available
    /// again and whatever was cached for it is dropped.
    pub fn on_suspended(&self, context: &DmContext, _reason: StateChangeReason) {
        self.set_context_available(context, true);
        self.reset_context(context);
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }
}

impl<C: CommandControl> CacheInner<C> {
    fn complete(
        &self,
        command: C::Command,
        pending: Arc<PendingRequest<C::Output>>,
        completion: Completion<C::Output>,
    ) {
        {
            let mut state = self.state.lock();
            let current = state
                .pending
                .get(&command)
                .is_some_and(|entry| Arc::ptr_eq(entry, &pending));
            if current {
                state.pending.remove(&command);
                if is_cacheable(completion.status()) {
                    state.valid.insert(command.clone(), completion.clone());
                }
            } else {
                tracing::debug!(
                    target: "dsf.cache",
                    ?command,
                    "reply arrived after its entry was reset; not cached"
                );
            }
        }

        let listeners = std::mem::take(&mut *pending.listeners.lock());
        for rm in listeners {
            rm.done_with_completion(completion.clone());
        }
    }
}

fn is_cacheable(status: &Status) -> bool {
    if status.is_cancel() {
        return false;
    }
    !(status.is_error() && status.code().is_transient())
}

impl<C: CommandControl> CachingService for CommandCache<C> {
    fn flush_cache(&self, context: Option<&DmContext>) {
        match context {
            Some(context) => self.reset_context(context),
            None => self.reset(),
        }
    }
}

impl<C: CommandControl> fmt::Debug for CommandCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CommandCache")
            .field("valid", &state.valid.len())
            .field("pending", &state.pending.len())
            .field("availability", &state.availability.len())
            .field("control_context", self.inner.control.context())
            .finish()
    }
}
