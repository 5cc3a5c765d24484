//! Registry entries and the normal-path handle.
//!
//! Every entry carries a one-shot guard (`fired`). Whichever path flips it first
//! owns the callback; every other invocation, from either path and any thread,
//! observes the flag and returns immediately without waiting.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::registry_event::{InvocationPath, RegistryEvent, Tracer};

/// A boxed cleanup callback.
pub(crate) type Action = Box<dyn FnOnce() + Send + 'static>;

/// One registered callback plus its run-once guard.
pub(crate) struct Entry {
    index: usize,
    fired: AtomicBool,
    // Only the guard winner ever takes from this slot, so the lock is uncontended.
    action: Mutex<Option<Action>>,
    tracer: Arc<Tracer>,
}

impl Entry {
    pub(crate) fn new(index: usize, action: Action, tracer: Arc<Tracer>) -> Self {
        Self {
            index,
            fired: AtomicBool::new(false),
            action: Mutex::new(Some(action)),
            tracer,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Fires the guard. Returns `true` if this call executed the callback.
    ///
    /// The guard is marked before the callback starts, so a panicking callback
    /// still counts as run. The panic itself propagates to the caller.
    pub(crate) fn fire(&self, path: InvocationPath) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let action = self
            .action
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        let Some(action) = action else {
            return false;
        };

        self.tracer.emit(&RegistryEvent::Run {
            index: self.index,
            path,
        });
        log::trace!("running cleanup callback #{} ({path} path)", self.index);

        action();
        true
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("index", &self.index)
            .field("fired", &self.is_fired())
            .finish_non_exhaustive()
    }
}

/// Capability to run a registered callback through the normal path.
///
/// Returned by [`register`](crate::register). A handle does not own the callback;
/// the registry does. Cloning a handle yields another capability for the same
/// entry, and all clones share one run-once guard.
///
/// # Examples
///
/// ```rust
/// use atexit_registry::Registry;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let registry = Registry::new();
/// let released = Arc::new(AtomicUsize::new(0));
///
/// let counter = released.clone();
/// let handle = registry.register(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// handle.run();
/// handle.run(); // no-op
/// registry.trigger(); // skips the fired entry
///
/// assert_eq!(released.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Handle {
    entry: Arc<Entry>,
}

impl Handle {
    pub(crate) fn new(entry: Arc<Entry>) -> Self {
        Self { entry }
    }

    /// Runs the callback on the calling thread unless it already ran.
    ///
    /// Idempotent: repeated or concurrent calls execute the callback once in total,
    /// also counting any execution by the abrupt path. A caller that loses a race
    /// returns immediately, even if the winning execution is still in progress.
    ///
    /// # Panics
    ///
    /// If the callback panics, the panic propagates here. The entry stays fired
    /// and will not be retried.
    pub fn run(&self) {
        self.entry.fire(InvocationPath::Normal);
    }

    /// Whether the callback has been claimed by either path.
    pub fn is_fired(&self) -> bool {
        self.entry.is_fired()
    }

    /// Registration position of the entry within its registry.
    pub fn index(&self) -> usize {
        self.entry.index()
    }

    /// Wraps the handle in a guard that runs it when dropped.
    ///
    /// ```rust
    /// use atexit_registry::Registry;
    ///
    /// let registry = Registry::new();
    /// {
    ///     let _cleanup = registry.register(|| println!("released")).guard();
    ///     // ... use the resource ...
    /// } // prints "released"
    /// ```
    pub fn guard(self) -> HandleGuard {
        HandleGuard {
            handle: self,
            armed: true,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index())
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Scope guard that runs its [`Handle`] on drop.
///
/// A callback that panics while the guard is dropped during another panic's
/// unwinding aborts the process, as with any panicking destructor.
#[must_use = "dropping the guard immediately runs the callback"]
#[derive(Debug)]
pub struct HandleGuard {
    handle: Handle,
    armed: bool,
}

impl HandleGuard {
    /// The guarded handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Releases the handle without running it.
    ///
    /// The entry stays pending and will still be run by the abrupt path.
    pub fn disarm(mut self) -> Handle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.run();
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
