//! The deferred callback registry.
//!
//! A [`Registry`] is an append-only sequence of run-once cleanup callbacks with two
//! ways to reach each of them:
//!
//! - the normal path, through the [`Handle`] returned by [`Registry::register`];
//! - the abrupt path, through [`Registry::trigger`] or [`Registry::exit`], which walk
//!   every pending callback in reverse registration order.
//!
//! The process-wide registry behind the free functions of this module lives in a
//! `LazyLock`: it is empty until first use and is never torn down.
//!
//! # Examples
//!
//! ```
//! use atexit_registry::Registry;
//! use std::sync::{Arc, Mutex};
//!
//! let registry = Registry::new();
//! let order = Arc::new(Mutex::new(Vec::new()));
//!
//! for name in ["a", "b", "c"] {
//!     let order = order.clone();
//!     registry.register(move || order.lock().unwrap().push(name));
//! }
//!
//! registry.trigger();
//! assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock, Mutex};

use crate::entry::{Entry, Handle};
use crate::registry_error::RegistryError;
use crate::registry_event::{InvocationPath, RegistryEvent, TraceCallback, Tracer};

/// Process-wide registry used by the free functions of this crate.
static GLOBAL_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

const INITIAL_CAPACITY: usize = 10;

/// Ordered, thread-safe registry of run-once cleanup callbacks.
pub struct Registry {
    entries: Mutex<Vec<Arc<Entry>>>,
    tracer: Arc<Tracer>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(INITIAL_CAPACITY)),
            tracer: Arc::new(Tracer::default()),
        }
    }

    // -------------------------------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------------------------------

    /// Set a tracing callback for registry operations.
    ///
    /// The callback is invoked for registrations, callback runs (from either path),
    /// trigger walks and exits. It is not invoked while any registry lock is held,
    /// so it may call back into the same registry.
    ///
    /// # Lock Poisoning Recovery
    ///
    /// If the trace lock is poisoned, this method automatically recovers by
    /// extracting the inner value.
    pub fn set_trace_callback(&self, callback: impl Fn(&RegistryEvent) + Send + Sync + 'static) {
        let callback: Arc<TraceCallback> = Arc::new(callback);
        self.tracer.set(callback);
    }

    /// Clear the tracing callback.
    pub fn clear_trace_callback(&self) {
        self.tracer.clear();
    }

    // -------------------------------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------------------------------

    /// Registers `action` and returns the handle that runs it through the normal path.
    ///
    /// The action runs at most once: either when the handle is invoked, or when the
    /// abrupt path reaches it, whichever comes first.
    ///
    /// # Lock Poisoning Recovery
    ///
    /// If the entries lock is poisoned, this method recovers. The lock only ever
    /// guards a push or a clone of the sequence, neither of which can leave it
    /// half-updated.
    pub fn register<F>(&self, action: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            let entry = Arc::new(Entry::new(
                entries.len(),
                Box::new(action),
                self.tracer.clone(),
            ));
            entries.push(entry.clone());
            entry
        };

        log::trace!("registered cleanup callback #{}", entry.index());
        self.tracer.emit(&RegistryEvent::Register {
            index: entry.index(),
        });

        Handle::new(entry)
    }

    /// Runs every pending callback, most recently registered first.
    ///
    /// The sequence is snapshotted under the lock and walked outside of it, so
    /// callbacks registered during the walk may be missed. Callbacks that already
    /// ran through either path are skipped. Returns how many callbacks this call ran.
    ///
    /// # Panics
    ///
    /// A panicking callback propagates out of `trigger` and stops the walk: callbacks
    /// reached before it stay run, the ones after it stay pending.
    pub fn trigger(&self) -> usize {
        let snapshot = self.begin_walk();

        let mut ran = 0;
        for entry in snapshot.iter().rev() {
            if entry.fire(InvocationPath::Abrupt) {
                ran += 1;
            }
        }

        log::debug!("cleanup walk finished, {ran} callback(s) run");
        ran
    }

    /// Same walk as [`trigger`](Self::trigger), but reports a panicking callback as
    /// an error instead of unwinding.
    ///
    /// # Errors
    ///
    /// [`RegistryError::CallbackPanicked`] if a callback panics. The walk stops at
    /// that callback, exactly as `trigger` would.
    pub fn try_trigger(&self) -> Result<usize, RegistryError> {
        let snapshot = self.begin_walk();

        let mut ran = 0;
        for entry in snapshot.iter().rev() {
            let fired = catch_unwind(AssertUnwindSafe(|| entry.fire(InvocationPath::Abrupt)))
                .map_err(|payload| RegistryError::from_panic(entry.index(), payload.as_ref()))?;
            if fired {
                ran += 1;
            }
        }

        log::debug!("cleanup walk finished, {ran} callback(s) run");
        Ok(ran)
    }

    /// Runs every pending callback, then terminates the process with `code`.
    ///
    /// Meant for abnormal termination, e.g. from a signal handling thread, where
    /// the normal scope-exit cleanup of the program will never happen.
    ///
    /// # Panics
    ///
    /// If a callback panics, the panic propagates and the process terminates through
    /// Rust's panic handling instead of with `code`.
    pub fn exit(&self, code: i32) -> ! {
        self.tracer.emit(&RegistryEvent::Exit { code });
        log::debug!("exiting with status {code}");

        self.trigger();
        std::process::exit(code)
    }

    /// Number of callbacks ever registered, run or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether no callback was ever registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of callbacks that have not run yet.
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|e| !e.is_fired())
            .count()
    }

    fn begin_walk(&self) -> Vec<Arc<Entry>> {
        let snapshot = self
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let pending = snapshot.iter().filter(|e| !e.is_fired()).count();
        log::debug!("cleanup walk started, {pending} pending callback(s)");
        self.tracer.emit(&RegistryEvent::Trigger { pending });

        snapshot
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("pending", &self.pending())
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------
// Process-wide registry
// -------------------------------------------------------------------------------------------------

/// The process-wide registry.
pub fn global() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Registers `action` in the process-wide registry.
///
/// The returned handle is the normal path: call it where the guarded resource would
/// ordinarily be released. If the process instead ends through [`exit`], the action
/// runs there.
///
/// # Examples
///
/// ```
/// use atexit_registry::register;
///
/// let release = register(|| println!("segment detached"));
/// // ... use the resource ...
/// release.run();
/// ```
pub fn register<F>(action: F) -> Handle
where
    F: FnOnce() + Send + 'static,
{
    GLOBAL_REGISTRY.register(action)
}

/// Runs all pending callbacks of the process-wide registry in reverse registration
/// order, then terminates the process with `code`.
///
/// Should only be used for abnormal termination. A panicking callback aborts the
/// sequence and the exit status is lost.
pub fn exit(code: i32) -> ! {
    GLOBAL_REGISTRY.exit(code)
}

/// Runs all pending callbacks of the process-wide registry without terminating.
///
/// This is the abrupt path of [`exit`] without the termination, intended for tests.
#[doc(hidden)]
pub fn trigger() -> usize {
    GLOBAL_REGISTRY.trigger()
}

/// Non-panicking variant of [`trigger`] for the process-wide registry.
pub fn try_trigger() -> Result<usize, RegistryError> {
    GLOBAL_REGISTRY.try_trigger()
}

/// Sets the trace callback of the process-wide registry.
pub fn set_trace_callback(callback: impl Fn(&RegistryEvent) + Send + Sync + 'static) {
    GLOBAL_REGISTRY.set_trace_callback(callback)
}

/// Clears the trace callback of the process-wide registry.
pub fn clear_trace_callback() {
    GLOBAL_REGISTRY.clear_trace_callback()
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn recorder(
        registry: &Registry,
        order: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> Handle {
        let order = order.clone();
        registry.register(move || order.lock().unwrap().push(name))
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.trigger(), 0);
    }

    #[test]
    fn test_register_assigns_increasing_indices() {
        let registry = Registry::new();
        let a = registry.register(|| {});
        let b = registry.register(|| {});
        let c = registry.register(|| {});

        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.pending(), 3);
    }

    #[test]
    fn test_trigger_runs_in_reverse_order() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        recorder(&registry, &order, "A");
        recorder(&registry, &order, "B");
        recorder(&registry, &order, "C");

        assert_eq!(registry.trigger(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_trigger_order_with_non_commutative_operations() {
        let registry = Registry::new();
        let n = Arc::new(AtomicI64::new(0));

        let x = n.clone();
        registry.register(move || {
            x.fetch_sub(1, Ordering::SeqCst);
        });
        let y = n.clone();
        registry.register(move || {
            let v = y.load(Ordering::SeqCst);
            y.store(v * 10, Ordering::SeqCst);
        });

        registry.trigger();
        assert_eq!(n.load(Ordering::SeqCst), -10);
    }

    #[test]
    fn test_trigger_skips_entries_run_through_handle() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        recorder(&registry, &order, "A");
        let b = recorder(&registry, &order, "B");
        recorder(&registry, &order, "C");

        b.run();
        assert_eq!(registry.pending(), 2);

        assert_eq!(registry.trigger(), 2);
        assert_eq!(*order.lock().unwrap(), vec!["B", "C", "A"]);
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_second_trigger_is_a_no_op() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let handle = registry.register(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.trigger(), 1);
        assert_eq!(registry.trigger(), 0);
        handle.run();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_during_trigger_stops_walk() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let a = recorder(&registry, &order, "A");
        let b = registry.register(|| panic!("cannot release B"));
        let c = recorder(&registry, &order, "C");

        let result = catch_unwind(AssertUnwindSafe(|| registry.trigger()));
        assert!(result.is_err());

        assert_eq!(*order.lock().unwrap(), vec!["C"]);
        assert!(c.is_fired());
        assert!(b.is_fired());
        assert!(!a.is_fired());

        // The remaining entry is still reachable.
        assert_eq!(registry.trigger(), 1);
        assert_eq!(*order.lock().unwrap(), vec!["C", "A"]);
    }

    #[test]
    fn test_try_trigger_reports_panicking_callback() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let a = recorder(&registry, &order, "A");
        registry.register(|| panic!("cannot release B"));
        recorder(&registry, &order, "C");

        let err = registry.try_trigger().unwrap_err();
        assert_eq!(
            err,
            RegistryError::CallbackPanicked {
                index: 1,
                message: "cannot release B".to_string()
            }
        );
        assert_eq!(*order.lock().unwrap(), vec!["C"]);
        assert!(!a.is_fired());

        assert_eq!(registry.try_trigger(), Ok(1));
    }

    #[test]
    fn test_handle_races_trigger() {
        for _ in 0..100 {
            let registry = Arc::new(Registry::new());
            let count = Arc::new(AtomicUsize::new(0));

            let c = count.clone();
            let handle = registry.register(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });

            let barrier = Arc::new(Barrier::new(2));

            let b = barrier.clone();
            let normal = thread::spawn(move || {
                b.wait();
                handle.run();
            });

            let b = barrier.clone();
            let r = registry.clone();
            let abrupt = thread::spawn(move || {
                b.wait();
                r.trigger();
            });

            normal.join().unwrap();
            abrupt.join().unwrap();

            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let count = count.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let count = count.clone();
                        registry.register(move || {
                            count.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.len(), 400);
        assert_eq!(registry.trigger(), 400);
        assert_eq!(count.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn test_callback_may_register_during_trigger() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));

        let r = registry.clone();
        let c = count.clone();
        registry.register(move || {
            let c = c.clone();
            r.register(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The late entry is not part of the first walk's snapshot.
        assert_eq!(registry.trigger(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.pending(), 1);

        assert_eq!(registry.trigger(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_trace_events() {
        let registry = Registry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        registry.set_trace_callback(move |e| {
            events_clone.lock().unwrap().push(e.to_string());
        });

        let a = registry.register(|| {});
        registry.register(|| {});
        a.run();
        registry.trigger();

        registry.clear_trace_callback();
        registry.register(|| {});

        let captured = events.lock().unwrap();
        assert_eq!(
            *captured,
            vec![
                "register { index: 0 }",
                "register { index: 1 }",
                "run { index: 0, path: normal }",
                "trigger { pending: 1 }",
                "run { index: 1, path: abrupt }",
            ]
        );
    }

    #[test]
    fn test_trace_callback_may_use_registry() {
        let registry = Arc::new(Registry::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let r = Arc::downgrade(&registry);
        let s = seen.clone();
        registry.set_trace_callback(move |_| {
            if let Some(r) = r.upgrade() {
                s.store(r.len(), Ordering::SeqCst);
            }
        });

        registry.register(|| {});
        registry.register(|| {});

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_format() {
        let registry = Registry::new();
        registry.register(|| {}).run();
        registry.register(|| {});
        assert_eq!(format!("{registry:?}"), "Registry { len: 2, pending: 1 }");
    }
}
