use std::fmt;
use std::sync::{Arc, Mutex};

/// Which of the two paths executed a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPath {
    /// The caller invoked the [`Handle`](crate::Handle) directly.
    Normal,
    /// The callback was reached by [`trigger`](crate::trigger) or [`exit`](crate::exit).
    Abrupt,
}

impl fmt::Display for InvocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationPath::Normal => write!(f, "normal"),
            InvocationPath::Abrupt => write!(f, "abrupt"),
        }
    }
}

/// Events emitted by the registry during operations.
///
/// These events are passed to the tracing callback set via `set_trace_callback`.
/// The `Clone` derive allows callbacks to store or forward events if needed.
///
/// # Examples
///
/// ```rust
/// use atexit_registry::RegistryEvent;
///
/// let event = RegistryEvent::Register { index: 0 };
/// assert_eq!(event.to_string(), "register { index: 0 }");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A callback was appended to the registry.
    Register {
        /// Registration position of the new entry.
        index: usize,
    },

    /// A callback is about to execute.
    Run {
        /// Registration position of the entry.
        index: usize,
        /// The path that won the entry's run-once guard.
        path: InvocationPath,
    },

    /// An abrupt-path walk started.
    Trigger {
        /// Entries in the walk's snapshot that had not fired yet.
        pending: usize,
    },

    /// The process is about to run its callbacks and terminate.
    Exit {
        /// The requested exit status.
        code: i32,
    },
}

impl fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryEvent::Register { index } => write!(f, "register {{ index: {index} }}"),
            RegistryEvent::Run { index, path } => {
                write!(f, "run {{ index: {index}, path: {path} }}")
            }
            RegistryEvent::Trigger { pending } => write!(f, "trigger {{ pending: {pending} }}"),
            RegistryEvent::Exit { code } => write!(f, "exit {{ code: {code} }}"),
        }
    }
}

/// Type alias for the user-supplied tracing callback.
///
/// The callback receives a reference to a `RegistryEvent` every time the registry is
/// interacted with. It must be thread-safe because registries are shared across threads.
pub type TraceCallback = dyn Fn(&RegistryEvent) + Send + Sync + 'static;

/// Slot holding the optional trace callback of one registry.
///
/// Shared between a registry and every entry it creates, so that normal-path runs
/// report to the same callback as the registry itself.
#[derive(Default)]
pub(crate) struct Tracer {
    callback: Mutex<Option<Arc<TraceCallback>>>,
}

impl Tracer {
    pub(crate) fn set(&self, callback: Arc<TraceCallback>) {
        let mut guard = self.callback.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(callback);
    }

    pub(crate) fn clear(&self) {
        let mut guard = self.callback.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    /// Invokes the current callback, if any.
    ///
    /// The callback is cloned out of the lock first, so it may freely call back
    /// into the registry. A panicking callback propagates to the caller.
    pub(crate) fn emit(&self, event: &RegistryEvent) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        if let Some(callback) = callback {
            callback(event);
        }
    }
}
