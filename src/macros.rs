//! Macros for creating isolated exit registries.

/// Creates an isolated exit registry with a single macro invocation.
///
/// The macro generates a module containing a private static [`Registry`](crate::Registry)
/// and free functions mirroring the crate-level API. Each generated registry has its
/// own sequence, its own trace callback, and its own abrupt path.
///
/// # Examples
///
/// ```rust
/// use atexit_registry::define_exit_registry;
/// use std::sync::{Arc, Mutex};
///
/// define_exit_registry!(shm);
///
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let l = log.clone();
/// shm::register(move || l.lock().unwrap().push("detach segment 1"));
/// let l = log.clone();
/// shm::register(move || l.lock().unwrap().push("detach segment 2"));
///
/// shm::trigger();
/// assert_eq!(*log.lock().unwrap(), vec!["detach segment 2", "detach segment 1"]);
/// ```
///
/// # Multiple Registries
///
/// ```rust
/// use atexit_registry::define_exit_registry;
///
/// define_exit_registry!(files);
/// define_exit_registry!(children);
///
/// files::register(|| {});
///
/// // No interference between registries
/// assert_eq!(files::registry().len(), 1);
/// assert!(children::registry().is_empty());
/// ```
#[macro_export]
macro_rules! define_exit_registry {
    ($name:ident) => {
        pub mod $name {
            use std::sync::LazyLock;

            // Module-private storage, empty until first use.
            static REGISTRY: LazyLock<$crate::Registry> = LazyLock::new($crate::Registry::new);

            /// The registry behind this module.
            pub fn registry() -> &'static $crate::Registry {
                &REGISTRY
            }

            /// Register a cleanup callback.
            pub fn register<F>(action: F) -> $crate::Handle
            where
                F: FnOnce() + Send + 'static,
            {
                REGISTRY.register(action)
            }

            /// Run all pending callbacks in reverse registration order.
            pub fn trigger() -> usize {
                REGISTRY.trigger()
            }

            /// Run all pending callbacks, reporting a panicking one as an error.
            pub fn try_trigger() -> Result<usize, $crate::RegistryError> {
                REGISTRY.try_trigger()
            }

            /// Run all pending callbacks, then terminate the process with `code`.
            pub fn exit(code: i32) -> ! {
                REGISTRY.exit(code)
            }

            /// Set a tracing callback for registry operations.
            pub fn set_trace_callback(
                callback: impl Fn(&$crate::RegistryEvent) + Send + Sync + 'static,
            ) {
                REGISTRY.set_trace_callback(callback)
            }

            /// Clear the tracing callback.
            pub fn clear_trace_callback() {
                REGISTRY.clear_trace_callback()
            }
        }
    };
}
