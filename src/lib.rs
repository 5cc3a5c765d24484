//! # atexit-registry
//!
//! Run-once cleanup callbacks that survive abnormal process termination.
//!
//! `std::process::exit` does not unwind the stack, so destructors and scope-exit
//! cleanup never run. That is fine for memory and file descriptors, which the
//! operating system reclaims, but not for resources that outlive the process
//! (SYSV shared memory, lock files, spawned services). This crate keeps a
//! process-wide list of such cleanups, each reachable through two paths:
//!
//! - the **normal path**: the [`Handle`] returned by [`register`], invoked where the
//!   resource would ordinarily be released;
//! - the **abrupt path**: [`exit`], which runs every callback the normal path has not
//!   reached yet, most recently registered first, and then terminates the process.
//!
//! Each callback runs at most once across both paths and all threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use atexit_registry::{exit, register};
//!
//! fn acquire() {}
//! fn release() {}
//! fn work() -> bool { true }
//!
//! acquire();
//! let release_handle = register(release);
//!
//! if !work() {
//!     // Abnormal termination: `release` still runs.
//!     exit(1);
//! }
//!
//! release_handle.run();
//! ```
//!
//! ## Main Functions
//!
//! - [`register`] - Register a cleanup callback in the process-wide registry
//! - [`exit`] - Run all pending callbacks and terminate the process
//! - [`try_trigger`] - Run all pending callbacks without terminating, reporting panics
//! - [`set_trace_callback`] - Set up tracing for registry operations
//! - [`define_exit_registry!`] - Create an isolated registry module
//!
//! ## Exit should only be used for abnormal termination
//!
//! A program that returns from `main` normally should release its resources
//! through the handles. [`exit`] is for the paths that cannot.

mod entry;
mod macros;
mod registry;
mod registry_error;
mod registry_event;

// Re-export the main public API
pub use entry::{Handle, HandleGuard};
pub use registry::{
    clear_trace_callback, exit, global, register, set_trace_callback, trigger, try_trigger,
    Registry,
};
pub use registry_error::RegistryError;
pub use registry_event::{InvocationPath, RegistryEvent, TraceCallback};
