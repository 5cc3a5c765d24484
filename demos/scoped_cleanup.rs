//! Scoped cleanup example for atexit-registry.
//!
//! Demonstrates:
//! - Releasing a resource through the normal path when its scope ends
//! - A worker thread whose resource is still held when the program exits abruptly
//! - `exit` running the pending cleanup, then terminating with the requested status
//!
//! Run with: `cargo run --example scoped_cleanup`

use atexit_registry::{exit, register, set_trace_callback};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A lock file the operating system will not remove for us.
fn create_lock_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{name}-{}.lock", std::process::id()));
    fs::write(&path, b"locked").expect("failed to create lock file");
    println!("   created {}", path.display());
    path
}

fn remove_lock_file(path: PathBuf) -> impl FnOnce() + Send + 'static {
    move || {
        let _ = fs::remove_file(&path);
        println!("   removed {}", path.display());
    }
}

fn main() {
    println!("=== atexit-registry: Scoped Cleanup ===\n");

    set_trace_callback(|event| println!("   [trace] {event}"));

    // -------------------------------------------------------------------------
    // 1. Normal path: the guard releases the lock file at scope exit
    // -------------------------------------------------------------------------
    println!("1. Normal path...");
    {
        let path = create_lock_file("scoped");
        let _cleanup = register(remove_lock_file(path)).guard();
        println!("   working with the scoped lock file");
    }

    // -------------------------------------------------------------------------
    // 2. Abrupt path: a worker still holds its lock file when we exit
    // -------------------------------------------------------------------------
    println!("\n2. Abrupt path...");
    let (ready_tx, ready_rx) = mpsc::channel();

    thread::spawn(move || {
        let path = create_lock_file("worker");
        let release = register(remove_lock_file(path));
        ready_tx.send(()).expect("main thread went away");

        // Simulates work that never finishes before the fatal event.
        thread::sleep(Duration::from_secs(60));
        release.run();
    });

    ready_rx.recv().expect("worker failed to start");

    println!("   fatal condition detected, exiting with status 2");
    exit(2);
}
