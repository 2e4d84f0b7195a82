//! Integration Test: Library Hygiene
//!
//! **Policy**:
//! - The core library never writes to stdout/stderr directly; it logs
//!   through `tracing` and leaves subscriber setup to the binary.
//! - The driver is synchronous. No async runtime, `async fn` or `.await`
//!   anywhere in production code.
//! - Simulation processes are spawned directly, never through a shell.

use architectural_enforcement::{report, scan, LIBRARY_DIR, PRODUCTION_DIRS};

#[test]
fn test_no_direct_printing_in_library() {
    let violations = scan(&[LIBRARY_DIR], |code| {
        ["println!(", "print!(", "eprintln!(", "eprint!(", "dbg!("]
            .iter()
            .any(|m| code.contains(m))
    });
    report("direct printing in the library; use tracing", &violations);
}

#[test]
fn test_no_subscriber_setup_in_library() {
    let violations = scan(&[LIBRARY_DIR], |code| code.contains("tracing_subscriber"));
    report("tracing subscriber configured inside the library", &violations);
}

#[test]
fn test_no_async_runtime() {
    let violations = scan(&PRODUCTION_DIRS, |code| {
        code.contains("tokio") || code.contains("async fn") || code.contains(".await")
    });
    report("async code in a synchronous driver", &violations);
}

#[test]
fn test_no_shell_spawning() {
    let violations = scan(&[LIBRARY_DIR], |code| {
        code.contains("Command::new(\"sh\")")
            || code.contains("Command::new(\"bash\")")
            || code.contains("Command::new(\"cmd\")")
    });
    report("process spawned through a shell", &violations);
}
