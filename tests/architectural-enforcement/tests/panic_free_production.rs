//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: Production code MUST NOT call `unwrap()` or `expect()`.
//! Failures are returned as typed errors (`thiserror` in the library,
//! `anyhow` in the runner). Test modules are exempt.

use architectural_enforcement::{report, scan, PRODUCTION_DIRS};

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(&PRODUCTION_DIRS, |code| code.contains(".unwrap()"));
    report("unwrap() in production code; propagate the error instead", &violations);
}

#[test]
fn test_no_expect_in_production_code() {
    let violations = scan(&PRODUCTION_DIRS, |code| code.contains(".expect("));
    report("expect() in production code; propagate the error instead", &violations);
}

#[test]
fn test_no_todo_or_unimplemented_macros() {
    let violations = scan(&PRODUCTION_DIRS, |code| {
        code.contains("todo!(") || code.contains("unimplemented!(")
    });
    report("todo!/unimplemented! in production code", &violations);
}
