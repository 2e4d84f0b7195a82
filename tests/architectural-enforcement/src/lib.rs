//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce crate-wide rules on
//! production code:
//! - No `unwrap()` / `expect()`: errors are propagated as typed values
//! - No stdout printing from the library: logging goes through `tracing`
//! - No async runtime: the driver is synchronous and blocking
//!
//! Helpers here locate the workspace sources and strip comments and test
//! modules so each rule only sees production code.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["simlink/core/src", "simlink/runner/src"];

/// Library source directory, relative to the workspace root
pub const LIBRARY_DIR: &str = "simlink/core/src";

/// One rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// One-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// All `.rs` files under `dir` (relative to the workspace root)
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of a source file as `(line number, code)`
///
/// Comments are stripped and everything from the first `#[cfg(test)]`
/// onwards is dropped; test modules sit at the end of each file.
pub fn production_lines(source: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        if code.trim().is_empty() {
            continue;
        }
        out.push((idx + 1, code.to_string()));
    }
    out
}

/// Scan production code in `dirs` for lines matching `is_violation`
pub fn scan<F>(dirs: &[&str], is_violation: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    let mut violations = Vec::new();
    for dir in dirs {
        for path in rust_files(dir) {
            let Ok(source) = fs::read_to_string(&path) else {
                continue;
            };
            for (line, code) in production_lines(&source) {
                if is_violation(&code) {
                    violations.push(Violation {
                        path: path.clone(),
                        line,
                        text: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Panic with a readable report if `violations` is non-empty
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_skip_comments_and_tests() {
        let source = "\
//! Module docs mention .unwrap()
fn real() {
    let x = 1; // trailing .expect(\"x\")
}

#[cfg(test)]
mod tests {
    fn t() { None::<u8>.unwrap(); }
}
";
        let lines = production_lines(source);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|(_, code)| !code.contains(".unwrap()")));
        assert!(lines.iter().all(|(_, code)| !code.contains(".expect(")));
        assert_eq!(lines[0].0, 2);
    }

    #[test]
    fn test_workspace_root_contains_sources() {
        assert!(workspace_root().join(LIBRARY_DIR).exists());
        assert!(!rust_files(LIBRARY_DIR).is_empty());
    }
}
