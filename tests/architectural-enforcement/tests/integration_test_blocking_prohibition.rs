//! Integration Test: Blocking-Call Prohibition
//!
//! The relay renders model streams cooperatively: pacing delays, planner
//! waits, and cancellation checks all suspend the task, never the thread.
//! A single `std::thread::sleep` or `block_on` on a runtime worker stalls
//! every conversation sharing that worker.
//!
//! **Policy**: Production code in the core library and the daemon MUST NOT
//! call `std::thread::sleep` or drive a runtime with `block_on`.
//! **Exceptions**: test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Patterns that block a runtime worker thread
const FORBIDDEN: [&str; 2] = ["thread::sleep(", "block_on("];

/// Test that production code does not contain thread-blocking calls
#[test]
fn test_no_blocking_calls_in_production_code() {
    let violations = find_blocking_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Thread-blocking calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE waits:");
        eprintln!("  - tokio::time::sleep / tokio::time::interval (cooperative)");
        eprintln!("  - awaiting channels, sockets, and watch receivers");
        eprintln!("  - test code (#[test] or #[tokio::test] functions)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - std::thread::sleep (stalls the worker thread)");
        eprintln!("  - block_on (wedges the async runtime from inside)");

        panic!(
            "\nFound {} blocking violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Test that the scan actually covers the sources it claims to
#[test]
fn test_scanned_directories_exist() {
    for dir in ["relay/core/src", "relay/daemon/src"] {
        let path = workspace_root().join(dir);
        assert!(
            path.exists(),
            "scanned source directory missing: {}",
            path.display()
        );
    }
}

/// Resolve the workspace root from this package's manifest directory
fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Find all thread-blocking calls in production code
fn find_blocking_violations() -> Vec<String> {
    let mut violations = Vec::new();
    let root = workspace_root();

    // Core library: tests live in #[cfg(test)] modules alongside the code
    check_directory(
        &root.join("relay/core/src"),
        &mut violations,
        &BlockingPolicy { allow_tests: true },
    );

    check_directory(
        &root.join("relay/daemon/src"),
        &mut violations,
        &BlockingPolicy { allow_tests: true },
    );

    violations
}

struct BlockingPolicy {
    allow_tests: bool,
}

fn check_directory(dir: &Path, violations: &mut Vec<String>, policy: &BlockingPolicy) {
    assert!(
        dir.exists(),
        "scanned source directory missing: {}",
        dir.display()
    );

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations, policy);
        }
    }
}

/// True when the code portion of `line` contains a forbidden call
fn line_violates(line: &str) -> bool {
    let code_part = line.split("//").next().unwrap_or(line);
    FORBIDDEN.iter().any(|pattern| code_part.contains(pattern))
}

fn check_file(path: &Path, violations: &mut Vec<String>, policy: &BlockingPolicy) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        if !line_violates(line) {
            continue;
        }

        if policy.allow_tests && is_in_test_function(&lines, idx) {
            continue;
        }

        violations.push(format!(
            "{}:{} - {}",
            path.display(),
            line_number,
            line.trim()
        ));
    }
}

/// Check if line is inside a test function
fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    // Scan backwards for #[test] or #[tokio::test]
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") && !line.contains("test") {
            return false; // Found a non-test function first
        }

        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_flags_blocking_calls() {
        assert!(line_violates("    std::thread::sleep(delay);"));
        assert!(line_violates("    thread::sleep(Duration::from_millis(50));"));
        assert!(line_violates("    handle.block_on(future);"));
        assert!(line_violates("    futures::executor::block_on(fut);"));
    }

    #[test]
    fn test_detector_allows_cooperative_waits() {
        assert!(!line_violates("    tokio::time::sleep(delay).await;"));
        assert!(!line_violates("    interval.tick().await;"));
        assert!(!line_violates("// never call thread::sleep( in a handler"));
    }

    #[test]
    fn test_test_function_detection() {
        let test_code = vec![
            "#[tokio::test]",
            "async fn test_pacing_waits() {",
            "    std::thread::sleep(Duration::from_millis(1));",
            "}",
        ];
        assert!(is_in_test_function(&test_code, 2));

        let prod_code = vec![
            "fn poll_loop() {",
            "    std::thread::sleep(Duration::from_millis(50));",
            "}",
        ];
        assert!(!is_in_test_function(&prod_code, 1));
    }
}
