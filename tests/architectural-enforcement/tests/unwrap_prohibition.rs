//! Integration Test: Unwrap Prohibition
//!
//! **Policy**: Production code in the naming crates MUST propagate errors.
//! `unwrap()` and `expect()` are only allowed in tests.

use std::fs;
use std::path::Path;

use architectural_enforcement::{production_lines, workspace_root, PRODUCTION_DIRS};

/// Test that production code does not unwrap
#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        check_directory(&workspace_root().join(dir), &mut violations);
    }

    if !violations.is_empty() {
        eprintln!("\n❌ unwrap()/expect() found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED: return a Result and use `?`, or `unwrap_or*` with a default");

        panic!(
            "\nFound {} unwrap violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Test that the router reaches the discovery backend through traits only
#[test]
fn test_routing_does_not_name_memory_backend() {
    let dir = workspace_root().join("naming/core/src/routing");
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for (line_number, line) in production_lines(&content) {
            if line.contains("MemoryBackend") {
                violations.push(format!(
                    "{}:{} - {}",
                    entry.path().display(),
                    line_number,
                    line.trim()
                ));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "routing must depend on NamingBackend, not the in-memory backend:\n{}",
        violations.join("\n")
    );
}

fn check_directory(path: &Path, violations: &mut Vec<String>) {
    assert!(path.exists(), "missing source directory: {}", path.display());

    for entry in walkdir::WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (line_number, line) in production_lines(&content) {
        let code_part = line.split("//").next().unwrap_or(line);
        if code_part.contains(".unwrap()") || code_part.contains(".expect(") {
            violations.push(format!("{}:{} - {}", path.display(), line_number, line.trim()));
        }
    }
}
