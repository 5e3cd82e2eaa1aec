use std::path::{Path, PathBuf};
use std::process::Command;

/// Calls that rewrite the process environment, or set up a test home through it.
const ENV_MUTATIONS: &[&str] = &["isolated_home()", "env::set_var", "env::remove_var"];

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/packed-refs");
    println!("cargo:rerun-if-changed=src");

    let sha = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=WORKER_PROXY_GIT_SHA={}", sha);

    let root = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let mut violations = Vec::new();
    for file in rust_files(&root.join("src")) {
        if let Ok(content) = std::fs::read_to_string(&file) {
            let rel = file.strip_prefix(&root).unwrap_or(&file).display().to_string();
            violations.extend(unserialised_env_tests(&content, &rel));
        }
    }

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {}", violation);
        }
        panic!(
            "{} test(s) touch WORKER_PROXY_HOME or other env vars without #[serial]",
            violations.len()
        );
    }
}

fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(rust_files(&path));
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
    files
}

/// Tests whose body mutates the environment but lack `#[serial]`.
///
/// A test is the attribute run ending in a `fn` line; its body ends at the
/// closing brace with the same indentation.
fn unserialised_env_tests(content: &str, rel: &str) -> Vec<String> {
    let mut violations = Vec::new();
    let mut attrs: Vec<&str> = Vec::new();
    let mut current: Option<(String, usize, String, bool)> = None;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if let Some((name, start, indent, serial)) = &current {
            let mutates = ENV_MUTATIONS.iter().any(|call| trimmed.contains(call));
            if mutates && !trimmed.starts_with("//") {
                if !serial {
                    violations.push(format!("{}:{} `{}` needs #[serial]", rel, start, name));
                }
                current = None;
            } else if line == format!("{}}}", indent) {
                current = None;
            }
            continue;
        }

        if trimmed.starts_with("#[") {
            attrs.push(trimmed);
            continue;
        }

        let is_test = attrs
            .iter()
            .any(|a| *a == "#[test]" || a.starts_with("#[tokio::test"));
        if let (true, Some(pos)) = (is_test, trimmed.find("fn ")) {
            let name = trimmed
                .get(pos + 3..)
                .and_then(|rest| rest.split('(').next())
                .unwrap_or_default()
                .to_string();
            let indent = line
                .get(..line.len() - line.trim_start().len())
                .unwrap_or_default()
                .to_string();
            let serial = attrs.iter().any(|a| a.ends_with("serial]"));
            current = Some((name, i + 1, indent, serial));
        }
        attrs.clear();
    }
    violations
}
