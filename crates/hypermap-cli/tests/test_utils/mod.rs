//! Test utilities for hypermap CLI integration tests

// Internal imports (std, crate)
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

// External imports (alphabetized)
use anyhow::Context;
use tempfile::TempDir;

/// Creates a temporary directory for test inputs
pub fn create_temp_dir() -> anyhow::Result<(TempDir, PathBuf)> {
    let temp_dir = tempfile::tempdir()?;
    let temp_path = temp_dir.path().to_path_buf();
    Ok((temp_dir, temp_path))
}

/// Writes a manifest with a test and a person controller
pub fn create_test_manifest(dir: &Path) -> anyhow::Result<PathBuf> {
    let manifest_path = dir.join("api.yaml");
    let manifest_content = r#"
classes:
  - name: Person
    description: Somebody known to the API
    properties:
      - { name: id, type: integer, required: true }
      - { name: name, type: string }
      - { name: friends, type: "[Person]" }

controllers:
  - name: TestController
    url: /api/test
    operations:
      - name: Result
        parameters:
          - { name: input, type: integer, source: url }
        returns: integer

  - name: PersonController
    url: /api/person
    entity: Person
    operations:
      - name: Get
        parameters:
          - { name: id, type: integer }
        returns: Person
      - name: Create
        parameters:
          - { name: person, type: Person }
        outputs:
          - { name: id, type: integer }
        headers:
          - { name: Location, output: id, template: "/api/person/{id}" }
      - name: Delete
        parameters:
          - { name: id, type: integer }
        allow:
          role: [admin]
"#;
    fs::write(&manifest_path, manifest_content)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    Ok(manifest_path)
}

/// Writes a configuration file with a custom documentation path
pub fn create_test_config(dir: &Path) -> anyhow::Result<PathBuf> {
    let config_path = dir.join("config.yaml");
    fs::write(
        &config_path,
        "base_uri: https://api.example.com/\ndocumentation_path: /api/docs\n",
    )?;
    Ok(config_path)
}

/// Runs the hypermap binary with the given manifest, config and arguments
pub fn run_hypermap(manifest: &Path, config: &Path, args: &[&str]) -> anyhow::Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_hypermap"))
        .arg("--manifest")
        .arg(manifest)
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .context("Failed to run hypermap")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}
