//! Test fixtures for Concord integration tests.
//!
//! Provides the list application used across crates, multi-instance
//! helpers, and typed loading of the JSON scenario files under
//! `fixtures/`.

pub mod harness;
pub mod list;

use std::path::PathBuf;

use serde::de::DeserializeOwned;

pub use harness::{
    add_writer, compare, confirm, converged, create, create_with, memory_store, open_base,
    replicate_all, run_scenario, sync, test_config, values, ListBase, Scenario, Step,
};
pub use list::{ListHandlers, ListOp, LIST_VIEW};

/// Root directory of the fixture files.
pub fn fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Load and deserialize a JSON fixture file.
///
/// # Panics
/// Panics if the file doesn't exist or can't be deserialized.
pub fn load_fixture<T: DeserializeOwned>(relative_path: &str) -> T {
    let path = fixtures_root().join(relative_path);
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", path.display(), e));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {}", path.display(), e))
}

/// List all JSON files in a fixture subdirectory, sorted by name.
pub fn list_fixtures(subdir: &str) -> Vec<PathBuf> {
    let dir = fixtures_root().join(subdir);
    if !dir.exists() {
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("Failed to read directory {}: {}", dir.display(), e))
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            path.extension().is_some_and(|ext| ext == "json").then_some(path)
        })
        .collect();
    paths.sort();
    paths
}

/// Every scenario under `fixtures/scenarios`.
pub fn load_scenarios() -> Vec<Scenario> {
    list_fixtures("scenarios")
        .iter()
        .map(|path| {
            let name = path
                .strip_prefix(fixtures_root())
                .unwrap_or_else(|e| panic!("Fixture outside root {}: {}", path.display(), e));
            load_fixture(&name.to_string_lossy())
        })
        .collect()
}
