//! Cassette lookup

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::FixtureSource;
use crate::cassette::{Cassette, CASSETTE_EXTENSION};

/// Reads `<dir>/<name>.json`, caching cassettes that parsed successfully
///
/// Missing files are never cached, so a cassette recorded into the same
/// directory later in the run is picked up on the next lookup.
pub struct DirectorySource {
    dir: PathBuf,
    cache: DashMap<String, Arc<Cassette>>,
    loads: AtomicUsize,
}

impl DirectorySource {
    /// Create a source over a directory
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Path a cassette is expected at
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{CASSETTE_EXTENSION}"))
    }

    /// Number of cassettes parsed from disk
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Drop all cached cassettes
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn load(&self, name: &str) -> Option<Cassette> {
        let path = self.path_for(name);

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!(cassette = %name, path = %path.display(), "Cassette not found: {e}");
                return None;
            }
        };

        match Cassette::from_json(&data) {
            Ok(cassette) => {
                self.loads.fetch_add(1, Ordering::Relaxed);
                debug!(
                    cassette = %name,
                    interactions = cassette.len(),
                    "Loaded cassette"
                );
                Some(cassette)
            }
            Err(e) => {
                warn!(cassette = %name, path = %path.display(), "Ignoring malformed cassette: {e}");
                None
            }
        }
    }
}

impl FixtureSource for DirectorySource {
    fn cassette(&self, name: &str) -> Option<Arc<Cassette>> {
        if let Some(cassette) = self.cache.get(name) {
            return Some(Arc::clone(cassette.value()));
        }

        let cassette = Arc::new(self.load(name)?);
        self.cache.insert(name.to_string(), Arc::clone(&cassette));
        Some(cassette)
    }
}

/// In-memory fixtures
#[derive(Default)]
pub struct MemorySource {
    cassettes: DashMap<String, Arc<Cassette>>,
}

impl MemorySource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a cassette under its own name
    pub fn insert(&self, cassette: Cassette) {
        self.cassettes
            .insert(cassette.name().to_string(), Arc::new(cassette));
    }
}

impl FixtureSource for MemorySource {
    fn cassette(&self, name: &str) -> Option<Arc<Cassette>> {
        self.cassettes.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::{Interaction, Request, Response};
    use tempfile::TempDir;

    fn write_cassette(dir: &TempDir, name: &str) {
        let cassette = Cassette::new(
            name,
            vec![Interaction::new(
                Request::get("https://api.example.com/items"),
                Response::new(200),
                None,
            )],
        );
        std::fs::write(
            dir.path().join(format!("{name}.json")),
            cassette.to_json().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_missing_cassette() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path());

        assert!(source.cassette("missing").is_none());
        assert_eq!(source.load_count(), 0);
    }

    #[test]
    fn test_malformed_cassette() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), b"{\"name\": 3}").unwrap();
        let source = DirectorySource::new(temp_dir.path());

        assert!(source.cassette("broken").is_none());
    }

    #[test]
    fn test_load_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        write_cassette(&temp_dir, "items");
        let source = DirectorySource::new(temp_dir.path());

        let first = source.cassette("items").unwrap();
        let second = source.cassette("items").unwrap();

        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.load_count(), 1);

        source.clear();
        source.cassette("items").unwrap();
        assert_eq!(source.load_count(), 2);
    }

    #[test]
    fn test_missing_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path());

        assert!(source.cassette("late").is_none());
        write_cassette(&temp_dir, "late");
        assert!(source.cassette("late").is_some());
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new();
        assert!(source.cassette("items").is_none());

        source.insert(Cassette::new("items", vec![]));
        assert!(source.cassette("items").unwrap().is_empty());
    }
}
