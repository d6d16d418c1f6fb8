//! Cassette storage: fixture lookup and atomic persistence

mod reader;
mod writer;

use std::io;
use std::path::Path;
use std::sync::Arc;

pub use reader::{DirectorySource, MemorySource};
pub use writer::{CassetteWriter, FsPersistence};

use crate::cassette::Cassette;

/// Source of recorded cassettes, keyed by name
pub trait FixtureSource: Send + Sync {
    /// Look up a cassette
    ///
    /// Returns `None` when the cassette is missing or cannot be parsed.
    fn cassette(&self, name: &str) -> Option<Arc<Cassette>>;
}

/// Filesystem capability used to save cassettes
pub trait Persistence: Send + Sync {
    /// Create `path` and its parents if they do not exist
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    fn create_directory_if_missing(&self, path: &Path) -> io::Result<()>;

    /// Replace the file at `path` with `data` in one step
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()>;
}
