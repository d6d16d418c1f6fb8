//! Cassette writer

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{error, info};

use super::Persistence;
use crate::cassette::{Cassette, CASSETTE_EXTENSION};
use crate::{DvrError, Result};

/// Local filesystem persistence
///
/// Writes go to a temporary file in the target directory which is then
/// renamed over the destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPersistence;

impl Persistence for FsPersistence {
    fn create_directory_if_missing(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;

        Ok(())
    }
}

/// Writes whole cassettes into an output directory
pub struct CassetteWriter {
    output_dir: PathBuf,
    persistence: Arc<dyn Persistence>,
}

impl CassetteWriter {
    /// Create a writer
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            output_dir: output_dir.into(),
            persistence,
        }
    }

    /// Output directory
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `cassette` to `<output_dir>/<name>.json`
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the directory cannot be created or the
    /// file cannot be written
    pub fn persist(&self, cassette: &Cassette) -> Result<PathBuf> {
        self.persistence
            .create_directory_if_missing(&self.output_dir)
            .map_err(|e| {
                error!(dir = %self.output_dir.display(), "Failed to create cassettes directory: {e}");
                DvrError::PersistenceFailure(format!(
                    "Failed to create cassettes directory {}: {e}",
                    self.output_dir.display()
                ))
            })?;

        let data = cassette
            .to_json()
            .map_err(|e| DvrError::PersistenceFailure(e.to_string()))?;

        let path = self
            .output_dir
            .join(format!("{}.{CASSETTE_EXTENSION}", cassette.name()));

        self.persistence.write_atomic(&path, &data).map_err(|e| {
            error!(path = %path.display(), "Failed to persist cassette: {e}");
            DvrError::PersistenceFailure(format!(
                "Failed to write cassette {}: {e}",
                path.display()
            ))
        })?;

        info!(
            path = %path.display(),
            interactions = cassette.len(),
            "Persisted cassette. Add this file to your test fixtures"
        );

        Ok(path)
    }
}
