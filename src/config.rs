//! Configuration types for DVR sessions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{DvrError, Result};

/// Maximum cassette name length in bytes
pub const MAX_CASSETTE_NAME_LEN: usize = 255;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cassette name, also the file stem on disk
    pub cassette_name: String,
    /// Directory recorded cassettes are written to
    pub output_dir: PathBuf,
    /// Directory cassettes are read from; defaults to `output_dir`
    #[serde(default)]
    pub fixture_dir: Option<PathBuf>,
    /// Whether requests missing from the fixtures may hit the network
    #[serde(default = "default_true")]
    pub recording_enabled: bool,
    /// Header names that take part in request matching
    #[serde(default)]
    pub headers_to_check: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Create a configuration that reads and writes cassettes in `output_dir`
    #[must_use]
    pub fn new(cassette_name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cassette_name: cassette_name.into(),
            output_dir: output_dir.into(),
            fixture_dir: None,
            recording_enabled: true,
            headers_to_check: Vec::new(),
        }
    }

    /// Read fixtures from a different directory than the output
    #[must_use]
    pub fn with_fixture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixture_dir = Some(dir.into());
        self
    }

    /// Enable or disable recording
    #[must_use]
    pub fn with_recording_enabled(mut self, enabled: bool) -> Self {
        self.recording_enabled = enabled;
        self
    }

    /// Set the headers that take part in matching
    #[must_use]
    pub fn with_headers_to_check<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers_to_check = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Directory fixtures are looked up in
    #[must_use]
    pub fn fixture_dir(&self) -> &Path {
        self.fixture_dir.as_deref().unwrap_or(&self.output_dir)
    }

    /// Path the cassette is written to
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            self.cassette_name,
            crate::cassette::CASSETTE_EXTENSION
        ))
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DvrError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| DvrError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_cassette_name(&self.cassette_name)?;

        if self.output_dir.as_os_str().is_empty() {
            return Err(DvrError::ConfigError(
                "output_dir cannot be empty".to_string(),
            ));
        }

        for (i, name) in self.headers_to_check.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(DvrError::ConfigError(format!(
                    "headers_to_check[{i}] cannot be empty"
                )));
            }
        }

        Ok(())
    }
}

/// Validate a cassette name
///
/// # Errors
///
/// Returns error if the name cannot be used as a file stem
pub fn validate_cassette_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DvrError::InvalidCassetteName(
            "Cassette name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_CASSETTE_NAME_LEN {
        return Err(DvrError::InvalidCassetteName(format!(
            "Cassette name too long: {} > {MAX_CASSETTE_NAME_LEN}",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(DvrError::InvalidCassetteName(
            "Cassette name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(DvrError::InvalidCassetteName(
            "Cassette name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(DvrError::InvalidCassetteName(
            "Cassette name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(DvrError::InvalidCassetteName(
            "Cassette name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse_defaults() {
        let config_toml = r#"
            cassette_name = "items"
            output_dir = "/tmp/cassettes"
        "#;

        let config: SessionConfig = toml::from_str(config_toml).unwrap();
        assert_eq!(config.cassette_name, "items");
        assert!(config.recording_enabled);
        assert!(config.headers_to_check.is_empty());
        assert_eq!(config.fixture_dir(), Path::new("/tmp/cassettes"));
        assert_eq!(
            config.output_path(),
            PathBuf::from("/tmp/cassettes/items.json")
        );
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            cassette_name = "auth_flow"
            output_dir = "/tmp/out"
            fixture_dir = "tests/fixtures"
            recording_enabled = false
            headers_to_check = ["Authorization"]
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert!(!config.recording_enabled);
        assert_eq!(config.headers_to_check, vec!["Authorization".to_string()]);
        assert_eq!(config.fixture_dir(), Path::new("tests/fixtures"));
    }

    #[test]
    fn test_invalid_config_bad_name() {
        let config = SessionConfig::new("../escape", "/tmp");
        assert!(matches!(
            config.validate(),
            Err(DvrError::InvalidCassetteName(_))
        ));
    }

    #[test]
    fn test_invalid_config_blank_header() {
        let config = SessionConfig::new("items", "/tmp").with_headers_to_check(["Authorization", " "]);
        assert!(matches!(config.validate(), Err(DvrError::ConfigError(_))));
    }

    #[test]
    fn test_validate_cassette_name() {
        assert!(validate_cassette_name("valid_cassette").is_ok());
        assert!(validate_cassette_name("items-123").is_ok());
        assert!(validate_cassette_name("Items_Name_123").is_ok());

        assert!(validate_cassette_name("").is_err());
        assert!(validate_cassette_name(".hidden").is_err());
        assert!(validate_cassette_name("items/path").is_err());
        assert!(validate_cassette_name("items\\path").is_err());
        assert!(validate_cassette_name("items..name").is_err());
        assert!(validate_cassette_name("items\0name").is_err());
        assert!(validate_cassette_name(&"x".repeat(256)).is_err());
    }
}
