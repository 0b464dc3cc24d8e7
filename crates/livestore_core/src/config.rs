//! Engine configuration.

use livestore_storage::{PrimaryBackend, SqliteBackend, StorageResult};
use std::path::PathBuf;
use std::sync::Arc;

/// Which primary backend to connect at open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryConfig {
    /// No primary: the engine runs in fallback mode.
    None,
    /// SQLite database file.
    Sqlite(PathBuf),
    /// Private in-memory SQLite database.
    SqliteInMemory,
}

impl PrimaryConfig {
    /// Connects the configured backend.
    ///
    /// Returns `Ok(None)` when no primary is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    pub fn connect(&self) -> StorageResult<Option<Arc<dyn PrimaryBackend>>> {
        let backend: Arc<dyn PrimaryBackend> = match self {
            PrimaryConfig::None => return Ok(None),
            PrimaryConfig::Sqlite(path) => Arc::new(SqliteBackend::open(path)?),
            PrimaryConfig::SqliteInMemory => Arc::new(SqliteBackend::open_in_memory()?),
        };
        Ok(Some(backend))
    }
}

/// Configuration for opening a persistence engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the fallback JSON document.
    pub fallback_path: PathBuf,

    /// Primary backend to connect.
    pub primary: PrimaryConfig,

    /// Whether to probe the primary at open (if false, a configured primary
    /// is assumed healthy).
    pub probe_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fallback_path: PathBuf::from("livestore-fallback.json"),
            primary: PrimaryConfig::None,
            probe_on_open: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback document path.
    #[must_use]
    pub fn fallback_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_path = path.into();
        self
    }

    /// Uses a SQLite file as the primary.
    #[must_use]
    pub fn sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.primary = PrimaryConfig::Sqlite(path.into());
        self
    }

    /// Sets the primary backend.
    #[must_use]
    pub fn primary(mut self, primary: PrimaryConfig) -> Self {
        self.primary = primary;
        self
    }

    /// Sets whether to probe the primary at open.
    #[must_use]
    pub const fn probe_on_open(mut self, value: bool) -> Self {
        self.probe_on_open = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.primary, PrimaryConfig::None);
        assert!(config.probe_on_open);
        assert!(PrimaryConfig::None.connect().unwrap().is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .fallback_path("/tmp/doc.json")
            .sqlite("/tmp/primary.db")
            .probe_on_open(false);

        assert_eq!(config.fallback_path, PathBuf::from("/tmp/doc.json"));
        assert_eq!(
            config.primary,
            PrimaryConfig::Sqlite(PathBuf::from("/tmp/primary.db"))
        );
        assert!(!config.probe_on_open);
    }

    #[test]
    fn in_memory_primary_connects() {
        assert!(PrimaryConfig::SqliteInMemory.connect().unwrap().is_some());
    }
}
