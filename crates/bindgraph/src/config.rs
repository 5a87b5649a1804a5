use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bindgraph_store::{SqliteBindStore, DEFAULT_BUSY_TIMEOUT};
use bindgraph_types::ResourceId;

use crate::error::{GraphError, GraphResult};

/// Configuration of a [`BindGraph`](crate::BindGraph) and its sweeper.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Collection that absolute paths start from.
    pub root_collection: ResourceId,
    /// Breadth-first rounds a shortest-path search may run before giving up.
    /// `None` searches until the graph is exhausted.
    pub max_search_rounds: Option<usize>,
    /// Reject binds and rebinds that would place a collection beneath itself.
    pub reject_cycles: bool,
    /// Queue possibly orphaned resources for a sweeper. When off, unbind and
    /// replacing rebind reclaim unreachable resources, and the subtrees they
    /// strand, in their own transaction.
    pub deferred_cleanup: bool,
    /// How long an idle sweeper sleeps before polling the queue again.
    pub sweep_interval_ms: u64,
    /// Most cleanup requests one `drain` pass handles.
    pub sweep_batch: usize,
    /// SQLite backend settings.
    pub sqlite: SqliteConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            root_collection: ResourceId::ROOT,
            max_search_rounds: None,
            reject_cycles: false,
            deferred_cleanup: true,
            sweep_interval_ms: 1_000,
            sweep_batch: 256,
            sqlite: SqliteConfig::default(),
        }
    }
}

impl GraphConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> GraphResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> GraphResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> GraphResult<String> {
        toml::to_string_pretty(self).map_err(|e| GraphError::Config(e.to_string()))
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.root_collection.is_none() {
            return Err(GraphError::Config("root_collection must not be 0".into()));
        }
        if self.max_search_rounds == Some(0) {
            return Err(GraphError::Config("max_search_rounds must be at least 1".into()));
        }
        if self.sweep_batch == 0 {
            return Err(GraphError::Config("sweep_batch must be at least 1".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Where and how to open the SQLite database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: PathBuf,
    /// How long a writer waits for another connection's lock.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bindgraph.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SqliteConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Open (creating if needed) the configured database.
    pub fn open(&self) -> GraphResult<SqliteBindStore> {
        Ok(SqliteBindStore::open_with(&self.path, self.busy_timeout())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = GraphConfig::default();
        assert_eq!(c.root_collection, ResourceId::ROOT);
        assert_eq!(c.max_search_rounds, None);
        assert!(!c.reject_cycles);
        assert!(c.deferred_cleanup);
        assert_eq!(c.sweep_interval(), Duration::from_secs(1));
        assert_eq!(c.sweep_batch, 256);
        assert_eq!(c.sqlite.path, PathBuf::from("bindgraph.db"));
        assert_eq!(c.sqlite.busy_timeout(), Duration::from_secs(5));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(GraphConfig::from_toml_str("").unwrap(), GraphConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let c = GraphConfig::from_toml_str(
            r#"
            root_collection = 7
            max_search_rounds = 64
            reject_cycles = true
            deferred_cleanup = false

            [sqlite]
            path = "/var/lib/repo/binds.db"
            "#,
        )
        .unwrap();
        assert_eq!(c.root_collection, ResourceId::new(7));
        assert_eq!(c.max_search_rounds, Some(64));
        assert!(c.reject_cycles);
        assert!(!c.deferred_cleanup);
        assert_eq!(c.sweep_batch, 256);
        assert_eq!(c.sqlite.path, PathBuf::from("/var/lib/repo/binds.db"));
        assert_eq!(c.sqlite.busy_timeout_ms, 5_000);
    }

    #[test]
    fn invalid_values_rejected() {
        for input in [
            "root_collection = 0",
            "max_search_rounds = 0",
            "sweep_batch = 0",
            "reject_cycles = \"yes\"",
            "deferred_cleanup = 1",
            "not valid toml [",
        ] {
            let err = GraphConfig::from_toml_str(input).unwrap_err();
            assert!(matches!(err, GraphError::Config(_)), "{input}: {err}");
        }
    }

    #[test]
    fn toml_roundtrip() {
        let mut c = GraphConfig::default();
        c.max_search_rounds = Some(10);
        c.sweep_interval_ms = 250;
        let text = c.to_toml_string().unwrap();
        assert_eq!(GraphConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindgraph.toml");
        std::fs::write(&path, "sweep_batch = 8\n").unwrap();
        assert_eq!(GraphConfig::load(&path).unwrap().sweep_batch, 8);

        let missing = GraphConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, GraphError::Config(_)));
    }

    #[test]
    fn sqlite_config_opens_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig {
            path: dir.path().join("db").join("binds.db"),
            busy_timeout_ms: 100,
        };
        config.open().unwrap();
        assert!(config.path.exists());
    }
}
