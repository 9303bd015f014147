//! Persisted-config surface (§4.3.4, §6).
//!
//! The gateway-app glue owns argument parsing and logger setup; this
//! module only exposes the *typed* pieces that glue code needs to
//! construct to drive [`crate::nm::NodeManager`]'s persistence and EIA's
//! schedule store, mirroring the way `Session::new` is the one entry
//! point external code builds against.

use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, InternalErrorKind, Result};

/// Two-arg startup surface (§4.5 "CLI / env").
#[derive(Clone, Debug)]
pub struct GatewayPaths {
    /// Read-only factory-default config.
    pub factory_config: PathBuf,
    /// Directory holding the mutable runtime config document.
    pub runtime_config_dir: PathBuf,
}

impl GatewayPaths {
    pub fn new(factory_config: impl Into<PathBuf>, runtime_config_dir: impl Into<PathBuf>) -> Self {
        Self { factory_config: factory_config.into(), runtime_config_dir: runtime_config_dir.into() }
    }

    /// Where the mutable runtime document lives, given a fixed file name.
    pub fn runtime_config_file(&self, name: &str) -> PathBuf {
        self.runtime_config_dir.join(name)
    }
}

/// Persistence back end for the `nodes` / `prop_schedules` / `gateway_schedules`
/// document (§6). The gateway-app glue picks the concrete storage; this
/// crate only needs `load`/`save` of the whole document as one JSON value.
pub trait ConfigStore: Send {
    fn load(&self) -> Result<serde_json::Value>;
    fn save(&self, doc: &serde_json::Value) -> Result<()>;
}

/// Reference [`ConfigStore`] backed by a single JSON file, used by tests
/// and as the default for simple deployments.
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The document shape §6 names: `nodes` plus the two schedule keys.
pub fn empty_document() -> serde_json::Value {
    serde_json::json!({ "nodes": [], "prop_schedules": [], "gateway_schedules": [] })
}

impl ConfigStore for JsonFileConfigStore {
    fn load(&self) -> Result<serde_json::Value> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(Error::from),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(empty_document()),
            Err(err) => Err(Error::from(err)),
        }
    }

    fn save(&self, doc: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|err| Error::with_message(ErrorKind::Internal(InternalErrorKind::Persistence(err.to_string())), "config rename failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_empty_document() {
        let store = JsonFileConfigStore::new("/nonexistent/path/for/this/test.json");
        let doc = store.load().unwrap();
        assert_eq!(doc, empty_document());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!("gwcore-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileConfigStore::new(dir.join("config.json"));
        let doc = serde_json::json!({ "nodes": [{"address": "AA"}], "prop_schedules": [], "gateway_schedules": [] });
        store.save(&doc).unwrap();
        assert_eq!(store.load().unwrap(), doc);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn gateway_paths_join_runtime_file() {
        let paths = GatewayPaths::new("/etc/gw/factory.json", "/var/lib/gw");
        assert_eq!(paths.runtime_config_file("config.json"), PathBuf::from("/var/lib/gw/config.json"));
    }
}
