use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// JSON-object file used as a small key-value store.
///
/// Every `set` rewrites the full value of one key. Keys this instance did not
/// touch are re-read from disk before writing, so two stores sharing a file do
/// not clobber each other's keys (last writer wins per key).
#[derive(Debug, Clone)]
pub struct KvStore {
    path: PathBuf,
}

impl KvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when the key is absent or the file does not exist yet.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let Some(payload) = read_json_object(&self.path)? else {
            return Ok(None);
        };
        let Some(value) = payload.get(key) else {
            return Ok(None);
        };
        let parsed = serde_json::from_value(value.clone())
            .with_context(|| format!("invalid value under '{key}' in {}", self.path.display()))?;
        Ok(Some(parsed))
    }

    /// Writes `value` under `key`. Returns `false` when the stored value already
    /// matched and nothing was written.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<bool> {
        let snapshot = serde_json::to_value(value)?;
        let mut on_disk = read_json_object(&self.path).ok().flatten().unwrap_or_default();
        if on_disk.get(key) == Some(&snapshot) {
            return Ok(false);
        }
        on_disk.insert(key.to_string(), snapshot);
        write_json_object(&self.path, &on_disk)?;
        Ok(true)
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(Some(map)),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}
