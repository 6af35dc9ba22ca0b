use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_MODEL: &str = "grok-imagine";
pub const DEFAULT_DATA_DIR: &str = ".imagine";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl ClientConfig {
    /// Reads `IMAGINE_API_BASE`, `IMAGINE_API_KEY`, `IMAGINE_MODEL` and
    /// `IMAGINE_DATA_DIR`; blank values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_base: lookup("IMAGINE_API_BASE")
                .map(|value| normalize_api_base(&value))
                .unwrap_or(defaults.api_base),
            api_key: lookup("IMAGINE_API_KEY"),
            model: lookup("IMAGINE_MODEL").unwrap_or(defaults.model),
            data_dir: lookup("IMAGINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }
}

pub fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
