// File: src/config.rs
//
// `ardan.json` resolution. CLI flags always win over the file; this is only
// consulted when no mode flag names a file directly (see `main.rs`'s
// argument handling).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{ArdanError, ErrorKind};

/// Flat key/value project file. `#[serde(flatten)]` keeps unrecognized keys
/// around instead of rejecting the file, so a future key addition here
/// doesn't break projects written against an older schema.
#[derive(Debug, Deserialize)]
pub struct ArdanConfig {
    pub main: PathBuf,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ArdanConfig {
    /// Loads `ardan.json` from `dir`, resolving `main` relative to that
    /// directory.
    pub fn load(dir: &Path) -> Result<Self, ArdanError> {
        let path = dir.join("ardan.json");
        let text = fs::read_to_string(&path)
            .map_err(|e| ArdanError::new(ErrorKind::MalformedBytecode, format!("reading {}: {e}", path.display())))?;
        let mut config: ArdanConfig = serde_json::from_str(&text)
            .map_err(|e| ArdanError::new(ErrorKind::MalformedBytecode, format!("parsing {}: {e}", path.display())))?;
        if config.main.is_relative() {
            config.main = dir.join(&config.main);
        }
        Ok(config)
    }

    /// Looks for `ardan.json` in the current working directory, if any.
    pub fn discover() -> Option<Self> {
        let cwd = std::env::current_dir().ok()?;
        if !cwd.join("ardan.json").exists() {
            return None;
        }
        ArdanConfig::load(&cwd).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_main_path_relative_to_config_dir() {
        let dir = std::env::temp_dir().join(format!("ardan_config_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut file = fs::File::create(dir.join("ardan.json")).unwrap();
        write!(file, r#"{{"main": "src/entry.ardan"}}"#).unwrap();

        let config = ArdanConfig::load(&dir).unwrap();
        assert_eq!(config.main, dir.join("src/entry.ardan"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn keeps_unknown_keys_in_extra() {
        let dir = std::env::temp_dir().join(format!("ardan_config_extra_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut file = fs::File::create(dir.join("ardan.json")).unwrap();
        write!(file, r#"{{"main": "a.ardan", "name": "demo"}}"#).unwrap();

        let config = ArdanConfig::load(&dir).unwrap();
        assert_eq!(config.extra.get("name").and_then(|v| v.as_str()), Some("demo"));

        fs::remove_dir_all(&dir).ok();
    }
}
