//! Model configuration file.
//!
//! A config is a plain-text `key=value` file. Empty lines and lines starting
//! with `#` are ignored. File-path values are resolved relative to the
//! directory containing the config file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    values: HashMap<String, String>,
    dir: PathBuf,
    path: PathBuf,
}

impl Config {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        let mut values = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::corruption(path, format!("line {}: expected key=value", lineno + 1))
            })?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(Config {
            values,
            dir,
            path: path.to_path_buf(),
        })
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value of `key` as a path, resolved against the config directory.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.values.get(key).map(|v| self.dir.join(v))
    }

    /// Like [`Config::path`] but missing keys are a corruption error naming
    /// the config file.
    pub fn require_path(&self, key: &str) -> Result<PathBuf> {
        self.path(key)
            .ok_or_else(|| Error::corruption(&self.path, format!("missing key '{}'", key)))
    }

    pub fn require_int(&self, key: &str) -> Result<i32> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| Error::corruption(&self.path, format!("missing key '{}'", key)))?;
        value.parse().map_err(|_| {
            Error::corruption(&self.path, format!("key '{}': not an integer: {}", key, value))
        })
    }

    pub fn int_or(&self, key: &str, default: i32) -> Result<i32> {
        match self.values.get(key) {
            None => Ok(default),
            Some(_) => self.require_int(key),
        }
    }
}
