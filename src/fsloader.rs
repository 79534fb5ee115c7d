//! Loading config files from the filesystem.
//!
//! Files are looked up by name under a root directory. The root is taken from
//! the `OFCONFIGPATH` environment variable and falls back to the current
//! working directory when the variable is unset or empty.

use crate::error::MqError;
use serde::de::DeserializeOwned;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable holding the config root directory.
pub const CONFIG_PATH_ENV: &str = "OFCONFIGPATH";

/// Reads the raw contents of a named file.
pub trait FileReader: Send + Sync {
    fn read(&self, name: &str) -> Result<Vec<u8>, MqError>;
}

impl<F> FileReader for F
where
    F: Fn(&str) -> Result<Vec<u8>, MqError> + Send + Sync,
{
    fn read(&self, name: &str) -> Result<Vec<u8>, MqError> {
        self(name)
    }
}

/// Reads files relative to a root directory.
#[derive(Debug, Clone, Default)]
pub struct DirReader {
    root: Option<PathBuf>,
}

impl DirReader {
    /// Resolves the root from the environment on every read.
    pub fn from_env() -> Self {
        Self { root: None }
    }

    /// Reads from a fixed root directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }

    fn root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(config_root)
    }
}

impl FileReader for DirReader {
    fn read(&self, name: &str) -> Result<Vec<u8>, MqError> {
        let path = self.root().join(name);
        std::fs::read(&path).map_err(|source| MqError::Io { path, source })
    }
}

/// The directory config files are read from.
pub fn config_root() -> PathBuf {
    match env::var(CONFIG_PATH_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf()),
    }
}

/// Loads JSON files into any deserializable type.
pub struct JsonLoader {
    reader: Box<dyn FileReader>,
}

impl JsonLoader {
    pub fn new() -> Self {
        Self::with_reader(DirReader::from_env())
    }

    pub fn with_reader(reader: impl FileReader + 'static) -> Self {
        Self { reader: Box::new(reader) }
    }

    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, MqError> {
        let bytes = self.reader.read(name)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Default for JsonLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads files as raw bytes.
pub struct ByteLoader {
    reader: Box<dyn FileReader>,
}

impl ByteLoader {
    pub fn new() -> Self {
        Self::with_reader(DirReader::from_env())
    }

    pub fn with_reader(reader: impl FileReader + 'static) -> Self {
        Self { reader: Box::new(reader) }
    }

    pub fn load(&self, name: &str) -> Result<Vec<u8>, MqError> {
        self.reader.read(name)
    }
}

impl Default for ByteLoader {
    fn default() -> Self {
        Self::new()
    }
}
