//! Application revision read from the `REVISION` file in the config root.
//!
//! The file is expected to be written at build time (typically the latest git
//! commit hash) and shipped with the deployment, so health-check endpoints can
//! report which build is running.

use crate::error::MqError;
use crate::fsloader::ByteLoader;
use std::fmt;

/// Name of the file holding the revision id.
pub const REVISION_FILE: &str = "REVISION";

/// Contents of the `REVISION` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppRevision(Vec<u8>);

impl AppRevision {
    /// Loads `REVISION` from the config root.
    pub fn load() -> Result<Self, MqError> {
        Self::load_with(&ByteLoader::new())
    }

    pub fn load_with(loader: &ByteLoader) -> Result<Self, MqError> {
        let bytes = loader.load(REVISION_FILE)?;
        Ok(Self(bytes))
    }

    /// `revision: {content}`, ready to be written to a response body.
    pub fn message(&self) -> Vec<u8> {
        let mut msg = b"revision: ".to_vec();
        msg.extend_from_slice(&self.0);
        msg
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for AppRevision {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for AppRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
