// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use super::error::ConfigError;

/// Where the relay's YAML comes from.
///
/// The binary reads a file; tests hand the loader an inline document.
pub trait ConfigSource {
    /// Human-readable origin, used in error messages and startup logs.
    fn origin(&self) -> String;

    fn load(&self) -> Result<String, ConfigError>;
}

pub struct FileSource {
    pub path: PathBuf,
}

impl ConfigSource for FileSource {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            origin: self.origin(),
            source,
        })
    }
}

/// Inline YAML. Used by tests.
pub struct StringSource {
    pub content: String,
}

impl ConfigSource for StringSource {
    fn origin(&self) -> String {
        "<inline>".to_string()
    }

    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}
