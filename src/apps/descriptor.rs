//! App descriptors and catalog keys

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Separator between package name and version in a catalog key
pub const VERSION_SEPARATOR: char = ':';

/// Catalog key of the form `basePackage:version`
///
/// A key coming from a client may also be a bare package name or an
/// uncatalogued identifier passed through together with a launch activity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppKey(String);

impl AppKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a key from its parts
    pub fn from_parts(base_package: &str, version: &str) -> Self {
        Self(format!("{base_package}{VERSION_SEPARATOR}{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Package part of the key
    pub fn package(&self) -> &str {
        match self.0.split_once(VERSION_SEPARATOR) {
            Some((package, _)) => package,
            None => &self.0,
        }
    }

    /// Version part of the key, if it carries one
    pub fn version(&self) -> Option<&str> {
        self.0.split_once(VERSION_SEPARATOR).map(|(_, v)| v)
    }

    pub fn has_version(&self) -> bool {
        self.0.contains(VERSION_SEPARATOR)
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An installable application version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Manifest package name
    pub base_package: String,

    /// Manifest version name, compared as an opaque string
    pub version: String,

    /// Where the binary lives on disk
    pub source_path: PathBuf,

    /// Launchable activity from the manifest
    #[serde(default)]
    pub main_activity: Option<String>,
}

impl AppDescriptor {
    pub fn new(
        base_package: impl Into<String>,
        version: impl Into<String>,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_package: base_package.into(),
            version: version.into(),
            source_path: source_path.into(),
            main_activity: None,
        }
    }

    pub fn with_main_activity(mut self, activity: impl Into<String>) -> Self {
        self.main_activity = Some(activity.into());
        self
    }

    pub fn key(&self) -> AppKey {
        AppKey::from_parts(&self.base_package, &self.version)
    }
}
