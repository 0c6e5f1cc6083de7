//! Infrastructure implementation of the `DesiredConfig` port.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::DesiredConfig;
use crate::domain::DesiredSpec;
use crate::domain::config::ClusterDocument;

/// Desired state read from a YAML file on disk.
pub struct YamlDesiredConfig {
    path: PathBuf,
}

impl YamlDesiredConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DesiredConfig for YamlDesiredConfig {
    fn load(&self) -> Result<DesiredSpec> {
        let path = &self.path;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let doc: ClusterDocument = serde_yaml::from_str(&content)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        DesiredSpec::from_document(doc).with_context(|| format!("invalid {}", path.display()))
    }
}
