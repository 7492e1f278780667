//! # Class Labels

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered class names; a class index is its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    /// Build from names, rejecting duplicates and empty lists.
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> anyhow::Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            bail!("At least one class label is required");
        }
        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                bail!("Duplicate class label: {name}");
            }
        }
        Ok(Self { names })
    }

    /// Discover labels from the sub-directories of `root`, sorted by name.
    pub fn discover<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let entries = std::fs::read_dir(root)
            .with_context(|| format!("reading class directories under {}", root.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();

        if names.is_empty() {
            bail!("No class directories found under {}", root.display());
        }
        Self::new(names)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; a label set has at least one class.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Class index of `name`.
    pub fn index_of(
        &self,
        name: &str,
    ) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Class name at `index`.
    pub fn name_of(
        &self,
        index: usize,
    ) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Class names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
