//! # Disk Cache
//!
//! Resources are addressed by a resource key (a list of path segments)
//! under a cache root directory, and downloaded on first use.

use anyhow::{Context, bail};
use burn::config::Config;
use burn::data::network::downloader;
use std::fs::{File, remove_file};
use std::io::{ErrorKind, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

/// Disk cache policy.
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Key for the root cache directory, under `$HOME/.cache`.
    #[config(default = "\"brainscan\".to_string()")]
    pub root_cache_key: String,

    /// Explicit cache root; overrides `$HOME/.cache/{root_cache_key}`.
    #[config(default = "None")]
    pub cache_dir: Option<String>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, does not create it.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(PathBuf::from(dir));
        }
        match dirs::home_dir() {
            Some(home) => Ok(home.join(".cache").join(&self.root_cache_key)),
            None => bail!("Unable to locate the home directory for the weights cache"),
        }
    }

    /// Map a resource key to a cache path.
    ///
    /// Does not ensure that the path (or any of the parents) exist.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.base_cache_dir()?;
        Ok(resource_key.iter().fold(path, |acc, s| acc.join(s)))
    }

    /// Map a resource key to a cache path and ensure the parent directory exists.
    pub fn ensure_resource_parent_dir(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.resource_to_path(resource_key)?;
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating cache directory {}", parent.display()))?;
            }
        }
        Ok(path)
    }

    /// Fetch a resource to the cache.
    ///
    /// # Returns
    ///
    /// The cache path.
    pub fn fetch_resource(
        &self,
        url: &str,
        resource: &[String],
    ) -> anyhow::Result<PathBuf> {
        let cache_file_path = self.ensure_resource_parent_dir(resource)?;
        try_cache_download_to_path(url, cache_file_path)
    }
}

/// Download a URL into memory.
///
/// The burn downloader panics on network errors; the panic is converted
/// into an error here.
pub fn download_bytes(
    url: &str,
    message: &str,
) -> anyhow::Result<Vec<u8>> {
    match catch_unwind(AssertUnwindSafe(|| {
        downloader::download_file_as_bytes(url, message)
    })) {
        Ok(bytes) => Ok(bytes),
        Err(_) => bail!("Failed to download {url}"),
    }
}

/// Download a URL resource to a given path.
///
/// If the path already exists, does nothing.
///
/// # Returns
///
/// The cache path.
pub fn try_cache_download_to_path(
    url: &str,
    cache_file_path: PathBuf,
) -> anyhow::Result<PathBuf> {
    if !cache_file_path.exists() {
        let file_name = match cache_file_path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => bail!("Cache path has no file name: {}", cache_file_path.display()),
        };

        tracing::info!(url, path = %cache_file_path.display(), "downloading to cache");
        let bytes = download_bytes(url, &file_name)?;

        write_cache_file(&cache_file_path, &bytes)?;
    }

    Ok(cache_file_path)
}

/// Write `bytes` to `path` through a ``.part`` sibling.
///
/// The final path only ever holds a complete file; on failure the partial
/// file is removed.
fn write_cache_file(
    path: &Path,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let result = File::create(&partial)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&partial, path));

    if let Err(err) = result {
        match remove_file(&partial) {
            Err(remove_err) if remove_err.kind() != ErrorKind::NotFound => {
                tracing::warn!(path = %partial.display(), error = %remove_err, "failed to remove partial download");
            }
            _ => {}
        }
        return Err(err).with_context(|| format!("writing {}", path.display()));
    }
    Ok(())
}
