//! # Image Sources

use crate::cache::disk::download_bytes;
use anyhow::{Context, anyhow};
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Where to read an image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An ``http://`` or ``https://`` URL.
    Url(String),

    /// A local file; ``file://`` URLs are reduced to their decoded path.
    Path(PathBuf),
}

impl ImageSource {
    /// Classify a location string.
    ///
    /// ``file://`` URLs may name no host or ``localhost``; their path is
    /// percent-decoded. Anything that is not a URL is a filesystem path.
    pub fn parse(location: &str) -> anyhow::Result<Self> {
        let location = location.trim();
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Url(location.to_string()))
        } else if lower.starts_with("file://") {
            let url = Url::parse(location).with_context(|| format!("invalid file URL {location}"))?;
            let path = url
                .to_file_path()
                .map_err(|()| anyhow!("file URL does not name a local path: {location}"))?;
            Ok(Self::Path(path))
        } else {
            Ok(Self::Path(PathBuf::from(location)))
        }
    }

    /// Read the raw (encoded) image bytes.
    pub fn fetch_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            Self::Url(url) => {
                tracing::info!(url = %url, "fetching image");
                download_bytes(url, "image")
            }
            Self::Path(path) => {
                tracing::debug!(path = %path.display(), "reading image");
                std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
            }
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}
