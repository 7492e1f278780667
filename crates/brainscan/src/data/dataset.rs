//! # Labelled Image Directories
//!
//! A dataset root holds one sub-directory per class:
//!
//! ```text
//! data/Training/
//!   glioma_tumor/*.jpg
//!   meningioma_tumor/*.jpg
//!   no_tumor/*.jpg
//!   pituitary_tumor/*.jpg
//! ```
//!
//! Class directories are searched recursively and the resulting file list is
//! handed to burn's [`ImageFolderDataset`] under a fixed class order. Files
//! with an unsupported extension, or that fail to decode, are skipped with a
//! warning at scan time.

use crate::data::labels::ClassLabels;
use anyhow::{Context, anyhow};
use burn::data::dataset::Dataset;
use burn::data::dataset::vision::{ImageDatasetItem, ImageFolderDataset};
use globwalk::GlobWalkerBuilder;
use std::path::{Path, PathBuf};

/// Image file extensions the loader accepts; matched case-sensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["bmp", "jpg", "jpeg", "png"];

/// One labelled image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    /// Image file path.
    pub path: PathBuf,

    /// Class index.
    pub label: usize,
}

/// A class-per-directory image dataset.
pub struct ImageDirectoryDataset {
    labels: ClassLabels,
    items: Vec<ImageItem>,
    images: ImageFolderDataset,
}

impl ImageDirectoryDataset {
    /// Scan `root`, taking the class list from its sorted sub-directories.
    pub fn discover<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let labels = ClassLabels::discover(root.as_ref())?;
        Self::with_labels(root, labels)
    }

    /// Scan `root` against a fixed class list.
    ///
    /// Sub-directories that are not in `labels` are skipped; classes with no
    /// directory contribute no items.
    pub fn with_labels<P: AsRef<Path>>(
        root: P,
        labels: ClassLabels,
    ) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            anyhow::bail!("Dataset directory not found: {}", root.display());
        }

        let present = ClassLabels::discover(&root).ok();
        if let Some(present) = &present {
            for name in present.names() {
                if labels.index_of(name).is_none() {
                    tracing::warn!(directory = %root.join(name).display(), "skipping unknown class directory");
                }
            }
        }

        let mut items = Vec::new();
        for (label, name) in labels.names().iter().enumerate() {
            let class_dir = root.join(name);
            if !class_dir.is_dir() {
                tracing::warn!(class = %name, root = %root.display(), "class has no directory");
                continue;
            }
            items.extend(
                scan_class_dir(&class_dir)?
                    .into_iter()
                    .map(|path| ImageItem { path, label }),
            );
        }

        let images = ImageFolderDataset::new_classification_with_items(
            items
                .iter()
                .map(|item| (item.path.clone(), labels.names()[item.label].clone()))
                .collect(),
            labels.names(),
        )
        .map_err(|err| anyhow!("indexing {}: {err}", root.display()))?;

        tracing::debug!(root = %root.display(), items = items.len(), "scanned image directory");

        Ok(Self {
            labels,
            items,
            images,
        })
    }

    /// The class labels.
    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// All files, in label then path order.
    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    /// Number of items per class, in label order.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.labels.len()];
        for item in &self.items {
            counts[item.label] += 1;
        }
        counts
    }
}

impl Dataset<ImageDatasetItem> for ImageDirectoryDataset {
    fn get(
        &self,
        index: usize,
    ) -> Option<ImageDatasetItem> {
        self.images.get(index)
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

fn has_supported_extension(path: &Path) -> bool {
    let supported = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext));
    if !supported {
        tracing::warn!(path = %path.display(), "skipping file with unsupported extension");
    }
    supported
}

fn is_decodable(path: &Path) -> bool {
    match image::open(path) {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "skipping unreadable image");
            false
        }
    }
}

/// List the decodable image files under `class_dir`, sorted.
fn scan_class_dir(class_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let walker = GlobWalkerBuilder::from_patterns(class_dir, &["**/*"])
        .follow_links(true)
        .build()
        .with_context(|| format!("scanning {}", class_dir.display()))?;

    let mut paths = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => paths.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(directory = %class_dir.display(), error = %err, "skipping unreadable directory entry");
            }
        }
    }

    paths.sort();
    paths.retain(|path| has_supported_extension(path) && is_decodable(path));
    Ok(paths)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::data::dataset::vision::Annotation;
    use image::{Rgb, RgbImage};

    /// Write a solid color png.
    pub(crate) fn write_png(
        path: &Path,
        size: u32,
        color: [u8; 3],
    ) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(size, size, Rgb(color))
            .save(path)
            .unwrap();
    }

    /// Build a two-class tree: `dark/` (black) and `light/` (white) images.
    pub(crate) fn write_two_class_tree(
        root: &Path,
        per_class: usize,
    ) {
        for idx in 0..per_class {
            write_png(&root.join("dark").join(format!("{idx}.png")), 12, [0, 0, 0]);
            write_png(&root.join("light").join(format!("{idx}.png")), 12, [255, 255, 255]);
        }
    }

    #[test]
    fn test_discover() {
        let root = tempfile::tempdir().unwrap();
        write_two_class_tree(root.path(), 3);
        write_png(&root.path().join("light/nested/deep.png"), 8, [200, 200, 200]);
        write_png(&root.path().join("light/upper.PNG"), 8, [200, 200, 200]);
        std::fs::write(root.path().join("dark/notes.txt"), b"ignore me").unwrap();
        std::fs::write(root.path().join("dark/broken.png"), b"not a png").unwrap();
        std::fs::write(root.path().join("dark/README"), b"no extension").unwrap();

        let dataset = ImageDirectoryDataset::discover(root.path()).unwrap();

        assert_eq!(dataset.labels().names(), &["dark", "light"]);
        assert_eq!(dataset.len(), 7);
        assert_eq!(dataset.class_counts(), vec![3, 4]);

        let first = &dataset.items()[0];
        assert_eq!(first.label, 0);
        assert!(first.path.ends_with("dark/0.png"));
        assert!(dataset.items().iter().any(|item| item.path.ends_with("nested/deep.png")));
        assert!(!dataset.items().iter().any(|item| item.path.ends_with("upper.PNG")));

        let decoded = dataset.get(0).unwrap();
        assert_eq!(decoded.annotation, Annotation::Label(0));
        assert_eq!((decoded.image_width, decoded.image_height), (12, 12));
        assert_eq!(decoded.image.len(), 12 * 12 * 3);
        assert!(decoded.image_path.ends_with("0.png"));
        assert!(dataset.get(7).is_none());
    }

    #[test]
    fn test_with_labels_uses_fixed_order() {
        let root = tempfile::tempdir().unwrap();
        write_two_class_tree(root.path(), 2);
        write_png(&root.path().join("extra/0.png"), 4, [1, 2, 3]);

        let labels = ClassLabels::new(["light", "dark", "absent"]).unwrap();
        let dataset = ImageDirectoryDataset::with_labels(root.path(), labels).unwrap();

        assert_eq!(dataset.class_counts(), vec![2, 2, 0]);
        assert_eq!(dataset.items()[0].label, 0);
        assert!(dataset.items()[0].path.starts_with(root.path().join("light")));
        assert_eq!(dataset.get(0).unwrap().annotation, Annotation::Label(0));
        assert_eq!(dataset.get(2).unwrap().annotation, Annotation::Label(1));
    }

    #[test]
    fn test_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let labels = ClassLabels::new(["a"]).unwrap();
        assert!(ImageDirectoryDataset::with_labels(root.path().join("nope"), labels).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_walk_errors() {
        let root = tempfile::tempdir().unwrap();
        write_two_class_tree(root.path(), 2);
        // A symlink cycle makes the recursive walk yield an error entry.
        std::os::unix::fs::symlink(root.path().join("dark"), root.path().join("dark/cycle"))
            .unwrap();

        let dataset = ImageDirectoryDataset::discover(root.path()).unwrap();
        assert_eq!(dataset.class_counts(), vec![2, 2]);
    }
}
