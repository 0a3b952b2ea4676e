//! Directory dataset: `images/<stem>.<ext>` paired with `labels/<stem>.txt`.
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// One image file and where its label file would be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub index: usize,
    pub name: String,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

/// A loaded sample: the page raster and its raw label text.
#[derive(Debug, Clone)]
pub struct Sample {
    pub index: usize,
    pub name: String,
    pub image: RgbImage,
    pub raw_label: String,
}

#[derive(Debug, Clone)]
pub struct ImageLabelDataset {
    root: PathBuf,
    entries: Vec<DatasetEntry>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl ImageLabelDataset {
    /// Indexes `root/images` in sorted filename order, so sample indices are
    /// stable across runs.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let images_dir = root.join("images");
        let labels_dir = root.join("labels");
        if !images_dir.is_dir() {
            anyhow::bail!("dataset {} has no images/ directory", root.display());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&images_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("failed to list {}", images_dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image(path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping image with non UTF-8 name");
                continue;
            };
            entries.push(DatasetEntry {
                index: entries.len(),
                name: stem.to_string(),
                image_path: path.to_path_buf(),
                label_path: labels_dir.join(format!("{stem}.txt")),
            });
        }

        tracing::debug!(root = %root.display(), samples = entries.len(), "indexed dataset");
        Ok(Self { root, entries })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    /// Keeps only the first `limit` entries.
    pub fn truncate(&mut self, limit: usize) {
        self.entries.truncate(limit);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetEntry> {
        self.entries.iter()
    }
}

impl DatasetEntry {
    /// Decodes the image and reads the label file. A missing label file means
    /// the page has no boxes.
    pub fn load(&self) -> Result<Sample> {
        let image = image::open(&self.image_path)
            .with_context(|| format!("failed to decode {}", self.image_path.display()))?
            .to_rgb8();
        let raw_label = match std::fs::read_to_string(&self.label_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.label_path.display()));
            }
        };
        Ok(Sample {
            index: self.index,
            name: self.name.clone(),
            image,
            raw_label,
        })
    }
}
