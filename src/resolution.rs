use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::fusion::Resolution;

pub const DEFAULT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// An input image: identifier, location and native resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub resolution: Resolution,
}

/// Image identifier of a file name: everything before the first `.`.
pub fn image_id(file_name: &str) -> &str {
    let trimmed = file_name.trim();

    trimmed.split('.').next().unwrap_or(trimmed)
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

///
/// Image id -> native `(height, width)`, in the order images are listed.
///
/// Listing order is the file name order, so repeated runs over the same
/// directory produce identical reports.
///
#[derive(Debug, Clone, Default)]
pub struct ResolutionIndex {
    entries: Vec<ImageEntry>,
    by_id: HashMap<String, usize>,
    skipped: Vec<PathBuf>,
}

impl ResolutionIndex {
    pub fn from_entries<I: IntoIterator<Item = ImageEntry>>(entries: I) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry);
        }

        index
    }

    /// Builds the index from the images of `dir` whose extension is in
    /// `extensions`. Images that fail to decode are logged and skipped.
    pub fn from_dir<P: AsRef<Path>>(dir: P, extensions: &[String]) -> Result<Self, Error> {
        let dir = dir.as_ref();

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && has_allowed_extension(&path, extensions) {
                paths.push(path);
            } else {
                tracing::debug!(?path, "not an image, ignored");
            }
        }
        paths.sort();

        let mut index = Self::default();
        for path in paths {
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    tracing::warn!(?path, "non utf-8 file name, skipped");
                    index.skipped.push(path);
                    continue;
                }
            };

            match image::image_dimensions(&path) {
                Ok((width, height)) => {
                    tracing::debug!(%file_name, width, height, "indexed image");

                    index.insert(ImageEntry {
                        id: image_id(&file_name).to_string(),
                        file_name,
                        resolution: Resolution::new(height, width),
                        path,
                    });
                }
                Err(cause) => {
                    let err = Error::UnreadableImage { path: path.clone(), cause };
                    tracing::warn!("{}", err);
                    index.skipped.push(path);
                }
            }
        }

        tracing::info!(
            images = index.len(),
            skipped = index.skipped.len(),
            "resolution index built from {:?}",
            dir
        );

        Ok(index)
    }

    fn insert(&mut self, entry: ImageEntry) {
        if let Some(&pos) = self.by_id.get(&entry.id) {
            tracing::warn!(id = %entry.id, "duplicate image id, keeping {:?}", entry.path);
            self.entries[pos] = entry;
        } else {
            self.by_id.insert(entry.id.clone(), self.entries.len());
            self.entries.push(entry);
        }
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&ImageEntry> {
        self.by_id.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn resolution(&self, id: &str) -> Result<Resolution, Error> {
        self.get(id)
            .map(|e| e.resolution)
            .ok_or_else(|| Error::UnknownImage(id.to_string()))
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ImageEntry> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Files that matched the allow-list but could not be read.
    #[inline]
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }
}

impl<'a> IntoIterator for &'a ResolutionIndex {
    type Item = &'a ImageEntry;
    type IntoIter = std::slice::Iter<'a, ImageEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
