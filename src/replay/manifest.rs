use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::error::ManifestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOrigin {
    Directory,
    ListFile,
    Missing,
}

/// Ordered list of input files, built once per source.
#[derive(Debug, Clone)]
pub struct FileManifest {
    origin: ManifestOrigin,
    paths: Vec<PathBuf>,
}

impl FileManifest {
    pub fn empty() -> Self {
        Self {
            origin: ManifestOrigin::Missing,
            paths: Vec::new(),
        }
    }

    /// Directory listings come back sorted by file name and prefixed with
    /// `source`. List files keep their line order; relative lines resolve
    /// against the list file's own directory.
    pub fn resolve<P: AsRef<Path>>(source: P) -> Result<Self, ManifestError> {
        let source = source.as_ref();
        if source.is_dir() {
            if let Ok(paths) = read_directory(source) {
                return Ok(Self {
                    origin: ManifestOrigin::Directory,
                    paths,
                });
            }
        }
        if source.is_file() {
            let paths = read_list_file(source)?;
            return Ok(Self {
                origin: ManifestOrigin::ListFile,
                paths,
            });
        }
        Err(ManifestError::NotFound(source.to_path_buf()))
    }

    /// Resolves `source`, reporting a missing source and falling back to an
    /// empty manifest so the run proceeds with zero entries.
    pub fn resolve_or_empty<P: AsRef<Path>>(source: P, what: &str) -> Self {
        let source = source.as_ref();
        match Self::resolve(source) {
            Ok(manifest) => {
                let kind = match manifest.origin {
                    ManifestOrigin::Directory => "folder",
                    _ => "file",
                };
                info!(
                    "found {} {} files in {} {}",
                    manifest.len(),
                    what,
                    kind,
                    source.display()
                );
                manifest
            }
            Err(e) => {
                warn!("could not load {} file list ({}), wrong path / file?", what, e);
                Self::empty()
            }
        }
    }

    pub fn origin(&self) -> ManifestOrigin {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

fn read_directory(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    // read_dir never yields "." or ".."
    let mut names = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect::<Vec<_>>();
    names.sort();

    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

fn read_list_file(source: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let content = fs::read_to_string(source).map_err(|e| ManifestError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;
    let prefix = source.parent().unwrap_or_else(|| Path::new(""));

    let paths = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = Path::new(line);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                prefix.join(path)
            }
        })
        .collect();

    Ok(paths)
}
