//! On-disk persistence for the manifest.

use super::{ProcessingManifest, MANIFEST_VERSION};
use crate::error::ManifestError;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Reads and atomically writes a manifest file
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the manifest, or `None` if it has never been written
    pub fn load(&self) -> Result<Option<ProcessingManifest>, ManifestError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ManifestError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let manifest: ProcessingManifest = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ManifestError::Corrupted {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if manifest.version > MANIFEST_VERSION {
            tracing::warn!(
                path = %self.path.display(),
                found = manifest.version,
                supported = MANIFEST_VERSION,
                "manifest written by a newer release; unknown fields are ignored"
            );
        }

        Ok(Some(manifest))
    }

    /// Load the manifest or start a new one for this source/destination pair
    pub fn load_or_create(
        &self,
        source_root: &Path,
        destination_root: &Path,
    ) -> Result<ProcessingManifest, ManifestError> {
        Ok(self.load()?.unwrap_or_else(|| {
            ProcessingManifest::new(source_root.to_path_buf(), destination_root.to_path_buf())
        }))
    }

    /// Write the manifest atomically: serialize into a temp file next to the
    /// target, sync it, then rename over the old manifest.
    pub fn save(&self, manifest: &mut ProcessingManifest) -> Result<(), ManifestError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;

        manifest.touch();
        manifest.version = manifest.version.max(MANIFEST_VERSION);

        let temp = NamedTempFile::new_in(parent).map_err(|e| self.write_error(e))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, &*manifest)
                .map_err(|e| ManifestError::Serialize(e.to_string()))?;
            writer.flush().map_err(|e| self.write_error(e))?;
        }
        temp.as_file().sync_all().map_err(|e| self.write_error(e))?;
        temp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> ManifestError {
        ManifestError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
