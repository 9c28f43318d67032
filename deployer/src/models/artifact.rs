//! Deployable artifact

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;

/// A local file staged for a single remote pull.
///
/// The pull name is the file name without its extension. It is kept decoded
/// here; the file server percent-encodes it as one URL path segment.
#[derive(Debug, Clone)]
pub struct Artifact {
    file: File,
    name: String,
    size: u64,
    sha256: String,
}

impl Artifact {
    /// Resolve and validate an artifact on disk.
    ///
    /// Fails with a configuration error if the path does not exist, is not a
    /// regular file, cannot be read, or has no usable base name.
    pub async fn stage(path: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let file = File::new(path);

        if !file.is_file().await {
            return Err(DeployError::Configuration(format!(
                "artifact {} does not exist or is not a regular file",
                file.path().display()
            )));
        }

        let name = pull_name(file.path())?;

        let size = file.len().await.map_err(|e| unreadable(&file, e))?;
        let sha256 = file.sha256().await.map_err(|e| unreadable(&file, e))?;

        debug!(
            "Staged artifact {} as '{}' ({} bytes, sha256 {})",
            file.path().display(),
            name,
            size,
            sha256
        );

        Ok(Self {
            file,
            name,
            size,
            sha256,
        })
    }

    /// Local path of the artifact
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Backing file
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Decoded pull name (base name without extension)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes at staging time
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex sha256 digest at staging time
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

fn unreadable(file: &File, err: DeployError) -> DeployError {
    DeployError::Configuration(format!(
        "artifact {} is not readable: {}",
        file.path().display(),
        err
    ))
}

/// Derive the pull name of an artifact path
pub fn pull_name(path: &Path) -> Result<String, DeployError> {
    let stem = path
        .file_stem()
        .ok_or_else(|| {
            DeployError::Configuration(format!("artifact {} has no file name", path.display()))
        })?
        .to_str()
        .ok_or_else(|| {
            DeployError::Configuration(format!(
                "artifact name {} is not valid UTF-8",
                path.display()
            ))
        })?;

    if stem.is_empty() {
        return Err(DeployError::Configuration(format!(
            "artifact {} has an empty base name",
            path.display()
        )));
    }
    // Dot segments are dropped from URL paths and could never be pulled
    if stem == "." || stem == ".." {
        return Err(DeployError::Configuration(format!(
            "artifact {} has base name '{}', which cannot be served",
            path.display(),
            stem
        )));
    }

    Ok(stem.to_string())
}
