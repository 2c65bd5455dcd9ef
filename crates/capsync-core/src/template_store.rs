//! Template persistence in the sync directory.
//!
//! Each capability template is written to `<sync_dir>/<name>.cue`. Writes
//! overwrite any previous file of the same name; there is no versioning.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of persisted templates.
pub const TEMPLATE_EXTENSION: &str = "cue";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create sync directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write template {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid template name: {0:?}")]
    InvalidName(String),
}

/// Owns the sync directory that templates are written to.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    sync_dir: PathBuf,
}

impl TemplateStore {
    /// Relative directories are resolved against the current directory so
    /// that persisted paths are always absolute.
    pub fn new(sync_dir: impl Into<PathBuf>) -> Self {
        let sync_dir = sync_dir.into();
        let sync_dir = if sync_dir.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(&sync_dir))
                .unwrap_or(sync_dir)
        } else {
            sync_dir
        };
        Self { sync_dir }
    }

    pub fn sync_dir(&self) -> &Path {
        &self.sync_dir
    }

    /// Path a template named `name` is (or would be) persisted at.
    pub fn template_path(&self, name: &str) -> PathBuf {
        self.sync_dir.join(format!("{name}.{TEMPLATE_EXTENSION}"))
    }

    /// Write `template` for capability `name` and return the file path.
    pub fn persist(&self, name: &str, template: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;

        fs::create_dir_all(&self.sync_dir).map_err(|source| StoreError::CreateDir {
            path: self.sync_dir.clone(),
            source,
        })?;

        let path = self.template_path(name);
        write_file(&path, template.as_bytes()).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.flush()
}
