use std::{marker::PhantomData, path::{Path, PathBuf}};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::errors::ServiceError;

/// A single JSON document on disk, read and rewritten as a whole.
///
/// Writes go to a sibling `*.tmp` file that is then renamed over the target,
/// so a reader never observes a half-written document.
#[derive(Clone, Debug)]
pub struct JsonDocument<T> {
    file_path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { file_path: path.into(), _marker: PhantomData }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Read and parse the document. Missing files and bad JSON are both errors;
    /// callers decide whether to fall back to a default.
    pub async fn read(&self) -> Result<T, ServiceError> {
        let bytes = fs::read(&self.file_path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace the document with `value`, pretty-printed.
    pub async fn write(&self, value: &T) -> Result<(), ServiceError> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(value)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.file_path).await?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.file_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.file_path.with_file_name(name)
    }
}
