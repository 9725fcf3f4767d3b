//! Single JSON document persisted with write-temp-then-rename.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::{DbError, DbResult};

/// A JSON file holding one value of type `T`.
///
/// Writes go to a temp file in the same directory which is synced and then
/// renamed over the target, so readers never see a half-written document.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file does not exist or is empty.
    pub fn load(&self) -> DbResult<Option<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| DbError::Json {
                path: self.display(),
                source,
            })
    }

    pub fn save(&self, value: &T) -> DbResult<()> {
        let payload = serde_json::to_vec_pretty(value).map_err(|source| DbError::Json {
            path: self.display(),
            source,
        })?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| self.io_error(e))?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| self.io_error(e))?;
        temp.write_all(&payload).map_err(|e| self.io_error(e))?;
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        temp.persist(&self.path).map_err(|source| DbError::Persist {
            path: self.display(),
            source,
        })?;
        Ok(())
    }

    pub fn delete(&self) -> DbResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    fn io_error(&self, source: std::io::Error) -> DbError {
        DbError::Io {
            path: self.display(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Vec<u32>> = JsonFile::new(dir.path().join("absent.json"));

        assert!(file.load().unwrap().is_none());
        assert!(file.delete().is_ok());
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Vec<u32>> = JsonFile::new(dir.path().join("nested/state.json"));

        file.save(&vec![1, 2, 3]).unwrap();
        assert_eq!(file.load().unwrap(), Some(vec![1, 2, 3]));

        file.save(&vec![4]).unwrap();
        assert_eq!(file.load().unwrap(), Some(vec![4]));

        file.delete().unwrap();
        assert!(!file.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let file: JsonFile<Vec<u32>> = JsonFile::new(path);
        assert!(matches!(file.load(), Err(DbError::Json { .. })));
    }
}
