//! File-based log backend.

use crate::backend::LogBackend;
use crate::error::{LogError, LogResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based log backend.
///
/// The file is held under an exclusive advisory lock for the lifetime of the
/// backend, so two coordinators cannot append to the same log. The lock is
/// released when the backend is dropped.
///
/// # Durability
///
/// - `flush()` calls `File::flush()`
/// - `sync()` calls `File::sync_data()`
///
/// # Example
///
/// ```no_run
/// use twophase_log::{FileBackend, LogBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("coordinator.log")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path` and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if another backend holds the file, or an
    /// I/O error if it cannot be opened.
    pub fn open(path: &Path) -> LogResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LogError::Locked {
                path: path.to_path_buf(),
            });
        }

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Like [`FileBackend::open`], creating parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> LogResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.size {
            return Err(LogError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        // `&File` implements Read + Seek, so reads do not need `&mut self`.
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> LogResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> LogResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> LogResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> LogResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> LogResult<()> {
        if new_size > self.size {
            return Err(LogError::ReadPastEnd {
                offset: new_size,
                len: 0,
                size: self.size,
            });
        }
        self.file.set_len(new_size)?;
        self.size = new_size;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
