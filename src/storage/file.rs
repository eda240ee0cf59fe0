use super::error::StorageError;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;
use tracing::warn;

/// The shared file, addressed by piece index.
///
/// Every piece is `piece_size` bytes except the last, which holds whatever
/// remains of `file_size`. Reads and writes go through one handle under a
/// lock so a seek is never separated from its read or write.
#[derive(Debug)]
pub struct SharedFile {
    path: PathBuf,
    file_size: u64,
    piece_size: u64,
    piece_count: usize,
    handle: TokioMutex<Option<File>>,
}

impl SharedFile {
    /// Opens or creates `dir/file_name` and sets its length to `file_size`.
    pub async fn open(
        dir: &Path,
        file_name: &str,
        file_size: u64,
        piece_size: u64,
    ) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(file_name);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        if file.metadata().await?.len() != file_size {
            file.set_len(file_size).await?;
        }

        Ok(Self {
            path,
            file_size,
            piece_size,
            piece_count: file_size.div_ceil(piece_size) as usize,
            handle: TokioMutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn piece_size(&self) -> u64 {
        self.piece_size
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Expected length of piece `index`, or `None` if out of range.
    pub fn piece_size_for(&self, index: usize) -> Option<u64> {
        if index >= self.piece_count {
            return None;
        }
        if index + 1 == self.piece_count {
            Some(self.file_size - index as u64 * self.piece_size)
        } else {
            Some(self.piece_size)
        }
    }

    /// Reads one piece. An invalid index or an I/O failure yields an empty
    /// buffer; the failure is logged here.
    pub async fn read_piece(&self, index: usize) -> Bytes {
        match self.try_read_piece(index).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %self.path.display(), piece = index, error = %e, "piece read failed");
                Bytes::new()
            }
        }
    }

    async fn try_read_piece(&self, index: usize) -> Result<Bytes, StorageError> {
        let length = self
            .piece_size_for(index)
            .ok_or(StorageError::InvalidPieceIndex(index))?;

        let mut guard = self.handle.lock().await;
        let file = guard.as_mut().ok_or_else(closed_error)?;

        let mut buf = vec![0u8; length as usize];
        file.seek(SeekFrom::Start(index as u64 * self.piece_size))
            .await?;
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }

    /// Writes one piece. Fails without touching the file if `data` is not
    /// exactly the expected length for `index`.
    pub async fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        let expected = self
            .piece_size_for(index)
            .ok_or(StorageError::InvalidPieceIndex(index))?;

        if data.len() as u64 != expected {
            return Err(StorageError::PieceSizeMismatch {
                index,
                expected,
                actual: data.len() as u64,
            });
        }

        let mut guard = self.handle.lock().await;
        let file = guard.as_mut().ok_or_else(closed_error)?;

        file.seek(SeekFrom::Start(index as u64 * self.piece_size))
            .await?;
        file.write_all(data).await?;

        Ok(())
    }

    /// Pushes written pieces to disk. A no-op once closed.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let mut guard = self.handle.lock().await;
        if let Some(file) = guard.as_mut() {
            file.flush().await?;
            file.sync_data().await?;
        }
        Ok(())
    }

    /// Flushes and releases the handle. Later reads return empty buffers
    /// and later writes fail.
    pub async fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.handle.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await?;
            file.sync_data().await?;
        }
        Ok(())
    }
}

fn closed_error() -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "file closed",
    ))
}
