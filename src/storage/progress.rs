use super::error::StorageError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// The host's download progress as a wire-format bitfield on disk.
#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: PathBuf,
    staging: PathBuf,
    length: usize,
    existed: bool,
}

impl ProgressFile {
    /// Points at `dir/<file_name>.bitfield`, sized for `piece_count` pieces.
    /// The file itself is only created by the first snapshot.
    pub async fn open(dir: &Path, file_name: &str, piece_count: usize) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{file_name}.bitfield"));
        let existed = tokio::fs::try_exists(&path).await?;
        Ok(Self {
            staging: dir.join(format!("{file_name}.bitfield.tmp")),
            path,
            length: piece_count.div_ceil(8),
            existed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if a snapshot was already on disk when this was opened.
    pub fn existed(&self) -> bool {
        self.existed
    }

    /// Reads the saved snapshot, or `None` if there was none at startup.
    pub async fn read_snapshot(&self) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.existed {
            return Ok(None);
        }
        let mut data = tokio::fs::read(&self.path).await?;
        data.resize(self.length, 0);
        Ok(Some(data))
    }

    /// Replaces the snapshot, zero-padding or truncating to the fixed length.
    ///
    /// The new snapshot is synced to a staging file and renamed over the old
    /// one, so an interrupted write leaves the previous snapshot intact.
    pub async fn write_snapshot(&self, bits: &[u8]) -> Result<(), StorageError> {
        let mut data = vec![0u8; self.length];
        let n = bits.len().min(self.length);
        data[..n].copy_from_slice(&bits[..n]);

        let mut staged = tokio::fs::File::create(&self.staging).await?;
        staged.write_all(&data).await?;
        staged.sync_all().await?;
        drop(staged);

        tokio::fs::rename(&self.staging, &self.path).await?;
        Ok(())
    }
}
