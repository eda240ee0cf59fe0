//! Disk storage for the shared file and the host's progress.
//!
//! The shared file is split into fixed-size pieces; only the last piece may
//! be shorter. Pieces are atomic: a write either stores the full piece or
//! fails.
//!
//! # Components
//!
//! - [`SharedFile`] - Piece-indexed reads and writes of the shared file
//! - [`ProgressFile`] - The host's bitfield snapshot, restored at startup
//!
//! # Examples
//!
//! ```no_run
//! use swarmcast::storage::SharedFile;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let file = SharedFile::open(Path::new("./peer_1001"), "TheFile.dat", 1500, 512).await?;
//! assert_eq!(file.piece_count(), 3);
//! assert_eq!(file.piece_size_for(2), Some(476));
//!
//! file.write_piece(0, &[0u8; 512]).await?;
//! let data = file.read_piece(0).await;
//! assert_eq!(data.len(), 512);
//! # Ok(())
//! # }
//! ```

mod error;
mod file;
mod progress;

pub use error::StorageError;
pub use file::SharedFile;
pub use progress::ProgressFile;
