use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(usize),

    #[error("piece {index} size mismatch: expected {expected}, got {actual}")]
    PieceSizeMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },
}
