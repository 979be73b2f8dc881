use std::io;

use thiserror::Error;

/// Recoverable failures of the public buffer operations.
///
/// Out-of-range arguments to the destructive primitives (`cut`, `remove`,
/// `paste`) are contract violations and panic instead; see the method docs.
#[derive(Debug, Error)]
pub enum BufferError {
    /// A position outside `0..=len` was passed to a positioned operation.
    #[error("offset {offset} out of bounds of buffer of {size} bytes")]
    BadOffset { offset: i64, size: u64 },

    /// `write` was called while the current offset points past the end.
    #[error("write at offset {offset} past buffer end ({size} bytes)")]
    PastEof { offset: u64, size: u64 },

    /// Opening or mapping the backing file failed.
    #[error("failed to open backing file")]
    Open(#[source] io::Error),
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> io::Error {
        let kind = match &err {
            BufferError::BadOffset { .. } => io::ErrorKind::InvalidInput,
            BufferError::PastEof { .. } => io::ErrorKind::UnexpectedEof,
            BufferError::Open(e) => e.kind(),
        };
        io::Error::new(kind, err)
    }
}
