mod error;
mod file_buffer;

pub use error::BufferError;
pub use file_buffer::stats::{Stats, HISTOGRAM_BUCKETS};
pub use file_buffer::FileBuffer;
