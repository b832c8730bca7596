//! Chunked file transfer over a [`DataChannel`](crate::rtc::data_channel::DataChannel).
//!
//! The sender announces the file with a `fileInfo` message and then streams
//! base64 `chunk` messages of at most [`CHUNK_SIZE`] raw bytes, pausing
//! [`CHUNK_DELAY`] between sends. The receiver reassembles them in arrival
//! order, which the channel guarantees to be the sending order.

use std::time::Duration;

mod error;
mod incoming;
mod metadata;
mod outgoing;
mod progress;

pub use error::TransferError;
pub use incoming::{ReassemblyStep, Reassembler, ReceivedFile};
pub use metadata::{guess_mime, total_chunks_for, FileMetadata, DEFAULT_MIME_TYPE};
pub use outgoing::{stream_file, stream_reader, ChunkSink, ChunkStream, StreamOutcome};
pub use progress::{percent, ProgressTracker};

/// Raw bytes carried by one chunk.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Pause between two chunk sends.
pub const CHUNK_DELAY: Duration = Duration::from_millis(10);
