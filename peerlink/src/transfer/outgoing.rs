//! Sending side: splits a reader into `chunk` messages and streams them.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info};

use crate::protocols::file_transfer::FileTransferMessage;
use crate::rtc::data_channel::DataChannel;

use super::error::TransferError;
use super::metadata::{total_chunks_for, FileMetadata};
use super::progress::ProgressTracker;
use super::CHUNK_SIZE;

/// Destination of transfer messages.
pub trait ChunkSink {
    fn send_message(&self, message: &FileTransferMessage) -> Result<(), TransferError>;
}

impl ChunkSink for DataChannel {
    fn send_message(&self, message: &FileTransferMessage) -> Result<(), TransferError> {
        DataChannel::send_message(self, message)?;
        Ok(())
    }
}

/// How a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
}

/// Iterator over the `chunk` messages of `size` bytes read from `reader`.
pub struct ChunkStream<R> {
    reader: R,
    chunk_size: usize,
    total_chunks: u64,
    next_index: u64,
    remaining: u64,
}

impl<R: Read> ChunkStream<R> {
    pub fn new(reader: R, size: u64, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            reader,
            chunk_size,
            total_chunks: total_chunks_for(size, chunk_size),
            next_index: 0,
            remaining: size,
        }
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Chunks produced so far.
    pub fn sent(&self) -> u64 {
        self.next_index
    }

    fn read_chunk(&mut self) -> Result<FileTransferMessage, TransferError> {
        let len = self.remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                TransferError::Protocol(format!(
                    "file ended {} bytes early",
                    self.remaining
                ))
            } else {
                TransferError::Io(err)
            }
        })?;

        let index = self.next_index;
        self.next_index += 1;
        self.remaining -= len as u64;

        Ok(FileTransferMessage::Chunk {
            data: STANDARD.encode(&buf),
            total_chunks: self.total_chunks,
            index: Some(index),
        })
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<FileTransferMessage, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.read_chunk();
        if item.is_err() {
            self.remaining = 0;
        }
        Some(item)
    }
}

/// Sends `fileInfo` followed by every chunk of `reader`.
///
/// `on_progress` receives each increase of the percentage; `cancelled` is
/// checked before every chunk.
pub fn stream_reader<S, R, F>(
    sink: &S,
    metadata: &FileMetadata,
    reader: R,
    delay: Duration,
    cancelled: &AtomicBool,
    mut on_progress: F,
) -> Result<StreamOutcome, TransferError>
where
    S: ChunkSink + ?Sized,
    R: Read,
    F: FnMut(u8),
{
    let mut chunks = ChunkStream::new(reader, metadata.size, CHUNK_SIZE);
    if chunks.total_chunks() != metadata.total_chunks {
        return Err(TransferError::Protocol(format!(
            "metadata announces {} chunks, file needs {}",
            metadata.total_chunks,
            chunks.total_chunks()
        )));
    }

    if cancelled.load(Ordering::SeqCst) {
        return Ok(StreamOutcome::Cancelled);
    }
    sink.send_message(&metadata.to_message())?;
    info!(name = %metadata.name, size = metadata.size, chunks = metadata.total_chunks, "sending file");

    let mut progress = ProgressTracker::new();
    if metadata.total_chunks == 0 {
        if let Some(value) = progress.update(0, 0) {
            on_progress(value);
        }
        return Ok(StreamOutcome::Completed);
    }

    while let Some(chunk) = chunks.next() {
        if cancelled.load(Ordering::SeqCst) {
            debug!(sent = chunks.sent(), "transfer cancelled");
            return Ok(StreamOutcome::Cancelled);
        }
        sink.send_message(&chunk?)?;

        if let Some(value) = progress.update(chunks.sent(), metadata.total_chunks) {
            on_progress(value);
        }
        if !delay.is_zero() && chunks.sent() < metadata.total_chunks {
            thread::sleep(delay);
        }
    }

    info!(name = %metadata.name, "file sent");
    Ok(StreamOutcome::Completed)
}

/// Opens `path` and streams it with [`stream_reader`].
pub fn stream_file<S, F>(
    sink: &S,
    path: &Path,
    delay: Duration,
    cancelled: &AtomicBool,
    on_progress: F,
) -> Result<StreamOutcome, TransferError>
where
    S: ChunkSink + ?Sized,
    F: FnMut(u8),
{
    let metadata = FileMetadata::from_path(path, CHUNK_SIZE)?;
    let file = BufReader::new(File::open(path)?);
    stream_reader(sink, &metadata, file, delay, cancelled, on_progress)
}
