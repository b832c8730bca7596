//! Receiving side: reassembles `chunk` messages into one blob.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::protocols::file_transfer::FileTransferMessage;

use super::error::TransferError;
use super::metadata::FileMetadata;
use super::progress::ProgressTracker;

/// A completely received file. Ownership passes to whoever consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub blob: Bytes,
}

impl ReceivedFile {
    /// Writes the blob into `dir` without replacing existing files.
    ///
    /// `name (1).ext`, `name (2).ext`, ... are tried when the name is taken.
    pub fn save_into(&self, dir: &Path) -> io::Result<PathBuf> {
        let file_name = Path::new(&self.name)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty() && name != "..")
            .unwrap_or_else(|| "download".to_string());

        let candidate = Path::new(&file_name);
        let stem = candidate
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());
        let extension = candidate
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        for attempt in 0u32.. {
            let name = if attempt == 0 {
                file_name.clone()
            } else {
                format!("{} ({}){}", stem, attempt, extension)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&self.blob)?;
                    file.flush()?;
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"))
    }
}

/// Result of feeding one message to the [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyStep {
    /// A `fileInfo` announced a new file.
    Metadata(FileMetadata),
    /// A chunk was stored; `percent` is set when progress increased.
    Chunk { percent: Option<u8> },
    /// The last chunk arrived.
    Complete {
        percent: Option<u8>,
        file: ReceivedFile,
    },
    /// Unknown message type, or anything after completion.
    Ignored,
}

/// Collects chunks in arrival order until `totalChunks` have been received.
#[derive(Debug, Default)]
pub struct Reassembler {
    metadata: Option<FileMetadata>,
    total_chunks: Option<u64>,
    chunks: Vec<Bytes>,
    received_bytes: u64,
    progress: ProgressTracker,
    complete: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    pub fn received_chunks(&self) -> u64 {
        self.chunks.len() as u64
    }

    /// Decodes one channel frame and applies it.
    pub fn handle_text(&mut self, text: &str) -> Result<ReassemblyStep, TransferError> {
        match FileTransferMessage::decode(text)? {
            Some(message) => self.handle(message),
            None => {
                debug!("ignoring non transfer message");
                Ok(ReassemblyStep::Ignored)
            }
        }
    }

    pub fn handle(&mut self, message: FileTransferMessage) -> Result<ReassemblyStep, TransferError> {
        if self.complete {
            return Ok(ReassemblyStep::Ignored);
        }

        match message {
            FileTransferMessage::FileInfo {
                name,
                size,
                file_type,
                total_chunks,
            } => Ok(self.on_file_info(name, size, file_type, total_chunks)),
            FileTransferMessage::Chunk {
                data,
                total_chunks,
                index,
            } => self.on_chunk(&data, total_chunks, index),
        }
    }

    fn on_file_info(
        &mut self,
        name: String,
        size: u64,
        mime_type: String,
        total_chunks: Option<u64>,
    ) -> ReassemblyStep {
        info!(%name, size, "incoming file");
        self.chunks.clear();
        self.received_bytes = 0;
        self.progress.reset();
        self.total_chunks = total_chunks;

        let metadata = FileMetadata {
            name,
            size,
            mime_type,
            total_chunks: total_chunks.unwrap_or_default(),
        };
        self.metadata = Some(metadata.clone());

        if size == 0 && total_chunks.unwrap_or(0) == 0 {
            let percent = self.progress.update(0, 0);
            return self.finish(percent);
        }
        ReassemblyStep::Metadata(metadata)
    }

    fn on_chunk(
        &mut self,
        data: &str,
        total_chunks: u64,
        index: Option<u64>,
    ) -> Result<ReassemblyStep, TransferError> {
        if self.metadata.is_none() {
            return Err(TransferError::Protocol("chunk received before fileInfo".to_string()));
        }

        match self.total_chunks {
            Some(expected) if expected != total_chunks => {
                return Err(TransferError::Protocol(format!(
                    "totalChunks changed from {} to {}",
                    expected, total_chunks
                )));
            }
            Some(_) => {}
            None => self.total_chunks = Some(total_chunks),
        }
        if total_chunks == 0 {
            return Err(TransferError::Protocol("chunk of an empty file".to_string()));
        }

        let received = self.chunks.len() as u64;
        if let Some(index) = index {
            if index != received {
                return Err(TransferError::Protocol(format!(
                    "chunk {} arrived out of order, expected {}",
                    index, received
                )));
            }
        }
        if received >= total_chunks {
            return Err(TransferError::Protocol(format!(
                "more than {} chunks received",
                total_chunks
            )));
        }

        let bytes = STANDARD.decode(data)?;
        self.received_bytes += bytes.len() as u64;
        self.chunks.push(Bytes::from(bytes));

        let received = self.chunks.len() as u64;
        let percent = self.progress.update(received, total_chunks);
        if received == total_chunks {
            Ok(self.finish(percent))
        } else {
            Ok(ReassemblyStep::Chunk { percent })
        }
    }

    fn finish(&mut self, percent: Option<u8>) -> ReassemblyStep {
        let Some(metadata) = self.metadata.clone() else {
            return ReassemblyStep::Ignored;
        };

        let mut blob = BytesMut::with_capacity(self.received_bytes as usize);
        for chunk in self.chunks.drain(..) {
            blob.extend_from_slice(&chunk);
        }
        if blob.len() as u64 != metadata.size {
            warn!(
                announced = metadata.size,
                received = blob.len(),
                "received size differs from announced size"
            );
        }

        self.complete = true;
        info!(name = %metadata.name, bytes = blob.len(), "file received");

        ReassemblyStep::Complete {
            percent,
            file: ReceivedFile {
                name: metadata.name,
                size: metadata.size,
                mime_type: metadata.mime_type,
                blob: blob.freeze(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::outgoing::ChunkStream;
    use crate::transfer::CHUNK_SIZE;

    fn file_info(size: u64, total_chunks: Option<u64>) -> FileTransferMessage {
        FileTransferMessage::FileInfo {
            name: "photo.png".to_string(),
            size,
            file_type: "image/png".to_string(),
            total_chunks,
        }
    }

    fn chunk(data: &[u8], total_chunks: u64, index: Option<u64>) -> FileTransferMessage {
        FileTransferMessage::Chunk {
            data: STANDARD.encode(data),
            total_chunks,
            index,
        }
    }

    fn roundtrip(data: &[u8]) -> (ReceivedFile, Vec<u8>) {
        let mut reassembler = Reassembler::new();
        let total = crate::transfer::total_chunks_for(data.len() as u64, CHUNK_SIZE);
        let mut progress = Vec::new();

        let first = reassembler.handle(file_info(data.len() as u64, Some(total))).unwrap();
        if let ReassemblyStep::Complete { file, percent } = first {
            progress.extend(percent);
            return (file, progress);
        }

        for message in ChunkStream::new(data, data.len() as u64, CHUNK_SIZE) {
            match reassembler.handle(message.unwrap()).unwrap() {
                ReassemblyStep::Chunk { percent } => progress.extend(percent),
                ReassemblyStep::Complete { percent, file } => {
                    progress.extend(percent);
                    return (file, progress);
                }
                other => panic!("unexpected step {:?}", other),
            }
        }
        panic!("transfer never completed");
    }

    #[test]
    fn test_roundtrip_sizes() {
        for size in [1usize, 100, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * 1024 * 1024 + 17] {
            let data: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
            let (file, progress) = roundtrip(&data);

            assert_eq!(file.blob.as_ref(), &data[..], "size {}", size);
            assert_eq!(file.mime_type, "image/png");
            assert_eq!(progress.last(), Some(&100));
            assert!(progress.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_forty_kib_progress() {
        let data = vec![5u8; 40 * 1024];
        let (file, progress) = roundtrip(&data);
        assert_eq!(file.size, 40 * 1024);
        assert_eq!(progress, vec![33, 67, 100]);
    }

    #[test]
    fn test_two_hundred_chunks_report_100_only_on_the_last() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(file_info(200, Some(200))).unwrap();

        for index in 0..199 {
            match reassembler.handle(chunk(b"x", 200, Some(index))).unwrap() {
                ReassemblyStep::Chunk { percent } => {
                    assert_ne!(percent, Some(100), "chunk {}", index)
                }
                other => panic!("unexpected step {:?}", other),
            }
        }
        assert_eq!(reassembler.received_chunks(), 199);

        match reassembler.handle(chunk(b"x", 200, Some(199))).unwrap() {
            ReassemblyStep::Complete { percent, file } => {
                assert_eq!(percent, Some(100));
                assert_eq!(file.blob.len(), 200);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_partial_state_is_visible() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.metadata().is_none());

        reassembler.handle(file_info(9, Some(3))).unwrap();
        reassembler.handle(chunk(b"abc", 3, Some(0))).unwrap();

        assert!(!reassembler.is_complete());
        assert_eq!(reassembler.received_chunks(), 1);
        assert_eq!(reassembler.metadata().map(|m| m.total_chunks), Some(3));
    }

    #[test]
    fn test_empty_file_completes_on_file_info() {
        let (file, progress) = roundtrip(&[]);
        assert!(file.blob.is_empty());
        assert_eq!(progress, vec![100]);

        let mut reassembler = Reassembler::new();
        let step = reassembler.handle(file_info(0, None)).unwrap();
        assert!(matches!(step, ReassemblyStep::Complete { .. }));
    }

    #[test]
    fn test_chunk_before_file_info_fails() {
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler.handle(chunk(b"abc", 1, Some(0))),
            Err(TransferError::Protocol(_))
        ));
    }

    #[test]
    fn test_out_of_order_index_fails() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(file_info(6, Some(2))).unwrap();
        assert!(matches!(
            reassembler.handle(chunk(b"def", 2, Some(1))),
            Err(TransferError::Protocol(_))
        ));
    }

    #[test]
    fn test_chunks_without_index_accepted_in_arrival_order() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(file_info(6, None)).unwrap();
        reassembler.handle(chunk(b"abc", 2, None)).unwrap();
        match reassembler.handle(chunk(b"def", 2, None)).unwrap() {
            ReassemblyStep::Complete { file, percent } => {
                assert_eq!(file.blob.as_ref(), b"abcdef");
                assert_eq!(percent, Some(100));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_total_chunks_change_fails() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(file_info(9, None)).unwrap();
        reassembler.handle(chunk(b"abc", 3, Some(0))).unwrap();
        assert!(matches!(
            reassembler.handle(chunk(b"def", 4, Some(1))),
            Err(TransferError::Protocol(_))
        ));
    }

    #[test]
    fn test_bad_base64_fails() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(file_info(3, Some(1))).unwrap();
        let result = reassembler.handle(FileTransferMessage::Chunk {
            data: "***".to_string(),
            total_chunks: 1,
            index: Some(0),
        });
        assert!(matches!(result, Err(TransferError::Decode(_))));
    }

    #[test]
    fn test_messages_after_completion_ignored() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(file_info(3, Some(1))).unwrap();
        reassembler.handle(chunk(b"abc", 1, Some(0))).unwrap();
        assert!(reassembler.is_complete());

        assert_eq!(
            reassembler.handle(chunk(b"xyz", 1, Some(1))).unwrap(),
            ReassemblyStep::Ignored
        );
        assert_eq!(
            reassembler.handle_text(r#"{"type":"ping"}"#).unwrap(),
            ReassemblyStep::Ignored
        );
    }

    #[test]
    fn test_save_into_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = ReceivedFile {
            name: "../notes.txt".to_string(),
            size: 2,
            mime_type: "text/plain".to_string(),
            blob: Bytes::from_static(b"hi"),
        };

        let first = file.save_into(dir.path()).unwrap();
        let second = file.save_into(dir.path()).unwrap();

        assert_eq!(first, dir.path().join("notes.txt"));
        assert_eq!(second, dir.path().join("notes (1).txt"));
        assert_eq!(std::fs::read(second).unwrap(), b"hi");
    }
}
