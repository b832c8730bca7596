use std::fs;
use std::path::Path;

use crate::protocols::file_transfer::FileTransferMessage;

use super::error::TransferError;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Description of the file announced by the `fileInfo` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub total_chunks: u64,
}

/// Number of chunks needed for `size` bytes.
pub fn total_chunks_for(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

/// MIME type from the file extension, defaulting to `application/octet-stream`.
pub fn guess_mime(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|value| value.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "md" | "log" => "text/plain",
        "json" => "application/json",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIME_TYPE,
    };
    mime.to_string()
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            total_chunks: total_chunks_for(size, chunk_size),
        }
    }

    /// Reads name, size and type of a regular file.
    pub fn from_path(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let info = fs::metadata(path)?;
        if !info.is_file() {
            return Err(TransferError::Protocol(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| TransferError::Protocol(format!("{} has no file name", path.display())))?;

        Ok(Self::new(name, info.len(), guess_mime(path), chunk_size))
    }

    pub fn to_message(&self) -> FileTransferMessage {
        FileTransferMessage::FileInfo {
            name: self.name.clone(),
            size: self.size,
            file_type: self.mime_type.clone(),
            total_chunks: Some(self.total_chunks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::CHUNK_SIZE;
    use std::io::Write;

    #[test]
    fn test_total_chunks() {
        assert_eq!(total_chunks_for(0, CHUNK_SIZE), 0);
        assert_eq!(total_chunks_for(1, CHUNK_SIZE), 1);
        assert_eq!(total_chunks_for(16384, CHUNK_SIZE), 1);
        assert_eq!(total_chunks_for(16385, CHUNK_SIZE), 2);
        assert_eq!(total_chunks_for(40 * 1024, CHUNK_SIZE), 3);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("photo.JPG")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("notes.txt")), "text/plain");
        assert_eq!(guess_mime(Path::new("archive.unknown")), DEFAULT_MIME_TYPE);
        assert_eq!(guess_mime(Path::new("Makefile")), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&[7u8; 20_000]).unwrap();

        let metadata = FileMetadata::from_path(&path, CHUNK_SIZE).unwrap();
        assert_eq!(metadata.name, "report.pdf");
        assert_eq!(metadata.size, 20_000);
        assert_eq!(metadata.mime_type, "application/pdf");
        assert_eq!(metadata.total_chunks, 2);
    }

    #[test]
    fn test_from_path_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileMetadata::from_path(dir.path(), CHUNK_SIZE),
            Err(TransferError::Protocol(_))
        ));
    }
}
