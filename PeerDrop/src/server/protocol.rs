//! Line framing of the relay protocol, shared by relay and client.
//!
//! Every message is one JSON object terminated by `\n`. Reads run with a
//! short socket timeout so the owning thread can interleave writes; bytes of
//! a line cut by a timeout are kept in the caller's buffer.

use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::sync::mpsc::Receiver;

/// Longest line accepted from the network.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Outcome of one [`read_line`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// The read timed out; partial data stays buffered.
    Idle,
    Closed,
}

/// Reads the next complete line, accumulating partial reads in `pending`.
///
/// `pending` never grows past `MAX_LINE_LEN + 1` bytes; a longer line is an
/// `InvalidData` error.
pub fn read_line<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>) -> io::Result<LineRead> {
    let limit = (MAX_LINE_LEN + 1).saturating_sub(pending.len()) as u64;
    match reader.by_ref().take(limit).read_until(b'\n', pending) {
        Ok(0) if pending.is_empty() => Ok(LineRead::Closed),
        Ok(_) if pending.len() > MAX_LINE_LEN && pending.last() != Some(&b'\n') => {
            Err(too_long())
        }
        Ok(_) => {
            if pending.last() != Some(&b'\n') && !pending.is_empty() {
                // EOF in the middle of a line: deliver what arrived.
                let line = take_line(pending)?;
                return Ok(if line.is_empty() {
                    LineRead::Closed
                } else {
                    LineRead::Line(line)
                });
            }
            take_line(pending).map(LineRead::Line)
        }
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            Ok(LineRead::Idle)
        }
        Err(err) => Err(err),
    }
}

fn too_long() -> io::Error {
    io::Error::new(ErrorKind::InvalidData, "line too long")
}

fn take_line(pending: &mut Vec<u8>) -> io::Result<String> {
    let bytes = std::mem::take(pending);
    if bytes.len() > MAX_LINE_LEN {
        return Err(too_long());
    }
    let line = String::from_utf8(bytes)
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "line is not UTF-8"))?;
    Ok(line.trim().to_string())
}

/// Writes every queued message to `stream`, one per line.
pub fn flush_outgoing<W: Write>(stream: &mut W, rx: &Receiver<String>) -> io::Result<()> {
    let mut wrote = false;
    while let Ok(msg) = rx.try_recv() {
        stream.write_all(msg.as_bytes())?;
        stream.write_all(b"\n")?;
        wrote = true;
    }
    if wrote {
        stream.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};
    use std::sync::mpsc;

    /// Yields its chunks one by one, with a timeout between them.
    struct Stuttering {
        chunks: Vec<Vec<u8>>,
        timeout_next: bool,
    }

    impl Read for Stuttering {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.timeout_next {
                self.timeout_next = false;
                return Err(io::Error::new(ErrorKind::WouldBlock, "timeout"));
            }
            if self.chunks.is_empty() {
                return Ok(0);
            }
            self.timeout_next = true;
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut reader = BufReader::new(Stuttering {
            chunks: vec![b"{\"type\":".to_vec(), b"\"x\"}\n".to_vec()],
            timeout_next: false,
        });
        let mut pending = Vec::new();

        assert_eq!(read_line(&mut reader, &mut pending).unwrap(), LineRead::Idle);
        assert_eq!(
            read_line(&mut reader, &mut pending).unwrap(),
            LineRead::Line("{\"type\":\"x\"}".to_string())
        );
        assert_eq!(read_line(&mut reader, &mut pending).unwrap(), LineRead::Idle);
        assert_eq!(read_line(&mut reader, &mut pending).unwrap(), LineRead::Closed);
    }

    #[test]
    fn test_lines_and_eof() {
        let mut reader = Cursor::new(b"one\ntwo".to_vec());
        let mut pending = Vec::new();

        assert_eq!(read_line(&mut reader, &mut pending).unwrap(), LineRead::Line("one".to_string()));
        assert_eq!(read_line(&mut reader, &mut pending).unwrap(), LineRead::Line("two".to_string()));
        assert_eq!(read_line(&mut reader, &mut pending).unwrap(), LineRead::Closed);
    }

    #[test]
    fn test_endless_line_is_rejected_with_bounded_buffer() {
        let mut reader = BufReader::new(io::repeat(b'a'));
        let mut pending = Vec::new();

        let err = read_line(&mut reader, &mut pending).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(pending.len() <= MAX_LINE_LEN + 1);
    }

    #[test]
    fn test_long_line_split_by_timeouts_is_rejected() {
        let mut reader = BufReader::new(Stuttering {
            chunks: vec![vec![b'a'; 4096]; 20],
            timeout_next: false,
        });
        let mut pending = Vec::new();

        let mut idle = 0;
        let err = loop {
            match read_line(&mut reader, &mut pending) {
                Ok(LineRead::Idle) => idle += 1,
                Ok(other) => panic!("unexpected read {:?}", other),
                Err(err) => break err,
            }
            assert!(pending.len() <= MAX_LINE_LEN + 1);
        };
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(idle, MAX_LINE_LEN / 4096);
    }

    #[test]
    fn test_line_at_the_limit_is_accepted() {
        let mut data = vec![b'a'; MAX_LINE_LEN];
        data.push(b'\n');
        let mut reader = Cursor::new(data);
        let mut pending = Vec::new();

        match read_line(&mut reader, &mut pending).unwrap() {
            LineRead::Line(line) => assert_eq!(line.len(), MAX_LINE_LEN),
            other => panic!("unexpected read {:?}", other),
        }
    }

    #[test]
    fn test_flush_outgoing_writes_lines() {
        let (tx, rx) = mpsc::channel();
        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();
        let mut out = Vec::new();

        flush_outgoing(&mut out, &rx).unwrap();
        assert_eq!(out, b"a\nb\n");
    }
}
