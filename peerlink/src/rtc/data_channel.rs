//! Direct, ordered channel between two peers after nomination.
//!
//! Frames are UTF-8 text lines. The reader half is consumed by
//! [`DataChannel::start_listener`], which reports every frame and, exactly
//! once, the closure of the channel.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use serde::Serialize;
use tracing::{debug, warn};

use super::peer_connection_error::PeerConnectionError;

/// Largest frame accepted from the remote side.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(String),
    Closed,
}

pub struct DataChannel {
    writer: Mutex<TcpStream>,
    reader: Mutex<Option<BufReader<TcpStream>>>,
    control: TcpStream,
    peer_addr: SocketAddr,
    closed: AtomicBool,
}

impl DataChannel {
    /// Wraps a validated connection, keeping whatever `reader` already buffered.
    pub(crate) fn from_reader(reader: BufReader<TcpStream>) -> Result<Self, PeerConnectionError> {
        let stream = reader.get_ref();
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        stream.set_nodelay(true)?;

        let peer_addr = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        let control = stream.try_clone()?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            control,
            peer_addr,
            closed: AtomicBool::new(false),
        })
    }

    /// Sends one text frame.
    pub fn send(&self, text: &str) -> Result<(), PeerConnectionError> {
        if self.is_closed() {
            return Err(PeerConnectionError::Closed);
        }
        if text.contains('\n') {
            return Err(PeerConnectionError::InvalidMessage(
                "frame contains a line break".to_string(),
            ));
        }
        if text.len() > MAX_FRAME_LEN {
            return Err(PeerConnectionError::InvalidMessage(format!(
                "frame of {} bytes exceeds {}",
                text.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| PeerConnectionError::Closed)?;
        writer.write_all(text.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Serializes `message` as JSON and sends it as one frame.
    pub fn send_message<T: Serialize>(&self, message: &T) -> Result<(), PeerConnectionError> {
        let text = serde_json::to_string(message)?;
        self.send(&text)
    }

    /// Spawns the reader thread. Can only be started once per channel.
    pub fn start_listener<F>(&self, on_event: F) -> Result<(), PeerConnectionError>
    where
        F: Fn(ChannelEvent) + Send + 'static,
    {
        let reader = self
            .reader
            .lock()
            .map_err(|_| PeerConnectionError::Closed)?
            .take()
            .ok_or_else(|| PeerConnectionError::InvalidMessage("listener already started".to_string()))?;

        let peer_addr = self.peer_addr;
        thread::Builder::new()
            .name(format!("channel-{}", peer_addr))
            .spawn(move || {
                read_frames(reader, &on_event);
                debug!(%peer_addr, "data channel closed");
                on_event(ChannelEvent::Closed);
            })?;
        Ok(())
    }

    /// Shuts the connection down; the listener then reports `Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.control.shutdown(Shutdown::Both) {
            debug!(error = %err, "data channel shutdown");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_frames<F: Fn(ChannelEvent)>(mut reader: BufReader<TcpStream>, on_event: &F) {
    let mut frame = Vec::new();
    loop {
        frame.clear();
        let limit = MAX_FRAME_LEN as u64 + 1;
        match reader.by_ref().take(limit).read_until(b'\n', &mut frame) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "data channel read failed");
                return;
            }
        }

        if frame.last() != Some(&b'\n') {
            if frame.len() > MAX_FRAME_LEN {
                warn!("dropping channel: frame larger than {} bytes", MAX_FRAME_LEN);
            }
            return;
        }
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }

        match std::str::from_utf8(&frame) {
            Ok(text) => on_event(ChannelEvent::Message(text.to_string())),
            Err(_) => warn!("ignoring non UTF-8 frame of {} bytes", frame.len()),
        }
    }
}
