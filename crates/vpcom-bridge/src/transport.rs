//! Transport abstractions for the bridge
//!
//! Provides AsyncReader/AsyncWriter traits over a framed byte stream and the
//! background reader task that feeds decoded events to the correlator.

use crate::codec::Codec;
use crate::correlator::Correlator;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};
use vpcom_core::{BridgeError, Event, Result};

/// Largest frame accepted from the peer (64 MiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// How frames are delimited on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Body terminated by `\n`
    Newline,
    /// 4-byte little-endian length followed by the body
    LengthPrefixed,
}

impl Framing {
    /// Add the delimiter to a frame body
    ///
    /// Bodies longer than [`MAX_FRAME_LEN`] are rejected by the codec first.
    pub fn wrap(self, body: &[u8]) -> Vec<u8> {
        match self {
            Framing::Newline => {
                let mut frame = Vec::with_capacity(body.len() + 1);
                frame.extend_from_slice(body);
                frame.push(b'\n');
                frame
            }
            Framing::LengthPrefixed => {
                let mut frame = Vec::with_capacity(body.len() + 4);
                frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
                frame.extend_from_slice(body);
                frame
            }
        }
    }
}

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read one complete frame body (delimiter removed)
    async fn read_frame(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send + Sync {
    /// Write one frame body, adding the delimiter, and flush
    async fn write_frame(&mut self, body: &[u8]) -> Result<()>;

    /// Close the write side
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Short printable preview of a frame for logging
pub(crate) fn preview(data: &[u8]) -> String {
    String::from_utf8_lossy(data).chars().take(200).collect()
}

/// Background reader task that handles incoming frames
///
/// This task:
/// - Reads frames from the peer via the transport
/// - Hands each decoded event to the correlator
/// - Broadcasts events nobody was waiting for to diagnostics subscribers
///
/// Returns the error that ended the link. A malformed frame is as fatal as
/// an I/O error since the stream cannot be realigned.
pub async fn reader_task<R: AsyncReader>(
    mut reader: R,
    codec: Codec,
    correlator: Arc<Correlator>,
    unsolicited_tx: broadcast::Sender<Event>,
) -> BridgeError {
    loop {
        let data = match reader.read_frame().await {
            Ok(data) => data,
            Err(e) => {
                error!("Reader task failed: {}", e);
                return e;
            }
        };

        debug!("[Peer→Bridge] len={} frame={}", data.len(), preview(&data));

        match codec.decode(&data) {
            Ok(event) => {
                if let Some(event) = correlator.on_event(event) {
                    debug!("Unsolicited event: {}", event.name);
                    // Ignore send errors (no subscribers)
                    let _ = unsolicited_tx.send(event);
                }
            }
            Err(e) => {
                error!("Failed to decode frame: {}", e);
                return e;
            }
        }
    }
}
