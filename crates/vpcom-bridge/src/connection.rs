//! One live link to the peer
//!
//! A connection owns the write half behind an async mutex, so frames from
//! different callers never interleave, and a background reader task that
//! decodes inbound frames and hands them to the correlator.

use crate::codec::Codec;
use crate::correlator::Correlator;
use crate::tcp;
use crate::transport::{AsyncReader, AsyncWriter, preview, reader_task};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};
use vpcom_core::{BridgeConfig, BridgeError, Command, Event, Result};

/// Live link to the peer
pub struct Connection {
    /// Distinguishes this link from earlier ones
    id: u64,
    codec: Codec,
    /// Writer half of the connection
    writer: Mutex<Box<dyn AsyncWriter>>,
    /// Background reader task
    reader: AbortHandle,
}

impl Connection {
    /// Open a TCP link to the configured peer
    ///
    /// Returns the connection and the reader task handle, which completes
    /// with the error that ended the link.
    pub async fn open(
        id: u64,
        config: &BridgeConfig,
        correlator: Arc<Correlator>,
        unsolicited_tx: broadcast::Sender<Event>,
    ) -> Result<(Self, JoinHandle<BridgeError>)> {
        let codec = Codec::new(config.wire_format);
        let (reader, writer) =
            tcp::connect(&config.address(), config.connect_timeout, codec.framing()).await?;
        Ok(Self::start(id, codec, reader, writer, correlator, unsolicited_tx))
    }

    /// Start a connection over already-open transport halves
    pub fn start<R, W>(
        id: u64,
        codec: Codec,
        reader: R,
        writer: W,
        correlator: Arc<Correlator>,
        unsolicited_tx: broadcast::Sender<Event>,
    ) -> (Self, JoinHandle<BridgeError>)
    where
        R: AsyncReader + 'static,
        W: AsyncWriter + 'static,
    {
        let handle = tokio::spawn(reader_task(reader, codec, correlator, unsolicited_tx));
        let connection = Self {
            id,
            codec,
            writer: Mutex::new(Box::new(writer)),
            reader: handle.abort_handle(),
        };
        (connection, handle)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once the reader task has ended
    pub fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Encode and write one command
    ///
    /// Encoding failures are `Serialization` errors and leave the link
    /// usable; write failures are `ConnectionLost`.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let data = self.codec.encode(command)?;
        debug!("[Bridge→Peer] len={} frame={}", data.len(), preview(&data));

        let mut writer = self.writer.lock().await;
        writer.write_frame(&data).await
    }

    /// Stop the reader and close the write half
    pub async fn close(&self) {
        self.reader.abort();
        if let Err(e) = self.writer.lock().await.close().await {
            warn!("Failed to close connection {}: {}", self.id, e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_peer::{MockPeer, Reply};
    use serde_json::json;
    use vpcom_core::WireFormat;

    #[tokio::test]
    async fn test_send_and_dispatch() {
        let peer = MockPeer::spawn(WireFormat::Json, |event| {
            vec![Reply::respond(event, json!({"value": event.get("number").cloned()}))]
        })
        .await;

        let config = peer.config();
        let correlator = Arc::new(Correlator::new());
        let (unsolicited_tx, _) = broadcast::channel(8);
        let (connection, _reader) = Connection::open(7, &config, correlator.clone(), unsolicited_tx)
            .await
            .unwrap();
        assert_eq!(connection.id(), 7);

        let wait = correlator.register("Mech_response").unwrap();
        connection
            .send(&Command::new("Mech").with_param("number", 3))
            .await
            .unwrap();

        let event = wait.wait().await.unwrap();
        assert_eq!(event.into_value().unwrap(), json!(3));
        assert_eq!(peer.received()[0].name, "Mech");
    }

    #[tokio::test]
    async fn test_reader_ends_with_close_reason() {
        let peer = MockPeer::spawn(WireFormat::Bcp, |_| vec![Reply::Close]).await;

        let correlator = Arc::new(Correlator::new());
        let (unsolicited_tx, _) = broadcast::channel(8);
        let (connection, reader) =
            Connection::open(1, &peer.config(), correlator, unsolicited_tx)
                .await
                .unwrap();

        assert!(connection.is_alive());
        connection.send(&Command::new("ChangedLamps")).await.unwrap();
        let reason = reader.await.unwrap();
        assert_eq!(reason.kind(), "connection_lost");
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn test_encode_error_keeps_link() {
        let peer = MockPeer::spawn(WireFormat::Bcp, |event| {
            vec![Reply::respond(event, json!({"value": 1}))]
        })
        .await;

        let correlator = Arc::new(Correlator::new());
        let (unsolicited_tx, _) = broadcast::channel(8);
        let (connection, _reader) =
            Connection::open(1, &peer.config(), correlator.clone(), unsolicited_tx)
                .await
                .unwrap();

        let err = connection.send(&Command::new("bad?name")).await.unwrap_err();
        assert_eq!(err.kind(), "serialization");

        let wait = correlator.register("Switch_response").unwrap();
        connection.send(&Command::new("Switch")).await.unwrap();
        assert!(wait.wait().await.is_ok());
    }
}
