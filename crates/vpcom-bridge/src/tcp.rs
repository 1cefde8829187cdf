//! TCP transport implementation
//!
//! The peer listens on a TCP port; the bridge connects as a client.

use crate::transport::{AsyncReader, AsyncWriter, Framing, MAX_FRAME_LEN};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use vpcom_core::{BridgeError, Result};

/// Open a TCP connection and split it into framed halves
pub async fn connect(
    address: &str,
    timeout: Duration,
    framing: Framing,
) -> Result<(TcpReadWrapper, TcpWriteWrapper)> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| BridgeError::ConnectionRefused(format!("Connection timeout to {}", address)))?
        .map_err(|e| {
            BridgeError::ConnectionRefused(format!("Failed to connect to {}: {}", address, e))
        })?;

    // Frames are small and latency matters more than throughput
    stream.set_nodelay(true).map_err(|e| {
        BridgeError::ConnectionRefused(format!("Failed to set TCP_NODELAY: {}", e))
    })?;

    debug!("TCP connected to {}", address);
    Ok(split(stream, framing))
}

/// Split an open stream into framed halves
pub fn split(stream: TcpStream, framing: Framing) -> (TcpReadWrapper, TcpWriteWrapper) {
    let (read_half, write_half) = stream.into_split();
    (
        TcpReadWrapper::new(read_half, framing),
        TcpWriteWrapper::new(write_half, framing),
    )
}

/// TCP read wrapper
pub struct TcpReadWrapper {
    inner: BufReader<OwnedReadHalf>,
    framing: Framing,
}

impl TcpReadWrapper {
    pub fn new(read_half: OwnedReadHalf, framing: Framing) -> Self {
        Self {
            inner: BufReader::new(read_half),
            framing,
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            let mut line = Vec::new();
            let read = (&mut self.inner)
                .take(MAX_FRAME_LEN as u64 + 1)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| BridgeError::ConnectionLost(format!("TCP read failed: {}", e)))?;

            if read == 0 {
                return Err(BridgeError::ConnectionLost("peer closed the connection".into()));
            }
            if line.last() != Some(&b'\n') {
                if line.len() > MAX_FRAME_LEN {
                    return Err(BridgeError::MalformedFrame(format!(
                        "Frame exceeds {} bytes",
                        MAX_FRAME_LEN
                    )));
                }
                return Err(BridgeError::ConnectionLost(
                    "peer closed the connection mid-frame".into(),
                ));
            }

            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            // Blank keepalive lines carry no frame
            if !line.is_empty() {
                return Ok(line);
            }
        }
    }

    async fn read_prefixed(&mut self) -> Result<Vec<u8>> {
        // Read 4-byte length prefix (little-endian)
        let mut len_bytes = [0u8; 4];
        self.inner.read_exact(&mut len_bytes).await.map_err(|e| {
            BridgeError::ConnectionLost(format!("TCP read length failed: {}", e))
        })?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Err(BridgeError::MalformedFrame(format!(
                "Frame too large: {} bytes",
                len
            )));
        }

        let mut data = vec![0u8; len];
        self.inner
            .read_exact(&mut data)
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("TCP read data failed: {}", e)))?;

        Ok(data)
    }
}

#[async_trait]
impl AsyncReader for TcpReadWrapper {
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        match self.framing {
            Framing::Newline => self.read_line().await,
            Framing::LengthPrefixed => self.read_prefixed().await,
        }
    }
}

/// TCP write wrapper
pub struct TcpWriteWrapper {
    inner: OwnedWriteHalf,
    framing: Framing,
}

impl TcpWriteWrapper {
    pub fn new(write_half: OwnedWriteHalf, framing: Framing) -> Self {
        Self {
            inner: write_half,
            framing,
        }
    }
}

#[async_trait]
impl AsyncWriter for TcpWriteWrapper {
    async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let frame = self.framing.wrap(body);
        self.inner
            .write_all(&frame)
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("TCP write failed: {}", e)))?;

        // Flush to ensure data is sent
        self.inner
            .flush()
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("TCP flush failed: {}", e)))?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("TCP shutdown failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair(framing: Framing) -> ((TcpReadWrapper, TcpWriteWrapper), TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let client = connect(&address, Duration::from_secs(1), framing);
        let (client, accepted) = tokio::join!(client, listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_newline_frames() {
        let ((mut reader, mut writer), mut peer) = pair(Framing::Newline).await;

        peer.write_all(b"first?a=int:1\r\n\nsec").await.unwrap();
        peer.write_all(b"ond\n").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), b"first?a=int:1");
        assert_eq!(reader.read_frame().await.unwrap(), b"second");

        writer.write_frame(b"Switch?number=int%3A12").await.unwrap();
        let mut buf = vec![0u8; 23];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"Switch?number=int%3A12\n");
    }

    #[tokio::test]
    async fn test_length_prefixed_frames() {
        let ((mut reader, mut writer), mut peer) = pair(Framing::LengthPrefixed).await;

        peer.write_all(&Framing::LengthPrefixed.wrap(br#"{"name":"x"}"#))
            .await
            .unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), br#"{"name":"x"}"#);

        writer.write_frame(b"abc").await.unwrap();
        let mut buf = [0u8; 7];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_malformed() {
        let ((mut reader, _writer), mut peer) = pair(Framing::LengthPrefixed).await;

        peer.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), "malformed_frame");
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_lost() {
        let ((mut reader, _writer), mut peer) = pair(Framing::Newline).await;

        peer.write_all(b"partial").await.unwrap();
        drop(peer);
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), "connection_lost");
    }

    #[tokio::test]
    async fn test_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&address, Duration::from_secs(1), Framing::Newline)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "connection_refused");
    }
}
