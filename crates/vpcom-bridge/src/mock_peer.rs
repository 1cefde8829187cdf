//! Scripted stand-in for the peer process
//!
//! Listens on a loopback port, decodes every inbound command, records it,
//! and writes whatever replies the handler returns. Used by tests here and
//! in the controller crate (feature `test-util`).

use crate::codec::Codec;
use crate::tcp;
use crate::transport::{AsyncReader, AsyncWriter};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;
use vpcom_core::{BridgeConfig, Command, Event, RESPONSE_SUFFIX, WireFormat};

/// What the peer does after receiving a command
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send an event
    Event(Event),
    /// Send a raw frame body
    Raw(Vec<u8>),
    /// Pause before the next reply
    Delay(Duration),
    /// Close the connection
    Close,
}

impl Reply {
    /// Answer `command` with `<name>_response` carrying `payload`
    pub fn respond(command: &Event, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                let mut map = vpcom_core::Params::new();
                map.insert("value".into(), other);
                Some(map)
            }
        };
        Reply::Event(Event::new(
            format!("{}{}", command.name, RESPONSE_SUFFIX),
            payload,
        ))
    }
}

type Handler = dyn Fn(&Event) -> Vec<Reply> + Send + Sync;

/// Loopback peer driven by a reply handler
pub struct MockPeer {
    address: String,
    format: WireFormat,
    received: Arc<Mutex<Vec<Event>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockPeer {
    /// Start listening on an ephemeral loopback port
    pub async fn spawn<F>(format: WireFormat, handler: F) -> Self
    where
        F: Fn(&Event) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock peer");
        let address = listener
            .local_addr()
            .expect("mock peer address")
            .to_string();

        let handler: Arc<Handler> = Arc::new(handler);
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(accept_loop(
            listener,
            Codec::new(format),
            handler,
            received.clone(),
            connections.clone(),
        ));

        Self {
            address,
            format,
            received,
            connections,
            task,
        }
    }

    /// Peer that answers every command with `value: null`
    pub async fn acknowledging(format: WireFormat) -> Self {
        Self::spawn(format, |event| {
            vec![Reply::respond(event, serde_json::json!({"value": null}))]
        })
        .await
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Bridge config pointing at this peer, with short timeouts
    pub fn config(&self) -> BridgeConfig {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .expect("mock peer address has a port");
        BridgeConfig {
            host: host.to_string(),
            port: port.parse().expect("mock peer port"),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_millis(500),
            wire_format: self.format,
            ..Default::default()
        }
    }

    /// Commands received so far, in arrival order
    pub fn received(&self) -> Vec<Event> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    codec: Codec,
    handler: Arc<Handler>,
    received: Arc<Mutex<Vec<Event>>>,
    connections: Arc<AtomicUsize>,
) {
    // Connection tasks die with this one
    let mut sessions = tokio::task::JoinSet::new();
    while let Ok((stream, _)) = listener.accept().await {
        connections.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = tcp::split(stream, codec.framing());
        sessions.spawn(serve(
            reader,
            writer,
            codec,
            handler.clone(),
            received.clone(),
        ));
    }
}

async fn serve(
    mut reader: tcp::TcpReadWrapper,
    mut writer: tcp::TcpWriteWrapper,
    codec: Codec,
    handler: Arc<Handler>,
    received: Arc<Mutex<Vec<Event>>>,
) {
    while let Ok(frame) = reader.read_frame().await {
        let Ok(command) = codec.decode(&frame) else {
            return;
        };
        debug!("Mock peer received {}", command.name);
        received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());

        for reply in handler(&command) {
            let written = match reply {
                Reply::Event(event) => match codec.encode(&Command::from(event)) {
                    Ok(body) => writer.write_frame(&body).await,
                    Err(_) => return,
                },
                Reply::Raw(body) => writer.write_frame(&body).await,
                Reply::Delay(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(())
                }
                Reply::Close => return,
            };
            if written.is_err() {
                return;
            }
        }
    }
}
