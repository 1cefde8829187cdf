//! Connection lifecycle and request/response calls
//!
//! [`Bridge`] owns the connection state. It connects on demand, tears the
//! link down when the reader reports a failure, and fails every waiting call
//! when that happens. It never reconnects on its own: after a failure calls
//! fail with `BridgeDisconnected` until `connect()` is called again.

use crate::connection::Connection;
use crate::correlator::Correlator;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vpcom_core::{
    BridgeConfig, BridgeError, Command, ConnectionState, Event, Params, Result, ops,
};

/// Async core of the bridge
pub struct Bridge {
    config: BridgeConfig,
    correlator: Arc<Correlator>,
    /// Current link; held across connect so concurrent connects serialize
    link: Mutex<Option<Arc<Connection>>>,
    next_link_id: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    unsolicited_tx: broadcast::Sender<Event>,
}

impl Bridge {
    /// Create a bridge (not connected yet)
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (unsolicited_tx, _) = broadcast::channel(64);

        Arc::new(Self {
            config,
            correlator: Arc::new(Correlator::new()),
            link: Mutex::new(None),
            next_link_id: AtomicU64::new(1),
            state_tx,
            unsolicited_tx,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to events nobody was waiting for
    pub fn subscribe_unsolicited(&self) -> broadcast::Receiver<Event> {
        self.unsolicited_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Bridge state {} -> {}", previous, state);
        }
    }

    /// Open the link if it is not already up
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await.map(|_| ())
    }

    async fn connect_locked(
        self: &Arc<Self>,
        link: &mut Option<Arc<Connection>>,
    ) -> Result<Arc<Connection>> {
        if let Some(connection) = link.as_ref() {
            return Ok(connection.clone());
        }

        let address = self.config.address();
        info!("Connecting to peer at {}", address);
        self.set_state(ConnectionState::Connecting);

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let opened = Connection::open(
            id,
            &self.config,
            self.correlator.clone(),
            self.unsolicited_tx.clone(),
        )
        .await;

        match opened {
            Ok((connection, reader)) => {
                let connection = Arc::new(connection);
                *link = Some(connection.clone());
                self.set_state(ConnectionState::Connected);
                self.watch_link(id, reader);
                info!("Connected to peer at {}", address);
                Ok(connection)
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", address, e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Tear the link down once its reader task reports a failure
    fn watch_link(self: &Arc<Self>, id: u64, reader: JoinHandle<BridgeError>) {
        let bridge = Arc::downgrade(self);
        tokio::spawn(async move {
            // A cancelled reader means the link was closed on purpose
            let Ok(reason) = reader.await else {
                return;
            };
            if let Some(bridge) = bridge.upgrade() {
                bridge.link_lost(id, reason).await;
            }
        });
    }

    async fn link_lost(&self, id: u64, reason: BridgeError) {
        let mut link = self.link.lock().await;
        if !link.as_ref().is_some_and(|connection| connection.id() == id) {
            return;
        }
        self.fail_link(&mut link, &reason).await;
    }

    /// Close the current link, mark it failed and fail every waiting call
    async fn fail_link(&self, link: &mut Option<Arc<Connection>>, reason: &BridgeError) {
        if let Some(connection) = link.take() {
            connection.close().await;
        }
        self.set_state(ConnectionState::Failed);

        let failed = self.correlator.fail_all(&reason_text(reason));
        error!(
            "Connection to peer lost ({}), failed {} waiting call(s)",
            reason, failed
        );
    }

    /// Link to use for a call, connecting lazily when disconnected
    async fn live_link(self: &Arc<Self>) -> Result<Arc<Connection>> {
        let mut link = self.link.lock().await;
        // The reader may have ended before its watcher tore the link down
        if link.as_ref().is_some_and(|connection| !connection.is_alive()) {
            let reason = BridgeError::ConnectionLost("reader task ended".into());
            self.fail_link(&mut link, &reason).await;
        }
        if self.state() == ConnectionState::Failed {
            return Err(BridgeError::BridgeDisconnected);
        }
        self.connect_locked(&mut link).await
    }

    /// Send a command and wait for the event named `expected`
    pub async fn call(self: &Arc<Self>, command: Command, expected: &str) -> Result<Event> {
        self.call_with_timeout(command, expected, self.config.response_timeout)
            .await
    }

    /// Send a command and wait at most `timeout` for the event named `expected`
    ///
    /// The bound covers the write as well; a write that stalls past it
    /// drops the link.
    pub async fn call_with_timeout(
        self: &Arc<Self>,
        command: Command,
        expected: &str,
        timeout: Duration,
    ) -> Result<Event> {
        let connection = self.live_link().await?;

        // Register before sending so a fast reply cannot slip past
        let pending = self.correlator.register(expected)?;

        // One deadline covers both the write and the wait
        let mut sent = false;
        let exchange = tokio::time::timeout(timeout, async {
            connection.send(&command).await?;
            sent = true;
            pending.wait().await
        })
        .await;

        match exchange {
            Ok(Err(e @ BridgeError::ConnectionLost(_))) if !sent => {
                self.link_lost(connection.id(), e.clone()).await;
                Err(e)
            }
            Ok(outcome) => outcome,
            Err(_) => {
                if sent {
                    warn!("No {} within {:?}, giving up", expected, timeout);
                } else {
                    // A partly written frame leaves the stream unusable
                    warn!("Write of {} stalled for {:?}, dropping link", command.name, timeout);
                    let reason = BridgeError::ConnectionLost(format!(
                        "write of {} stalled for {:?}",
                        command.name, timeout
                    ));
                    self.link_lost(connection.id(), reason).await;
                }
                Err(BridgeError::ResponseTimeout {
                    expected: expected.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Run one controller operation and return the peer's answer
    pub async fn request(self: &Arc<Self>, op: &str, params: Params) -> Result<Value> {
        let dialect = self.config.dialect;
        let command = dialect.command(op, params);
        let expected = dialect.response_name(op);
        self.call(command, &expected).await?.into_value()
    }

    /// Stop the link
    ///
    /// Tells the peer we are stopping when the link is up, then closes it and
    /// fails anything still waiting. Safe to call at any time.
    pub async fn disconnect(self: &Arc<Self>) {
        if self.state().is_connected() {
            if let Err(e) = self.request(ops::STOP, Params::new()).await {
                warn!("Peer did not acknowledge stop: {}", e);
            }
        }

        let mut link = self.link.lock().await;
        if let Some(connection) = link.take() {
            connection.close().await;
            info!("Disconnected from peer");
        }
        let failed = self.correlator.fail_all("bridge stopped");
        if failed > 0 {
            warn!("Stopped with {} call(s) still waiting", failed);
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

fn reason_text(reason: &BridgeError) -> String {
    match reason {
        BridgeError::ConnectionLost(message) => message.clone(),
        other => other.to_string(),
    }
}
