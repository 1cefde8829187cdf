//! Blocking controller facade
//!
//! The host calls these methods from its own thread, one at a time. Each
//! call is spawned onto the bridge's dedicated runtime and the host thread
//! blocks on a oneshot channel until the outcome is delivered; the host
//! thread never drives the event loop itself.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::info;
use vpcom_bridge::Bridge;
use vpcom_core::{BridgeConfig, BridgeError, ConnectionState, Event, Params, Result, ops};

/// Synchronous entry points for the host
pub struct Controller {
    bridge: Arc<Bridge>,
    /// Background event loop; `None` once shut down
    runtime: Option<Runtime>,
    /// Set by `stop()`, cleared by `run()`
    stopped: AtomicBool,
}

impl Controller {
    /// Create a controller and start its background runtime
    ///
    /// Does not connect; the link is opened by `run()` or by the first call
    /// that needs it.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("vpcom-bridge")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Runtime(format!("Failed to start runtime: {}", e)))?;

        Ok(Self {
            bridge: Bridge::new(config),
            runtime: Some(runtime),
            stopped: AtomicBool::new(false),
        })
    }

    /// Run `work` on the bridge runtime and block until it finishes
    fn block_on<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BridgeError::Runtime("controller has been shut down".into()))?;

        // Blocking inside an async context would stall that context's loop
        if Handle::try_current().is_ok() {
            return Err(BridgeError::Runtime(
                "blocking controller call made from inside an async runtime".into(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        runtime.spawn(async move {
            let _ = tx.send(work.await);
        });

        rx.blocking_recv()
            .map_err(|_| BridgeError::Runtime("bridge task ended without a result".into()))?
    }

    fn request(&self, op: &'static str, params: Params) -> Result<Value> {
        let bridge = self.bridge.clone();
        self.block_on(async move { bridge.request(op, params).await })
    }

    fn request_number(&self, op: &'static str, number: u32) -> Result<Value> {
        let mut params = Params::new();
        params.insert("number".into(), Value::from(number));
        self.request(op, params)
    }

    /// Connect and tell the peer the bridge has started
    pub fn run(&self, extra_arg: Option<&str>) -> Result<bool> {
        if let Some(arg) = extra_arg {
            info!("Run received extra arg: {}", arg);
        }
        info!(
            "Starting bridge, connecting to {}",
            self.bridge.config().address()
        );

        let bridge = self.bridge.clone();
        self.block_on(async move {
            bridge.connect().await?;
            bridge.request(ops::START, Params::new()).await
        })?;

        self.stopped.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Tell the peer we are stopping and close the link
    ///
    /// Afterwards `is_stopped()` is true; the host decides whether to exit.
    pub fn stop(&self) -> Result<bool> {
        let bridge = self.bridge.clone();
        self.block_on(async move {
            bridge.disconnect().await;
            Ok(())
        })?;

        self.stopped.store(true, Ordering::SeqCst);
        info!("Bridge stopped");
        Ok(true)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.bridge.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.bridge.subscribe_state()
    }

    /// Events the peer sent that no call was waiting for
    pub fn subscribe_unsolicited(&self) -> broadcast::Receiver<Event> {
        self.bridge.subscribe_unsolicited()
    }

    /// Current value of a switch
    pub fn switch(&self, number: u32) -> Result<Value> {
        self.request_number(ops::SWITCH, number)
    }

    /// Set the value of a switch
    pub fn set_switch(&self, number: u32, value: impl Into<Value>) -> Result<Value> {
        let mut params = Params::new();
        params.insert("number".into(), Value::from(number));
        params.insert("value".into(), value.into());
        self.request(ops::SET_SWITCH, params)
    }

    pub fn mech(&self, number: u32) -> Result<Value> {
        self.request_number(ops::MECH, number)
    }

    pub fn set_mech(&self, number: u32) -> Result<Value> {
        self.request_number(ops::SET_MECH, number)
    }

    pub fn get_mech(&self, number: u32) -> Result<Value> {
        self.request_number(ops::GET_MECH, number)
    }

    /// Coils that changed since the last call
    pub fn changed_solenoids(&self) -> Result<Value> {
        self.request(ops::CHANGED_SOLENOIDS, Params::new())
    }

    /// Lamps that changed since the last call
    pub fn changed_lamps(&self) -> Result<Value> {
        self.request(ops::CHANGED_LAMPS, Params::new())
    }

    /// GI strings that changed since the last call
    pub fn changed_gi_strings(&self) -> Result<Value> {
        self.request(ops::CHANGED_GI_STRINGS, Params::new())
    }

    pub fn gi_states(&self) -> Result<Value> {
        self.request(ops::GET_GI_STATES, Params::new())
    }

    pub fn lamp_states(&self) -> Result<Value> {
        self.request(ops::GET_LAMP_STATES, Params::new())
    }

    pub fn coil_states(&self) -> Result<Value> {
        self.request(ops::GET_COIL_STATES, Params::new())
    }

    /// Stop the background runtime, waiting briefly for its tasks
    pub fn shutdown(mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use vpcom_bridge::mock_peer::{MockPeer, Reply};
    use vpcom_core::{Dialect, WireFormat};

    /// Peer on its own runtime, standing in for MPF
    fn spawn_peer<F>(format: WireFormat, handler: F) -> (Runtime, MockPeer)
    where
        F: Fn(&Event) -> Vec<Reply> + Send + Sync + 'static,
    {
        let runtime = Runtime::new().unwrap();
        let peer = runtime.block_on(MockPeer::spawn(format, handler));
        (runtime, peer)
    }

    fn pinball(event: &Event) -> Vec<Reply> {
        match event.name.as_str() {
            "Switch" => vec![Reply::respond(
                event,
                json!({"number": event.get("number").cloned(), "value": 1}),
            )],
            "Mech" => vec![],
            "ChangedLamps" => vec![Reply::Close],
            "getCoilStates" => vec![
                Reply::Event(Event::new("ball_started", None)),
                Reply::respond(event, json!({"value": [[1, false]]})),
            ],
            _ => vec![Reply::respond(event, json!({"value": event.get("value").cloned()}))],
        }
    }

    #[test]
    fn test_get_switch() {
        let (_runtime, peer) = spawn_peer(WireFormat::Bcp, pinball);
        let controller = Controller::new(peer.config()).unwrap();

        assert_eq!(controller.switch(12).unwrap(), json!(1));
        assert_eq!(controller.state(), ConnectionState::Connected);

        let received = peer.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "Switch");
        assert_eq!(received[0].get("number"), Some(&json!(12)));
    }

    #[test]
    fn test_run_and_stop() {
        let (_runtime, peer) = spawn_peer(WireFormat::Json, pinball);
        let controller = Controller::new(peer.config()).unwrap();

        assert!(controller.run(Some("extra")).unwrap());
        assert!(!controller.is_stopped());
        assert_eq!(
            controller.set_switch(20, true).unwrap(),
            json!(true)
        );

        assert!(controller.stop().unwrap());
        assert!(controller.is_stopped());
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        let names: Vec<String> = peer.received().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["start", "SetSwitch", "stop"]);
    }

    #[test]
    fn test_mech_times_out() {
        let (_runtime, peer) = spawn_peer(WireFormat::Bcp, pinball);
        let timeout = Duration::from_millis(300);
        let controller = Controller::new(BridgeConfig {
            response_timeout: timeout,
            ..peer.config()
        })
        .unwrap();
        controller.run(None).unwrap();

        let started = Instant::now();
        let err = controller.mech(3).unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind(), "response_timeout");
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));

        // The link survives a timeout
        assert_eq!(controller.switch(1).unwrap(), json!(1));
    }

    #[test]
    fn test_connection_lost_during_changed_lamps() {
        let (_runtime, peer) = spawn_peer(WireFormat::Bcp, pinball);
        let controller = Controller::new(peer.config()).unwrap();
        controller.run(None).unwrap();

        let err = controller.changed_lamps().unwrap_err();
        assert_eq!(err.kind(), "connection_lost");

        let err = controller.switch(12).unwrap_err();
        assert_eq!(err, BridgeError::BridgeDisconnected);
        assert_eq!(controller.state(), ConnectionState::Failed);

        // The host may restart the bridge
        assert!(controller.run(None).unwrap());
        assert_eq!(controller.switch(12).unwrap(), json!(1));
    }

    #[test]
    fn test_stalled_peer_does_not_block_host() {
        // Accepts the link, then never reads from it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            let _ = release_rx.recv();
        });

        let timeout = Duration::from_millis(300);
        let controller = Controller::new(BridgeConfig {
            host: "127.0.0.1".into(),
            port,
            response_timeout: timeout,
            ..Default::default()
        })
        .unwrap();

        let started = Instant::now();
        let err = controller.set_switch(1, "x".repeat(32 << 20)).unwrap_err();
        assert_eq!(err.kind(), "response_timeout");
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(controller.switch(1).unwrap_err(), BridgeError::BridgeDisconnected);
        assert!(controller.stop().unwrap());
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        drop(release_tx);
        holder.join().unwrap();
    }

    #[test]
    fn test_subcommand_operations() {
        let (_runtime, peer) = spawn_peer(WireFormat::Bcp, |event| {
            let subcommand = event.get("subcommand").cloned();
            vec![Reply::respond(event, json!({"result": subcommand}))]
        });
        let controller = Controller::new(BridgeConfig {
            dialect: Dialect::Subcommand,
            ..peer.config()
        })
        .unwrap();

        let calls: Vec<(Result<Value>, &str)> = vec![
            (controller.switch(1), "Switch"),
            (controller.set_switch(1, false), "SetSwitch"),
            (controller.mech(1), "Mech"),
            (controller.set_mech(1), "SetMech"),
            (controller.get_mech(1), "GetMech"),
            (controller.changed_solenoids(), "ChangedSolenoids"),
            (controller.changed_lamps(), "ChangedLamps"),
            (controller.changed_gi_strings(), "ChangedGIStrings"),
            (controller.gi_states(), "getGIStates"),
            (controller.lamp_states(), "getLampStates"),
            (controller.coil_states(), "getCoilStates"),
        ];
        for (result, op) in calls {
            assert_eq!(result.unwrap(), json!(op));
        }

        assert!(peer.received().iter().all(|e| e.name == "vpcom_bridge"));
    }

    #[test]
    fn test_unsolicited_events_reach_subscribers() {
        let (_runtime, peer) = spawn_peer(WireFormat::Bcp, pinball);
        let controller = Controller::new(peer.config()).unwrap();
        let mut unsolicited = controller.subscribe_unsolicited();

        assert_eq!(controller.coil_states().unwrap(), json!([[1, false]]));
        assert_eq!(unsolicited.try_recv().unwrap().name, "ball_started");
    }

    #[test]
    fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let controller = Controller::new(BridgeConfig {
            host: "127.0.0.1".into(),
            port,
            ..Default::default()
        })
        .unwrap();
        let err = controller.run(None).unwrap_err();
        assert_eq!(err.kind(), "connection_refused");
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stop_without_run() {
        let controller = Controller::new(BridgeConfig::default()).unwrap();
        assert!(controller.stop().unwrap());
        assert!(controller.is_stopped());
        controller.shutdown();
    }

    #[tokio::test]
    async fn test_blocking_call_from_async_context_is_rejected() {
        let controller = Controller::new(BridgeConfig::default()).unwrap();
        let err = controller.switch(1).unwrap_err();
        assert_eq!(err.kind(), "runtime");
    }
}
