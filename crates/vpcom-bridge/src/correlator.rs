//! Response correlation
//!
//! Outstanding waits are keyed by the name of the event that answers them.
//! The protocol is strictly call-and-response, so at most one wait per name
//! may be outstanding; a second registration is a caller bug and is
//! rejected. Waits are removed the moment they resolve, fail, or their
//! handle is dropped, so a late response can never reach a later caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use vpcom_core::{BridgeError, Event, Result};

struct Slot {
    id: u64,
    created_at: Instant,
    tx: oneshot::Sender<Result<Event>>,
}

/// Matches inbound events to outstanding waits
#[derive(Default)]
pub struct Correlator {
    waits: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a wait for the event named `expected_name`
    pub fn register(self: &Arc<Self>, expected_name: impl Into<String>) -> Result<PendingWait> {
        let expected_name = expected_name.into();
        let mut waits = self.lock();

        if waits.contains_key(&expected_name) {
            warn!("Rejected second wait for {}", expected_name);
            return Err(BridgeError::DuplicateWait(expected_name));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = Instant::now();
        let (tx, rx) = oneshot::channel();
        waits.insert(expected_name.clone(), Slot { id, created_at, tx });

        Ok(PendingWait {
            expected_name,
            id,
            created_at,
            rx,
            correlator: Arc::downgrade(self),
        })
    }

    /// Resolve the wait matching `event`
    ///
    /// Returns the event back when nobody was waiting for it.
    pub fn on_event(&self, event: Event) -> Option<Event> {
        let slot = self.lock().remove(&event.name)?;

        debug!(
            "Resolved {} after {:?}",
            event.name,
            slot.created_at.elapsed()
        );
        match slot.tx.send(Ok(event)) {
            Ok(()) => None,
            // Waiter gave up between removal and delivery
            Err(Ok(event)) => Some(event),
            Err(Err(_)) => None,
        }
    }

    /// Fail every outstanding wait with `ConnectionLost`
    ///
    /// Returns the number of waits failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, Slot)> = self.lock().drain().collect();
        let count = drained.len();

        for (name, slot) in drained {
            debug!("Failing wait for {}: {}", name, reason);
            let _ = slot
                .tx
                .send(Err(BridgeError::ConnectionLost(reason.to_string())));
        }
        count
    }

    /// Number of outstanding waits
    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    fn retire(&self, expected_name: &str, id: u64) {
        let mut waits = self.lock();
        if waits.get(expected_name).is_some_and(|slot| slot.id == id) {
            waits.remove(expected_name);
            debug!("Retired wait for {}", expected_name);
        }
    }
}

/// Handle to one outstanding wait
///
/// Dropping the handle retires the wait.
pub struct PendingWait {
    expected_name: String,
    id: u64,
    created_at: Instant,
    rx: oneshot::Receiver<Result<Event>>,
    correlator: Weak<Correlator>,
}

impl PendingWait {
    pub fn expected_name(&self) -> &str {
        &self.expected_name
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Wait for the matching event or a connection failure
    pub async fn wait(mut self) -> Result<Event> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::ConnectionLost(
                "correlator dropped before the response arrived".into(),
            )),
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.retire(&self.expected_name, self.id);
        }
    }
}
