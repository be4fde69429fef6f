//! Shared session with a background event pump.
//!
//! Wraps a [`SessionController`] so presentation code can issue commands
//! from any task while adapter events are drained on a tokio task, and
//! publishes a [`SessionSnapshot`] after every observable change.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::adapter::RadioAdapter;
use crate::ble::events::AdapterEvent;
use crate::ble::peripheral::PeripheralId;
use crate::error::Result;
use crate::session::controller::SessionController;
use crate::session::state::SessionSnapshot;

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

type SharedController<A> = Arc<Mutex<SessionController<A>>>;

/// A BLE session shared between the presentation layer and the adapter.
pub struct Session<A: RadioAdapter + 'static> {
    /// The state machine.
    controller: SharedController<A>,
    /// Snapshot channel.
    snapshot_tx: broadcast::Sender<SessionSnapshot>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Event pump task.
    pump_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl<A: RadioAdapter + 'static> Session<A> {
    /// Wrap a controller without starting an event pump.
    ///
    /// Events can then be fed with [`Session::handle_event`].
    pub fn new(controller: SessionController<A>) -> Self {
        let capacity = controller.config().observer_capacity;
        let (snapshot_tx, _) = broadcast::channel(capacity);

        Self {
            controller: Arc::new(Mutex::new(controller)),
            snapshot_tx,
            callback_counter: AtomicU64::new(0),
            pump_handle: RwLock::new(None),
        }
    }

    /// Wrap a controller and drain `events` into it on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        controller: SessionController<A>,
        events: mpsc::UnboundedReceiver<AdapterEvent>,
    ) -> Self {
        let session = Self::new(controller);
        session.start_pump(events);
        session
    }

    /// Start draining adapter events, replacing any previous pump.
    pub fn start_pump(&self, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        let controller = self.controller.clone();
        let snapshot_tx = self.snapshot_tx.clone();

        let handle = tokio::spawn(async move {
            debug!("Session event pump started");
            while let Some(event) = events.recv().await {
                Self::apply_to(&controller, &snapshot_tx, |c| c.handle_event(event));
            }
            debug!("Session event pump ended");
        });

        if let Some(previous) = self.pump_handle.write().replace(handle) {
            previous.abort();
        }
    }

    /// Feed one adapter event synchronously.
    pub fn handle_event(&self, event: AdapterEvent) {
        self.apply(|c| c.handle_event(event));
    }

    /// Start scanning.
    pub fn start_scan(&self) -> Result<()> {
        self.apply(|c| c.start_scan())
    }

    /// Stop scanning.
    pub fn stop_scan(&self) -> Result<()> {
        self.apply(|c| c.stop_scan())
    }

    /// Connect to a discovered peripheral.
    pub fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        self.apply(|c| c.connect(peripheral))
    }

    /// Disconnect from the connected peripheral.
    pub fn disconnect(&self) -> Result<()> {
        self.apply(|c| c.disconnect())
    }

    /// Send text over the write channel.
    pub fn send(&self, text: &str) -> Result<()> {
        self.apply(|c| c.send(text))
    }

    /// Enable notifications on a characteristic.
    pub fn subscribe(&self, characteristic: &Uuid) -> Result<()> {
        self.apply(|c| c.subscribe(characteristic))
    }

    /// Disable notifications on a characteristic.
    pub fn unsubscribe(&self, characteristic: &Uuid) -> Result<()> {
        self.apply(|c| c.unsubscribe(characteristic))
    }

    /// Disable notifications on every subscribed characteristic.
    pub fn unsubscribe_all(&self) -> Result<()> {
        self.apply(|c| c.unsubscribe_all())
    }

    /// Current observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller.lock().snapshot()
    }

    /// Receive a snapshot after every observable change.
    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Register a callback invoked with each new snapshot.
    pub fn on_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SessionSnapshot) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.snapshot_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => callback(snapshot),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Change callback lagged, skipped {} snapshots", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Run a closure against the controller under the session lock.
    pub fn with_controller<R>(&self, f: impl FnOnce(&SessionController<A>) -> R) -> R {
        f(&self.controller.lock())
    }

    /// Stop scanning and release the connection, best effort.
    ///
    /// The event pump keeps running so the final disconnect is observed.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down BLE session");

        self.stop_scan()?;

        let connected = self.controller.lock().state().connected().is_some();
        if connected {
            if let Err(e) = self.disconnect() {
                warn!("Error disconnecting during shutdown: {}", e);
            }
        }

        Ok(())
    }

    fn apply<R>(&self, f: impl FnOnce(&mut SessionController<A>) -> R) -> R {
        Self::apply_to(&self.controller, &self.snapshot_tx, f)
    }

    fn apply_to<R>(
        controller: &SharedController<A>,
        snapshot_tx: &broadcast::Sender<SessionSnapshot>,
        f: impl FnOnce(&mut SessionController<A>) -> R,
    ) -> R {
        let mut controller = controller.lock();
        let before = controller.revision();
        let result = f(&mut controller);

        if controller.revision() != before {
            // No receivers is fine
            let _ = snapshot_tx.send(controller.snapshot());
        }

        result
    }
}

impl<A: RadioAdapter + 'static> Drop for Session<A> {
    fn drop(&mut self) {
        if let Some(handle) = self.pump_handle.write().take() {
            handle.abort();
        }
    }
}
