//! Live-connection registry and the per-connection write handle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};

use crate::listener::NetworkError;

/// Capacity of the per-connection control-byte channel.
///
/// ACK/NAK exchanges are strictly request/response, so a single slot is
/// enough; a second unsolicited byte simply replaces nothing and is dropped
/// by `try_send`.
const CONTROL_CHANNEL_CAPACITY: usize = 1;

/// Write-side handle for one instrument connection.
///
/// The read half of the socket stays with the reader task; this handle owns
/// the write half plus the receiving end of the control-byte channel the
/// reader tees single-byte payloads into. It is shared between the registry
/// and the pipeline via `Arc`.
#[derive(Debug)]
pub struct ConnectionHandle {
    addr: String,
    writer: Mutex<OwnedWriteHalf>,
    control: Mutex<mpsc::Receiver<u8>>,
}

impl ConnectionHandle {
    /// Wrap the write half of an accepted socket.
    ///
    /// Normally called by the listener; the returned sender is the tee the
    /// reader task feeds single-byte payloads into.
    pub fn new(addr: String, writer: OwnedWriteHalf) -> (Arc<Self>, mpsc::Sender<u8>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let handle = Arc::new(Self {
            addr,
            writer: Mutex::new(writer),
            control: Mutex::new(control_rx),
        });
        (handle, control_tx)
    }

    /// The connection key (peer IP) this handle belongs to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write raw bytes to the instrument.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), NetworkError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait for a single control byte (ACK/NAK) from the instrument.
    ///
    /// The wait is bounded: a hung instrument mid-handshake must not stall
    /// the shared pipeline consumer indefinitely.
    pub async fn recv_control_byte(&self, wait: Duration) -> Result<u8, NetworkError> {
        let mut control = self.control.lock().await;
        match tokio::time::timeout(wait, control.recv()).await {
            Ok(Some(byte)) => Ok(byte),
            Ok(None) => Err(NetworkError::ConnectionClosed(self.addr.clone())),
            Err(_) => Err(NetworkError::ControlTimeout(self.addr.clone())),
        }
    }

    /// Discard any control byte left over from a previous exchange.
    ///
    /// Called at the start of a handshake so a stale ACK cannot satisfy the
    /// wait for a fresh one.
    pub async fn clear_control(&self) {
        let mut control = self.control.lock().await;
        while control.try_recv().is_ok() {}
    }
}

/// Registry of live connections keyed by peer address.
///
/// Devices are provisioned by network address, so the peer IP is the key
/// that routes inbound traffic to a device. The map is mutated only by the
/// accept loop and the reader tasks (register/unregister) and read by the
/// pipeline (lookup); the lock is held for map operations only.
///
/// A reconnecting instrument replaces its previous registry entry: the key
/// identifies the device, not the socket.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection handle, replacing any previous one for the
    /// same address.
    pub(crate) fn register(&self, handle: Arc<ConnectionHandle>) {
        let mut inner = self.inner.write().expect("connection registry poisoned");
        inner.insert(handle.addr().to_string(), handle);
    }

    /// Remove a connection. A newer handle under the same address is left
    /// alone (the instrument reconnected before the old reader exited).
    pub(crate) fn unregister(&self, addr: &str, handle: &Arc<ConnectionHandle>) {
        let mut inner = self.inner.write().expect("connection registry poisoned");
        if let Some(current) = inner.get(addr)
            && Arc::ptr_eq(current, handle)
        {
            inner.remove(addr);
        }
    }

    /// Look up the live connection for an address.
    pub fn lookup(&self, addr: &str) -> Option<Arc<ConnectionHandle>> {
        let inner = self.inner.read().expect("connection registry poisoned");
        inner.get(addr).cloned()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("connection registry poisoned");
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
