//! TCP listener and per-connection reader tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, tcp::OwnedReadHalf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Read buffer size per connection. Sized for the largest observed HL7
/// transmissions; larger messages simply arrive in several reads.
const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Errors that can occur in the transport layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Failed to bind to address
    #[error("failed to bind to {0}")]
    BindFailed(SocketAddr),

    /// The peer closed the connection
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Timed out waiting for a control byte
    #[error("timed out waiting for control byte from {0}")]
    ControlTimeout(String),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event produced by a connection reader task.
#[derive(Debug)]
pub enum Inbound {
    /// A non-empty read from a connection, in arrival order.
    Data {
        /// Connection key (peer IP).
        addr: String,
        /// The bytes as read off the socket; frames may be split or
        /// coalesced arbitrarily across events.
        bytes: Bytes,
    },
    /// The connection closed; per-connection framing state can be dropped.
    Disconnected {
        /// Connection key (peer IP).
        addr: String,
    },
}

/// TCP listener that fans all inbound instrument traffic into one channel.
///
/// One reader task is spawned per accepted connection. Readers never parse:
/// they forward raw reads to the pipeline and tee single-byte payloads into
/// the connection's control channel for handshake waits.
///
/// # Connection keying
///
/// Connections are keyed by peer IP only, matching how devices are
/// provisioned (`Device.net_address`). Instruments live on dedicated
/// addresses; a second connection from the same address replaces the first
/// in the registry.
pub struct DeviceListener {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl DeviceListener {
    /// Bind the listener and create the fan-in channel.
    ///
    /// Returns the listener and the receiving end of the channel; the
    /// caller hands the receiver to the single pipeline consumer.
    pub async fn bind(
        bind_addr: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Inbound>), NetworkError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|_| NetworkError::BindFailed(bind_addr))?;

        info!("device listener bound to {}", bind_addr);

        let (tx, rx) = mpsc::unbounded_channel();
        let server = Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
            tx,
        };

        Ok((server, rx))
    }

    /// The registry of live connections, shared with the pipeline.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The address the listener actually bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Accept connections until the listener socket fails.
    ///
    /// Dropping the returned future's task closes the listener; in-flight
    /// reader tasks exit on their next read error and the pipeline drains
    /// whatever is already queued.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("listener accept failed: {}", e);
                    return;
                }
            };

            let addr = peer.ip().to_string();
            info!(
                "accepted connection from {} (total: {})",
                addr,
                self.registry.len() + 1
            );

            if let Err(e) = stream.set_nodelay(true) {
                warn!("failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let (read_half, write_half) = stream.into_split();
            let (handle, control_tx) = ConnectionHandle::new(addr.clone(), write_half);
            self.registry.register(Arc::clone(&handle));

            let registry = Arc::clone(&self.registry);
            let tx = self.tx.clone();
            tokio::spawn(async move {
                read_connection(read_half, &addr, &tx, control_tx).await;
                registry.unregister(&addr, &handle);
                let _ = tx.send(Inbound::Disconnected { addr: addr.clone() });
                info!("connection from {} closed", addr);
            });
        }
    }
}

/// Reader loop for one connection.
///
/// Forwards every non-empty read to the fan-in channel. Single-byte reads
/// are also offered to the control channel: in the ASTM answer flow the
/// pipeline waits on that channel for the instrument's ACK. A stray control
/// byte that nobody is waiting for is pre-frame noise the framer discards.
async fn read_connection(
    mut read_half: OwnedReadHalf,
    addr: &str,
    tx: &mpsc::UnboundedSender<Inbound>,
    control_tx: mpsc::Sender<u8>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                debug!("read error from {}: {}", addr, e);
                return;
            }
        };

        if n == 1 {
            let _ = control_tx.try_send(buf[0]);
        }

        let event = Inbound::Data {
            addr: addr.to_string(),
            bytes: Bytes::copy_from_slice(&buf[..n]),
        };
        if tx.send(event).is_err() {
            // Pipeline is gone; nothing left to read for.
            return;
        }
    }
}
