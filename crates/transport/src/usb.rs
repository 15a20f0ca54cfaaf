//! Direct USB session.
//!
//! The platform USB stack is reached through [`UsbHost`] and
//! [`UsbConnection`]. Their calls block, so the session runs them on the
//! blocking pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pcex_protocol::{Command, Packet};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::session::{HandshakeRole, SessionFuture, TransportSession};
use crate::state::{ConnectionState, DeviceDescriptor, StateCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Interface and endpoint addresses of a claimed bulk channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkChannel {
    pub interface: u8,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
}

/// Finds the first interface exposing both a bulk IN and a bulk OUT endpoint.
pub fn find_bulk_pair(interfaces: &[InterfaceDescriptor]) -> Option<BulkChannel> {
    interfaces.iter().find_map(|iface| {
        let bulk = |dir| {
            iface
                .endpoints
                .iter()
                .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction == dir)
                .map(|ep| ep.address)
        };
        Some(BulkChannel {
            interface: iface.number,
            endpoint_in: bulk(EndpointDirection::In)?,
            endpoint_out: bulk(EndpointDirection::Out)?,
        })
    })
}

/// Platform USB host stack.
pub trait UsbHost: Send + Sync {
    /// Currently attached peers.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Shows the platform permission prompt. Returns immediately; the
    /// grant is observed through [`has_permission`](Self::has_permission).
    fn request_permission(&self, device: &DeviceDescriptor);

    fn open(&self, device: &DeviceDescriptor) -> std::io::Result<Box<dyn UsbConnection>>;
}

/// An opened device handle.
pub trait UsbConnection: Send {
    fn interfaces(&self) -> Vec<InterfaceDescriptor>;

    /// Claims exclusive access to an interface.
    fn claim_interface(&mut self, interface: u8) -> bool;

    fn release_interface(&mut self, interface: u8) -> bool;

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration)
    -> std::io::Result<usize>;

    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration)
    -> std::io::Result<usize>;

    fn close(&mut self);
}

type SharedConnection = Arc<Mutex<Box<dyn UsbConnection>>>;

struct OpenChannel {
    conn: SharedConnection,
    channel: BulkChannel,
}

/// Session over a directly attached USB peer.
pub struct DirectHost {
    host: Arc<dyn UsbHost>,
    state: StateCell,
    timeout: Duration,
    open: Option<OpenChannel>,
}

impl DirectHost {
    pub fn new(host: Arc<dyn UsbHost>, state: StateCell, timeout: Duration) -> Self {
        Self {
            host,
            state,
            timeout,
            open: None,
        }
    }

    fn first_device(&self) -> Option<DeviceDescriptor> {
        self.host.devices().into_iter().next()
    }

    fn fail(&mut self, message: &str, err: TransportError) -> TransportError {
        let state = match err {
            TransportError::AuthorizationRequired => ConnectionState::AuthorizationRequired,
            ref e => ConnectionState::error(message, Some(e.to_string())),
        };
        self.state.set(state);
        err
    }

    async fn open_channel(&mut self) -> Result<(), TransportError> {
        if self.open.is_some() {
            return Ok(());
        }
        self.state.set(ConnectionState::Connecting);

        let Some(device) = self.first_device() else {
            return Err(self.fail("no device attached", TransportError::NoDeviceFound));
        };
        if !self.host.has_permission(&device) {
            info!(device = %device.id, "USB permission not granted");
            return Err(self.fail("permission required", TransportError::AuthorizationRequired));
        }

        let host = Arc::clone(&self.host);
        let target = device.clone();
        let opened = tokio::task::spawn_blocking(move || -> Result<_, TransportError> {
            let mut conn = host
                .open(&target)
                .map_err(|e| TransportError::ChannelClaimFailed(e.to_string()))?;
            let Some(channel) = find_bulk_pair(&conn.interfaces()) else {
                conn.close();
                return Err(TransportError::EndpointNotFound);
            };
            if !conn.claim_interface(channel.interface) {
                conn.close();
                return Err(TransportError::ChannelClaimFailed(format!(
                    "interface {} busy",
                    channel.interface
                )));
            }
            Ok((conn, channel))
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)));

        match opened.and_then(|r| r) {
            Ok((conn, channel)) => {
                info!(
                    device = %device.id,
                    interface = channel.interface,
                    ep_in = channel.endpoint_in,
                    ep_out = channel.endpoint_out,
                    "USB channel open"
                );
                self.open = Some(OpenChannel {
                    conn: Arc::new(Mutex::new(conn)),
                    channel,
                });
                self.state.set(ConnectionState::Connected(device));
                Ok(())
            }
            Err(e) => Err(self.fail("could not open USB channel", e)),
        }
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let open = self.open.as_ref().ok_or(TransportError::NotConnected)?;
        let conn = Arc::clone(&open.conn);
        let endpoint = open.channel.endpoint_out;
        let timeout = self.timeout;
        let data = frame.to_vec();

        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut conn = conn.lock().unwrap();
            let mut written = 0;
            while written < data.len() {
                let n = conn.bulk_write(endpoint, &data[written..], timeout)?;
                if n == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::WriteZero));
                }
                written += n;
            }
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);

        result.map_err(|e| self.io_failure(e))
    }

    async fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let open = self.open.as_ref().ok_or(TransportError::NotConnected)?;
        let conn = Arc::clone(&open.conn);
        let endpoint = open.channel.endpoint_in;
        let timeout = self.timeout;

        let result = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut buf = vec![0u8; max_len];
            let n = conn.lock().unwrap().bulk_read(endpoint, &mut buf, timeout)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);

        match result {
            Ok(buf) if buf.is_empty() => {
                self.teardown();
                self.state.set(ConnectionState::Disconnected);
                Err(TransportError::PeerClosed)
            }
            Ok(buf) => Ok(buf),
            Err(e) => Err(self.io_failure(e)),
        }
    }

    fn io_failure(&mut self, e: std::io::Error) -> TransportError {
        if e.kind() == std::io::ErrorKind::TimedOut {
            return TransportError::Timeout;
        }
        warn!(error = %e, "USB transfer failed");
        self.teardown();
        self.fail("USB transfer failed", TransportError::Io(e))
    }

    /// Releases the interface, then closes the handle.
    fn teardown(&mut self) {
        if let Some(open) = self.open.take() {
            let mut conn = open.conn.lock().unwrap();
            if !conn.release_interface(open.channel.interface) {
                warn!(interface = open.channel.interface, "USB interface release failed");
            }
            conn.close();
            debug!("USB channel closed");
        }
    }

    async fn close(&mut self) {
        if self.open.is_some() {
            let goodbye = Packet::bare(Command::Disconnect).encode();
            match self.write(&goodbye).await {
                Ok(()) => debug!("disconnect command sent"),
                Err(e) => warn!(error = %e, "disconnect command not delivered"),
            }
            self.teardown();
        }
        self.state.set(ConnectionState::Disconnected);
    }

    async fn authorize(&mut self) -> Result<(), TransportError> {
        let Some(device) = self.first_device() else {
            return Err(self.fail("no device attached", TransportError::NoDeviceFound));
        };
        if self.host.has_permission(&device) {
            return Ok(());
        }
        info!(device = %device.id, "requesting USB permission");
        self.host.request_permission(&device);
        self.state.set(ConnectionState::AuthorizationRequired);
        Ok(())
    }
}

impl TransportSession for DirectHost {
    fn connect(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(self.open_channel())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.close())
    }

    fn request_authorization(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(self.authorize())
    }

    fn has_authorization(&self) -> bool {
        self.first_device()
            .is_some_and(|d| self.host.has_permission(&d))
    }

    fn send<'a>(&'a mut self, frame: &'a [u8]) -> SessionFuture<'a, ()> {
        Box::pin(self.write(frame))
    }

    fn receive(&mut self, max_len: usize) -> SessionFuture<'_, Vec<u8>> {
        Box::pin(self.read(max_len))
    }

    fn role(&self) -> HandshakeRole {
        HandshakeRole::Initiator
    }

    fn abort(&mut self, message: &str, cause: Option<String>) {
        self.teardown();
        self.state.set(ConnectionState::error(message, cause));
    }

    fn state(&self) -> &StateCell {
        &self.state
    }
}
