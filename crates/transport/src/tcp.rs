//! Socket-based sessions: tunnel client, tunnel server and Wi-Fi client.
//!
//! All three share [`TcpLink`], which owns the stream and applies the frame
//! read discipline (10-byte prefix, then `payload + 4` bytes).

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;

use pcex_protocol::{Command, Packet, WireError, wire};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::LOOPBACK_HOST;
use crate::config::SessionTimeouts;
use crate::error::TransportError;
use crate::session::{HandshakeRole, SessionFuture, TransportSession};
use crate::state::{ConnectionState, DeviceDescriptor, StateCell};

/// Checks that a configured port is in `1..=65535`.
pub fn validate_port(port: u32) -> Result<u16, TransportError> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(TransportError::InvalidPort(port))
}

/// Rewrites symbolic loopback names to the literal address so that
/// connecting never depends on the resolver.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host.eq_ignore_ascii_case("localhost") || host.eq_ignore_ascii_case("localhost.") {
        LOOPBACK_HOST.to_string()
    } else {
        host.to_string()
    }
}

async fn resolve_endpoint(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let unresolved = || TransportError::UnresolvedEndpoint(format!("{host}:{port}"));
    if host.is_empty() {
        return Err(unresolved());
    }
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| unresolved())?
        .next()
        .ok_or_else(unresolved)
}

// ---------------------------------------------------------------------------
// TcpLink
// ---------------------------------------------------------------------------

/// Stream plus the state it reports.
struct TcpLink {
    kind: &'static str,
    stream: Option<TcpStream>,
    state: StateCell,
    timeouts: SessionTimeouts,
}

impl TcpLink {
    fn new(kind: &'static str, state: StateCell, timeouts: SessionTimeouts) -> Self {
        Self {
            kind,
            stream: None,
            state,
            timeouts,
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn attach(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(kind = self.kind, error = %e, "could not disable Nagle");
        }
        self.stream = Some(stream);
        self.state
            .set(ConnectionState::Connected(DeviceDescriptor::for_socket(
                self.kind, peer,
            )));
    }

    /// Drops the stream and records why.
    fn fail(&mut self, err: TransportError) -> TransportError {
        self.stream = None;
        match err {
            TransportError::PeerClosed => {
                info!(kind = self.kind, "peer closed the connection");
                self.state.set(ConnectionState::Disconnected);
            }
            ref e => {
                warn!(kind = self.kind, error = %e, "connection lost");
                self.state
                    .set(ConnectionState::error("connection lost", Some(e.to_string())));
            }
        }
        err
    }

    async fn dial(&mut self, host: &str, port: u32) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }
        let port = match validate_port(port) {
            Ok(p) => p,
            Err(e) => {
                self.state
                    .set(ConnectionState::error("invalid port", Some(e.to_string())));
                return Err(e);
            }
        };

        self.state.set(ConnectionState::Connecting);
        let connect_timeout = self.timeouts.connect();
        let result = async {
            let addr = resolve_endpoint(host, port).await?;
            match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => Ok((stream, addr)),
                Ok(Err(e)) => Err(TransportError::Io(e)),
                Err(_) => Err(TransportError::Timeout),
            }
        }
        .await;

        match result {
            Ok((stream, addr)) => {
                info!(kind = self.kind, %addr, "connected");
                self.attach(stream, addr);
                Ok(())
            }
            Err(e) => {
                warn!(kind = self.kind, host, port, error = %e, "connect failed");
                self.state.set(ConnectionState::error(
                    format!("could not connect to {host}:{port}"),
                    Some(e.to_string()),
                ));
                Err(e)
            }
        }
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result = tokio::time::timeout(self.timeouts.read(), async {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(e.into())),
            Err(_) => Err(self.fail(TransportError::Timeout)),
        }
    }

    /// A partial read leaves the stream unframed, so every failure here
    /// drops the link.
    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result =
            tokio::time::timeout(self.timeouts.read(), wire::read_frame_bytes(stream, max_len))
                .await;
        match result {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(WireError::PeerClosed)) => Err(self.fail(TransportError::PeerClosed)),
            Ok(Err(e)) => Err(self.fail(e.into())),
            Err(_) => Err(self.fail(TransportError::Timeout)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let goodbye = Packet::bare(Command::Disconnect).encode();
            let sent = tokio::time::timeout(self.timeouts.connect(), async {
                stream.write_all(&goodbye).await?;
                stream.flush().await
            })
            .await;
            match sent {
                Ok(Ok(())) => debug!(kind = self.kind, "disconnect command sent"),
                Ok(Err(e)) => {
                    warn!(kind = self.kind, error = %e, "disconnect command not delivered")
                }
                Err(_) => warn!(kind = self.kind, "disconnect command timed out"),
            }
            if let Err(e) = stream.shutdown().await {
                debug!(kind = self.kind, error = %e, "socket shutdown");
            }
            info!(kind = self.kind, "disconnected");
        }
        self.state.set(ConnectionState::Disconnected);
    }

    fn abort(&mut self, message: &str, cause: Option<String>) {
        self.stream = None;
        self.state.set(ConnectionState::error(message, cause));
    }
}

// ---------------------------------------------------------------------------
// TunnelClient
// ---------------------------------------------------------------------------

/// Dials the local end of a port-forward tunnel.
pub struct TunnelClient {
    host: String,
    port: u32,
    link: TcpLink,
}

impl TunnelClient {
    /// An empty host means the loopback address.
    pub fn new(host: &str, port: u32, state: StateCell, timeouts: SessionTimeouts) -> Self {
        let host = if host.trim().is_empty() {
            LOOPBACK_HOST.to_string()
        } else {
            normalize_host(host)
        };
        Self {
            host,
            port,
            link: TcpLink::new("tunnel", state, timeouts),
        }
    }

    /// Host after normalization.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u32 {
        self.port
    }
}

impl TransportSession for TunnelClient {
    fn connect(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(async move { self.link.dial(&self.host, self.port).await })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.link.close())
    }

    fn request_authorization(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn has_authorization(&self) -> bool {
        true
    }

    fn send<'a>(&'a mut self, frame: &'a [u8]) -> SessionFuture<'a, ()> {
        Box::pin(self.link.send(frame))
    }

    fn receive(&mut self, max_len: usize) -> SessionFuture<'_, Vec<u8>> {
        Box::pin(self.link.receive(max_len))
    }

    fn role(&self) -> HandshakeRole {
        HandshakeRole::Initiator
    }

    fn abort(&mut self, message: &str, cause: Option<String>) {
        self.link.abort(message, cause)
    }

    fn state(&self) -> &StateCell {
        &self.link.state
    }
}

// ---------------------------------------------------------------------------
// WifiClient
// ---------------------------------------------------------------------------

/// Dials a user-supplied host directly.
pub struct WifiClient {
    host: String,
    port: u32,
    link: TcpLink,
}

impl WifiClient {
    pub fn new(host: &str, port: u32, state: StateCell, timeouts: SessionTimeouts) -> Self {
        Self {
            host: normalize_host(host),
            port,
            link: TcpLink::new("wifi", state, timeouts),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u32 {
        self.port
    }
}

impl TransportSession for WifiClient {
    fn connect(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(async move { self.link.dial(&self.host, self.port).await })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.link.close())
    }

    fn request_authorization(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn has_authorization(&self) -> bool {
        true
    }

    fn send<'a>(&'a mut self, frame: &'a [u8]) -> SessionFuture<'a, ()> {
        Box::pin(self.link.send(frame))
    }

    fn receive(&mut self, max_len: usize) -> SessionFuture<'_, Vec<u8>> {
        Box::pin(self.link.receive(max_len))
    }

    fn role(&self) -> HandshakeRole {
        HandshakeRole::Initiator
    }

    fn abort(&mut self, message: &str, cause: Option<String>) {
        self.link.abort(message, cause)
    }

    fn state(&self) -> &StateCell {
        &self.link.state
    }
}

// ---------------------------------------------------------------------------
// TunnelServer
// ---------------------------------------------------------------------------

/// Listens on loopback for the remote host to dial in through a reverse
/// tunnel. Accepts exactly one peer, then stops listening.
pub struct TunnelServer {
    port: u32,
    listener: Option<TcpListener>,
    link: TcpLink,
}

impl TunnelServer {
    pub fn new(port: u32, state: StateCell, timeouts: SessionTimeouts) -> Self {
        Self {
            port,
            listener: None,
            link: TcpLink::new("tunnel-server", state, timeouts),
        }
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    /// Binds the listening socket without waiting for a peer.
    ///
    /// [`connect`](TransportSession::connect) calls this when needed; calling
    /// it first lets the caller start the peer before blocking on accept.
    pub async fn listen(&mut self) -> Result<u16, TransportError> {
        let port = validate_port(self.port)?;
        if self.listener.is_some() {
            return Ok(port);
        }
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AddrInUse => TransportError::PortInUse(port),
                _ => TransportError::Io(e),
            })?;
        info!(port, "tunnel server listening");
        self.listener = Some(listener);
        Ok(port)
    }

    async fn accept(&mut self) -> Result<(), TransportError> {
        if self.link.is_open() {
            return Ok(());
        }
        self.link.state.set(ConnectionState::Connecting);

        let result = async {
            self.listen().await?;
            let listener = self.listener.as_ref().ok_or(TransportError::NotConnected)?;
            match tokio::time::timeout(self.link.timeouts.accept(), listener.accept()).await {
                Ok(Ok(accepted)) => Ok(accepted),
                Ok(Err(e)) => Err(TransportError::Io(e)),
                Err(_) => Err(TransportError::Timeout),
            }
        }
        .await;

        // One peer per session.
        self.listener = None;

        match result {
            Ok((stream, peer)) => {
                info!(%peer, "tunnel peer accepted");
                self.link.attach(stream, peer);
                Ok(())
            }
            Err(e) => {
                warn!(port = self.port, error = %e, "tunnel server accept failed");
                self.link.state.set(ConnectionState::error(
                    format!("no peer on port {}", self.port),
                    Some(e.to_string()),
                ));
                Err(e)
            }
        }
    }
}

impl TransportSession for TunnelServer {
    fn connect(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(self.accept())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.listener = None;
        Box::pin(self.link.close())
    }

    fn request_authorization(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn has_authorization(&self) -> bool {
        true
    }

    fn send<'a>(&'a mut self, frame: &'a [u8]) -> SessionFuture<'a, ()> {
        Box::pin(self.link.send(frame))
    }

    fn receive(&mut self, max_len: usize) -> SessionFuture<'_, Vec<u8>> {
        Box::pin(self.link.receive(max_len))
    }

    fn role(&self) -> HandshakeRole {
        HandshakeRole::Responder
    }

    fn abort(&mut self, message: &str, cause: Option<String>) {
        self.listener = None;
        self.link.abort(message, cause)
    }

    fn state(&self) -> &StateCell {
        &self.link.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcex_protocol::Flags;
    use pcex_protocol::constants::MAX_FRAME_SIZE;
    use std::time::Duration;

    fn timeouts() -> SessionTimeouts {
        SessionTimeouts {
            connect_ms: 2_000,
            read_ms: 2_000,
            accept_ms: 2_000,
            usb_ms: 2_000,
        }
    }

    /// Binds an ephemeral loopback port and releases it.
    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    #[test]
    fn port_validation() {
        assert!(matches!(validate_port(0), Err(TransportError::InvalidPort(0))));
        assert!(matches!(
            validate_port(70_000),
            Err(TransportError::InvalidPort(70_000))
        ));
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65_535).unwrap(), 65_535);
    }

    #[test]
    fn localhost_normalized() {
        assert_eq!(normalize_host("localhost"), "127.0.0.1");
        assert_eq!(normalize_host(" LocalHost "), "127.0.0.1");
        assert_eq!(normalize_host("10.0.0.2"), "10.0.0.2");

        let a = TunnelClient::new("localhost", 5555, StateCell::new(), timeouts());
        let b = TunnelClient::new("127.0.0.1", 5555, StateCell::new(), timeouts());
        assert_eq!((a.host(), a.port()), (b.host(), b.port()));
    }

    #[tokio::test]
    async fn invalid_port_fails_before_connecting() {
        for port in [0u32, 70_000] {
            let state = StateCell::new();
            let mut client = TunnelClient::new("127.0.0.1", port, state.clone(), timeouts());
            let err = client.connect().await.unwrap_err();
            assert!(matches!(err, TransportError::InvalidPort(p) if p == port));
            assert!(matches!(state.get(), ConnectionState::Error { .. }));
        }
    }

    #[tokio::test]
    async fn localhost_and_literal_reach_same_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = tokio::spawn(async move {
            for _ in 0..2 {
                let (_s, _) = listener.accept().await.unwrap();
            }
        });

        for host in ["localhost", "127.0.0.1"] {
            let state = StateCell::new();
            let mut client = TunnelClient::new(host, port.into(), state.clone(), timeouts());
            client.connect().await.unwrap();
            assert!(state.get().is_connected(), "{host}");
        }
        acceptor.await.unwrap();
    }

    #[tokio::test]
    async fn client_exchanges_frames_with_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let req = wire::read_frame(&mut s).await.unwrap();
            assert_eq!(req.command(), Some(Command::Handshake));
            let reply = Packet::new(Command::ResponseOk, Flags::NONE, b"SERVER".to_vec()).unwrap();
            wire::write_frame(&mut s, &reply).await.unwrap();
            // goodbye frame on disconnect
            let bye = wire::read_frame(&mut s).await.unwrap();
            assert_eq!(bye.command(), Some(Command::Disconnect));
        });

        let state = StateCell::new();
        let mut client = WifiClient::new("127.0.0.1", port.into(), state.clone(), timeouts());
        client.connect().await.unwrap();

        let hello = Packet::new(Command::Handshake, Flags::NONE, b"CLIENT".to_vec()).unwrap();
        client.send(&hello.encode()).await.unwrap();
        let raw = client.receive(MAX_FRAME_SIZE).await.unwrap();
        let reply = Packet::decode(&raw).unwrap();
        assert_eq!(reply.payload(), b"SERVER");

        client.disconnect().await;
        assert_eq!(state.get(), ConnectionState::Disconnected);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_reports_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            drop(s);
        });

        let state = StateCell::new();
        let mut client = TunnelClient::new("127.0.0.1", port.into(), state.clone(), timeouts());
        client.connect().await.unwrap();
        peer.await.unwrap();

        let err = client.receive(MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed));
        assert_eq!(state.get(), ConnectionState::Disconnected);
        assert!(matches!(
            client.send(b"x").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn receive_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(s);
        });

        let t = SessionTimeouts {
            read_ms: 100,
            ..timeouts()
        };
        let mut client = TunnelClient::new("127.0.0.1", port.into(), StateCell::new(), t);
        client.connect().await.unwrap();
        assert!(matches!(
            client.receive(MAX_FRAME_SIZE).await,
            Err(TransportError::Timeout)
        ));
        peer.abort();
    }

    #[tokio::test]
    async fn connect_refused_sets_error_state() {
        let port = free_port();
        let state = StateCell::new();
        let mut client = TunnelClient::new("127.0.0.1", port.into(), state.clone(), timeouts());
        assert!(client.connect().await.is_err());
        assert!(matches!(state.get(), ConnectionState::Error { .. }));
    }

    #[tokio::test]
    async fn empty_wifi_host_is_unresolved() {
        let mut client = WifiClient::new("", 5555, StateCell::new(), timeouts());
        assert!(matches!(
            client.connect().await,
            Err(TransportError::UnresolvedEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn tunnel_server_accepts_one_peer() {
        let port = free_port();
        let state = StateCell::new();
        let mut server = TunnelServer::new(port.into(), state.clone(), timeouts());
        assert_eq!(server.listen().await.unwrap(), port);

        let peer = tokio::spawn(async move {
            let mut s = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let hello = Packet::new(Command::Handshake, Flags::NONE, b"PCEX-Server-1.0".to_vec())
                .unwrap();
            wire::write_frame(&mut s, &hello).await.unwrap();
            wire::read_frame(&mut s).await.unwrap()
        });

        server.connect().await.unwrap();
        assert!(state.get().is_connected());
        assert_eq!(server.role(), HandshakeRole::Responder);

        let raw = server.receive(MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(Packet::decode(&raw).unwrap().payload(), b"PCEX-Server-1.0");
        server
            .send(&Packet::bare(Command::ResponseOk).encode())
            .await
            .unwrap();

        let ack = peer.await.unwrap();
        assert_eq!(ack.command(), Some(Command::ResponseOk));

        // listener was dropped after the single accept
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn tunnel_server_port_in_use() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let mut server = TunnelServer::new(port.into(), StateCell::new(), timeouts());
        let err = server.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::PortInUse(p) if p == port));
    }

    #[tokio::test]
    async fn tunnel_server_invalid_port() {
        let mut server = TunnelServer::new(0, StateCell::new(), timeouts());
        assert!(matches!(
            server.connect().await,
            Err(TransportError::InvalidPort(0))
        ));
    }

    #[tokio::test]
    async fn tunnel_server_accept_timeout() {
        let t = SessionTimeouts {
            accept_ms: 50,
            ..timeouts()
        };
        let state = StateCell::new();
        let mut server = TunnelServer::new(free_port().into(), state.clone(), t);
        assert!(matches!(
            server.connect().await,
            Err(TransportError::Timeout)
        ));
        assert!(matches!(state.get(), ConnectionState::Error { .. }));
    }
}
