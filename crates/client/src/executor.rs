//! Request/response execution over the active session.

use std::sync::Arc;

use pcex_protocol::constants::MAX_FRAME_SIZE;
use pcex_protocol::{Command, Flags, Packet, PayloadError, RemoteError};
use pcex_transport::{HandshakeRole, Session, SessionGuard, SessionSelector, TransportSession};
use tracing::{debug, info, warn};

use crate::error::CommandError;

/// Sends commands through the session selector.
pub struct CommandExecutor {
    selector: Arc<SessionSelector>,
}

impl CommandExecutor {
    pub fn new(selector: Arc<SessionSelector>) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &SessionSelector {
        &self.selector
    }

    /// Takes exclusive use of the wire.
    ///
    /// Everything sent and received through the returned [`Exchange`] is
    /// guaranteed not to interleave with other callers. Hold it for one
    /// request/response cycle, or for a whole chunk stream.
    pub async fn exchange(&self) -> Result<Exchange<'_>, CommandError> {
        Ok(Exchange {
            session: self.selector.lock().await?,
            pending: false,
        })
    }

    /// Sends `command` with `payload` and parses the single response.
    pub async fn execute<T, F>(
        &self,
        command: Command,
        payload: Vec<u8>,
        parse: F,
    ) -> Result<T, CommandError>
    where
        F: FnOnce(&[u8]) -> Result<T, PayloadError>,
    {
        self.exchange().await?.execute(command, payload, parse).await
    }

    /// Opens the configured session and runs the handshake for its role.
    ///
    /// Returns the identity string presented by the remote host.
    pub async fn connect(&self) -> Result<String, CommandError> {
        let identity = self.selector.config().client_identity;
        let mut exchange = self.exchange().await?;
        exchange.session().connect().await?;
        exchange.handshake(&identity).await
    }

    /// Says goodbye and tears the session down. Never fails.
    pub async fn disconnect(&self) {
        self.selector.disconnect().await;
    }
}

/// Exclusive hold on the wire for the duration of one exchange.
///
/// Sending marks a response as owed. If the exchange is dropped before
/// [`Exchange::complete`] the late frames would be read by the next caller,
/// so the session is aborted instead and must be reconnected.
pub struct Exchange<'a> {
    session: SessionGuard<'a>,
    pending: bool,
}

impl Exchange<'_> {
    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), CommandError> {
        debug!(?packet, "send");
        self.pending = true;
        if let Err(e) = self.session.send(&packet.encode()).await {
            // the session already dropped the link
            self.pending = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Receives and decodes exactly one frame.
    pub async fn receive(&mut self) -> Result<Packet, CommandError> {
        let raw = match self.session.receive(MAX_FRAME_SIZE).await {
            Ok(raw) => raw,
            Err(e) => {
                self.pending = false;
                return Err(e.into());
            }
        };
        let packet = Packet::decode(&raw)?;
        debug!(?packet, "recv");
        Ok(packet)
    }

    /// Marks the last response as fully read; the wire is clean again.
    pub fn complete(&mut self) {
        self.pending = false;
    }

    /// Whether a response is still owed on the wire.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// One request, one response.
    pub async fn execute<T, F>(
        &mut self,
        command: Command,
        payload: Vec<u8>,
        parse: F,
    ) -> Result<T, CommandError>
    where
        F: FnOnce(&[u8]) -> Result<T, PayloadError>,
    {
        self.send(&Packet::new(command, Flags::NONE, payload)?)
            .await?;
        let response = self.receive().await;
        self.complete();
        interpret(&response?, parse)
    }

    /// Runs the handshake for the session's role. On rejection the session
    /// is dropped and its state set to `Error`.
    pub async fn handshake(&mut self, identity: &str) -> Result<String, CommandError> {
        let result = match self.session.role() {
            HandshakeRole::Initiator => self.initiate(identity).await,
            HandshakeRole::Responder => self.respond(identity).await,
        };
        self.complete();
        match result {
            Ok(peer) => {
                info!(%peer, "handshake complete");
                Ok(peer)
            }
            Err(CommandError::Transport(e)) => Err(CommandError::Transport(e)),
            Err(e) => {
                warn!(error = %e, "handshake failed");
                self.session.abort("handshake failed", Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn initiate(&mut self, identity: &str) -> Result<String, CommandError> {
        let hello = Packet::new(Command::Handshake, Flags::NONE, identity.as_bytes().to_vec())?;
        self.send(&hello).await?;
        let response = self.receive().await?;
        match response.command() {
            Some(Command::ResponseOk) => Ok(String::from_utf8_lossy(response.payload()).into_owned()),
            Some(Command::ResponseError) => {
                let reason = RemoteError::decode(response.payload())
                    .map(|e| format!("remote error {}: {}", e.code, e.message))
                    .unwrap_or_else(|_| "remote error".into());
                Err(CommandError::HandshakeRejected(reason))
            }
            _ => Err(CommandError::HandshakeRejected(format!(
                "unexpected response {:#04x}",
                response.command_byte()
            ))),
        }
    }

    async fn respond(&mut self, identity: &str) -> Result<String, CommandError> {
        let request = self.receive().await?;
        if request.command() != Some(Command::Handshake) {
            return Err(CommandError::HandshakeRejected(format!(
                "expected HANDSHAKE, got {:#04x}",
                request.command_byte()
            )));
        }
        let peer = String::from_utf8_lossy(request.payload()).into_owned();
        info!(%peer, "handshake received");

        let ack = Packet::new(Command::ResponseOk, Flags::NONE, identity.as_bytes().to_vec())?;
        self.send(&ack).await?;
        Ok(peer)
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if self.pending {
            warn!(mode = ?self.session.mode(), "exchange dropped mid-response, closing session");
            self.session.abort(
                "exchange interrupted",
                Some("response not read before the caller gave up".into()),
            );
        }
    }
}

/// Maps a single response frame to a typed result.
///
/// `RESPONSE_OK` and `RESPONSE_DATA` go to `parse`; `RESPONSE_ERROR` becomes
/// [`CommandError::Remote`]; anything else is a protocol violation.
pub fn interpret<T, F>(response: &Packet, parse: F) -> Result<T, CommandError>
where
    F: FnOnce(&[u8]) -> Result<T, PayloadError>,
{
    match response.command() {
        Some(Command::ResponseOk | Command::ResponseData) => Ok(parse(response.payload())?),
        Some(Command::ResponseError) => Err(remote_error(response)),
        _ => Err(CommandError::UnexpectedResponse(response.command_byte())),
    }
}

/// Decodes the body of a `RESPONSE_ERROR` frame.
pub fn remote_error(response: &Packet) -> CommandError {
    match RemoteError::decode(response.payload()) {
        Ok(e) => CommandError::Remote {
            code: e.code,
            message: e.message,
        },
        Err(e) => CommandError::Payload(e),
    }
}
