//! Loopback stand-in for the remote host.

use std::sync::Arc;

use pcex_protocol::{Command, Packet, wire};
use pcex_transport::{
    ConnectionConfig, ConnectionMode, MemoryConfigStore, Session, SessionSelector,
    SessionTimeouts,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::CommandExecutor;

/// Answers every request frame with whatever `handler` returns.
pub struct FakeRemote {
    pub port: u16,
    seen: Arc<Mutex<Vec<Packet>>>,
}

impl FakeRemote {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&Packet) -> Vec<Packet> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                loop {
                    let Ok(request) = wire::read_frame(&mut stream).await else {
                        break;
                    };
                    log.lock().await.push(request.clone());
                    if request.command() == Some(Command::Disconnect) {
                        break;
                    }
                    for response in handler(&request) {
                        if wire::write_frame(&mut stream, &response).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { port, seen }
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<Packet> {
        self.seen.lock().await.clone()
    }
}

pub fn timeouts() -> SessionTimeouts {
    SessionTimeouts {
        connect_ms: 2_000,
        read_ms: 2_000,
        accept_ms: 2_000,
        usb_ms: 2_000,
    }
}

pub fn executor_for(remote: &FakeRemote) -> CommandExecutor {
    let config = ConnectionConfig {
        mode: ConnectionMode::TunnelClient,
        tunnel_port: remote.port.into(),
        timeouts: timeouts(),
        ..Default::default()
    };
    let selector = SessionSelector::new(Arc::new(MemoryConfigStore::new(config)), None).unwrap();
    CommandExecutor::new(Arc::new(selector))
}

/// Executor in server role, already listening. Returns the bound port.
pub async fn responder_executor() -> (CommandExecutor, u16) {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let config = ConnectionConfig {
        mode: ConnectionMode::TunnelServer,
        server_port: port.into(),
        timeouts: timeouts(),
        ..Default::default()
    };
    let selector = SessionSelector::new(Arc::new(MemoryConfigStore::new(config)), None).unwrap();
    let executor = CommandExecutor::new(Arc::new(selector));
    {
        let mut exchange = executor.exchange().await.unwrap();
        match exchange.session() {
            Session::TunnelServer(server) => {
                server.listen().await.unwrap();
            }
            _ => panic!("expected tunnel server"),
        }
    }
    (executor, port)
}
