//! Loopback remote host with an in-memory file table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pcex_client::CommandExecutor;
use pcex_protocol::payload::{decode_path, encode_drive_list};
use pcex_protocol::{
    Command, ErrorCode, FileEntry, Flags, Packet, ReadRequest, RemoteError, WriteHeader, wire,
};
use pcex_transport::{
    ConnectionConfig, ConnectionMode, MemoryConfigStore, SessionSelector, SessionTimeouts,
};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use crate::store::{MemoryTaskStore, StoreError, TaskStore};
use crate::task::{TransferState, TransferTask};

#[derive(Default)]
struct HostState {
    files: HashMap<String, Vec<u8>>,
    advertised: HashMap<String, u64>,
    requests: Vec<Packet>,
    read_chunk: usize,
    pace: Duration,
    fail_reads: bool,
    reject_writes: bool,
}

/// Serves reads and accepts writes the way the remote host does.
pub struct FakeHost {
    pub port: u16,
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(HostState {
            read_chunk: 32 * 1024,
            ..Default::default()
        }));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve(stream, Arc::clone(&shared)).await;
            }
        });
        Self { port, state }
    }

    pub fn put(&self, path: &str, content: Vec<u8>) {
        self.state.lock().unwrap().files.insert(path.into(), content);
    }

    /// Size reported by GET_FILE_INFO, independent of the real content.
    pub fn advertise(&self, path: &str, size: u64) {
        self.state.lock().unwrap().advertised.insert(path.into(), size);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn set_read_chunk(&self, size: usize) {
        self.state.lock().unwrap().read_chunk = size;
    }

    /// Delay between streamed chunks and before acknowledging a write header.
    pub fn set_pace(&self, pace: Duration) {
        self.state.lock().unwrap().pace = pace;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.state.lock().unwrap().reject_writes = reject;
    }

    pub fn requests(&self) -> Vec<Packet> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn error(code: ErrorCode, message: &str) -> Packet {
    Packet::new(
        Command::ResponseError,
        Flags::NONE,
        RemoteError::new(code, message).encode(),
    )
    .unwrap()
}

fn data(payload: Vec<u8>) -> Packet {
    Packet::new(Command::ResponseData, Flags::NONE, payload).unwrap()
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<HostState>>) {
    loop {
        let Ok(request) = wire::read_frame(&mut stream).await else {
            return;
        };
        state.lock().unwrap().requests.push(request.clone());

        let replies = match request.command() {
            Some(Command::Disconnect) => return,
            Some(Command::Handshake) => vec![
                Packet::new(Command::ResponseOk, Flags::NONE, b"PCEX-Server-1.0".to_vec())
                    .unwrap(),
            ],
            Some(Command::GetDrives) => vec![data(encode_drive_list(&["C:\\".to_string()]))],
            Some(Command::GetFileInfo) => {
                let path = decode_path(request.payload()).unwrap();
                let s = state.lock().unwrap();
                match s.files.get(&path) {
                    Some(content) => vec![data(
                        FileEntry {
                            name: path.rsplit('\\').next().unwrap_or_default().into(),
                            path: path.clone(),
                            is_dir: false,
                            size: s
                                .advertised
                                .get(&path)
                                .copied()
                                .unwrap_or(content.len() as u64),
                            last_modified: 0,
                        }
                        .encode(),
                    )],
                    None => vec![error(ErrorCode::FileNotFound, "no such file")],
                }
            }
            Some(Command::ReadFile) => {
                let req = ReadRequest::decode(request.payload()).unwrap();
                if stream_file(&mut stream, &state, &req.path).await.is_err() {
                    return;
                }
                continue;
            }
            Some(Command::WriteFile) => {
                let header = WriteHeader::decode(request.payload()).unwrap();
                if receive_file(&mut stream, &state, header).await.is_err() {
                    return;
                }
                continue;
            }
            _ => vec![error(ErrorCode::UnknownCommand, "unsupported")],
        };
        for reply in replies {
            if wire::write_frame(&mut stream, &reply).await.is_err() {
                return;
            }
        }
    }
}

async fn stream_file(
    stream: &mut TcpStream,
    state: &Mutex<HostState>,
    path: &str,
) -> Result<(), pcex_protocol::WireError> {
    let (content, chunk, pace, fail) = {
        let s = state.lock().unwrap();
        (s.files.get(path).cloned(), s.read_chunk, s.pace, s.fail_reads)
    };
    let Some(content) = content.filter(|_| !fail) else {
        return wire::write_frame(stream, &error(ErrorCode::PermissionDenied, "read refused")).await;
    };

    let chunks: Vec<&[u8]> = content.chunks(chunk).collect();
    for (i, part) in chunks.iter().enumerate() {
        let flags = if i + 1 == chunks.len() {
            Flags::FINAL
        } else {
            Flags::CONTINUATION
        };
        let frame = Packet::new(Command::ResponseFileChunk, flags, part.to_vec()).unwrap();
        wire::write_frame(stream, &frame).await?;
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }
    wire::write_frame(stream, &Packet::bare(Command::ResponseEnd)).await
}

async fn receive_file(
    stream: &mut TcpStream,
    state: &Mutex<HostState>,
    header: WriteHeader,
) -> Result<(), pcex_protocol::WireError> {
    let (pace, reject) = {
        let s = state.lock().unwrap();
        (s.pace, s.reject_writes)
    };
    if reject {
        return wire::write_frame(stream, &error(ErrorCode::PermissionDenied, "read-only volume"))
            .await;
    }
    if !pace.is_zero() {
        tokio::time::sleep(pace).await;
    }
    wire::write_frame(stream, &Packet::bare(Command::ResponseOk)).await?;

    let mut received = Vec::new();
    while (received.len() as u64) < header.total_size {
        let chunk = wire::read_frame(stream).await?;
        received.extend_from_slice(chunk.payload());
        let done = chunk.flags().contains(Flags::FINAL);
        state.lock().unwrap().requests.push(chunk);
        if done {
            break;
        }
    }
    state.lock().unwrap().files.insert(header.path, received);
    wire::write_frame(stream, &Packet::bare(Command::ResponseOk)).await
}

pub async fn connected_executor(host: &FakeHost) -> Arc<CommandExecutor> {
    let config = ConnectionConfig {
        mode: ConnectionMode::TunnelClient,
        tunnel_port: host.port.into(),
        timeouts: SessionTimeouts {
            connect_ms: 2_000,
            read_ms: 2_000,
            accept_ms: 2_000,
            usb_ms: 2_000,
        },
        ..Default::default()
    };
    let selector = SessionSelector::new(Arc::new(MemoryConfigStore::new(config)), None).unwrap();
    let executor = CommandExecutor::new(Arc::new(selector));
    executor.connect().await.unwrap();
    Arc::new(executor)
}

/// Memory store that also logs every persisted progress value.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryTaskStore,
    pub progress: Mutex<Vec<u64>>,
}

impl TaskStore for RecordingStore {
    fn upsert_task(&self, task: &TransferTask) -> Result<(), StoreError> {
        self.inner.upsert_task(task)
    }

    fn update_progress(
        &self,
        id: Uuid,
        transferred: u64,
        state: TransferState,
    ) -> Result<bool, StoreError> {
        let applied = self.inner.update_progress(id, transferred, state)?;
        if applied {
            self.progress.lock().unwrap().push(transferred);
        }
        Ok(applied)
    }

    fn get_task(&self, id: Uuid) -> Result<Option<TransferTask>, StoreError> {
        self.inner.get_task(id)
    }

    fn list_tasks(
        &self,
        filter: &dyn Fn(&TransferTask) -> bool,
    ) -> Result<Vec<TransferTask>, StoreError> {
        self.inner.list_tasks(filter)
    }

    fn delete_tasks(&self, filter: &dyn Fn(&TransferTask) -> bool) -> Result<usize, StoreError> {
        self.inner.delete_tasks(filter)
    }
}
