//! Download and upload exchanges on top of the command executor.
//!
//! A chunk stream holds the wire for its whole length, so browse commands
//! issued meanwhile wait for the transfer instead of splitting its frames.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pcex_client::executor::{interpret, remote_error};
use pcex_client::{CommandError, CommandExecutor, Exchange};
use pcex_protocol::constants::MAX_PAYLOAD_SIZE;
use pcex_protocol::{Command, Flags, Packet, ReadRequest, WriteHeader};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::progress::SpeedCalculator;
use crate::store::TaskStore;
use crate::task::{TransferDirection, TransferState, TransferTask};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Lifecycle notifications, delivered best-effort.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started(TransferTask),
    Progress {
        task_id: Uuid,
        transferred: u64,
        total: u64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    Finished(TransferTask),
}

/// Runs transfers and owns every task state transition.
pub struct TransferEngine {
    executor: Arc<CommandExecutor>,
    store: Arc<dyn TaskStore>,
    events: Option<mpsc::Sender<TransferEvent>>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    chunk_size: usize,
}

impl TransferEngine {
    pub fn new(executor: Arc<CommandExecutor>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            executor,
            store,
            events: None,
            active: Mutex::new(HashMap::new()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Publishes [`TransferEvent`]s on `tx`. A full channel drops events.
    pub fn with_events(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Upload chunk size, clamped to what fits in one frame.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copies `remote_path` to `local_path`.
    ///
    /// Fails with an error only if the remote size lookup or the task store
    /// fails before the task exists. After that the returned task carries
    /// the outcome.
    pub async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<TransferTask, TransferError> {
        let info = self.executor.file_info(remote_path).await?;
        let task = TransferTask::new(
            TransferDirection::Download,
            remote_path,
            local_path.display().to_string(),
            info.size,
        );
        let (mut task, active) = self.begin(task)?;
        let outcome = self.run_download(&mut task, local_path, &active.cancel).await;
        self.finish(task, outcome, active)
    }

    /// Copies `local_path` to `remote_path`.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<TransferTask, TransferError> {
        let size = tokio::fs::metadata(local_path).await?.len();
        let task = TransferTask::new(
            TransferDirection::Upload,
            local_path.display().to_string(),
            remote_path,
            size,
        );
        let (mut task, active) = self.begin(task)?;
        let outcome = self.run_upload(&mut task, local_path, &active.cancel).await;
        self.finish(task, outcome, active)
    }

    /// Marks a task `Cancelled` and stops its loop at the next chunk.
    ///
    /// Returns `false` if the task had already finished.
    pub fn cancel(&self, id: Uuid) -> Result<bool, TransferError> {
        let task = self
            .store
            .get_task(id)?
            .ok_or(TransferError::TaskNotFound(id))?;
        if task.state.is_terminal() {
            return Ok(false);
        }
        let applied = self
            .store
            .update_progress(id, task.transferred_bytes, TransferState::Cancelled)?;
        if let Some(token) = self.active.lock().unwrap().get(&id) {
            token.cancel();
        }
        info!(task_id = %id, bytes = task.transferred_bytes, "transfer cancelled");
        Ok(applied)
    }

    /// Starts a fresh task with the same endpoints as a failed or cancelled one.
    pub async fn retry(&self, id: Uuid) -> Result<TransferTask, TransferError> {
        let task = self
            .store
            .get_task(id)?
            .ok_or(TransferError::TaskNotFound(id))?;
        if !task.state.is_retryable() {
            return Err(TransferError::NotRetryable {
                id,
                state: task.state.to_string(),
            });
        }
        info!(task_id = %id, direction = ?task.direction, "retrying transfer");
        match task.direction {
            TransferDirection::Download => {
                self.download(&task.source_path, Path::new(&task.destination_path))
                    .await
            }
            TransferDirection::Upload => {
                self.upload(Path::new(&task.source_path), &task.destination_path)
                    .await
            }
        }
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<TransferTask>, TransferError> {
        Ok(self.store.get_task(id)?)
    }

    pub fn list_tasks(
        &self,
        filter: &dyn Fn(&TransferTask) -> bool,
    ) -> Result<Vec<TransferTask>, TransferError> {
        Ok(self.store.list_tasks(filter)?)
    }

    /// Removes every completed, failed or cancelled task.
    pub fn clear_finished(&self) -> Result<usize, TransferError> {
        let removed = self.store.delete_tasks(&|t| t.state.is_terminal())?;
        debug!(removed, "cleared finished transfers");
        Ok(removed)
    }

    /// Persists the task as `Pending`, then `InProgress`.
    ///
    /// The token is registered first so a `cancel` that sees the stored row
    /// always finds something to trip.
    fn begin(
        &self,
        mut task: TransferTask,
    ) -> Result<(TransferTask, ActiveTask<'_>), TransferError> {
        let mut active = ActiveTask::register(self, task.id);
        if let Err(e) = self.store.upsert_task(&task) {
            active.disarm();
            return Err(e.into());
        }

        task.state = TransferState::InProgress;
        if let Err(e) = self.store.upsert_task(&task) {
            active.disarm();
            return Err(e.into());
        }
        info!(
            task_id = %task.id,
            direction = ?task.direction,
            file = %task.file_name,
            bytes = task.total_bytes,
            "transfer started"
        );
        self.emit(TransferEvent::Started(task.clone()));
        Ok((task, active))
    }

    /// Records the outcome and returns the task as stored.
    fn finish(
        &self,
        mut task: TransferTask,
        outcome: Result<(), TransferError>,
        mut active: ActiveTask<'_>,
    ) -> Result<TransferTask, TransferError> {
        active.disarm();
        let cancelled = active.cancel.is_cancelled();
        drop(active);

        let state = match outcome {
            _ if cancelled => TransferState::Cancelled,
            Ok(()) => {
                // the stream may end early; what arrived is the file
                task.total_bytes = task.transferred_bytes;
                TransferState::Completed
            }
            Err(e) => TransferState::Failed(e.to_string()),
        };
        match &state {
            TransferState::Failed(reason) => {
                warn!(task_id = %task.id, bytes = task.transferred_bytes, %reason, "transfer failed")
            }
            _ => info!(task_id = %task.id, bytes = task.transferred_bytes, %state, "transfer finished"),
        }
        task.finish(state);
        self.store.upsert_task(&task)?;

        let stored = self.store.get_task(task.id)?.unwrap_or(task);
        self.emit(TransferEvent::Finished(stored.clone()));
        Ok(stored)
    }

    async fn run_download(
        &self,
        task: &mut TransferTask,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(local_path).await?;

        let mut exchange = self.executor.exchange().await?;
        let request = ReadRequest::whole_file(task.source_path.as_str());
        let packet = Packet::new(Command::ReadFile, Flags::NONE, request.encode())
            .map_err(CommandError::from)?;
        exchange.send(&packet).await?;

        let speed = SpeedCalculator::default();
        // Set once writing stops; the rest of the stream is read and dropped.
        let mut halted: Option<TransferError> = None;
        loop {
            let packet = exchange.receive().await?;
            match packet.command() {
                Some(Command::ResponseFileChunk) => {
                    if halted.is_some() || cancel.is_cancelled() {
                        continue;
                    }
                    let chunk = packet.payload();
                    if let Err(e) = file.write_all(chunk).await {
                        warn!(task_id = %task.id, error = %e, "local write failed, draining stream");
                        halted = Some(e.into());
                        continue;
                    }
                    task.transferred_bytes += chunk.len() as u64;
                    if let Err(e) = self.store.update_progress(
                        task.id,
                        task.transferred_bytes,
                        TransferState::InProgress,
                    ) {
                        halted = Some(e.into());
                        continue;
                    }
                    speed.add_sample(chunk.len() as u64);
                    self.progress(task, &speed);
                }
                Some(Command::ResponseEnd) => {
                    exchange.complete();
                    break;
                }
                Some(Command::ResponseError) => {
                    exchange.complete();
                    return Err(remote_error(&packet).into());
                }
                _ => {
                    return Err(CommandError::UnexpectedResponse(packet.command_byte()).into());
                }
            }
        }
        drop(exchange);

        file.flush().await?;
        match halted {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_upload(
        &self,
        task: &mut TransferTask,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let mut file = File::open(local_path).await?;
        let mut exchange = self.executor.exchange().await?;

        let header = WriteHeader {
            path: task.destination_path.clone(),
            total_size: task.total_bytes,
            chunk_size: self.chunk_size as u32,
        };
        exchange
            .execute(Command::WriteFile, header.encode(), |_| Ok(()))
            .await?;

        let speed = SpeedCalculator::default();
        let mut buf = vec![0u8; self.chunk_size];
        let mut halted: Option<TransferError> = None;
        while task.transferred_bytes < task.total_bytes {
            if cancel.is_cancelled() {
                break;
            }
            let remaining = task.total_bytes - task.transferred_bytes;
            let want = buf.len().min(remaining as usize);
            let n = match read_full(&mut file, &mut buf[..want]).await {
                Ok(0) => {
                    halted = Some(
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "local file shrank during upload",
                        )
                        .into(),
                    );
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    halted = Some(e.into());
                    break;
                }
            };

            let last = task.transferred_bytes + n as u64 >= task.total_bytes;
            let flags = if last { Flags::FINAL } else { Flags::CONTINUATION };
            send_chunk(&mut exchange, flags, &buf[..n]).await?;

            task.transferred_bytes += n as u64;
            if let Err(e) =
                self.store
                    .update_progress(task.id, task.transferred_bytes, TransferState::InProgress)
            {
                halted = Some(e.into());
                break;
            }
            speed.add_sample(n as u64);
            self.progress(task, &speed);
        }

        if task.transferred_bytes < task.total_bytes {
            debug!(task_id = %task.id, bytes = task.transferred_bytes, "closing upload early");
            send_chunk(&mut exchange, Flags::FINAL, &[]).await?;
        }
        let reply = exchange.receive().await;
        exchange.complete();
        interpret(&reply?, |_| Ok(()))?;
        drop(exchange);

        match halted {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn progress(&self, task: &TransferTask, speed: &SpeedCalculator) {
        let remaining = task.total_bytes.saturating_sub(task.transferred_bytes);
        self.emit(TransferEvent::Progress {
            task_id: task.id,
            transferred: task.transferred_bytes,
            total: task.total_bytes,
            bytes_per_second: speed.bytes_per_second(),
            eta: speed.eta(remaining),
        });
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

/// Registration of a running task in [`TransferEngine::active`].
///
/// Dropped without [`ActiveTask::disarm`] (the caller's future was cancelled
/// mid-transfer), it records the task as interrupted so the row never stays
/// `InProgress`. The token is unregistered either way.
struct ActiveTask<'a> {
    engine: &'a TransferEngine,
    id: Uuid,
    cancel: CancellationToken,
    armed: bool,
}

impl<'a> ActiveTask<'a> {
    fn register(engine: &'a TransferEngine, id: Uuid) -> Self {
        let cancel = CancellationToken::new();
        engine.active.lock().unwrap().insert(id, cancel.clone());
        Self {
            engine,
            id,
            cancel,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn record_interruption(&self) -> Result<Option<TransferTask>, TransferError> {
        let Some(mut task) = self.engine.store.get_task(self.id)? else {
            return Ok(None);
        };
        if task.state.is_terminal() {
            return Ok(Some(task));
        }
        let state = if self.cancel.is_cancelled() {
            TransferState::Cancelled
        } else {
            TransferState::Failed("transfer interrupted".into())
        };
        task.finish(state);
        self.engine.store.upsert_task(&task)?;
        Ok(Some(task))
    }
}

impl Drop for ActiveTask<'_> {
    fn drop(&mut self) {
        self.engine.active.lock().unwrap().remove(&self.id);
        if !self.armed {
            return;
        }
        match self.record_interruption() {
            Ok(Some(task)) => {
                warn!(task_id = %self.id, bytes = task.transferred_bytes, state = %task.state, "transfer abandoned");
                self.engine.emit(TransferEvent::Finished(task));
            }
            Ok(None) => {}
            Err(e) => warn!(task_id = %self.id, error = %e, "could not record abandoned transfer"),
        }
    }
}

async fn send_chunk(
    exchange: &mut Exchange<'_>,
    flags: Flags,
    data: &[u8],
) -> Result<(), CommandError> {
    let packet = Packet::new(Command::ResponseFileChunk, flags, data.to_vec())?;
    exchange.send(&packet).await
}

/// Reads until `buf` is full or the file ends.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
