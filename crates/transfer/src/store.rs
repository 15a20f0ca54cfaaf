//! Task persistence.
//!
//! The engine is the only writer. Stores keep the last snapshot of each task
//! and refuse to move a task out of a final state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::task::{TransferState, TransferTask};

/// Errors from task stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Row-level persistence for transfer tasks.
pub trait TaskStore: Send + Sync {
    /// Inserts or replaces a task. A stored task already in a final state is
    /// left as it is.
    fn upsert_task(&self, task: &TransferTask) -> Result<(), StoreError>;

    /// Records progress and state. Returns `false` when the task is unknown
    /// or already final.
    fn update_progress(
        &self,
        id: Uuid,
        transferred: u64,
        state: TransferState,
    ) -> Result<bool, StoreError>;

    fn get_task(&self, id: Uuid) -> Result<Option<TransferTask>, StoreError>;

    /// Matching tasks, oldest first.
    fn list_tasks(
        &self,
        filter: &dyn Fn(&TransferTask) -> bool,
    ) -> Result<Vec<TransferTask>, StoreError>;

    /// Removes matching tasks and returns how many went.
    fn delete_tasks(&self, filter: &dyn Fn(&TransferTask) -> bool) -> Result<usize, StoreError>;
}

type TaskMap = HashMap<Uuid, TransferTask>;

fn apply_upsert(map: &mut TaskMap, task: &TransferTask) -> bool {
    if let Some(existing) = map.get(&task.id) {
        if existing.state.is_terminal() {
            debug!(task_id = %task.id, state = %existing.state, "ignoring write to finished task");
            return false;
        }
    }
    map.insert(task.id, task.clone());
    true
}

fn apply_progress(map: &mut TaskMap, id: Uuid, transferred: u64, state: TransferState) -> bool {
    let Some(task) = map.get_mut(&id) else {
        return false;
    };
    if task.state.is_terminal() {
        return false;
    }
    task.transferred_bytes = task.transferred_bytes.max(transferred);
    if state.is_terminal() {
        task.error = match &state {
            TransferState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        task.completed_at = Some(Utc::now());
    }
    task.state = state;
    true
}

fn select(map: &TaskMap, filter: &dyn Fn(&TransferTask) -> bool) -> Vec<TransferTask> {
    let mut tasks: Vec<_> = map.values().filter(|t| filter(*t)).cloned().collect();
    tasks.sort_by_key(|t| t.created_at);
    tasks
}

fn remove(map: &mut TaskMap, filter: &dyn Fn(&TransferTask) -> bool) -> usize {
    let before = map.len();
    map.retain(|_, t| !filter(&*t));
    before - map.len()
}

/// Non-persistent store, for tests and for callers that keep no history.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<TaskMap>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn upsert_task(&self, task: &TransferTask) -> Result<(), StoreError> {
        apply_upsert(&mut self.tasks.write().unwrap(), task);
        Ok(())
    }

    fn update_progress(
        &self,
        id: Uuid,
        transferred: u64,
        state: TransferState,
    ) -> Result<bool, StoreError> {
        Ok(apply_progress(
            &mut self.tasks.write().unwrap(),
            id,
            transferred,
            state,
        ))
    }

    fn get_task(&self, id: Uuid) -> Result<Option<TransferTask>, StoreError> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    fn list_tasks(
        &self,
        filter: &dyn Fn(&TransferTask) -> bool,
    ) -> Result<Vec<TransferTask>, StoreError> {
        Ok(select(&self.tasks.read().unwrap(), filter))
    }

    fn delete_tasks(&self, filter: &dyn Fn(&TransferTask) -> bool) -> Result<usize, StoreError> {
        Ok(remove(&mut self.tasks.write().unwrap(), filter))
    }
}

/// Tasks cached in memory and persisted to a JSON file after every change.
pub struct JsonTaskStore {
    path: PathBuf,
    tasks: RwLock<TaskMap>,
}

impl JsonTaskStore {
    /// Opens the store, loading existing tasks from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let tasks = load_tasks(&path)?;
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    /// Opens the store at [`default_task_path`], if a config dir is known.
    pub fn open_default() -> Option<Result<Self, StoreError>> {
        default_task_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let map = self.tasks.read().unwrap();
        let tasks = select(&map, &|_| true);
        let json = serde_json::to_string_pretty(&tasks)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!(count = tasks.len(), path = ?self.path, "persisted transfer tasks");
        Ok(())
    }
}

impl TaskStore for JsonTaskStore {
    fn upsert_task(&self, task: &TransferTask) -> Result<(), StoreError> {
        let changed = apply_upsert(&mut self.tasks.write().unwrap(), task);
        if changed {
            self.persist()?;
        }
        Ok(())
    }

    fn update_progress(
        &self,
        id: Uuid,
        transferred: u64,
        state: TransferState,
    ) -> Result<bool, StoreError> {
        let applied = apply_progress(&mut self.tasks.write().unwrap(), id, transferred, state);
        if applied {
            self.persist()?;
        }
        Ok(applied)
    }

    fn get_task(&self, id: Uuid) -> Result<Option<TransferTask>, StoreError> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    fn list_tasks(
        &self,
        filter: &dyn Fn(&TransferTask) -> bool,
    ) -> Result<Vec<TransferTask>, StoreError> {
        Ok(select(&self.tasks.read().unwrap(), filter))
    }

    fn delete_tasks(&self, filter: &dyn Fn(&TransferTask) -> bool) -> Result<usize, StoreError> {
        let removed = remove(&mut self.tasks.write().unwrap(), filter);
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}

fn load_tasks(path: &Path) -> Result<TaskMap, StoreError> {
    if !path.exists() {
        return Ok(TaskMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let tasks: Vec<TransferTask> = serde_json::from_str(&data)?;
    debug!(count = tasks.len(), ?path, "loaded transfer tasks");
    Ok(tasks.into_iter().map(|t| (t.id, t)).collect())
}

/// Returns the default task file path.
pub fn default_task_path() -> Option<PathBuf> {
    pcex_transport::config::config_dir().map(|d| d.join("pcex").join("transfers.json"))
}
