//! Typed remote file operations.

use pcex_protocol::payload::{decode_drive_list, encode_path};
use pcex_protocol::{Command, FileEntry, RenameRequest, SearchRequest, StorageInfo};
use tracing::debug;

use crate::error::CommandError;
use crate::executor::CommandExecutor;

impl CommandExecutor {
    /// Lists the entries of a remote directory.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, CommandError> {
        debug!(path, "list dir");
        self.execute(Command::ListDir, encode_path(path), FileEntry::decode_list)
            .await
    }

    /// Metadata of a single remote path.
    pub async fn file_info(&self, path: &str) -> Result<FileEntry, CommandError> {
        self.execute(Command::GetFileInfo, encode_path(path), FileEntry::decode)
            .await
    }

    /// Creates a directory and returns its entry.
    pub async fn create_dir(&self, path: &str) -> Result<FileEntry, CommandError> {
        debug!(path, "create dir");
        self.execute(Command::CreateDir, encode_path(path), FileEntry::decode)
            .await
    }

    /// Deletes a file or directory tree.
    pub async fn delete(&self, path: &str) -> Result<(), CommandError> {
        debug!(path, "delete");
        self.execute(Command::Delete, encode_path(path), |_| Ok(()))
            .await
    }

    /// Renames within the same parent directory and returns the new entry.
    pub async fn rename(&self, path: &str, new_name: &str) -> Result<FileEntry, CommandError> {
        debug!(path, new_name, "rename");
        let request = RenameRequest {
            path: path.to_string(),
            new_name: new_name.to_string(),
        };
        self.execute(Command::Rename, request.encode(), FileEntry::decode)
            .await
    }

    /// Case-insensitive name search below `path`.
    pub async fn search(&self, query: &str, path: &str) -> Result<Vec<FileEntry>, CommandError> {
        debug!(query, path, "search");
        let request = SearchRequest {
            query: query.to_string(),
            path: path.to_string(),
        };
        self.execute(Command::Search, request.encode(), FileEntry::decode_list)
            .await
    }

    /// Root paths of the remote host's volumes.
    pub async fn drives(&self) -> Result<Vec<String>, CommandError> {
        self.execute(Command::GetDrives, Vec::new(), decode_drive_list)
            .await
    }

    /// Capacity of the volume holding `path` (empty = the host's default).
    pub async fn storage_info(&self, path: &str) -> Result<StorageInfo, CommandError> {
        self.execute(Command::GetStorageInfo, encode_path(path), StorageInfo::decode)
            .await
    }
}
