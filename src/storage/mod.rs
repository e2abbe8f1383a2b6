//! The storage capability the protocol layer is written against.
//!
//! Backends answer every lookup as current truth; nothing returned here is
//! cached by the handlers. Implementations must be safe to call from several
//! threads at once for different paths.
use std::fs::File;
use std::io::Read;
use std::time::SystemTime;

use crate::error::StorageError;

/// Serves a directory of the local filesystem.
pub mod local;

/// Keeps the whole tree in memory.
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Folder,
    RootFolder,
}

/// Snapshot of a single object as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Storage path the object was resolved at, always starting with `/`.
    pub path: String,
    pub name: String,
    pub size: u64,
    pub created: SystemTime,
    pub updated: SystemTime,
    pub kind: FileKind,
}

impl FileInfo {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, FileKind::Folder | FileKind::RootFolder)
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

pub trait Storage: Send + Sync {
    /// Immediate children of `folder`.
    fn list(&self, folder: &FileInfo) -> StorageResult<Vec<FileInfo>>;

    /// Look up the object at `path`, `None` if nothing lives there.
    fn get_info(&self, path: &str) -> StorageResult<Option<FileInfo>>;

    /// Bytes `from..to` of `file`. `to` is exclusive.
    fn get_data(&self, file: &FileInfo, from: u64, to: u64) -> StorageResult<Vec<u8>>;

    /// Create or replace the object at `path` with `bytes`.
    fn put_bytes(&self, path: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Create or replace the object at `path` with the content of `file`,
    /// read from its current position to the end.
    fn put_file(&self, path: &str, file: &mut File) -> StorageResult<()> {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        self.put_bytes(path, &bytes)
    }

    /// Remove `file`, recursively for folders.
    fn delete(&self, file: &FileInfo) -> StorageResult<()>;

    fn move_to(&self, file: &FileInfo, destination: &str) -> StorageResult<()>;

    /// Create the folder at `path` along with any missing parents.
    fn create_folder(&self, path: &str) -> StorageResult<()>;

    fn total_space(&self) -> StorageResult<u64>;

    fn usable_space(&self) -> StorageResult<u64>;

    fn get_all(&self, file: &FileInfo) -> StorageResult<Vec<u8>> {
        self.get_data(file, 0, file.size)
    }
}

/// Bring a storage path to the `/a/b` form: leading slash, no trailing slash,
/// no empty or `.` segments. Returns `None` if the path climbs with `..`.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut s = String::new();
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                return None;
            },
            v => {
                s.push('/');
                s.push_str(v);
            },
        }
    }
    if s.is_empty() {
        s.push('/');
    }
    Some(s)
}

/// Join a child name onto a normalized folder path.
pub fn child_path(folder: &str, name: &str) -> String {
    if folder.ends_with('/') {
        format!("{}{}", folder, name)
    } else {
        format!("{}/{}", folder, name)
    }
}
