use std::collections::BTreeMap;
use std::sync::{
    Mutex,
    MutexGuard,
};
use std::time::SystemTime;

use crate::error::StorageError;
use crate::storage::{
    normalize_path,
    FileInfo,
    FileKind,
    Storage,
    StorageResult,
};

/// Default capacity reported by [MemoryStorage::new], 1 GiB.
pub const DEFAULT_CAPACITY: u64 = 1 << 30;

struct Entry {
    kind: FileKind,
    data: Vec<u8>,
    created: SystemTime,
    updated: SystemTime,
}

impl Entry {
    fn folder(kind: FileKind) -> Entry {
        let now = SystemTime::now();
        Entry {
            kind,
            data: vec!(),
            created: now,
            updated: now,
        }
    }
}

/// A complete tree held in memory behind a single lock.
///
/// Used by the test suite, and handy for throwaway servers. Space figures are
/// derived from a fixed capacity minus the bytes currently stored.
pub struct MemoryStorage {
    capacity: u64,
    entries: Mutex<BTreeMap<String, Entry>>,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

fn is_below(path: &str, folder: &str) -> bool {
    if folder == "/" {
        return path != "/";
    }
    path.len() > folder.len() && path.starts_with(folder) && path.as_bytes()[folder.len()] == b'/'
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> MemoryStorage {
        let mut entries = BTreeMap::new();
        entries.insert(String::from("/"), Entry::folder(FileKind::RootFolder));
        MemoryStorage {
            capacity,
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half written.
        match self.entries.lock() {
            Ok(v) => v,
            Err(e) => e.into_inner(),
        }
    }

    fn normal(path: &str) -> StorageResult<String> {
        match normalize_path(path) {
            Some(v) => Ok(v),
            None => Err(StorageError::OutsideRoot(path.to_string())),
        }
    }

    fn used(entries: &BTreeMap<String, Entry>) -> u64 {
        entries.values().map(|v| v.data.len() as u64).sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> MemoryStorage {
        MemoryStorage::new()
    }
}

fn info_of(path: &str, entry: &Entry) -> FileInfo {
    FileInfo {
        path: path.to_string(),
        name: name_of(path).to_string(),
        size: entry.data.len() as u64,
        created: entry.created,
        updated: entry.updated,
        kind: entry.kind,
    }
}

impl Storage for MemoryStorage {
    fn list(&self, folder: &FileInfo) -> StorageResult<Vec<FileInfo>> {
        let path = MemoryStorage::normal(&folder.path)?;
        let entries = self.lock();
        match entries.get(&path) {
            Some(v) if v.kind != FileKind::File => {},
            Some(_) => {
                return Err(StorageError::NotAFolder(path));
            },
            None => {
                return Err(StorageError::NotFound(path));
            },
        }
        let r = entries.iter()
            .filter(|(k, _)| k.as_str() != "/" && parent_of(k) == path)
            .map(|(k, v)| info_of(k, v))
            .collect();
        Ok(r)
    }

    fn get_info(&self, path: &str) -> StorageResult<Option<FileInfo>> {
        let path = MemoryStorage::normal(path)?;
        let entries = self.lock();
        Ok(entries.get(&path).map(|v| info_of(&path, v)))
    }

    fn get_data(&self, file: &FileInfo, from: u64, to: u64) -> StorageResult<Vec<u8>> {
        let path = MemoryStorage::normal(&file.path)?;
        let entries = self.lock();
        let entry = match entries.get(&path) {
            Some(v) => v,
            None => {
                return Err(StorageError::NotFound(path));
            },
        };
        let len = entry.data.len();
        let from = (from as usize).min(len);
        let to = (to as usize).min(len);
        if from > to {
            return Ok(vec!());
        }
        Ok(entry.data[from..to].to_vec())
    }

    fn put_bytes(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = MemoryStorage::normal(path)?;
        let mut entries = self.lock();
        let parent = parent_of(&path).to_string();
        match entries.get(&parent) {
            Some(v) if v.kind != FileKind::File => {},
            Some(_) => {
                return Err(StorageError::NotAFolder(parent));
            },
            None => {
                return Err(StorageError::NotFound(parent));
            },
        }
        let now = SystemTime::now();
        match entries.get_mut(&path) {
            Some(v) if v.kind == FileKind::File => {
                v.data = bytes.to_vec();
                v.updated = now;
            },
            Some(_) => {
                return Err(StorageError::NotAFolder(path));
            },
            None => {
                entries.insert(path, Entry {
                    kind: FileKind::File,
                    data: bytes.to_vec(),
                    created: now,
                    updated: now,
                });
            },
        }
        Ok(())
    }

    fn delete(&self, file: &FileInfo) -> StorageResult<()> {
        let path = MemoryStorage::normal(&file.path)?;
        let mut entries = self.lock();
        if entries.remove(&path).is_none() {
            return Err(StorageError::NotFound(path));
        }
        entries.retain(|k, _| !is_below(k, &path));
        if path == "/" {
            entries.insert(path, Entry::folder(FileKind::RootFolder));
        }
        Ok(())
    }

    fn move_to(&self, file: &FileInfo, destination: &str) -> StorageResult<()> {
        let from = MemoryStorage::normal(&file.path)?;
        let to = MemoryStorage::normal(destination)?;
        if is_below(&to, &from) {
            return Err(StorageError::MoveIntoSelf(from));
        }
        let mut entries = self.lock();
        if !entries.contains_key(parent_of(&to)) {
            return Err(StorageError::NotFound(parent_of(&to).to_string()));
        }
        let keys: Vec<String> = entries.keys()
            .filter(|k| k.as_str() == from || is_below(k, &from))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Err(StorageError::NotFound(from));
        }
        for k in keys {
            if let Some(v) = entries.remove(&k) {
                let moved = format!("{}{}", to, &k[from.len()..]);
                entries.insert(moved, v);
            }
        }
        Ok(())
    }

    fn create_folder(&self, path: &str) -> StorageResult<()> {
        let path = MemoryStorage::normal(path)?;
        let mut entries = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|v| !v.is_empty()) {
            current.push('/');
            current.push_str(part);
            match entries.get(&current) {
                Some(v) if v.kind == FileKind::File => {
                    return Err(StorageError::NotAFolder(current));
                },
                Some(_) => {},
                None => {
                    entries.insert(current.clone(), Entry::folder(FileKind::Folder));
                },
            }
        }
        Ok(())
    }

    fn total_space(&self) -> StorageResult<u64> {
        Ok(self.capacity)
    }

    fn usable_space(&self) -> StorageResult<u64> {
        let entries = self.lock();
        Ok(self.capacity.saturating_sub(MemoryStorage::used(&entries)))
    }
}
