use std::fs;
use std::fs::File;
use std::io::{
    Read,
    Seek,
    SeekFrom,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};

use log::debug;

use crate::error::StorageError;
use crate::storage::{
    child_path,
    normalize_path,
    FileInfo,
    FileKind,
    Storage,
    StorageResult,
};

/// Serves the directory tree below `root`.
///
/// Storage paths are interpreted relative to `root`. Any path climbing above
/// it, with `..` or through a symlink, is refused with
/// [StorageError::OutsideRoot].
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: &Path) -> StorageResult<LocalStorage> {
        let root = root.canonicalize()?;
        if !root.is_dir() {
            return Err(StorageError::NotAFolder(root.display().to_string()));
        }
        Ok(LocalStorage {
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<(String, PathBuf)> {
        let normal = match normalize_path(path) {
            Some(v) => v,
            None => {
                return Err(StorageError::OutsideRoot(path.to_string()));
            },
        };
        let fp = self.root.join(normal.trim_start_matches('/'));
        self.confine(&normal, &fp)?;
        Ok((normal, fp))
    }

    /// Refuse `fp` when its nearest existing ancestor resolves outside the
    /// root, as happens with symlinks pointing elsewhere.
    fn confine(&self, normal: &str, fp: &Path) -> StorageResult<()> {
        let mut at = fp;
        loop {
            match at.canonicalize() {
                Ok(v) => {
                    if v.starts_with(&self.root) {
                        return Ok(());
                    }
                    debug!("{} resolves to {:?} outside of root", normal, v);
                    return Err(StorageError::OutsideRoot(normal.to_string()));
                },
                Err(e) => {
                    match fs::symlink_metadata(at) {
                        Ok(meta) if meta.file_type().is_symlink() => {
                            debug!("{} crosses dangling link {:?}", normal, at);
                            return Err(StorageError::OutsideRoot(normal.to_string()));
                        },
                        Ok(_) => {
                            return Err(e.into());
                        },
                        Err(_) => {},
                    }
                },
            }
            at = match at.parent() {
                Some(v) => v,
                None => {
                    return Err(StorageError::OutsideRoot(normal.to_string()));
                },
            };
        }
    }

    fn create(&self, path: String, fp: &Path) -> StorageResult<FileInfo> {
        let meta = fs::metadata(fp)?;
        let updated = meta.modified()?;
        let created = meta.created().unwrap_or(updated);
        let kind = if path == "/" {
            FileKind::RootFolder
        } else if meta.is_dir() {
            FileKind::Folder
        } else {
            FileKind::File
        };
        let name = match fp.file_name() {
            Some(v) if kind != FileKind::RootFolder => v.to_string_lossy().into_owned(),
            _ => String::new(),
        };
        let size = if meta.is_file() { meta.len() } else { 0 };
        Ok(FileInfo {
            path,
            name,
            size,
            created,
            updated,
            kind,
        })
    }
}

fn remove_entry(fp: &Path) -> StorageResult<()> {
    if fs::symlink_metadata(fp)?.is_dir() {
        fs::remove_dir_all(fp)?;
    } else {
        fs::remove_file(fp)?;
    }
    Ok(())
}

impl Storage for LocalStorage {
    fn list(&self, folder: &FileInfo) -> StorageResult<Vec<FileInfo>> {
        let (normal, fp) = self.resolve(&folder.path)?;
        if !fp.is_dir() {
            return Err(StorageError::NotAFolder(normal));
        }
        let mut r = Vec::new();
        for entry in fs::read_dir(&fp)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let info = self.create(child_path(&normal, &name), &entry.path())?;
            r.push(info);
        }
        r.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(r)
    }

    fn get_info(&self, path: &str) -> StorageResult<Option<FileInfo>> {
        let (normal, fp) = self.resolve(path)?;
        if !fp.exists() {
            return Ok(None);
        }
        self.create(normal, &fp).map(Some)
    }

    fn get_data(&self, file: &FileInfo, from: u64, to: u64) -> StorageResult<Vec<u8>> {
        let (_, fp) = self.resolve(&file.path)?;
        let mut f = File::open(fp)?;
        let mut buf = vec![0; to.saturating_sub(from) as usize];
        f.seek(SeekFrom::Start(from))?;
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn put_bytes(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        let (_, fp) = self.resolve(path)?;
        let mut f = File::create(&fp)?;
        f.write_all(bytes)?;
        debug!("wrote {} bytes to {:?}", bytes.len(), fp);
        Ok(())
    }

    fn put_file(&self, path: &str, file: &mut File) -> StorageResult<()> {
        let (_, fp) = self.resolve(path)?;
        let mut f = File::create(&fp)?;
        let c = std::io::copy(file, &mut f)?;
        debug!("copied {} bytes to {:?}", c, fp);
        Ok(())
    }

    /// Removes `file` and everything below it. The root itself stays and is
    /// only emptied.
    fn delete(&self, file: &FileInfo) -> StorageResult<()> {
        let (normal, fp) = self.resolve(&file.path)?;
        if normal == "/" {
            for entry in fs::read_dir(&fp)? {
                remove_entry(&entry?.path())?;
            }
            return Ok(());
        }
        remove_entry(&fp)
    }

    fn move_to(&self, file: &FileInfo, destination: &str) -> StorageResult<()> {
        let (normal, from) = self.resolve(&file.path)?;
        let (_, to) = self.resolve(destination)?;
        if to != from && to.starts_with(&from) {
            return Err(StorageError::MoveIntoSelf(normal));
        }
        fs::rename(from, to)?;
        Ok(())
    }

    fn create_folder(&self, path: &str) -> StorageResult<()> {
        let (_, fp) = self.resolve(path)?;
        fs::create_dir_all(fp)?;
        Ok(())
    }

    fn total_space(&self) -> StorageResult<u64> {
        Ok(fs2::total_space(&self.root)?)
    }

    fn usable_space(&self) -> StorageResult<u64> {
        Ok(fs2::available_space(&self.root)?)
    }
}
