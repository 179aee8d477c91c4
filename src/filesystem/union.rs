use crate::{
    errors::VFSError,
    filesystem::{path, DirEntry, File, Filesystem, OpenOptions, Stat},
};
use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};

/// One writable layer over one read-only base
///
/// Reads look in the layer first and fall through to the base. Anything that
/// modifies a node which only exists in the base first copies it up into the
/// layer, then applies the change to the copy. The base is never written.
///
/// Removing or renaming a node that was never copied up is refused with
/// [VFSError::PermissionDenied]. Removing a layer copy makes the base
/// version, if any, visible again.
pub struct CopyOnWriteFs {
    base: Arc<dyn Filesystem>,
    layer: Arc<dyn Filesystem>,
    // Multi-step changes hold this for writing and lookups hold it for
    // reading. The stores lock individually, but a copy-up spans several
    // store calls and must never be seen half done.
    mutation: RwLock<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Layer,
    BaseOnly,
    Missing,
}

impl CopyOnWriteFs {
    pub fn new(base: Arc<dyn Filesystem>, layer: Arc<dyn Filesystem>) -> Self {
        CopyOnWriteFs {
            base,
            layer,
            mutation: RwLock::new(()),
        }
    }

    pub fn base(&self) -> &Arc<dyn Filesystem> {
        &self.base
    }

    pub fn layer(&self) -> &Arc<dyn Filesystem> {
        &self.layer
    }

    fn lock(&self) -> Result<RwLockWriteGuard<'_, ()>, VFSError> {
        self.mutation.write().map_err(|_| VFSError::LockPoisoned)
    }

    fn shared(&self) -> Result<RwLockReadGuard<'_, ()>, VFSError> {
        self.mutation.read().map_err(|_| VFSError::LockPoisoned)
    }

    fn layered_stat(&self, path: &str) -> Result<Stat, VFSError> {
        match self.layer.stat(path) {
            Err(VFSError::NotFound) => self.base.stat(path),
            other => other,
        }
    }

    fn merged_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        let layer = match self.layer.read_dir(path) {
            Ok(entries) => Some(entries),
            Err(VFSError::NotFound) => None,
            Err(err) => return Err(err),
        };
        let base = match self.base.read_dir(path) {
            Ok(entries) => Some(entries),
            Err(VFSError::NotFound) | Err(VFSError::DirectoryExpected) if layer.is_some() => None,
            Err(err) => return Err(err),
        };
        let mut merged = BTreeMap::new();
        for entry in base.into_iter().flatten() {
            merged.insert(entry.name.clone(), entry);
        }
        for entry in layer.into_iter().flatten() {
            merged.insert(entry.name.clone(), entry);
        }
        Ok(merged.into_iter().map(|(_, entry)| entry).collect())
    }

    fn presence(&self, path: &str) -> Result<Presence, VFSError> {
        match self.layer.lstat(path) {
            Ok(_) => return Ok(Presence::Layer),
            Err(VFSError::NotFound) => {}
            Err(err) => return Err(err),
        }
        match self.base.lstat(path) {
            Ok(_) => Ok(Presence::BaseOnly),
            Err(VFSError::NotFound) | Err(VFSError::DirectoryExpected) => Ok(Presence::Missing),
            Err(err) => Err(err),
        }
    }

    /// Make sure `dir` exists as a directory in the layer, copying it and
    /// its ancestors' metadata from the base where needed
    fn copy_dir_up(&self, dir: &str) -> Result<(), VFSError> {
        match self.layer.lstat(dir) {
            Ok(stat) if stat.is_dir() => return Ok(()),
            Ok(_) => return Err(VFSError::DirectoryExpected),
            Err(VFSError::NotFound) => {}
            Err(err) => return Err(err),
        }
        let stat = self.base.lstat(dir)?;
        if !stat.is_dir() {
            return Err(VFSError::DirectoryExpected);
        }
        if dir != "/" {
            self.copy_dir_up(&path::parent(dir))?;
        }
        log::trace!("copy-up directory {:?}", dir);
        self.layer.mkdir(dir, stat.perm)?;
        self.replicate_metadata(dir, &stat)
    }

    fn replicate_metadata(&self, path: &str, stat: &Stat) -> Result<(), VFSError> {
        self.layer.chown(path, stat.uid, stat.gid)?;
        self.layer.chtimes(path, stat.atime, stat.mtime)
    }

    /// Duplicate a base-only node into the layer, byte for byte
    fn copy_up(&self, path: &str) -> Result<(), VFSError> {
        let stat = self.base.lstat(path)?;
        self.copy_dir_up(&path::parent(path))?;
        if stat.is_dir() {
            return self.copy_dir_up(path);
        }

        log::trace!("copy-up {:?}, {} bytes", path, stat.size);
        let mut source = self.base.open(path, &OpenOptions::new().read(true))?;
        let mut dest = self.layer.open(
            path,
            &OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(stat.perm)
                .kind(stat.kind),
        )?;
        let copied = io::copy(&mut source, &mut dest);
        drop(dest);
        match copied {
            Ok(len) if len == stat.size => {}
            result => {
                log::warn!(
                    "copy-up of {:?} failed, expected {} bytes, got {:?}",
                    path,
                    stat.size,
                    result
                );
                let _ = self.layer.remove(path);
                return Err(VFSError::IO);
            }
        }
        self.replicate_metadata(path, &stat)
    }

    /// Make sure `path` can be modified in the layer
    fn materialize(&self, path: &str) -> Result<(), VFSError> {
        match self.presence(path)? {
            Presence::Layer => Ok(()),
            Presence::BaseOnly => self.copy_up(path),
            Presence::Missing => Err(VFSError::NotFound),
        }
    }

    fn is_empty_dir(&self, path: &str) -> Result<bool, VFSError> {
        Ok(self.merged_dir(path)?.is_empty())
    }
}

impl Filesystem for CopyOnWriteFs {
    fn name(&self) -> &'static str {
        "cow"
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        let _guard = self.shared()?;
        self.layered_stat(path)
    }

    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        let _guard = self.shared()?;
        match self.layer.lstat(path) {
            Err(VFSError::NotFound) => self.base.lstat(path),
            other => other,
        }
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        if !options.has_write_intent() {
            let _guard = self.shared()?;
            return match self.layer.open(path, options) {
                Err(VFSError::NotFound) => self.base.open(path, options),
                other => other,
            };
        }

        let _guard = self.lock()?;
        match self.presence(path)? {
            Presence::Layer => {}
            Presence::BaseOnly => {
                if options.create_new {
                    return Err(VFSError::Exists);
                }
                if self.base.lstat(path)?.is_dir() {
                    return Err(VFSError::FileExpected);
                }
                self.copy_up(path)?;
            }
            Presence::Missing => {
                if !options.may_create() {
                    return Err(VFSError::NotFound);
                }
                self.copy_dir_up(&path::parent(path))?;
            }
        }
        self.layer.open(path, options)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        let _guard = self.shared()?;
        self.merged_dir(path)
    }

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        if self.presence(path)? != Presence::Missing {
            return Err(VFSError::Exists);
        }
        self.copy_dir_up(&path::parent(path))?;
        self.layer.mkdir(path, perm)
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        match self.layered_stat(path) {
            Ok(stat) if stat.is_dir() => return Ok(()),
            Ok(_) => return Err(VFSError::DirectoryExpected),
            Err(VFSError::NotFound) => {}
            Err(err) => return Err(err),
        }
        let mut prefix = String::from("/");
        for part in path::components(&path::clean(path)) {
            prefix = path::join(&prefix, part);
            match self.layered_stat(&prefix) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => return Err(VFSError::DirectoryExpected),
                Err(VFSError::NotFound) => {}
                Err(err) => return Err(err),
            }
            self.copy_dir_up(&path::parent(&prefix))?;
            self.layer.mkdir(&prefix, perm)?;
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        match self.presence(path)? {
            Presence::Layer => {
                if self.layer.lstat(path)?.is_dir() && !self.is_empty_dir(path)? {
                    return Err(VFSError::DirectoryNotEmpty);
                }
                self.layer.remove(path)
            }
            Presence::BaseOnly => {
                log::warn!("refusing to remove base-only {:?}", path);
                Err(VFSError::PermissionDenied)
            }
            Presence::Missing => Err(VFSError::NotFound),
        }
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        match self.presence(path)? {
            Presence::Layer => self.layer.remove_all(path),
            Presence::BaseOnly => {
                log::warn!("refusing to remove base-only {:?}", path);
                Err(VFSError::PermissionDenied)
            }
            Presence::Missing => Ok(()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        match self.presence(from)? {
            Presence::Layer => {
                self.copy_dir_up(&path::parent(to))?;
                self.layer.rename(from, to)
            }
            Presence::BaseOnly => {
                log::warn!("refusing to rename base-only {:?}", from);
                Err(VFSError::PermissionDenied)
            }
            Presence::Missing => Err(VFSError::NotFound),
        }
    }

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        self.materialize(path)?;
        self.layer.chmod(path, perm)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        self.materialize(path)?;
        self.layer.chown(path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        self.materialize(path)?;
        self.layer.chtimes(path, atime, mtime)
    }

    fn symlink(&self, target: &str, link: &str) -> Result<(), VFSError> {
        let _guard = self.lock()?;
        if self.presence(link)? != Presence::Missing {
            return Err(VFSError::Exists);
        }
        self.copy_dir_up(&path::parent(link))?;
        self.layer.symlink(target, link)
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        let _guard = self.shared()?;
        match self.layer.readlink(path) {
            Err(VFSError::NotFound) => self.base.readlink(path),
            other => other,
        }
    }
}
