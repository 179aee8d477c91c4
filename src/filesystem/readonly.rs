use crate::{
    errors::VFSError,
    filesystem::{DirEntry, File, Filesystem, OpenOptions, Stat},
};
use std::time::SystemTime;

/// Rejects every modifying operation, passing reads through
///
/// The shared base image sits behind one of these, so no session can mutate
/// it even by going around its copy-on-write layer.
#[derive(Clone)]
pub struct ReadOnlyFs<F> {
    inner: F,
}

impl<F: Filesystem> ReadOnlyFs<F> {
    pub fn new(inner: F) -> Self {
        ReadOnlyFs { inner }
    }

    fn refuse(&self, op: &str, path: &str) -> Result<(), VFSError> {
        log::warn!("{}({:?}) refused on read-only {}", op, path, self.inner.name());
        Err(VFSError::ReadOnlyFilesystem)
    }
}

impl<F: Filesystem> Filesystem for ReadOnlyFs<F> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        self.inner.stat(path)
    }

    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        self.inner.lstat(path)
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        if options.has_write_intent() {
            self.refuse("open", path)?;
        }
        self.inner.open(path, options)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        self.inner.read_dir(path)
    }

    fn mkdir(&self, path: &str, _perm: u32) -> Result<(), VFSError> {
        self.refuse("mkdir", path)
    }

    fn mkdir_all(&self, path: &str, _perm: u32) -> Result<(), VFSError> {
        self.refuse("mkdir_all", path)
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        self.refuse("remove", path)
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        self.refuse("remove_all", path)
    }

    fn rename(&self, from: &str, _to: &str) -> Result<(), VFSError> {
        self.refuse("rename", from)
    }

    fn chmod(&self, path: &str, _perm: u32) -> Result<(), VFSError> {
        self.refuse("chmod", path)
    }

    fn chown(&self, path: &str, _uid: u32, _gid: u32) -> Result<(), VFSError> {
        self.refuse("chown", path)
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, _mtime: SystemTime) -> Result<(), VFSError> {
        self.refuse("chtimes", path)
    }

    fn symlink(&self, _target: &str, link: &str) -> Result<(), VFSError> {
        self.refuse("symlink", link)
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        self.inner.readlink(path)
    }
}
