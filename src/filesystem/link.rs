use crate::{
    errors::VFSError,
    filesystem::{DirEntry, File, FileKind, Filesystem, OpenOptions, Stat},
};
use std::{io::Write, time::SystemTime};

/// Adds symbolic links to a store that has no link operations of its own.
///
/// A link is a regular file whose content is the target string and whose
/// kind is tagged [FileKind::Symlink]. Reading it back checks the tag, so a
/// plain file that happens to contain a path is never mistaken for a link.
#[derive(Clone)]
pub struct LinkFs<F> {
    inner: F,
}

impl<F: Filesystem> LinkFs<F> {
    pub fn new(inner: F) -> Self {
        LinkFs { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Filesystem> Filesystem for LinkFs<F> {
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
        self.inner.open(path, options)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        self.inner.read_dir(path)
    }

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        self.inner.mkdir(path, perm)
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        self.inner.mkdir_all(path, perm)
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        self.inner.remove(path)
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        self.inner.remove_all(path)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError> {
        self.inner.rename(from, to)
    }

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        self.inner.chmod(path, perm)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError> {
        self.inner.chown(path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError> {
        self.inner.chtimes(path, atime, mtime)
    }

    fn symlink(&self, target: &str, link: &str) -> Result<(), VFSError> {
        if target.is_empty() {
            return Err(VFSError::NotFound);
        }
        let mut file = self.inner.open(
            link,
            &OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o777)
                .kind(FileKind::Symlink),
        )?;
        if let Err(err) = file.write_all(target.as_bytes()) {
            drop(file);
            let _ = self.inner.remove(link);
            return Err(err.into());
        }
        log::trace!("symlink {:?} -> {:?}", link, target);
        Ok(())
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        if !self.inner.lstat(path)?.is_symlink() {
            return Err(VFSError::LinkExpected);
        }
        let data = self.inner.read_file(path)?;
        String::from_utf8(data).map_err(|err| VFSError::Utf8Error(err.utf8_error()))
    }
}
