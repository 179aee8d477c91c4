//! Virtual filesystem layers and the traits that join them
//!
//! Every layer implements [Filesystem] over plain, already-canonical path
//! strings. Stores never follow symbolic links on their own; that is the job
//! of the resolver in [path], driven by the per-process view in
//! [crate::context::ProcessFs].

#[cfg(test)] mod tests;

pub mod link;
pub mod mount;
pub mod path;
pub mod proc;
pub mod readonly;
pub mod tar;
pub mod union;
pub mod vfs;

use crate::errors::VFSError;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, Read, Seek, Write},
    sync::Arc,
    time::SystemTime,
};

pub use link::LinkFs;
pub use mount::MountFs;
pub use path::FollowLinks;
pub use proc::ProcFs;
pub use readonly::ReadOnlyFs;
pub use union::CopyOnWriteFs;
pub use vfs::MemFs;

pub type INodeNum = usize;

/// The three kinds of node a virtual filesystem can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    /// The `S_IFMT` bits for this kind
    pub fn format_bits(self) -> u32 {
        match self {
            FileKind::Regular => libc::S_IFREG as u32,
            FileKind::Directory => libc::S_IFDIR as u32,
            FileKind::Symlink => libc::S_IFLNK as u32,
        }
    }
}

/// Metadata for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub kind: FileKind,
    /// Permission bits only, `0o7777` at most
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u64,
    pub ino: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Default for Stat {
    fn default() -> Self {
        Stat {
            kind: FileKind::Regular,
            perm: 0o644,
            uid: 0,
            gid: 0,
            size: 0,
            nlink: 1,
            ino: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }
}

impl Stat {
    /// Full `st_mode`, format bits included
    pub fn mode(&self) -> u32 {
        self.kind.format_bits() | (self.perm & 0o7777)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// One named child of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: Stat,
}

/// Flags for [Filesystem::open], in the style of [std::fs::OpenOptions]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
    pub mode: u32,
    pub kind: FileKind,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            mode: 0o666,
            kind: FileKind::Regular,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Permission bits for a newly created node
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Kind tag for a newly created node; only regular files and symlinks
    /// can be created through `open`
    pub fn kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    /// Would this open modify the node, or create one?
    pub fn has_write_intent(&self) -> bool {
        self.write || self.append || self.truncate || self.create || self.create_new
    }

    pub fn may_create(&self) -> bool {
        self.create || self.create_new
    }
}

/// An open file handle
pub trait File: Read + Write + Seek + Send {
    /// The path this handle was opened with
    fn name(&self) -> &str;

    fn stat(&self) -> Result<Stat, VFSError>;

    /// Resize the file, zero-filling when it grows. Directories can't be
    /// truncated.
    fn truncate(&mut self, len: u64) -> Result<(), VFSError>;
}

/// A hierarchical store of files, directories, and symlinks
///
/// Paths are absolute and taken literally: `..` is lexical and no symbolic
/// link is ever followed at this level.
pub trait Filesystem: Send + Sync {
    /// Short layer name, for logging
    fn name(&self) -> &'static str;

    fn stat(&self, path: &str) -> Result<Stat, VFSError>;

    /// Metadata of the node itself; stores never follow links, so this only
    /// differs from `stat` in views that do.
    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        self.stat(path)
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError>;

    /// List a directory, sorted by name
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError>;

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError>;

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError>;

    fn remove(&self, path: &str) -> Result<(), VFSError>;

    /// Remove a node and everything beneath it; succeeds if nothing is there
    fn remove_all(&self, path: &str) -> Result<(), VFSError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError>;

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError>;

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError>;

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError>;

    fn symlink(&self, _target: &str, _link: &str) -> Result<(), VFSError> {
        Err(VFSError::Unsupported)
    }

    fn readlink(&self, _path: &str) -> Result<String, VFSError> {
        Err(VFSError::Unsupported)
    }

    /// Read a whole file into memory
    fn read_file(&self, path: &str) -> Result<Vec<u8>, VFSError> {
        let mut file = self.open(path, &OpenOptions::new().read(true))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Create or replace a file's content
    fn write_file(&self, path: &str, data: &[u8], perm: u32) -> Result<(), VFSError> {
        let mut file = self.open(
            path,
            &OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(perm),
        )?;
        file.write_all(data)?;
        Ok(())
    }
}

impl<F: Filesystem + ?Sized> Filesystem for Arc<F> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        (**self).stat(path)
    }

    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        (**self).lstat(path)
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        (**self).open(path, options)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        (**self).read_dir(path)
    }

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        (**self).mkdir(path, perm)
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        (**self).mkdir_all(path, perm)
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        (**self).remove(path)
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        (**self).remove_all(path)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError> {
        (**self).rename(from, to)
    }

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        (**self).chmod(path, perm)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError> {
        (**self).chown(path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError> {
        (**self).chtimes(path, atime, mtime)
    }

    fn symlink(&self, target: &str, link: &str) -> Result<(), VFSError> {
        (**self).symlink(target, link)
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        (**self).readlink(path)
    }
}

/// An in-memory, read-only file handle over generated content
pub(crate) struct BufferFile {
    name: String,
    stat: Stat,
    cursor: io::Cursor<Vec<u8>>,
}

impl BufferFile {
    pub(crate) fn new(name: &str, stat: Stat, data: Vec<u8>) -> Self {
        BufferFile {
            name: name.to_owned(),
            stat,
            cursor: io::Cursor::new(data),
        }
    }
}

impl Read for BufferFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for BufferFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from_raw_os_error(libc::EBADF))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for BufferFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl File for BufferFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> Result<Stat, VFSError> {
        Ok(self.stat.clone())
    }

    fn truncate(&mut self, _len: u64) -> Result<(), VFSError> {
        Err(VFSError::InvalidArgument)
    }
}
