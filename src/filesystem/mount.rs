use crate::{
    errors::VFSError,
    filesystem::{path, DirEntry, File, Filesystem, OpenOptions, Stat},
};
use std::{sync::Arc, time::SystemTime};

/// A trait for the ability to mount into a session's filesystem tree
pub trait Mount {
    fn mount(&mut self, prefix: &str, fs: Arc<dyn Filesystem>) -> Result<(), VFSError>;
}

/// Routes each path to the filesystem mounted at its longest matching prefix
pub struct MountFs {
    root: Arc<dyn Filesystem>,
    // sorted by prefix length, longest first
    mounts: Vec<MountPoint>,
}

struct MountPoint {
    prefix: String,
    fs: Arc<dyn Filesystem>,
}

impl MountFs {
    pub fn new(root: Arc<dyn Filesystem>) -> Self {
        MountFs {
            root,
            mounts: Vec::new(),
        }
    }

    /// Mount prefixes, longest first
    pub fn mount_points(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|mount| mount.prefix.as_str())
    }

    fn route(&self, path: &str) -> (Option<usize>, &dyn Filesystem, String) {
        let cleaned = path::clean(path);
        for (index, mount) in self.mounts.iter().enumerate() {
            if path::has_prefix(&cleaned, &mount.prefix) {
                let relative = match &cleaned[mount.prefix.len()..] {
                    "" => "/".to_owned(),
                    rest => rest.to_owned(),
                };
                return (Some(index), &*mount.fs, relative);
            }
        }
        (None, &*self.root, cleaned)
    }

    /// Which filesystem handles `path`, and the path within it
    pub fn resolve(&self, path: &str) -> (&dyn Filesystem, String) {
        let (_, fs, relative) = self.route(path);
        log::trace!("mount resolve {:?} -> {} {:?}", path, fs.name(), relative);
        (fs, relative)
    }
}

impl Mount for MountFs {
    fn mount(&mut self, prefix: &str, fs: Arc<dyn Filesystem>) -> Result<(), VFSError> {
        let prefix = path::clean(prefix);
        if prefix == "/" {
            return Err(VFSError::InvalidArgument);
        }
        if self.mounts.iter().any(|mount| mount.prefix == prefix) {
            return Err(VFSError::Exists);
        }
        log::debug!("mount {} at {:?}", fs.name(), prefix);
        self.mounts.push(MountPoint { prefix, fs });
        self.mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(())
    }
}

impl Filesystem for MountFs {
    fn name(&self) -> &'static str {
        "mount"
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.stat(&relative)
    }

    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.lstat(&relative)
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.open(&relative, options)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        let (fs, relative) = self.resolve(path);
        let mut entries = fs.read_dir(&relative)?;
        let dir = path::clean(path);
        for mount in &self.mounts {
            if mount.prefix != dir && path::parent(&mount.prefix) == dir {
                let name = path::base_name(&mount.prefix).to_owned();
                let stat = mount.fs.stat("/")?;
                entries.retain(|entry| entry.name != name);
                entries.push(DirEntry { name, stat });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.mkdir(&relative, perm)
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.mkdir_all(&relative, perm)
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.remove(&relative)
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.remove_all(&relative)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError> {
        let (from_index, fs, from_relative) = self.route(from);
        let (to_index, _, to_relative) = self.route(to);
        if from_index != to_index {
            log::debug!("rename {:?} -> {:?} crosses a mount boundary", from, to);
            return Err(VFSError::CrossDevice);
        }
        fs.rename(&from_relative, &to_relative)
    }

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.chmod(&relative, perm)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.chown(&relative, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.chtimes(&relative, atime, mtime)
    }

    fn symlink(&self, target: &str, link: &str) -> Result<(), VFSError> {
        let (fs, relative) = self.resolve(link);
        fs.symlink(target, &relative)
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        let (fs, relative) = self.resolve(path);
        fs.readlink(&relative)
    }
}
