use crate::{
    errors::VFSError,
    filesystem::{path, DirEntry, File, FileKind, Filesystem, INodeNum, OpenOptions, Stat},
};
use std::{
    collections::BTreeMap,
    convert::TryInto,
    io::{self, Read, Seek, SeekFrom, Write},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};

/// In-memory inode store
///
/// Cloning a [MemFs] yields another handle to the same tree. Structural
/// changes take the tree's write lock, so sibling processes in a pipeline can
/// share one store.
///
/// The store knows node kinds but has no symlink operations of its own; wrap
/// it in [crate::filesystem::LinkFs] for those.
#[derive(Clone)]
pub struct MemFs {
    tree: Arc<RwLock<Tree>>,
}

/// Exclusive access for bulk population, e.g. while loading an image
pub struct VFSWriter<'f> {
    tree: RwLockWriteGuard<'f, Tree>,
}

struct Tree {
    inodes: Vec<Option<Arc<INode>>>,
    free: Vec<INodeNum>,
    generation: u64,
}

#[derive(Clone)]
struct INode {
    stat: Stat,
    data: Node,
    // Tells a reused slot apart from the node an open handle was made for
    generation: u64,
}

#[derive(Clone)]
enum Node {
    NormalDirectory(BTreeMap<String, INodeNum>),
    FileData(Vec<u8>),
}

#[derive(Debug, Clone)]
struct DirEntryRef {
    parent: INodeNum,
    child: INodeNum,
}

impl DirEntryRef {
    fn root() -> Self {
        DirEntryRef {
            parent: ROOT,
            child: ROOT,
        }
    }
}

const ROOT: INodeNum = 0;
const DIRECTORY_SIZE: u64 = 4096;

/// Largest size a file can be grown to through a handle
pub const MAX_FILE_SIZE: u64 = 1 << 30;

impl Default for MemFs {
    fn default() -> Self {
        MemFs::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let mut tree = Tree {
            inodes: Vec::new(),
            free: Vec::new(),
            generation: 0,
        };
        let now = SystemTime::now();
        let root = tree.alloc_inode(INode {
            stat: Stat {
                kind: FileKind::Directory,
                perm: 0o755,
                atime: now,
                mtime: now,
                ctime: now,
                ..Default::default()
            },
            data: Node::NormalDirectory(BTreeMap::new()),
            generation: 0,
        });
        debug_assert_eq!(root, ROOT);
        let _ = tree.inode_incref(root);
        MemFs {
            tree: Arc::new(RwLock::new(tree)),
        }
    }

    pub fn writer(&self) -> Result<VFSWriter<'_>, VFSError> {
        Ok(VFSWriter {
            tree: self.write()?,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tree>, VFSError> {
        self.tree.read().map_err(|_| VFSError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tree>, VFSError> {
        self.tree.write().map_err(|_| VFSError::LockPoisoned)
    }
}

impl Tree {
    fn get_inode(&self, num: INodeNum) -> Result<&INode, VFSError> {
        match self.inodes.get(num) {
            None => Err(VFSError::UnallocNode),
            Some(slot) => match slot {
                None => Err(VFSError::UnallocNode),
                Some(node) => Ok(node),
            },
        }
    }

    fn get_inode_mut(&mut self, num: INodeNum) -> Result<&mut INode, VFSError> {
        match self.inodes.get_mut(num) {
            None => Err(VFSError::UnallocNode),
            Some(slot) => match slot {
                None => Err(VFSError::UnallocNode),
                Some(node) => Ok(Arc::make_mut(node)),
            },
        }
    }

    /// Handle lookups check the generation, so a stale handle never reaches
    /// whatever node later reuses its slot
    fn get_open(&self, num: INodeNum, generation: u64) -> Result<&INode, VFSError> {
        let inode = self.get_inode(num)?;
        if inode.generation == generation {
            Ok(inode)
        } else {
            Err(VFSError::UnallocNode)
        }
    }

    fn get_open_mut(&mut self, num: INodeNum, generation: u64) -> Result<&mut INode, VFSError> {
        self.get_open(num, generation)?;
        self.get_inode_mut(num)
    }

    fn alloc_inode(&mut self, mut inode: INode) -> INodeNum {
        self.generation += 1;
        inode.generation = self.generation;
        inode.stat.nlink = 0;
        match self.free.pop() {
            Some(num) => {
                inode.stat.ino = num as u64;
                self.inodes[num] = Some(Arc::new(inode));
                num
            }
            None => {
                let num = self.inodes.len() as INodeNum;
                inode.stat.ino = num as u64;
                self.inodes.push(Some(Arc::new(inode)));
                num
            }
        }
    }

    fn stat(&self, num: INodeNum) -> Result<Stat, VFSError> {
        let inode = self.get_inode(num)?;
        let mut stat = inode.stat.clone();
        stat.size = match &inode.data {
            Node::FileData(data) => data.len() as u64,
            Node::NormalDirectory(_) => DIRECTORY_SIZE,
        };
        Ok(stat)
    }

    fn directory(&self, num: INodeNum) -> Result<&BTreeMap<String, INodeNum>, VFSError> {
        match &self.get_inode(num)?.data {
            Node::NormalDirectory(map) => Ok(map),
            _ => Err(VFSError::DirectoryExpected),
        }
    }

    fn lookup(&self, path: &str) -> Result<DirEntryRef, VFSError> {
        let mut entry = DirEntryRef::root();
        for part in path::components(&path::clean(path)) {
            let child = match self.directory(entry.child)?.get(part) {
                None => return Err(VFSError::NotFound),
                Some(child) => *child,
            };
            entry = DirEntryRef {
                parent: entry.child,
                child,
            };
        }
        Ok(entry)
    }

    /// Find the directory that would contain `path`, and the final name
    fn lookup_parent(&self, path: &str) -> Result<(INodeNum, String), VFSError> {
        let cleaned = path::clean(path);
        if cleaned == "/" {
            return Err(VFSError::Exists);
        }
        let dir = self.lookup(&path::parent(&cleaned))?.child;
        self.directory(dir)?;
        Ok((dir, path::base_name(&cleaned).to_owned()))
    }

    fn inode_incref(&mut self, num: INodeNum) -> Result<(), VFSError> {
        let stat = &mut self.get_inode_mut(num)?.stat;
        match stat.nlink.checked_add(1) {
            None => Err(VFSError::INodeRefCountError),
            Some(count) => {
                stat.nlink = count;
                Ok(())
            }
        }
    }

    /// Drop one link, releasing the node (and its children) at zero
    fn inode_decref(&mut self, num: INodeNum) -> Result<(), VFSError> {
        let mut pending = vec![num];
        while let Some(num) = pending.pop() {
            let stat = &mut self.get_inode_mut(num)?.stat;
            let count = match stat.nlink.checked_sub(1) {
                None => return Err(VFSError::INodeRefCountError),
                Some(count) => count,
            };
            stat.nlink = count;
            if count == 0 {
                if let Some(inode) = self.inodes[num].take() {
                    self.free.push(num);
                    if let Node::NormalDirectory(map) = &inode.data {
                        pending.extend(map.values().copied());
                    }
                }
            }
        }
        Ok(())
    }

    fn add_child_to_directory(
        &mut self,
        parent: INodeNum,
        child_name: &str,
        child_value: INodeNum,
    ) -> Result<(), VFSError> {
        self.inode_incref(child_value)?;
        let previous = match &mut self.get_inode_mut(parent)?.data {
            Node::NormalDirectory(map) => map.insert(child_name.to_owned(), child_value),
            _ => return Err(VFSError::DirectoryExpected),
        };
        match previous {
            None => Ok(()),
            Some(prev_child) => self.inode_decref(prev_child),
        }
    }

    fn detach_child(&mut self, parent: INodeNum, child_name: &str) -> Result<INodeNum, VFSError> {
        let removed = match &mut self.get_inode_mut(parent)?.data {
            Node::NormalDirectory(map) => map.remove(child_name),
            _ => return Err(VFSError::DirectoryExpected),
        };
        removed.ok_or(VFSError::NotFound)
    }

    fn touch(&mut self, num: INodeNum) -> Result<(), VFSError> {
        let now = SystemTime::now();
        let stat = &mut self.get_inode_mut(num)?.stat;
        stat.mtime = now;
        stat.ctime = now;
        Ok(())
    }

    fn alloc_child(
        &mut self,
        parent: INodeNum,
        name: &str,
        stat: Stat,
        data: Node,
    ) -> Result<INodeNum, VFSError> {
        let num = self.alloc_inode(INode {
            stat,
            data,
            generation: 0,
        });
        self.add_child_to_directory(parent, name, num)?;
        Ok(num)
    }

    fn new_directory(&mut self, parent: INodeNum, name: &str, perm: u32) -> Result<INodeNum, VFSError> {
        let now = SystemTime::now();
        self.alloc_child(
            parent,
            name,
            Stat {
                kind: FileKind::Directory,
                perm: perm & 0o7777,
                atime: now,
                mtime: now,
                ctime: now,
                ..Default::default()
            },
            Node::NormalDirectory(BTreeMap::new()),
        )
    }

    fn is_ancestor(&self, ancestor: INodeNum, path: &str) -> Result<bool, VFSError> {
        let mut entry = ROOT;
        if entry == ancestor {
            return Ok(true);
        }
        for part in path::components(&path::clean(path)) {
            entry = match self.directory(entry).ok().and_then(|map| map.get(part)) {
                Some(child) => *child,
                None => return Ok(false),
            };
            if entry == ancestor {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Filesystem for MemFs {
    fn name(&self) -> &'static str {
        "memfs"
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        let tree = self.read()?;
        let entry = tree.lookup(path)?;
        tree.stat(entry.child)
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        let mut tree = self.write()?;
        let inode = match tree.lookup(path) {
            Ok(entry) => {
                if options.create_new {
                    return Err(VFSError::Exists);
                }
                let writable = options.write || options.append || options.truncate;
                let node = tree.get_inode_mut(entry.child)?;
                match &mut node.data {
                    Node::NormalDirectory(_) if writable => return Err(VFSError::FileExpected),
                    Node::NormalDirectory(_) => {}
                    Node::FileData(data) => {
                        if options.truncate && writable {
                            data.clear();
                            let now = SystemTime::now();
                            node.stat.mtime = now;
                            node.stat.ctime = now;
                        }
                    }
                }
                entry.child
            }
            Err(VFSError::NotFound) if options.may_create() => {
                if options.kind == FileKind::Directory {
                    return Err(VFSError::InvalidArgument);
                }
                let (dir, name) = tree.lookup_parent(path)?;
                let now = SystemTime::now();
                let stat = Stat {
                    kind: options.kind,
                    perm: options.mode & 0o7777,
                    atime: now,
                    mtime: now,
                    ctime: now,
                    ..Default::default()
                };
                let num = tree.alloc_child(dir, &name, stat, Node::FileData(Vec::new()))?;
                tree.touch(dir)?;
                num
            }
            Err(err) => return Err(err),
        };
        let generation = tree.get_inode(inode)?.generation;
        Ok(Box::new(MemFile {
            tree: self.tree.clone(),
            inode,
            generation,
            name: path.to_owned(),
            offset: 0,
            readable: options.read || !(options.write || options.append),
            writable: options.write || options.append,
            append: options.append,
        }))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        let tree = self.read()?;
        let entry = tree.lookup(path)?;
        let mut result = Vec::new();
        for (name, child) in tree.directory(entry.child)? {
            result.push(DirEntry {
                name: name.clone(),
                stat: tree.stat(*child)?,
            });
        }
        Ok(result)
    }

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let (dir, name) = tree.lookup_parent(path)?;
        if tree.directory(dir)?.contains_key(&name) {
            return Err(VFSError::Exists);
        }
        tree.new_directory(dir, &name, perm)?;
        tree.touch(dir)
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let mut dir = ROOT;
        for part in path::components(&path::clean(path)) {
            let existing = tree.directory(dir)?.get(part).copied();
            dir = match existing {
                Some(child) => {
                    tree.directory(child)?;
                    child
                }
                None => {
                    let child = tree.new_directory(dir, part, perm)?;
                    tree.touch(dir)?;
                    child
                }
            };
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let (dir, name) = match tree.lookup_parent(path) {
            Err(VFSError::Exists) => return Err(VFSError::PermissionDenied),
            other => other?,
        };
        let child = match tree.directory(dir)?.get(&name) {
            None => return Err(VFSError::NotFound),
            Some(child) => *child,
        };
        if let Node::NormalDirectory(map) = &tree.get_inode(child)?.data {
            if !map.is_empty() {
                return Err(VFSError::DirectoryNotEmpty);
            }
        }
        tree.detach_child(dir, &name)?;
        tree.touch(dir)?;
        tree.inode_decref(child)
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let (dir, name) = match tree.lookup_parent(path) {
            Err(VFSError::Exists) => return Err(VFSError::PermissionDenied),
            Err(VFSError::NotFound) => return Ok(()),
            other => other?,
        };
        match tree.detach_child(dir, &name) {
            Ok(child) => {
                tree.touch(dir)?;
                tree.inode_decref(child)
            }
            Err(VFSError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let source = tree.lookup(from)?;
        if source.child == ROOT {
            return Err(VFSError::PermissionDenied);
        }
        let (from_dir, from_name) = (source.parent, path::base_name(&path::clean(from)).to_owned());
        let (to_dir, to_name) = tree.lookup_parent(to)?;
        let source_is_dir = tree.stat(source.child)?.is_dir();
        if source_is_dir && tree.is_ancestor(source.child, &path::parent(to))? {
            return Err(VFSError::InvalidArgument);
        }
        if let Some(existing) = tree.directory(to_dir)?.get(&to_name).copied() {
            if existing == source.child {
                return Ok(());
            }
            match (&tree.get_inode(existing)?.data, source_is_dir) {
                (Node::NormalDirectory(map), true) if !map.is_empty() => {
                    return Err(VFSError::DirectoryNotEmpty)
                }
                (Node::NormalDirectory(_), false) => return Err(VFSError::FileExpected),
                (Node::FileData(_), true) => return Err(VFSError::DirectoryExpected),
                _ => {}
            }
        }
        let child = tree.detach_child(from_dir, &from_name)?;
        tree.add_child_to_directory(to_dir, &to_name, child)?;
        tree.inode_decref(child)?;
        tree.touch(from_dir)?;
        tree.touch(to_dir)?;
        tree.get_inode_mut(child)?.stat.ctime = SystemTime::now();
        Ok(())
    }

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let entry = tree.lookup(path)?;
        let stat = &mut tree.get_inode_mut(entry.child)?.stat;
        stat.perm = perm & 0o7777;
        stat.ctime = SystemTime::now();
        Ok(())
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let entry = tree.lookup(path)?;
        let stat = &mut tree.get_inode_mut(entry.child)?.stat;
        stat.uid = uid;
        stat.gid = gid;
        stat.ctime = SystemTime::now();
        Ok(())
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError> {
        let mut tree = self.write()?;
        let entry = tree.lookup(path)?;
        let stat = &mut tree.get_inode_mut(entry.child)?.stat;
        stat.atime = atime;
        stat.mtime = mtime;
        Ok(())
    }
}

impl<'f> VFSWriter<'f> {
    fn resolve_or_create_parent(&mut self, path: &str) -> Result<(INodeNum, String), VFSError> {
        let cleaned = path::clean(path);
        if cleaned == "/" {
            return Err(VFSError::Exists);
        }
        let dir = self.resolve_or_create_path(&path::parent(&cleaned))?;
        Ok((dir, path::base_name(&cleaned).to_owned()))
    }

    fn resolve_or_create_path(&mut self, path: &str) -> Result<INodeNum, VFSError> {
        let mut dir = ROOT;
        for part in path::components(path) {
            let existing = self.tree.directory(dir)?.get(part).copied();
            dir = match existing {
                Some(child) => child,
                None => self.tree.new_directory(dir, part, 0o755)?,
            };
        }
        Ok(dir)
    }

    /// Create the directory if needed, then replace its metadata
    pub fn write_directory_metadata(&mut self, path: &str, stat: Stat) -> Result<(), VFSError> {
        let num = self.resolve_or_create_path(&path::clean(path))?;
        let inode = self.tree.get_inode_mut(num)?;
        if let Node::NormalDirectory(_) = inode.data {
            inode.stat = Stat {
                kind: FileKind::Directory,
                ino: inode.stat.ino,
                nlink: inode.stat.nlink,
                ..stat
            };
            Ok(())
        } else {
            Err(VFSError::DirectoryExpected)
        }
    }

    fn write_node_file(&mut self, path: &str, stat: Stat, data: Vec<u8>) -> Result<(), VFSError> {
        let (dir, name) = self.resolve_or_create_parent(path)?;
        self.tree.alloc_child(dir, &name, stat, Node::FileData(data))?;
        Ok(())
    }

    pub fn write_file(&mut self, path: &str, stat: Stat, data: Vec<u8>) -> Result<(), VFSError> {
        self.write_node_file(
            path,
            Stat {
                kind: FileKind::Regular,
                ..stat
            },
            data,
        )
    }

    /// Store a symbolic link as a file tagged with the link kind
    pub fn write_symlink(&mut self, path: &str, stat: Stat, link_to: &str) -> Result<(), VFSError> {
        self.write_node_file(
            path,
            Stat {
                kind: FileKind::Symlink,
                ..stat
            },
            link_to.as_bytes().to_vec(),
        )
    }

    pub fn write_hardlink(&mut self, path: &str, link_to: &str) -> Result<(), VFSError> {
        let link_to_node = self.tree.lookup(link_to)?.child;
        if self.tree.stat(link_to_node)?.is_dir() {
            return Err(VFSError::PermissionDenied);
        }
        let (dir, name) = self.resolve_or_create_parent(path)?;
        self.tree.add_child_to_directory(dir, &name, link_to_node)
    }
}

/// Open handle on a [MemFs] node. The node is looked up again on every
/// call, so a removed file reads as unallocated.
struct MemFile {
    tree: Arc<RwLock<Tree>>,
    inode: INodeNum,
    generation: u64,
    name: String,
    offset: u64,
    readable: bool,
    writable: bool,
    append: bool,
}

impl MemFile {
    fn len(&self) -> Result<u64, VFSError> {
        let tree = self.tree.read().map_err(|_| VFSError::LockPoisoned)?;
        match &tree.get_open(self.inode, self.generation)?.data {
            Node::FileData(data) => Ok(data.len() as u64),
            Node::NormalDirectory(_) => Err(VFSError::FileExpected),
        }
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let tree = self.tree.read().map_err(|_| VFSError::LockPoisoned)?;
        let data = match &tree.get_open(self.inode, self.generation)?.data {
            Node::FileData(data) => data,
            Node::NormalDirectory(_) => return Err(VFSError::FileExpected.into()),
        };
        let start: usize = self.offset.try_into().map_err(|_| VFSError::InvalidArgument)?;
        if start >= data.len() {
            return Ok(0);
        }
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        self.offset += len as u64;
        Ok(len)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let mut tree = self.tree.write().map_err(|_| VFSError::LockPoisoned)?;
        let inode = tree.get_open_mut(self.inode, self.generation)?;
        let data = match &mut inode.data {
            Node::FileData(data) => data,
            Node::NormalDirectory(_) => return Err(VFSError::FileExpected.into()),
        };
        if self.append {
            self.offset = data.len() as u64;
        }
        let end = match self.offset.checked_add(buf.len() as u64) {
            Some(end) if end <= MAX_FILE_SIZE => end as usize,
            _ => return Err(VFSError::FileTooLarge.into()),
        };
        let start = end - buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.offset = end as u64;
        let now = SystemTime::now();
        inode.stat.mtime = now;
        inode.stat.ctime = now;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => (0, offset as i64),
            SeekFrom::Current(delta) => (self.offset as i64, delta),
            SeekFrom::End(delta) => (self.len()? as i64, delta),
        };
        match base.checked_add(delta) {
            Some(offset) if offset >= 0 => {
                self.offset = offset as u64;
                Ok(self.offset)
            }
            _ => Err(VFSError::InvalidArgument.into()),
        }
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> Result<Stat, VFSError> {
        let tree = self.tree.read().map_err(|_| VFSError::LockPoisoned)?;
        tree.get_open(self.inode, self.generation)?;
        tree.stat(self.inode)
    }

    fn truncate(&mut self, len: u64) -> Result<(), VFSError> {
        if !self.writable {
            return Err(VFSError::InvalidArgument);
        }
        if len > MAX_FILE_SIZE {
            return Err(VFSError::FileTooLarge);
        }
        let mut tree = self.tree.write().map_err(|_| VFSError::LockPoisoned)?;
        let inode = tree.get_open_mut(self.inode, self.generation)?;
        match &mut inode.data {
            Node::FileData(data) => data.resize(len as usize, 0),
            Node::NormalDirectory(_) => return Err(VFSError::InvalidArgument),
        }
        let now = SystemTime::now();
        inode.stat.mtime = now;
        inode.stat.ctime = now;
        Ok(())
    }
}
