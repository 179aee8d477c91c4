use super::{mount::Mount, path::resolve, *};
use crate::context::SystemInfo;
use std::{
    io::SeekFrom,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

fn linkfs() -> LinkFs<MemFs> {
    LinkFs::new(MemFs::new())
}

fn base_image() -> Arc<dyn Filesystem> {
    let fs = linkfs();
    fs.mkdir_all("/home/user", 0o755).unwrap();
    fs.mkdir_all("/usr/bin", 0o755).unwrap();
    fs.mkdir("/etc", 0o755).unwrap();
    fs.mkdir("/foo", 0o755).unwrap();
    fs.write_file("/etc/passwd", b"root:x:0:0:root:/root:/bin/bash\n", 0o644)
        .unwrap();
    fs.write_file("/etc/motd", b"hello", 0o640).unwrap();
    fs.chown("/etc/motd", 12, 34).unwrap();
    fs.chtimes(
        "/etc/motd",
        SystemTime::UNIX_EPOCH + Duration::from_secs(1000),
        SystemTime::UNIX_EPOCH + Duration::from_secs(2000),
    )
    .unwrap();
    fs.write_file("/usr/bin/ls", b"\x7fELF", 0o755).unwrap();
    fs.symlink("/usr/bin", "/bin").unwrap();
    fs.symlink("../etc/passwd", "/home/passwd").unwrap();
    Arc::new(ReadOnlyFs::new(fs))
}

fn overlay() -> (Arc<dyn Filesystem>, Arc<dyn Filesystem>, CopyOnWriteFs) {
    let base = base_image();
    let layer: Arc<dyn Filesystem> = Arc::new(linkfs());
    let cow = CopyOnWriteFs::new(base.clone(), layer.clone());
    (base, layer, cow)
}

fn names(entries: Vec<DirEntry>) -> Vec<String> {
    entries.into_iter().map(|entry| entry.name).collect()
}

#[test]
fn path_helpers() {
    assert_eq!(path::clean(""), "/");
    assert_eq!(path::clean("a/b/../c/."), "/a/c");
    assert_eq!(path::clean("/../../x//y/"), "/x/y");
    assert_eq!(path::parent("/"), "/");
    assert_eq!(path::parent("/a"), "/");
    assert_eq!(path::parent("/a/b/"), "/a");
    assert_eq!(path::base_name("/a/b/"), "b");
    assert_eq!(path::base_name("/"), "/");
    assert_eq!(path::join("/a", "b"), "/a/b");
    assert_eq!(path::join("/", "b"), "/b");
    assert_eq!(path::join("/a", "/b"), "/b");
    assert!(path::has_prefix("/a/b", "/a"));
    assert!(path::has_prefix("/a", "/a"));
    assert!(!path::has_prefix("/ab", "/a"));
    assert!(path::has_prefix("/anything", "/"));
}

#[test]
fn memfs_files_and_dirs() {
    let fs = MemFs::new();
    assert!(fs.stat("/").unwrap().is_dir());
    fs.mkdir("/b", 0o700).unwrap();
    fs.mkdir("/a", 0o755).unwrap();
    assert_eq!(fs.mkdir("/a", 0o755), Err(VFSError::Exists));
    assert_eq!(fs.mkdir("/x/y", 0o755), Err(VFSError::NotFound));
    fs.write_file("/a/file", b"content", 0o600).unwrap();
    assert_eq!(fs.read_file("/a/file").unwrap(), b"content");
    let stat = fs.stat("/a/file").unwrap();
    assert_eq!(stat.kind, FileKind::Regular);
    assert_eq!(stat.size, 7);
    assert_eq!(stat.perm, 0o600);
    assert_eq!(stat.mode(), libc::S_IFREG as u32 | 0o600);
    assert_eq!(fs.stat("/b").unwrap().perm, 0o700);
    assert_eq!(names(fs.read_dir("/").unwrap()), vec!["a", "b"]);
    assert_eq!(fs.read_dir("/a/file"), Err(VFSError::DirectoryExpected));
    assert_eq!(fs.stat("/a/file/x"), Err(VFSError::DirectoryExpected));
    assert_eq!(fs.remove("/a"), Err(VFSError::DirectoryNotEmpty));
    fs.rename("/a/file", "/b/moved").unwrap();
    assert_eq!(fs.stat("/a/file"), Err(VFSError::NotFound));
    assert_eq!(fs.read_file("/b/moved").unwrap(), b"content");
    assert_eq!(fs.rename("/b", "/b/inside"), Err(VFSError::InvalidArgument));
    fs.remove("/a").unwrap();
    fs.remove_all("/b").unwrap();
    fs.remove_all("/b").unwrap();
    assert!(fs.read_dir("/").unwrap().is_empty());
}

#[test]
fn memfs_file_handles() {
    let fs = MemFs::new();
    let mut file = fs
        .open("/f", &OpenOptions::new().read(true).write(true).create(true))
        .unwrap();
    file.write_all(b"hello world").unwrap();
    file.seek(SeekFrom::Start(6)).unwrap();
    let mut rest = String::new();
    file.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "world");
    file.truncate(5).unwrap();
    assert_eq!(file.stat().unwrap().size, 5);
    drop(file);

    let mut file = fs
        .open("/f", &OpenOptions::new().append(true).write(true))
        .unwrap();
    file.write_all(b"!").unwrap();
    let mut buf = Vec::new();
    assert!(file.read_to_end(&mut buf).is_err());
    drop(file);
    assert_eq!(fs.read_file("/f").unwrap(), b"hello!");

    assert_eq!(
        fs.open("/f", &OpenOptions::new().write(true).create_new(true))
            .err(),
        Some(VFSError::Exists)
    );
    assert_eq!(
        fs.open("/", &OpenOptions::new().write(true)).err(),
        Some(VFSError::FileExpected)
    );
    assert_eq!(
        fs.open("/missing", &OpenOptions::new().read(true)).err(),
        Some(VFSError::NotFound)
    );
}

#[test]
fn memfs_shared_handle_sees_writes() {
    let fs = MemFs::new();
    let other = fs.clone();
    fs.write_file("/shared", b"one", 0o644).unwrap();
    assert_eq!(other.read_file("/shared").unwrap(), b"one");
}

#[test]
fn memfs_file_size_limits() {
    let fs = MemFs::new();
    fs.mkdir("/dir", 0o755).unwrap();
    let mut dir = fs.open("/dir", &OpenOptions::new().read(true)).unwrap();
    assert_eq!(dir.truncate(0), Err(VFSError::InvalidArgument));
    drop(dir);

    let mut file = fs
        .open("/f", &OpenOptions::new().read(true).write(true).create(true))
        .unwrap();
    file.write_all(b"data").unwrap();
    assert_eq!(file.truncate(u64::MAX), Err(VFSError::FileTooLarge));
    assert_eq!(
        file.truncate(vfs::MAX_FILE_SIZE + 1),
        Err(VFSError::FileTooLarge)
    );
    file.seek(SeekFrom::Start(i64::MAX as u64)).unwrap();
    let err = file.write(b"x").unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EFBIG));
    file.seek(SeekFrom::Start(vfs::MAX_FILE_SIZE)).unwrap();
    assert_eq!(VFSError::from(file.write(b"x").unwrap_err()), VFSError::FileTooLarge);
    assert_eq!(file.stat().unwrap().size, 4);
    drop(file);
    assert_eq!(fs.read_file("/f").unwrap(), b"data");
}

#[test]
fn memfs_reuses_released_inodes() {
    let fs = MemFs::new();
    fs.write_file("/tmp", b"first", 0o600).unwrap();
    let ino = fs.stat("/tmp").unwrap().ino;
    let mut stale = fs.open("/tmp", &OpenOptions::new().read(true)).unwrap();
    fs.remove("/tmp").unwrap();

    for _ in 0..10 {
        fs.write_file("/tmp", b"second", 0o600).unwrap();
        assert_eq!(fs.stat("/tmp").unwrap().ino, ino);
        fs.remove("/tmp").unwrap();
    }
    fs.write_file("/tmp", b"second", 0o600).unwrap();
    let mut buf = Vec::new();
    assert!(stale.read_to_end(&mut buf).is_err());
    assert!(buf.is_empty());
    assert_eq!(stale.stat(), Err(VFSError::UnallocNode));
    assert!(stale.truncate(0).is_err());
    assert_eq!(fs.read_file("/tmp").unwrap(), b"second");
}

#[test]
fn memfs_releases_deep_trees() {
    let fs = MemFs::new();
    let deep = "/d".repeat(100_000);
    fs.mkdir_all(&deep, 0o755).unwrap();
    let worker = fs.clone();
    std::thread::Builder::new()
        .stack_size(128 * 1024)
        .spawn(move || worker.remove_all("/d"))
        .unwrap()
        .join()
        .unwrap()
        .unwrap();
    assert!(fs.read_dir("/").unwrap().is_empty());
    fs.mkdir("/d", 0o755).unwrap();
    assert!(fs.stat("/d").unwrap().ino <= 100_000);
}

#[test]
fn link_backfill() {
    let fs = linkfs();
    fs.write_file("/plain", b"/etc/passwd", 0o644).unwrap();
    fs.symlink("/etc/passwd", "/link").unwrap();
    let stat = fs.lstat("/link").unwrap();
    assert_eq!(stat.kind, FileKind::Symlink);
    assert_eq!(stat.size, 11);
    assert_eq!(stat.mode() & libc::S_IFMT as u32, libc::S_IFLNK as u32);
    assert_eq!(fs.readlink("/link").unwrap(), "/etc/passwd");
    assert_eq!(fs.readlink("/plain"), Err(VFSError::LinkExpected));
    assert_eq!(fs.readlink("/"), Err(VFSError::LinkExpected));
    assert_eq!(fs.readlink("/nothing"), Err(VFSError::NotFound));
    assert_eq!(fs.symlink("/x", "/link"), Err(VFSError::Exists));
    assert_eq!(fs.symlink("", "/empty"), Err(VFSError::NotFound));
    assert_eq!(MemFs::new().readlink("/"), Err(VFSError::Unsupported));
}

#[test]
fn resolve_canonical_paths() {
    let fs = base_image();
    let cwd = || "/home/user".to_owned();
    assert_eq!(
        resolve(&fs, cwd, "../../etc/passwd", FollowLinks::Follow).unwrap(),
        "/etc/passwd"
    );
    assert_eq!(
        resolve(&fs, || "/".to_owned(), "./foo/../bar/", FollowLinks::Follow).unwrap(),
        "/bar"
    );
    assert_eq!(
        resolve(&fs, || "/".to_owned(), "/../../..", FollowLinks::Follow).unwrap(),
        "/"
    );
    assert_eq!(
        resolve(&fs, || "/".to_owned(), "//etc///passwd", FollowLinks::Follow).unwrap(),
        "/etc/passwd"
    );
    assert_eq!(
        resolve(&fs, || "/".to_owned(), "/etc/", FollowLinks::Follow).unwrap(),
        "/etc"
    );
    assert_eq!(
        resolve(&fs, || "/".to_owned(), "", FollowLinks::Follow),
        Err(VFSError::NotFound)
    );
}

#[test]
fn resolve_only_asks_for_cwd_when_relative() {
    let fs = base_image();
    let cwd = || -> String { panic!("cwd not needed for an absolute path") };
    assert_eq!(
        resolve(&fs, cwd, "/etc/motd", FollowLinks::Follow).unwrap(),
        "/etc/motd"
    );
}

#[test]
fn resolve_errors() {
    let fs = base_image();
    let root = || "/".to_owned();
    assert_eq!(
        resolve(&fs, root, "/missing/file", FollowLinks::Follow),
        Err(VFSError::NotFound)
    );
    assert_eq!(
        resolve(&fs, root, "/etc/passwd/x", FollowLinks::Follow),
        Err(VFSError::DirectoryExpected)
    );
    assert_eq!(
        resolve(&fs, root, "/etc/new-file", FollowLinks::Follow).unwrap(),
        "/etc/new-file"
    );
}

#[test]
fn resolve_symlinks() {
    let fs = base_image();
    let root = || "/".to_owned();
    assert_eq!(
        resolve(&fs, root, "/bin/ls", FollowLinks::Follow).unwrap(),
        "/usr/bin/ls"
    );
    assert_eq!(
        resolve(&fs, root, "/bin/ls", FollowLinks::NoFollow).unwrap(),
        "/usr/bin/ls"
    );
    assert_eq!(
        resolve(&fs, root, "/bin", FollowLinks::NoFollow).unwrap(),
        "/bin"
    );
    assert_eq!(
        resolve(&fs, root, "/bin", FollowLinks::Follow).unwrap(),
        "/usr/bin"
    );
    assert_eq!(
        resolve(&fs, root, "/bin/..", FollowLinks::Follow).unwrap(),
        "/usr"
    );
    // relative target, taken from the link's own directory
    assert_eq!(
        resolve(&fs, root, "/home/passwd", FollowLinks::Follow).unwrap(),
        "/etc/passwd"
    );
    assert_eq!(
        resolve(&fs, || "/home".to_owned(), "passwd", FollowLinks::NoFollow).unwrap(),
        "/home/passwd"
    );
}

#[test]
fn resolve_symlink_loop() {
    let fs = linkfs();
    fs.symlink("/b", "/a").unwrap();
    fs.symlink("/a", "/b").unwrap();
    fs.symlink("self", "/self").unwrap();
    let root = || "/".to_owned();
    assert_eq!(
        resolve(&fs, root, "/a", FollowLinks::Follow),
        Err(VFSError::SymbolicLinkLimitExceeded)
    );
    assert_eq!(
        resolve(&fs, root, "/a/x", FollowLinks::NoFollow),
        Err(VFSError::SymbolicLinkLimitExceeded)
    );
    assert_eq!(
        resolve(&fs, root, "/self", FollowLinks::Follow),
        Err(VFSError::SymbolicLinkLimitExceeded)
    );
    assert_eq!(
        resolve(&fs, root, "/a", FollowLinks::NoFollow).unwrap(),
        "/a"
    );
}

#[test]
fn resolve_symlink_chain_limit() {
    let fs = linkfs();
    fs.mkdir("/target", 0o755).unwrap();
    for index in 0..path::MAX_SYMLINK_EXPANSIONS {
        let next = if index + 1 == path::MAX_SYMLINK_EXPANSIONS {
            "/target".to_owned()
        } else {
            format!("/l{}", index + 1)
        };
        fs.symlink(&next, &format!("/l{}", index)).unwrap();
    }
    fs.symlink("/l0", "/one-more").unwrap();
    let root = || "/".to_owned();
    assert_eq!(
        resolve(&fs, root, "/l0", FollowLinks::Follow).unwrap(),
        "/target"
    );
    assert_eq!(
        resolve(&fs, root, "/one-more", FollowLinks::Follow),
        Err(VFSError::SymbolicLinkLimitExceeded)
    );
}

#[test]
fn readonly_refuses_changes() {
    let fs = base_image();
    assert_eq!(fs.name(), "memfs");
    assert_eq!(fs.mkdir("/new", 0o755), Err(VFSError::ReadOnlyFilesystem));
    assert_eq!(
        fs.write_file("/etc/passwd", b"", 0o644),
        Err(VFSError::ReadOnlyFilesystem)
    );
    assert_eq!(fs.remove("/etc/motd"), Err(VFSError::ReadOnlyFilesystem));
    assert_eq!(fs.chmod("/etc/motd", 0o777), Err(VFSError::ReadOnlyFilesystem));
    assert_eq!(fs.symlink("/x", "/y"), Err(VFSError::ReadOnlyFilesystem));
    assert_eq!(fs.read_file("/etc/motd").unwrap(), b"hello");
    assert_eq!(fs.readlink("/bin").unwrap(), "/usr/bin");
}

#[test]
fn cow_reads_fall_through() {
    let (_, layer, cow) = overlay();
    assert_eq!(cow.read_file("/etc/motd").unwrap(), b"hello");
    assert_eq!(cow.readlink("/bin").unwrap(), "/usr/bin");
    assert!(cow.lstat("/bin").unwrap().is_symlink());
    assert!(layer.read_dir("/").unwrap().is_empty());
}

#[test]
fn cow_copy_up_fidelity() {
    let (base, layer, cow) = overlay();
    let before = base.stat("/etc/motd").unwrap();
    let mut file = cow
        .open("/etc/motd", &OpenOptions::new().write(true).append(true))
        .unwrap();
    file.write_all(b"!").unwrap();
    drop(file);

    assert_eq!(cow.read_file("/etc/motd").unwrap(), b"hello!");
    assert_eq!(layer.read_file("/etc/motd").unwrap(), b"hello!");
    assert_eq!(base.read_file("/etc/motd").unwrap(), b"hello");
    assert_eq!(base.stat("/etc/motd").unwrap(), before);

    let copied = layer.stat("/etc/motd").unwrap();
    assert_eq!(copied.perm, 0o640);
    assert_eq!((copied.uid, copied.gid), (12, 34));
    let parent = layer.stat("/etc").unwrap();
    assert!(parent.is_dir());
    assert_eq!(parent.perm, 0o755);
}

#[test]
fn cow_copy_up_keeps_timestamps() {
    let (_, layer, cow) = overlay();
    cow.chmod("/etc/motd", 0o600).unwrap();
    let copied = layer.stat("/etc/motd").unwrap();
    assert_eq!(copied.perm, 0o600);
    assert_eq!(
        copied.mtime,
        SystemTime::UNIX_EPOCH + Duration::from_secs(2000)
    );
    assert_eq!(layer.read_file("/etc/motd").unwrap(), b"hello");
}

#[test]
fn cow_base_immutability() {
    let (base, _, cow) = overlay();
    let stat = base.stat("/etc/passwd").unwrap();
    let data = base.read_file("/etc/passwd").unwrap();

    cow.write_file("/etc/passwd", b"pwned", 0o644).unwrap();
    cow.chown("/etc/passwd", 1000, 1000).unwrap();
    cow.rename("/etc/passwd", "/etc/passwd.bak").unwrap();
    cow.mkdir_all("/etc/x/y", 0o755).unwrap();

    assert_eq!(base.stat("/etc/passwd").unwrap(), stat);
    assert_eq!(base.read_file("/etc/passwd").unwrap(), data);
    assert_eq!(base.stat("/etc/x"), Err(VFSError::NotFound));
    // the base copy shows through again once the layer copy moves away
    assert_eq!(cow.read_file("/etc/passwd").unwrap(), data);
    assert_eq!(cow.read_file("/etc/passwd.bak").unwrap(), b"pwned");
}

#[test]
fn cow_directory_creation() {
    let (_, layer, cow) = overlay();
    assert_eq!(cow.mkdir("/etc", 0o755), Err(VFSError::Exists));
    cow.mkdir_all("/home/user", 0o755).unwrap();
    assert!(layer.read_dir("/").unwrap().is_empty());
    assert_eq!(
        cow.mkdir_all("/etc/passwd", 0o755),
        Err(VFSError::DirectoryExpected)
    );

    cow.mkdir("/home/user/.ssh", 0o700).unwrap();
    assert!(layer.stat("/home/user/.ssh").unwrap().is_dir());
    assert!(cow.stat("/home/user/.ssh").unwrap().is_dir());
}

#[test]
fn cow_listing_is_a_union() {
    let (_, _, cow) = overlay();
    cow.write_file("/etc/hosts", b"127.0.0.1 localhost\n", 0o644)
        .unwrap();
    cow.write_file("/etc/motd", b"changed", 0o644).unwrap();
    let entries = cow.read_dir("/etc").unwrap();
    assert_eq!(names(entries.clone()), vec!["hosts", "motd", "passwd"]);
    let motd = entries.iter().find(|entry| entry.name == "motd").unwrap();
    assert_eq!(motd.stat.size, 7);
}

#[test]
fn cow_remove_policy() {
    let (_, layer, cow) = overlay();
    assert_eq!(cow.remove("/etc/motd"), Err(VFSError::PermissionDenied));
    assert_eq!(cow.remove_all("/etc"), Err(VFSError::PermissionDenied));
    assert_eq!(
        cow.rename("/etc/motd", "/tmp-motd"),
        Err(VFSError::PermissionDenied)
    );
    assert_eq!(cow.remove("/etc/missing"), Err(VFSError::NotFound));
    cow.remove_all("/etc/missing").unwrap();

    cow.write_file("/etc/new", b"x", 0o644).unwrap();
    cow.remove("/etc/new").unwrap();
    assert_eq!(cow.stat("/etc/new"), Err(VFSError::NotFound));

    cow.write_file("/etc/motd", b"changed", 0o644).unwrap();
    cow.remove("/etc/motd").unwrap();
    assert_eq!(layer.stat("/etc/motd"), Err(VFSError::NotFound));
    assert_eq!(cow.read_file("/etc/motd").unwrap(), b"hello");
}

#[test]
fn cow_open_errors() {
    let (_, _, cow) = overlay();
    assert_eq!(
        cow.open("/etc/motd", &OpenOptions::new().write(true).create_new(true))
            .err(),
        Some(VFSError::Exists)
    );
    assert_eq!(
        cow.open("/etc", &OpenOptions::new().write(true)).err(),
        Some(VFSError::FileExpected)
    );
    assert_eq!(
        cow.open("/etc/nope", &OpenOptions::new().write(true)).err(),
        Some(VFSError::NotFound)
    );
    assert_eq!(
        cow.open("/nope/file", &OpenOptions::new().write(true).create(true))
            .err(),
        Some(VFSError::NotFound)
    );
}

#[test]
fn cow_symlinks_in_layer() {
    let (base, layer, cow) = overlay();
    cow.symlink("/etc/motd", "/home/user/motd").unwrap();
    assert_eq!(cow.readlink("/home/user/motd").unwrap(), "/etc/motd");
    assert!(layer.lstat("/home/user/motd").unwrap().is_symlink());
    assert_eq!(base.lstat("/home/user/motd"), Err(VFSError::NotFound));
    assert_eq!(cow.symlink("/x", "/bin"), Err(VFSError::Exists));
}

/// Reports one byte more than it can deliver, so every copy-up comes up short
struct ShortBase {
    inner: LinkFs<MemFs>,
}

impl Filesystem for ShortBase {
    fn name(&self) -> &'static str {
        "short"
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        let mut stat = self.inner.stat(path)?;
        if stat.is_file() {
            stat.size += 1;
        }
        Ok(stat)
    }

    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        self.stat(path)
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
}

#[test]
fn cow_failed_copy_up_leaves_no_partial_file() {
    let inner = linkfs();
    inner.mkdir("/data", 0o755).unwrap();
    inner.write_file("/data/file", b"12345", 0o644).unwrap();
    let base: Arc<dyn Filesystem> = Arc::new(ShortBase { inner });
    let layer: Arc<dyn Filesystem> = Arc::new(linkfs());
    let cow = CopyOnWriteFs::new(base, layer.clone());

    assert_eq!(
        cow.open("/data/file", &OpenOptions::new().write(true)).err(),
        Some(VFSError::IO)
    );
    assert_eq!(layer.stat("/data/file"), Err(VFSError::NotFound));
    assert!(layer.stat("/data").unwrap().is_dir());
    assert_eq!(cow.read_file("/data/file").unwrap(), b"12345");
}

#[test]
fn cow_copy_up_is_never_seen_partial() {
    let size = 8 << 20;
    let inner = linkfs();
    inner.write_file("/big", &vec![7u8; size], 0o644).unwrap();
    let base: Arc<dyn Filesystem> = Arc::new(ReadOnlyFs::new(inner));
    let layer: Arc<dyn Filesystem> = Arc::new(linkfs());
    let cow = Arc::new(CopyOnWriteFs::new(base, layer.clone()));

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let cow = cow.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            let mut partial = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let seen = cow.stat("/big").unwrap().size;
                if seen != size as u64 {
                    partial.push(seen);
                }
            }
            partial
        })
    };
    cow.chmod("/big", 0o600).unwrap();
    done.store(true, Ordering::SeqCst);

    assert_eq!(reader.join().unwrap(), Vec::<u64>::new());
    assert_eq!(layer.stat("/big").unwrap().size, size as u64);
    assert_eq!(cow.stat("/big").unwrap().perm, 0o600);
}

#[test]
fn mount_longest_prefix_wins() {
    let mut fs = MountFs::new(Arc::new(MemFs::new()));
    fs.mount("/a", Arc::new(linkfs())).unwrap();
    fs.mount("/a/b", Arc::new(ProcFs::new(Arc::new(SystemInfo::default()))))
        .unwrap();
    assert_eq!(fs.mount_points().collect::<Vec<_>>(), vec!["/a/b", "/a"]);

    let (backend, relative) = fs.resolve("/a/b/c");
    assert_eq!((backend.name(), relative.as_str()), ("proc", "/c"));
    let (backend, relative) = fs.resolve("/a/b");
    assert_eq!((backend.name(), relative.as_str()), ("proc", "/"));
    let (backend, relative) = fs.resolve("/a/bc");
    assert_eq!((backend.name(), relative.as_str()), ("memfs", "/bc"));
    let (_, relative) = fs.resolve("/ab");
    assert_eq!(relative, "/ab");

    assert_eq!(
        fs.mount("/a/", Arc::new(MemFs::new())),
        Err(VFSError::Exists)
    );
    assert_eq!(
        fs.mount("/", Arc::new(MemFs::new())),
        Err(VFSError::InvalidArgument)
    );
}

#[test]
fn mount_dispatch() {
    let mut fs = MountFs::new(Arc::new(MemFs::new()));
    fs.mount("/mnt", Arc::new(linkfs())).unwrap();
    fs.mount("/proc", Arc::new(ProcFs::new(Arc::new(SystemInfo::default()))))
        .unwrap();
    fs.write_file("/root-file", b"r", 0o644).unwrap();
    fs.write_file("/mnt/inner", b"i", 0o644).unwrap();
    fs.symlink("/mnt/inner", "/mnt/link").unwrap();
    assert_eq!(fs.readlink("/mnt/link").unwrap(), "/mnt/inner");
    assert_eq!(names(fs.read_dir("/").unwrap()), vec!["mnt", "proc", "root-file"]);
    assert_eq!(names(fs.read_dir("/mnt").unwrap()), vec!["inner", "link"]);
    assert_eq!(
        fs.rename("/mnt/inner", "/moved"),
        Err(VFSError::CrossDevice)
    );
    fs.rename("/mnt/inner", "/mnt/renamed").unwrap();
    assert_eq!(fs.read_file("/mnt/renamed").unwrap(), b"i");
}

#[test]
fn proc_catalog() {
    let system = SystemInfo {
        cpu_cores: 4,
        ..Default::default()
    };
    let fs = ProcFs::new(Arc::new(system));
    let listed = names(fs.read_dir("/").unwrap());
    assert_eq!(listed, ProcFs::catalog().collect::<Vec<_>>());
    assert!(fs.stat("/").unwrap().is_dir());

    let cpuinfo = String::from_utf8(fs.read_file("/cpuinfo").unwrap()).unwrap();
    assert_eq!(cpuinfo.matches("processor\t:").count(), 4);
    let uptime = String::from_utf8(fs.read_file("/uptime").unwrap()).unwrap();
    let seconds: f64 = uptime.split_whitespace().next().unwrap().parse().unwrap();
    assert!(seconds > 60.0);
    let version = String::from_utf8(fs.read_file("/version").unwrap()).unwrap();
    assert!(version.starts_with("Linux version 5.4.0"));

    let stat = fs.stat("/meminfo").unwrap();
    assert_eq!(stat.perm, 0o444);
    assert_eq!(stat.size as usize, fs.read_file("/meminfo").unwrap().len());
}

#[test]
fn proc_is_read_only() {
    let fs = ProcFs::new(Arc::new(SystemInfo::default()));
    assert_eq!(fs.mkdir("/x", 0o755), Err(VFSError::NotFound));
    assert_eq!(fs.remove("/uptime"), Err(VFSError::NotFound));
    assert_eq!(fs.rename("/uptime", "/x"), Err(VFSError::NotFound));
    assert_eq!(fs.chmod("/uptime", 0o777), Err(VFSError::NotFound));
    assert_eq!(fs.chown("/uptime", 0, 0), Err(VFSError::NotFound));
    assert_eq!(
        fs.chtimes("/uptime", SystemTime::now(), SystemTime::now()),
        Err(VFSError::NotFound)
    );
    assert_eq!(
        fs.write_file("/uptime", b"0", 0o644),
        Err(VFSError::NotFound)
    );
    assert_eq!(fs.stat("/nonexistent"), Err(VFSError::NotFound));
    assert_eq!(fs.readlink("/uptime"), Err(VFSError::LinkExpected));
}
