//! Lexical path helpers and the symlink-aware path resolver
//!
//! Paths handled here are attacker-controlled strings. Nothing in this module
//! touches a store except through [Filesystem::lstat] and
//! [Filesystem::readlink].

use crate::{errors::VFSError, filesystem::{FileKind, Filesystem}};

/// Number of symbolic link expansions allowed during one resolution
pub const MAX_SYMLINK_EXPANSIONS: usize = 16;

/// Number of path components visited during one resolution, counting the
/// components of every spliced link target
pub const MAX_PATH_SEGMENTS: usize = 4096;

/// Whether a symbolic link in the final path component is expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowLinks {
    NoFollow,
    Follow,
}

#[derive(Debug)]
struct Limits {
    path_segment: usize,
    symbolic_link: usize,
}

impl Limits {
    fn reset() -> Self {
        Limits {
            path_segment: MAX_PATH_SEGMENTS,
            symbolic_link: MAX_SYMLINK_EXPANSIONS,
        }
    }

    fn take_path_segment(&mut self) -> Result<(), VFSError> {
        if self.path_segment > 0 {
            self.path_segment -= 1;
            Ok(())
        } else {
            Err(VFSError::PathSegmentLimitExceeded)
        }
    }

    fn take_symbolic_link(&mut self) -> Result<(), VFSError> {
        if self.symbolic_link > 0 {
            self.symbolic_link -= 1;
            Ok(())
        } else {
            Err(VFSError::SymbolicLinkLimitExceeded)
        }
    }
}

/// Map a path to its canonical absolute form.
///
/// Relative paths are taken from `cwd`, which is only called when needed.
/// Every intermediate component must exist and be a directory, or a link to
/// one. The final component may be missing. It is only expanded when it's a
/// link and `follow` asks for it, so a [FollowLinks::NoFollow] result can
/// still name a symbolic link.
pub fn resolve<F, W>(fs: &F, cwd: W, path: &str, follow: FollowLinks) -> Result<String, VFSError>
where
    F: Filesystem + ?Sized,
    W: FnOnce() -> String,
{
    if path.is_empty() {
        return Err(VFSError::NotFound);
    }
    let mut rest = if is_absolute(path) {
        path.to_owned()
    } else {
        format!("{}/{}", cwd(), path)
    };
    let mut dest = String::from("/");
    let mut limits = Limits::reset();
    let mut pos = 0;

    loop {
        let (start, end) = match next_component(&rest, pos) {
            None => break,
            Some(range) => range,
        };
        pos = end;
        limits.take_path_segment()?;

        match &rest[start..end] {
            "." => continue,
            ".." => {
                pop_component(&mut dest);
                continue;
            }
            part => push_component(&mut dest, part),
        }

        let is_last = rest[pos..].bytes().all(|c| c == b'/');
        if is_last && follow == FollowLinks::NoFollow {
            break;
        }

        let stat = match fs.lstat(&dest) {
            Ok(stat) => stat,
            Err(VFSError::NotFound) if is_last => break,
            Err(err) => return Err(err),
        };

        match stat.kind {
            FileKind::Directory => {}
            FileKind::Regular if is_last => {}
            FileKind::Regular => return Err(VFSError::DirectoryExpected),
            FileKind::Symlink => {
                limits.take_symbolic_link()?;
                let target = fs.readlink(&dest)?;
                log::trace!("following symlink, {:?} -> {:?}", dest, target);
                if target.is_empty() {
                    return Err(VFSError::NotFound);
                }
                pop_component(&mut dest);
                if is_absolute(&target) {
                    dest.truncate(1);
                }
                // splice the target in place of the processed prefix and
                // restart from the link's parent directory
                rest = format!("{}/{}", target, &rest[pos..]);
                pos = 0;
            }
        }
    }
    Ok(dest)
}

fn next_component(path: &str, mut pos: usize) -> Option<(usize, usize)> {
    let bytes = path.as_bytes();
    while pos < bytes.len() && bytes[pos] == b'/' {
        pos += 1;
    }
    if pos >= bytes.len() {
        None
    } else {
        let end = path[pos..].find('/').map(|i| pos + i).unwrap_or(bytes.len());
        Some((pos, end))
    }
}

fn push_component(dest: &mut String, part: &str) {
    if !dest.ends_with('/') {
        dest.push('/');
    }
    dest.push_str(part);
}

fn pop_component(dest: &mut String) {
    match dest.rfind('/') {
        Some(0) | None => dest.truncate(1),
        Some(index) => dest.truncate(index),
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Lexically clean a path into absolute form, treating relative paths as
/// relative to the root. `..` never climbs above `/`.
pub fn clean(path: &str) -> String {
    let mut dest = String::from("/");
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => pop_component(&mut dest),
            part => push_component(&mut dest, part),
        }
    }
    dest
}

/// Non-empty components of a cleaned path
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty() && *part != ".")
}

/// Parent directory of a cleaned absolute path; the root is its own parent
pub fn parent(path: &str) -> String {
    let mut dest = clean(path);
    pop_component(&mut dest);
    dest
}

/// Final component of a path, or `/` for the root
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        if path.is_empty() {
            "."
        } else {
            "/"
        }
    } else {
        match trimmed.rfind('/') {
            Some(index) => &trimmed[index + 1..],
            None => trimmed,
        }
    }
}

pub fn join(dir: &str, name: &str) -> String {
    if is_absolute(name) || dir.is_empty() {
        name.to_owned()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Is `path` equal to `prefix` or below it? Both must be clean.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    prefix == "/"
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
