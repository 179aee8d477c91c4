use crate::{
    errors::ImageError,
    filesystem::{
        vfs::{MemFs, VFSWriter},
        FileKind, Stat,
    },
};
use std::{
    convert::TryInto,
    io::Read,
    time::{Duration, SystemTime},
};
use tar::{Archive, Entry, EntryType};

/// Populate `fs` from an uncompressed tar stream
pub fn extract<R: Read>(fs: &MemFs, archive: R) -> Result<(), ImageError> {
    let mut fsw = fs.writer()?;
    let mut archive = Archive::new(archive);
    let mut count: usize = 0;
    for entry in archive.entries()? {
        extract_file(&mut fsw, entry?)?;
        count += 1;
    }
    log::debug!("extracted {} tar entries", count);
    Ok(())
}

fn entry_path<'a, R: Read>(entry: &Entry<'a, R>) -> Result<String, ImageError> {
    let path = entry.path()?;
    match path.to_str() {
        Some(s) => Ok(s.to_owned()),
        None => Err(ImageError::TARFileError),
    }
}

fn link_target<'a, R: Read>(entry: &Entry<'a, R>) -> Result<String, ImageError> {
    match entry.link_name()? {
        None => Err(ImageError::TARFileError),
        Some(link_name) => match link_name.to_str() {
            Some(s) => Ok(s.to_owned()),
            None => Err(ImageError::TARFileError),
        },
    }
}

fn extract_file<'a, R: Read>(
    fsw: &mut VFSWriter<'_>,
    mut entry: Entry<'a, R>,
) -> Result<(), ImageError> {
    let kind = entry.header().entry_type();
    let path = entry_path(&entry)?;
    let mtime = SystemTime::UNIX_EPOCH
        .checked_add(Duration::from_secs(entry.header().mtime()?))
        .ok_or(ImageError::TARFileError)?;
    let stat = Stat {
        kind: FileKind::Regular,
        perm: entry.header().mode()? & 0o7777,
        uid: entry
            .header()
            .uid()?
            .try_into()
            .map_err(|_| ImageError::TARFileError)?,
        gid: entry
            .header()
            .gid()?
            .try_into()
            .map_err(|_| ImageError::TARFileError)?,
        atime: mtime,
        mtime,
        ctime: mtime,
        ..Default::default()
    };
    match kind {
        EntryType::Regular | EntryType::Continuous => {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            fsw.write_file(&path, stat, data)?
        }
        EntryType::Directory => fsw.write_directory_metadata(&path, stat)?,
        EntryType::Symlink => fsw.write_symlink(&path, stat, &link_target(&entry)?)?,
        EntryType::Link => fsw.write_hardlink(&path, &link_target(&entry)?)?,
        _ => log::error!(
            "skipping unsupported tar file entry type {:?}, {:?}",
            kind,
            path
        ),
    }
    Ok(())
}
