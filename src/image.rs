//! Loading the base filesystem image that every session shares

use crate::{
    errors::ImageError,
    filesystem::{tar, Filesystem, LinkFs, MemFs},
};
use flate2::read::GzDecoder;
use std::{
    fs,
    io::{BufRead, BufReader, Read},
    path::Path,
    sync::Arc,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A base filesystem image, fully loaded into memory
///
/// Once handed to [crate::context::SharedContext::builder] it is only ever
/// read from.
pub struct BaseImage {
    filesystem: LinkFs<MemFs>,
}

impl BaseImage {
    /// An image holding only an empty root directory
    pub fn empty() -> Self {
        BaseImage {
            filesystem: LinkFs::new(MemFs::new()),
        }
    }

    pub fn from_tar<R: Read>(archive: R) -> Result<Self, ImageError> {
        let memfs = MemFs::new();
        tar::extract(&memfs, archive)?;
        Ok(BaseImage {
            filesystem: LinkFs::new(memfs),
        })
    }

    pub fn from_tar_gz<R: Read>(archive: R) -> Result<Self, ImageError> {
        BaseImage::from_tar(GzDecoder::new(archive))
    }

    /// Load a tar archive from disk, gzip-compressed or not
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        log::info!("loading base image from {:?}", path);
        let mut reader = BufReader::new(fs::File::open(path)?);
        let compressed = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        if compressed {
            BaseImage::from_tar_gz(reader)
        } else {
            BaseImage::from_tar(reader)
        }
    }

    pub fn filesystem(&self) -> &LinkFs<MemFs> {
        &self.filesystem
    }

    pub fn into_filesystem(self) -> Arc<dyn Filesystem> {
        Arc::new(self.filesystem)
    }
}
