//! Error types you might see while loading a base image or using a session

use thiserror::Error;

/// Errors during base image preparation
#[derive(Error, Debug)]
pub enum ImageError {
    /// storage io error
    #[error("storage io error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("utf8 path conversion error")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// tar file format error
    #[error("tar file format error")]
    TARFileError,

    /// virtual filesystem error while preparing image
    #[error("virtual filesystem error while preparing image: {0}")]
    ImageVFSError(#[from] VFSError),
}

/// Errors from the virtual filesystem layer, convertible to an errno code
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum VFSError {
    #[error("generic I/O error")]
    IO,

    #[error("file exists")]
    Exists,

    #[error("expected a directory, found another node type")]
    DirectoryExpected,

    #[error("expected a file, found a directory")]
    FileExpected,

    #[error("expected a symlink, found another node type")]
    LinkExpected,

    #[error("unallocated node")]
    UnallocNode,

    #[error("not found")]
    NotFound,

    #[error("directory not empty")]
    DirectoryNotEmpty,

    #[error("permission denied")]
    PermissionDenied,

    #[error("read-only filesystem")]
    ReadOnlyFilesystem,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("file too large")]
    FileTooLarge,

    #[error("cross-filesystem operation not supported")]
    CrossDevice,

    #[error("operation not supported by this filesystem")]
    Unsupported,

    #[error("too many nested path segments")]
    PathSegmentLimitExceeded,

    #[error("too many levels of symbolic links")]
    SymbolicLinkLimitExceeded,

    #[error("inode reference count error")]
    INodeRefCountError,

    #[error("session is closed")]
    SessionClosed,

    #[error("filesystem lock poisoned")]
    LockPoisoned,

    #[error("utf8 path conversion error")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl VFSError {
    /// Convert this error to the equivalent kernel errno value
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            VFSError::IO => libc::EIO,
            VFSError::Exists => libc::EEXIST,
            VFSError::Utf8Error(_) => libc::EINVAL,
            VFSError::DirectoryExpected => libc::ENOTDIR,
            VFSError::FileExpected => libc::EISDIR,
            VFSError::LinkExpected => libc::EINVAL,
            VFSError::UnallocNode => libc::ENOENT,
            VFSError::NotFound => libc::ENOENT,
            VFSError::DirectoryNotEmpty => libc::ENOTEMPTY,
            VFSError::PermissionDenied => libc::EPERM,
            VFSError::ReadOnlyFilesystem => libc::EROFS,
            VFSError::InvalidArgument => libc::EINVAL,
            VFSError::FileTooLarge => libc::EFBIG,
            VFSError::CrossDevice => libc::EXDEV,
            VFSError::Unsupported => libc::ENOSYS,
            VFSError::PathSegmentLimitExceeded => libc::ENAMETOOLONG,
            VFSError::SymbolicLinkLimitExceeded => libc::ELOOP,
            VFSError::INodeRefCountError => libc::ENOMEM,
            VFSError::SessionClosed => libc::ESHUTDOWN,
            VFSError::LockPoisoned => libc::EIO,
        }
    }

    /// Inverse of [VFSError::to_errno], for errors that crossed an
    /// `std::io` boundary. Unknown codes collapse to [VFSError::IO].
    pub fn from_errno(errno: libc::c_int) -> Self {
        match errno {
            libc::EEXIST => VFSError::Exists,
            libc::ENOTDIR => VFSError::DirectoryExpected,
            libc::EISDIR => VFSError::FileExpected,
            libc::ENOENT => VFSError::NotFound,
            libc::ENOTEMPTY => VFSError::DirectoryNotEmpty,
            libc::EPERM => VFSError::PermissionDenied,
            libc::EROFS => VFSError::ReadOnlyFilesystem,
            libc::EINVAL => VFSError::InvalidArgument,
            libc::EFBIG => VFSError::FileTooLarge,
            libc::EXDEV => VFSError::CrossDevice,
            libc::ENOSYS => VFSError::Unsupported,
            libc::ENAMETOOLONG => VFSError::PathSegmentLimitExceeded,
            libc::ELOOP => VFSError::SymbolicLinkLimitExceeded,
            libc::ENOMEM => VFSError::INodeRefCountError,
            libc::ESHUTDOWN => VFSError::SessionClosed,
            _ => VFSError::IO,
        }
    }
}

impl From<VFSError> for std::io::Error {
    fn from(err: VFSError) -> Self {
        std::io::Error::from_raw_os_error(err.to_errno())
    }
}

impl From<std::io::Error> for VFSError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => VFSError::from_errno(errno),
            None => match err.kind() {
                std::io::ErrorKind::NotFound => VFSError::NotFound,
                std::io::ErrorKind::AlreadyExists => VFSError::Exists,
                std::io::ErrorKind::PermissionDenied => VFSError::PermissionDenied,
                std::io::ErrorKind::InvalidInput => VFSError::InvalidArgument,
                _ => VFSError::IO,
            },
        }
    }
}
