//! A virtual operating system for medium-interaction honeypots
//!
//! Each connection gets a [SessionContext] with a private, writable view of
//! one shared read-only base image. Simulated processes run inside a session
//! as [ProcessContext]s with their own working directory and environment.

pub mod context;
pub mod errors;
pub mod event;
pub mod filesystem;
pub mod identity;
pub mod image;
pub mod registry;

pub use crate::{
    context::{ProcAttr, ProcessContext, SessionContext, SharedContext, Stdio},
    errors::{ImageError, VFSError},
    event::{Event, EventSink},
    filesystem::{FileKind, Filesystem, OpenOptions, Stat},
    identity::{IdentityTable, User},
    image::BaseImage,
    registry::{Program, Registry},
};
