//! Execution contexts: one shared per honeypot, one per session, one per
//! simulated process
//!
//! A [ProcessContext] keeps a weak reference to its [SessionContext], which
//! in turn holds the [SharedContext] it was created from. Closing a session
//! invalidates the filesystem view of every process that came from it.


pub mod env;
mod process;
mod session;
mod shared;

pub use env::Environment;
pub use process::{ProcAttr, ProcessContext, ProcessFs, Stdio, WorkDir};
pub use session::{SessionContext, WindowSize};
pub use shared::{SharedContext, SharedContextBuilder, SystemInfo, Uname};
