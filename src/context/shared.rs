use crate::{
    filesystem::{Filesystem, ReadOnlyFs},
    identity::IdentityTable,
    registry::Registry,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

/// Fields reported by `uname`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uname {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

impl Default for Uname {
    fn default() -> Self {
        Uname {
            sysname: "Linux".to_owned(),
            nodename: "localhost".to_owned(),
            release: "5.4.0-150-generic".to_owned(),
            version: "#167-Ubuntu SMP Mon May 15 17:35:05 UTC 2023".to_owned(),
            machine: "x86_64".to_owned(),
        }
    }
}

/// The simulated machine's identity, shared by every session
#[derive(Debug, Clone, PartialEq)]
pub struct SystemInfo {
    pub hostname: String,
    pub boot_time: SystemTime,
    pub uname: Uname,
    pub build_host: String,
    pub cpu_model: String,
    pub cpu_mhz: f64,
    pub cpu_cores: u32,
    pub memory_kb: u64,
}

impl Default for SystemInfo {
    fn default() -> Self {
        SystemInfo {
            hostname: "localhost".to_owned(),
            boot_time: SystemTime::now() - Duration::from_secs(3 * 24 * 60 * 60 + 7 * 60 * 60),
            uname: Default::default(),
            build_host: "lcy02-amd64-059".to_owned(),
            cpu_model: "Intel(R) Xeon(R) Platinum 8259CL CPU @ 2.50GHz".to_owned(),
            cpu_mhz: 2499.998,
            cpu_cores: 2,
            memory_kb: 4_026_168,
        }
    }
}

/// State shared by every session for the lifetime of the honeypot
///
/// Nothing here changes after [SharedContextBuilder::build] except the
/// process and session counters.
pub struct SharedContext {
    base: Arc<dyn Filesystem>,
    system: Arc<SystemInfo>,
    users: IdentityTable,
    registry: Arc<Registry>,
    next_pid: AtomicU32,
    next_session: AtomicU64,
}

/// Setup for a [SharedContext], starting at [SharedContext::builder()]
pub struct SharedContextBuilder {
    base: Arc<dyn Filesystem>,
    system: SystemInfo,
    users: IdentityTable,
    registry: Arc<Registry>,
    first_pid: u32,
}

impl SharedContext {
    /// Start configuring a shared context around a loaded base image.
    /// The base is wrapped read-only.
    pub fn builder(base: Arc<dyn Filesystem>) -> SharedContextBuilder {
        SharedContextBuilder {
            base,
            system: Default::default(),
            users: IdentityTable::with_root(),
            registry: Arc::new(Registry::new()),
            first_pid: 1,
        }
    }

    /// Allocate a process id, unique and increasing across every session
    pub fn next_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::SeqCst)
    }

    /// The read-only base image every session layers over
    pub fn base(&self) -> Arc<dyn Filesystem> {
        self.base.clone()
    }

    pub fn system(&self) -> &Arc<SystemInfo> {
        &self.system
    }

    pub fn hostname(&self) -> &str {
        &self.system.hostname
    }

    pub fn boot_time(&self) -> SystemTime {
        self.system.boot_time
    }

    pub fn uname(&self) -> &Uname {
        &self.system.uname
    }

    pub fn users(&self) -> &IdentityTable {
        &self.users
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("system", &self.system)
            .field("registry", &self.registry)
            .field("next_pid", &self.next_pid)
            .finish()
    }
}

impl SharedContextBuilder {
    pub fn build(self) -> Arc<SharedContext> {
        let mut system = self.system;
        system.uname.nodename = system.hostname.clone();
        log::info!(
            "shared context for {:?}, {} programs, first pid {}",
            system.hostname,
            self.registry.names().count(),
            self.first_pid
        );
        Arc::new(SharedContext {
            base: Arc::new(ReadOnlyFs::new(self.base)),
            system: Arc::new(system),
            users: self.users,
            registry: self.registry,
            next_pid: AtomicU32::new(self.first_pid),
            next_session: AtomicU64::new(1),
        })
    }

    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.system.hostname = hostname.into();
        self
    }

    pub fn boot_time(mut self, boot_time: SystemTime) -> Self {
        self.system.boot_time = boot_time;
        self
    }

    pub fn uname(mut self, uname: Uname) -> Self {
        self.system.uname = uname;
        self
    }

    /// Replace every simulated machine detail at once
    pub fn system(mut self, system: SystemInfo) -> Self {
        self.system = system;
        self
    }

    pub fn users(mut self, users: IdentityTable) -> Self {
        self.users = users;
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Process id handed to the first process of the first session
    pub fn first_pid(mut self, pid: u32) -> Self {
        self.first_pid = pid;
        self
    }
}
