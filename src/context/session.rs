use crate::{
    context::{
        process::{ProcessContext, Stdio, WorkDir},
        Environment, SharedContext,
    },
    errors::VFSError,
    event::{Event, EventSink},
    filesystem::{
        mount::Mount, CopyOnWriteFs, Filesystem, FollowLinks, LinkFs, MemFs, MountFs, ProcFs,
    },
    identity::User,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::SystemTime,
};

const ROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const USER_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/local/games:/usr/games";

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        WindowSize { rows: 24, cols: 80 }
    }
}

/// Everything owned by one connection
///
/// The filesystem is a private copy-on-write layer over the shared base, with
/// the synthetic `/proc` mounted on top. Nothing written here is visible to
/// any other session.
pub struct SessionContext {
    id: u64,
    shared: Arc<SharedContext>,
    filesystem: MountFs,
    user: User,
    term: Option<String>,
    window: Mutex<WindowSize>,
    login_time: SystemTime,
    sink: Arc<dyn EventSink>,
    closed: AtomicBool,
}

impl SessionContext {
    /// Start a session for `username`, who must be in the shared identity
    /// table.
    pub fn new(
        shared: &Arc<SharedContext>,
        username: &str,
        term: Option<&str>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>, VFSError> {
        let user = match shared.users().lookup(username) {
            Some(user) => user.clone(),
            None => {
                log::warn!("no identity for user {:?}", username);
                return Err(VFSError::NotFound);
            }
        };

        let layer: Arc<dyn Filesystem> = Arc::new(LinkFs::new(MemFs::new()));
        let root: Arc<dyn Filesystem> = Arc::new(CopyOnWriteFs::new(shared.base(), layer));
        let mut filesystem = MountFs::new(root);
        filesystem.mount("/proc", Arc::new(ProcFs::new(shared.system().clone())))?;

        let id = shared.next_session_id();
        let login_time = SystemTime::now();
        log::info!("session {} started for {:?}", id, user.name);
        sink.record(Event::SessionStart {
            session: id,
            user: user.name.clone(),
            time: login_time,
        });

        Ok(Arc::new(SessionContext {
            id,
            shared: shared.clone(),
            filesystem,
            user,
            term: term.map(str::to_owned),
            window: Mutex::new(Default::default()),
            login_time,
            sink,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    /// The session's whole filesystem tree, as seen without any working
    /// directory. Paths are taken literally.
    pub fn filesystem(&self) -> Result<&MountFs, VFSError> {
        if self.is_closed() {
            Err(VFSError::SessionClosed)
        } else {
            Ok(&self.filesystem)
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    pub fn login_time(&self) -> SystemTime {
        self.login_time
    }

    pub fn window_size(&self) -> WindowSize {
        match self.window.lock() {
            Ok(window) => *window,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_window_size(&self, size: WindowSize) {
        log::debug!("session {} window {}x{}", self.id, size.cols, size.rows);
        match self.window.lock() {
            Ok(mut window) => *window = size,
            Err(poisoned) => *poisoned.into_inner() = size,
        }
    }

    pub fn record(&self, event: Event) {
        self.sink.record(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End the session. Every process view of its filesystem fails with
    /// [VFSError::SessionClosed] from now on. Closing twice has no effect.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::info!("session {} closed", self.id);
            self.record(Event::SessionEnd {
                session: self.id,
                time: SystemTime::now(),
            });
        }
    }

    /// Build the first process of the session, a login shell for the
    /// connecting user
    pub fn login_process(self: &Arc<Self>) -> Result<ProcessContext, VFSError> {
        let user = &self.user;
        let mut env = Environment::new();
        env.set("HOME", user.home.as_str());
        env.set("USER", user.name.as_str());
        env.set("LOGNAME", user.name.as_str());
        env.set("SHELL", user.shell.as_str());
        env.set("PATH", if user.is_root() { ROOT_PATH } else { USER_PATH });
        if let Some(term) = &self.term {
            env.set("TERM", term.as_str());
        }

        // a missing or broken home directory logs in at the root, like login(1)
        let workdir = WorkDir::new("/");
        let home = ProcessContext::view(self, &workdir, 0)
            .resolve(&user.home, FollowLinks::Follow)
            .and_then(|home| match self.filesystem()?.stat(&home) {
                Ok(stat) if stat.is_dir() => Ok(home),
                Ok(_) => Err(VFSError::DirectoryExpected),
                Err(err) => Err(err),
            });
        match home {
            Ok(home) => workdir.set(home),
            Err(err) => log::debug!("home directory {:?} unusable, {}", user.home, err),
        }
        env.set("PWD", workdir.get());

        let login_name = match crate::filesystem::path::base_name(&user.shell) {
            "/" | "." => "-sh".to_owned(),
            name => format!("-{}", name),
        };
        ProcessContext::spawn(
            self,
            0,
            user.shell.clone(),
            vec![login_name],
            env,
            workdir,
            Stdio::null(),
        )
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("user", &self.user.name)
            .field("term", &self.term)
            .field("login_time", &self.login_time)
            .field("closed", &self.is_closed())
            .finish()
    }
}
