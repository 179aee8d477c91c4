use crate::{
    context::{Environment, SessionContext, SharedContext, Uname},
    errors::VFSError,
    event::Event,
    filesystem::{
        path::{self, FollowLinks},
        DirEntry, File, Filesystem, MountFs, OpenOptions, Stat,
    },
};
use std::{
    fmt,
    io::{self, Read, Write},
    sync::{Arc, Mutex, RwLock, Weak},
    time::SystemTime,
};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A process working directory, always absolute and clean
#[derive(Clone)]
pub struct WorkDir(Arc<RwLock<String>>);

impl WorkDir {
    pub fn new<S: AsRef<str>>(dir: S) -> Self {
        WorkDir(Arc::new(RwLock::new(path::clean(dir.as_ref()))))
    }

    pub fn get(&self) -> String {
        match self.0.read() {
            Ok(dir) => dir.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set<S: AsRef<str>>(&self, dir: S) {
        let dir = path::clean(dir.as_ref());
        match self.0.write() {
            Ok(mut current) => *current = dir,
            Err(poisoned) => *poisoned.into_inner() = dir,
        }
    }
}

impl fmt::Debug for WorkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkDir").field(&self.get()).finish()
    }
}

/// One process's view of its session's filesystem
///
/// Paths are resolved against this process's own working directory, with
/// symbolic links expanded the way the equivalent system call would. The
/// view holds no strong reference to the session; once the session is closed
/// or dropped every call fails with [VFSError::SessionClosed].
pub struct ProcessFs {
    session: Weak<SessionContext>,
    workdir: WorkDir,
    pid: u32,
}

impl ProcessFs {
    fn session(&self) -> Result<Arc<SessionContext>, VFSError> {
        match self.session.upgrade() {
            Some(session) if !session.is_closed() => Ok(session),
            _ => Err(VFSError::SessionClosed),
        }
    }

    fn resolve_in(&self, fs: &MountFs, path: &str, follow: FollowLinks) -> Result<String, VFSError> {
        path::resolve(fs, || self.workdir.get(), path, follow)
    }

    /// Canonical absolute form of `path` as this process sees it
    pub fn resolve(&self, path: &str, follow: FollowLinks) -> Result<String, VFSError> {
        let session = self.session()?;
        self.resolve_in(session.filesystem()?, path, follow)
    }

    fn record_write(&self, session: &SessionContext, path: &str) {
        session.record(Event::FileWrite {
            session: session.id(),
            pid: self.pid,
            path: path.to_owned(),
        });
    }

    fn record_remove(&self, session: &SessionContext, path: &str) {
        session.record(Event::FileRemove {
            session: session.id(),
            pid: self.pid,
            path: path.to_owned(),
        });
    }
}

impl Filesystem for ProcessFs {
    fn name(&self) -> &'static str {
        "process"
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.stat(&self.resolve_in(fs, path, FollowLinks::Follow)?)
    }

    fn lstat(&self, path: &str) -> Result<Stat, VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.lstat(&self.resolve_in(fs, path, FollowLinks::NoFollow)?)
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        let resolved = self.resolve_in(fs, path, FollowLinks::Follow)?;
        let file = fs.open(&resolved, options)?;
        if options.has_write_intent() {
            self.record_write(&session, &resolved);
        }
        Ok(file)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.read_dir(&self.resolve_in(fs, path, FollowLinks::Follow)?)
    }

    fn mkdir(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        let resolved = self.resolve_in(fs, path, FollowLinks::NoFollow)?;
        fs.mkdir(&resolved, perm)?;
        self.record_write(&session, &resolved);
        Ok(())
    }

    /// Walks one component at a time so links to directories along the way
    /// are followed, and only missing directories are created
    fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        if path.is_empty() {
            return Err(VFSError::NotFound);
        }
        let session = self.session()?;
        let fs = session.filesystem()?;
        let full = path::join(&self.workdir.get(), path);
        let mut current = String::from("/");
        for part in full.split('/').filter(|part| !part.is_empty()) {
            let next = path::resolve(fs, || current.clone(), part, FollowLinks::Follow)?;
            match fs.stat(&next) {
                Ok(stat) if stat.is_dir() => {}
                Ok(_) => return Err(VFSError::DirectoryExpected),
                Err(VFSError::NotFound) => match fs.mkdir(&next, perm) {
                    Ok(()) => self.record_write(&session, &next),
                    // a sibling process got there first
                    Err(VFSError::Exists) if is_dir(fs, &next) => {}
                    Err(err) => return Err(err),
                },
                Err(err) => return Err(err),
            }
            current = next;
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        let resolved = self.resolve_in(fs, path, FollowLinks::NoFollow)?;
        fs.remove(&resolved)?;
        self.record_remove(&session, &resolved);
        Ok(())
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        let resolved = self.resolve_in(fs, path, FollowLinks::NoFollow)?;
        fs.remove_all(&resolved)?;
        self.record_remove(&session, &resolved);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        let from = self.resolve_in(fs, from, FollowLinks::NoFollow)?;
        let to = self.resolve_in(fs, to, FollowLinks::NoFollow)?;
        fs.rename(&from, &to)?;
        self.record_remove(&session, &from);
        self.record_write(&session, &to);
        Ok(())
    }

    fn chmod(&self, path: &str, perm: u32) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.chmod(&self.resolve_in(fs, path, FollowLinks::Follow)?, perm)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.chown(&self.resolve_in(fs, path, FollowLinks::Follow)?, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.chtimes(&self.resolve_in(fs, path, FollowLinks::Follow)?, atime, mtime)
    }

    /// The target is stored as given, relative targets stay relative
    fn symlink(&self, target: &str, link: &str) -> Result<(), VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        let resolved = self.resolve_in(fs, link, FollowLinks::NoFollow)?;
        fs.symlink(target, &resolved)?;
        self.record_write(&session, &resolved);
        Ok(())
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        let session = self.session()?;
        let fs = session.filesystem()?;
        fs.readlink(&self.resolve_in(fs, path, FollowLinks::NoFollow)?)
    }
}

fn is_dir(fs: &MountFs, path: &str) -> bool {
    fs.stat(path).map(|stat| stat.is_dir()).unwrap_or(false)
}

impl fmt::Debug for ProcessFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessFs")
            .field("pid", &self.pid)
            .field("workdir", &self.workdir)
            .finish()
    }
}

/// Standard streams of a simulated process
#[derive(Clone)]
pub struct Stdio {
    pub stdin: Arc<Mutex<dyn Read + Send>>,
    pub stdout: Arc<Mutex<dyn Write + Send>>,
    pub stderr: Arc<Mutex<dyn Write + Send>>,
}

impl Stdio {
    pub fn new<I, O, E>(stdin: I, stdout: O, stderr: E) -> Self
    where
        I: Read + Send + 'static,
        O: Write + Send + 'static,
        E: Write + Send + 'static,
    {
        Stdio {
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        }
    }

    /// Empty input, discarded output
    pub fn null() -> Self {
        Stdio::new(io::empty(), io::sink(), io::sink())
    }

    pub fn read_in(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdin.lock() {
            Ok(mut stdin) => stdin.read(buf),
            Err(_) => Err(io::Error::from_raw_os_error(libc::EIO)),
        }
    }

    pub fn write_out(&self, buf: &[u8]) -> io::Result<()> {
        match self.stdout.lock() {
            Ok(mut stdout) => stdout.write_all(buf),
            Err(_) => Err(io::Error::from_raw_os_error(libc::EIO)),
        }
    }

    pub fn write_err(&self, buf: &[u8]) -> io::Result<()> {
        match self.stderr.lock() {
            Ok(mut stderr) => stderr.write_all(buf),
            Err(_) => Err(io::Error::from_raw_os_error(libc::EIO)),
        }
    }
}

impl fmt::Debug for Stdio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stdio").finish()
    }
}

/// Attributes for [ProcessContext::start_process]
///
/// By default the child inherits a copy of the parent's environment, its
/// working directory, and its standard streams.
#[derive(Debug, Clone, Default)]
pub struct ProcAttr {
    dir: Option<String>,
    clear_env: bool,
    vars: Vec<(String, String)>,
    stdio: Option<Stdio>,
}

impl ProcAttr {
    pub fn new() -> Self {
        Default::default()
    }

    /// Start in this directory, which must exist and be a directory
    pub fn dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.vars.push((key.into(), value.into()));
        }
        self
    }

    /// Don't inherit anything from the parent environment
    pub fn env_clear(mut self) -> Self {
        self.clear_env = true;
        self.vars.clear();
        self
    }

    /// Replace the whole environment
    pub fn environment(self, env: &Environment) -> Self {
        self.env_clear().envs(env.iter())
    }

    pub fn stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = Some(stdio);
        self
    }
}

/// One simulated process
pub struct ProcessContext {
    session: Weak<SessionContext>,
    shared: Arc<SharedContext>,
    session_id: u64,
    filesystem: ProcessFs,
    workdir: WorkDir,
    env: Environment,
    argv: Vec<String>,
    executable: String,
    pid: u32,
    ppid: u32,
    uid: u32,
    gid: u32,
    stdio: Stdio,
}

impl ProcessContext {
    pub(crate) fn view(session: &Arc<SessionContext>, workdir: &WorkDir, pid: u32) -> ProcessFs {
        ProcessFs {
            session: Arc::downgrade(session),
            workdir: workdir.clone(),
            pid,
        }
    }

    pub(crate) fn spawn(
        session: &Arc<SessionContext>,
        ppid: u32,
        executable: String,
        argv: Vec<String>,
        env: Environment,
        workdir: WorkDir,
        stdio: Stdio,
    ) -> Result<Self, VFSError> {
        session.filesystem()?;
        let shared = session.shared().clone();
        let pid = shared.next_pid();
        log::debug!(
            "session {} spawn pid {} ppid {} {:?} {:?}",
            session.id(),
            pid,
            ppid,
            executable,
            argv
        );
        session.record(Event::ProcessStart {
            session: session.id(),
            pid,
            ppid,
            path: executable.clone(),
            argv: argv.clone(),
            cwd: workdir.get(),
        });
        let user = session.user();
        Ok(ProcessContext {
            session: Arc::downgrade(session),
            session_id: session.id(),
            filesystem: ProcessContext::view(session, &workdir, pid),
            uid: user.uid,
            gid: user.gid,
            shared,
            workdir,
            env,
            argv,
            executable,
            pid,
            ppid,
            stdio,
        })
    }

    /// The owning session, unless it has been closed
    pub fn session(&self) -> Result<Arc<SessionContext>, VFSError> {
        self.filesystem.session()
    }

    /// Resolve `path` to a directory, following links
    fn validate_dir(&self, path: &str) -> Result<String, VFSError> {
        let dir = self.filesystem.resolve(path, FollowLinks::Follow)?;
        let stat = self.filesystem.stat(&dir)?;
        if stat.is_dir() {
            Ok(dir)
        } else {
            Err(VFSError::DirectoryExpected)
        }
    }

    /// Create a child process. Nothing is allocated unless the requested
    /// working directory checks out.
    pub fn start_process<S: AsRef<str>>(
        &self,
        executable: &str,
        argv: &[S],
        attr: ProcAttr,
    ) -> Result<ProcessContext, VFSError> {
        let session = self.session()?;
        let workdir = match &attr.dir {
            Some(dir) => WorkDir::new(self.validate_dir(dir)?),
            None => WorkDir::new(self.getwd()),
        };
        let mut env = if attr.clear_env {
            Environment::new()
        } else {
            self.env.clone()
        };
        for (key, value) in attr.vars {
            env.set(key, value);
        }
        let stdio = attr.stdio.unwrap_or_else(|| self.stdio.clone());
        let argv = argv.iter().map(|arg| arg.as_ref().to_owned()).collect();
        ProcessContext::spawn(
            &session,
            self.pid,
            executable.to_owned(),
            argv,
            env,
            workdir,
            stdio,
        )
    }

    /// Change the working directory. It stays as it was unless `path`
    /// resolves to a directory.
    pub fn chdir(&self, path: &str) -> Result<(), VFSError> {
        let dir = self.validate_dir(path)?;
        log::trace!("pid {} chdir {:?}", self.pid, dir);
        self.workdir.set(&dir);
        if let Ok(session) = self.session() {
            session.record(Event::Chdir {
                session: self.session_id,
                pid: self.pid,
                dir,
            });
        }
        Ok(())
    }

    pub fn getwd(&self) -> String {
        self.workdir.get()
    }

    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.get(key)
    }

    pub fn setenv<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.env.set(key, value);
    }

    pub fn unsetenv(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    /// Every variable as a `KEY=value` string
    pub fn environ(&self) -> Vec<String> {
        self.env.to_strings()
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn args(&self) -> &[String] {
        &self.argv
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn getpid(&self) -> u32 {
        self.pid
    }

    pub fn getppid(&self) -> u32 {
        self.ppid
    }

    pub fn getuid(&self) -> u32 {
        self.uid
    }

    pub fn getgid(&self) -> u32 {
        self.gid
    }

    pub fn hostname(&self) -> &str {
        self.shared.hostname()
    }

    pub fn uname(&self) -> &Uname {
        self.shared.uname()
    }

    pub fn filesystem(&self) -> &ProcessFs {
        &self.filesystem
    }

    pub fn stdio(&self) -> &Stdio {
        &self.stdio
    }

    /// Find an executable the way `execvp` would. Names containing a slash
    /// are used as they are, anything else is searched for in `PATH`.
    pub fn look_path(&self, name: &str) -> Result<String, VFSError> {
        if name.is_empty() {
            return Err(VFSError::NotFound);
        }
        if name.contains('/') {
            let stat = self.filesystem.stat(name)?;
            return if stat.is_dir() {
                Err(VFSError::PermissionDenied)
            } else {
                Ok(name.to_owned())
            };
        }
        let search = self.getenv("PATH").unwrap_or(DEFAULT_PATH).to_owned();
        for dir in search.split(':') {
            let dir = if dir.is_empty() { "." } else { dir };
            let candidate = path::join(dir, name);
            match self.filesystem.stat(&candidate) {
                Ok(stat) if !stat.is_dir() => return Ok(candidate),
                Ok(_) | Err(VFSError::NotFound) | Err(VFSError::DirectoryExpected) => {}
                Err(err) => return Err(err),
            }
        }
        Err(VFSError::NotFound)
    }

    /// Run the registered program named by this process's executable, and
    /// return its exit status. Unknown programs exit with status 127.
    pub fn run(&mut self) -> i32 {
        let name = path::base_name(&self.executable).to_owned();
        let program = self.shared.registry().get(&name);
        let status = match program {
            Some(program) => program.run(self),
            None => {
                log::debug!("pid {} no program named {:?}", self.pid, name);
                let message = format!("{}: command not found\n", name);
                if let Err(err) = self.stdio.write_err(message.as_bytes()) {
                    log::debug!("pid {} stderr, {}", self.pid, err);
                }
                127
            }
        };
        if let Some(session) = self.session.upgrade() {
            session.record(Event::ProcessExit {
                session: self.session_id,
                pid: self.pid,
                status,
            });
        }
        status
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("session", &self.session_id)
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .field("executable", &self.executable)
            .field("argv", &self.argv)
            .field("workdir", &self.workdir)
            .finish()
    }
}
