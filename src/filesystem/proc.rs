//! Synthetic `/proc`, generated on each open from live system state

use crate::{
    context::SystemInfo,
    errors::VFSError,
    filesystem::{path, BufferFile, DirEntry, File, FileKind, Filesystem, OpenOptions, Stat},
};
use std::{
    fmt::Write,
    sync::Arc,
    time::{Duration, SystemTime},
};

type Generator = fn(&SystemInfo) -> String;

const CATALOG: &[(&str, Generator)] = &[
    ("cpuinfo", cpuinfo),
    ("loadavg", loadavg),
    ("meminfo", meminfo),
    ("mounts", mounts),
    ("uptime", uptime),
    ("version", version),
];

/// Read-only filesystem with a fixed catalog of generated files
///
/// Every mutating operation fails with [VFSError::NotFound], as if the
/// target could not exist here.
pub struct ProcFs {
    system: Arc<SystemInfo>,
}

impl ProcFs {
    pub fn new(system: Arc<SystemInfo>) -> Self {
        ProcFs { system }
    }

    /// Names of every file this filesystem can generate
    pub fn catalog() -> impl Iterator<Item = &'static str> {
        CATALOG.iter().map(|(name, _)| *name)
    }

    fn generator(path: &str) -> Option<Generator> {
        let cleaned = path::clean(path);
        let name = cleaned.strip_prefix('/')?;
        CATALOG
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, generator)| *generator)
    }

    fn root_stat(&self) -> Stat {
        Stat {
            kind: FileKind::Directory,
            perm: 0o555,
            nlink: 2,
            ino: 1,
            atime: self.system.boot_time,
            mtime: self.system.boot_time,
            ctime: self.system.boot_time,
            ..Default::default()
        }
    }

    fn file_stat(&self, index: usize, len: usize) -> Stat {
        let now = SystemTime::now();
        Stat {
            kind: FileKind::Regular,
            perm: 0o444,
            size: len as u64,
            ino: 2 + index as u64,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }

    fn generate(&self, path: &str) -> Result<(Stat, String), VFSError> {
        let cleaned = path::clean(path);
        let name = cleaned.strip_prefix('/').unwrap_or(&cleaned);
        let index = CATALOG
            .iter()
            .position(|(entry, _)| *entry == name)
            .ok_or(VFSError::NotFound)?;
        let content = (CATALOG[index].1)(&self.system);
        Ok((self.file_stat(index, content.len()), content))
    }

    fn refuse(&self, op: &str, path: &str) -> Result<(), VFSError> {
        log::debug!("{}({:?}) on procfs", op, path);
        Err(VFSError::NotFound)
    }
}

impl Filesystem for ProcFs {
    fn name(&self) -> &'static str {
        "proc"
    }

    fn stat(&self, path: &str) -> Result<Stat, VFSError> {
        if path::clean(path) == "/" {
            Ok(self.root_stat())
        } else {
            Ok(self.generate(path)?.0)
        }
    }

    fn open(&self, path: &str, options: &OpenOptions) -> Result<Box<dyn File>, VFSError> {
        if options.has_write_intent() {
            self.refuse("open", path)?;
        }
        if path::clean(path) == "/" {
            return Ok(Box::new(BufferFile::new(path, self.root_stat(), Vec::new())));
        }
        let (stat, content) = self.generate(path)?;
        Ok(Box::new(BufferFile::new(path, stat, content.into_bytes())))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VFSError> {
        if path::clean(path) != "/" {
            return match Self::generator(path) {
                Some(_) => Err(VFSError::DirectoryExpected),
                None => Err(VFSError::NotFound),
            };
        }
        let mut entries = Vec::new();
        for (name, _) in CATALOG {
            entries.push(DirEntry {
                name: (*name).to_owned(),
                stat: self.generate(name)?.0,
            });
        }
        Ok(entries)
    }

    fn mkdir(&self, path: &str, _perm: u32) -> Result<(), VFSError> {
        self.refuse("mkdir", path)
    }

    fn mkdir_all(&self, path: &str, _perm: u32) -> Result<(), VFSError> {
        self.refuse("mkdir_all", path)
    }

    fn remove(&self, path: &str) -> Result<(), VFSError> {
        self.refuse("remove", path)
    }

    fn remove_all(&self, path: &str) -> Result<(), VFSError> {
        self.refuse("remove_all", path)
    }

    fn rename(&self, from: &str, _to: &str) -> Result<(), VFSError> {
        self.refuse("rename", from)
    }

    fn chmod(&self, path: &str, _perm: u32) -> Result<(), VFSError> {
        self.refuse("chmod", path)
    }

    fn chown(&self, path: &str, _uid: u32, _gid: u32) -> Result<(), VFSError> {
        self.refuse("chown", path)
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, _mtime: SystemTime) -> Result<(), VFSError> {
        self.refuse("chtimes", path)
    }

    fn symlink(&self, _target: &str, link: &str) -> Result<(), VFSError> {
        self.refuse("symlink", link)
    }

    fn readlink(&self, path: &str) -> Result<String, VFSError> {
        self.stat(path)?;
        Err(VFSError::LinkExpected)
    }
}

fn uptime_of(system: &SystemInfo) -> Duration {
    SystemTime::now()
        .duration_since(system.boot_time)
        .unwrap_or_default()
}

fn uptime(system: &SystemInfo) -> String {
    let up = uptime_of(system).as_secs_f64();
    let idle = up * f64::from(system.cpu_cores.max(1)) * 0.97;
    format!("{:.2} {:.2}\n", up, idle)
}

fn loadavg(system: &SystemInfo) -> String {
    // slow wobble, so repeated reads don't look frozen
    let minutes = uptime_of(system).as_secs() / 60;
    let wobble = (minutes % 7) as f64 / 100.0;
    format!(
        "{:.2} {:.2} {:.2} 1/{} {}\n",
        0.08 + wobble,
        0.03 + wobble / 2.0,
        0.01,
        92 + system.cpu_cores * 4,
        1200 + minutes % 3000
    )
}

fn version(system: &SystemInfo) -> String {
    format!(
        "{} version {} (buildd@{}) (gcc version 9.4.0 (Ubuntu 9.4.0-1ubuntu1~20.04.2)) {}\n",
        system.uname.sysname, system.uname.release, system.build_host, system.uname.version
    )
}

fn cpuinfo(system: &SystemInfo) -> String {
    let mut out = String::new();
    for core in 0..system.cpu_cores.max(1) {
        let _ = write!(
            out,
            "processor\t: {core}\n\
             vendor_id\t: GenuineIntel\n\
             cpu family\t: 6\n\
             model\t\t: 85\n\
             model name\t: {model}\n\
             stepping\t: 7\n\
             cpu MHz\t\t: {mhz:.3}\n\
             cache size\t: 36608 KB\n\
             physical id\t: 0\n\
             siblings\t: {cores}\n\
             core id\t\t: {core}\n\
             cpu cores\t: {cores}\n\
             fpu\t\t: yes\n\
             flags\t\t: fpu vme de pse tsc msr pae mce cx8 apic sep mtrr pge mca cmov pat \
             pse36 clflush mmx fxsr sse sse2 ss ht syscall nx pdpe1gb rdtscp lm constant_tsc \
             rep_good nopl xtopology cpuid pni pclmulqdq ssse3 fma cx16 pcid sse4_1 sse4_2 \
             x2apic movbe popcnt aes xsave avx f16c rdrand hypervisor lahf_lm abm \
             3dnowprefetch avx2 bmi1 bmi2 erms avx512f avx512dq\n\
             bogomips\t: {bogomips:.2}\n\n",
            core = core,
            model = system.cpu_model,
            mhz = system.cpu_mhz,
            cores = system.cpu_cores,
            bogomips = system.cpu_mhz * 2.0,
        );
    }
    out
}

fn meminfo(system: &SystemInfo) -> String {
    let total = system.memory_kb;
    let free = total / 5 * 2;
    let available = total / 4 * 3;
    let buffers = total / 40;
    let cached = total / 4;
    format!(
        "MemTotal:       {:>8} kB\n\
         MemFree:        {:>8} kB\n\
         MemAvailable:   {:>8} kB\n\
         Buffers:        {:>8} kB\n\
         Cached:         {:>8} kB\n\
         SwapCached:            0 kB\n\
         SwapTotal:             0 kB\n\
         SwapFree:              0 kB\n",
        total, free, available, buffers, cached
    )
}

fn mounts(_system: &SystemInfo) -> String {
    concat!(
        "/dev/sda1 / ext4 rw,relatime 0 0\n",
        "proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0\n",
        "sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0\n",
        "tmpfs /run tmpfs rw,nosuid,nodev,noexec,relatime,size=202452k,mode=755 0 0\n",
    )
    .to_owned()
}
