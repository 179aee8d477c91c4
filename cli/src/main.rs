#[macro_use] extern crate clap;

use clap::{App, ArgMatches};
use env_logger::{from_env, Env};
use honeyos::{
    context::ProcessFs,
    event::LogSink,
    filesystem::{FileKind, FollowLinks, Stat},
    BaseImage, Filesystem, IdentityTable, SessionContext, SharedContext, VFSError,
};
use std::{
    io::{self, Write},
    process,
    sync::Arc,
};

fn main() {
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml).get_matches();

    let log_level = matches.value_of("log_level").unwrap();
    from_env(Env::default().default_filter_or(log_level)).init();

    let image = BaseImage::open(matches.value_of("image").unwrap())
        .expect("failed to load base image");
    let mut users = IdentityTable::with_root();
    if let Ok(passwd) = image.filesystem().read_file("/etc/passwd") {
        for user in IdentityTable::parse_passwd(&String::from_utf8_lossy(&passwd)).iter() {
            users.insert(user.clone());
        }
    }

    let shared = SharedContext::builder(image.into_filesystem())
        .hostname(matches.value_of("hostname").unwrap())
        .users(users)
        .build();
    let user = matches.value_of("user").unwrap();
    let session = match SessionContext::new(&shared, user, None, Arc::new(LogSink)) {
        Ok(session) => session,
        Err(err) => fail(&format!("user {}", user), err),
    };
    let login = match session.login_process() {
        Ok(login) => login,
        Err(err) => fail("login", err),
    };
    if let Some(dir) = matches.value_of("dir") {
        if let Err(err) = login.chdir(dir) {
            fail(dir, err);
        }
    }

    let fs = login.filesystem();
    let status = match matches.subcommand() {
        ("resolve", Some(sub)) => {
            let follow = if sub.is_present("no_follow") {
                FollowLinks::NoFollow
            } else {
                FollowLinks::Follow
            };
            each_path(sub, |path| {
                println!("{}", fs.resolve(path, follow)?);
                Ok(())
            })
        }
        ("ls", Some(sub)) => each_path(sub, |path| list(fs, path)),
        ("cat", Some(sub)) => each_path(sub, |path| {
            let data = fs.read_file(path)?;
            io::stdout().write_all(&data)?;
            Ok(())
        }),
        ("stat", Some(sub)) => each_path(sub, |path| show_stat(fs, path)),
        _ => unreachable!(),
    };
    session.close();
    process::exit(status);
}

fn fail(context: &str, err: VFSError) -> ! {
    eprintln!("honeyos: {}: {}", context, err);
    process::exit(1);
}

fn each_path<F>(matches: &ArgMatches, mut f: F) -> i32
where
    F: FnMut(&str) -> Result<(), VFSError>,
{
    let mut status = 0;
    for path in matches.values_of("paths").into_iter().flatten() {
        if let Err(err) = f(path) {
            eprintln!("honeyos: {}: {}", path, err);
            status = 1;
        }
    }
    status
}

fn mode_string(stat: &Stat) -> String {
    let mut mode = String::with_capacity(10);
    mode.push(match stat.kind {
        FileKind::Regular => '-',
        FileKind::Directory => 'd',
        FileKind::Symlink => 'l',
    });
    for shift in &[6, 3, 0] {
        let bits = (stat.perm >> shift) & 7;
        mode.push(if bits & 4 != 0 { 'r' } else { '-' });
        mode.push(if bits & 2 != 0 { 'w' } else { '-' });
        mode.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    mode
}

fn kind_name(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Regular => "regular file",
        FileKind::Directory => "directory",
        FileKind::Symlink => "symbolic link",
    }
}

fn list(fs: &ProcessFs, path: &str) -> Result<(), VFSError> {
    let dir = fs.resolve(path, FollowLinks::Follow)?;
    for entry in fs.read_dir(&dir)? {
        let mut line = format!(
            "{} {:>4} {:<5} {:<5} {:>8} {}",
            mode_string(&entry.stat),
            entry.stat.nlink,
            entry.stat.uid,
            entry.stat.gid,
            entry.stat.size,
            entry.name
        );
        if entry.stat.is_symlink() {
            let target = fs.readlink(&format!("{}/{}", dir.trim_end_matches('/'), entry.name))?;
            line.push_str(" -> ");
            line.push_str(&target);
        }
        println!("{}", line);
    }
    Ok(())
}

fn show_stat(fs: &ProcessFs, path: &str) -> Result<(), VFSError> {
    let stat = fs.lstat(path)?;
    if stat.is_symlink() {
        println!("  File: {} -> {}", path, fs.readlink(path)?);
    } else {
        println!("  File: {}", path);
    }
    println!("  Type: {}", kind_name(stat.kind));
    println!("  Size: {}", stat.size);
    println!("  Mode: {:04o} ({})", stat.perm, mode_string(&stat));
    println!("   Uid: {}  Gid: {}", stat.uid, stat.gid);
    println!(" Inode: {}  Links: {}", stat.ino, stat.nlink);
    Ok(())
}
