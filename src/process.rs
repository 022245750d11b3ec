//! Process lifecycle helpers for educ
//!
//! Daemonization, the root privilege drop, the single-instance lock file and
//! terminal echo control. All of these are thin wrappers over libc.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use tracing::{debug, info, warn};

use crate::constants::{UNPRIVILEGED_DIR, UNPRIVILEGED_USER};

/// Returns `Err(last_os_error)` when a libc call reported failure
fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

//==============================================================================
// Daemonization
//==============================================================================

/// Detaches from the controlling terminal
///
/// Forks; the parent exits with status 0 and the child becomes a session
/// leader. stdin and stdout are pointed at `/dev/null`, stderr too when
/// `redirect_stderr` is set. Must run before the async runtime is started.
pub fn daemonize(redirect_stderr: bool) -> Result<()> {
    // SAFETY: no other threads exist yet
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()).context("Cannot fork"),
        0 => {}
        _ => unsafe { libc::_exit(0) },
    }

    // SAFETY: plain syscall without pointer arguments
    check(unsafe { libc::setsid() }).context("Trouble in becoming the session leader")?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("open /dev/null")?;

    let mut streams = vec![(libc::STDIN_FILENO, "stdin"), (libc::STDOUT_FILENO, "stdout")];
    if redirect_stderr {
        streams.push((libc::STDERR_FILENO, "stderr"));
    }
    for (fd, name) in streams {
        // SAFETY: both descriptors are valid for the duration of the call
        if let Err(e) = check(unsafe { libc::dup2(devnull.as_raw_fd(), fd) }) {
            warn!("error redirecting {}: {}", name, e);
        }
    }

    debug!("daemonized (pid {})", std::process::id());
    Ok(())
}

//==============================================================================
// Privileges
//==============================================================================

/// Drops root privileges to the unprivileged user
///
/// Does nothing unless running with effective uid 0. Changes into the
/// unprivileged directory when it exists, then sets the group and user ids.
/// Returns whether privileges were dropped.
pub fn drop_privileges() -> Result<bool> {
    // SAFETY: geteuid cannot fail
    if unsafe { libc::geteuid() } != 0 {
        return Ok(false);
    }
    info!("Dropping root privileges...");

    let name = CString::new(UNPRIVILEGED_USER).context("user name")?;
    // SAFETY: name is NUL terminated; the record is copied out before any
    // other passwd lookup can overwrite it
    let (uid, gid) = unsafe {
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            return Err(anyhow!("getpwnam: no such user {}", UNPRIVILEGED_USER));
        }
        ((*pw).pw_uid, (*pw).pw_gid)
    };

    if Path::new(UNPRIVILEGED_DIR).is_dir() {
        std::env::set_current_dir(UNPRIVILEGED_DIR)
            .with_context(|| format!("chdir {}", UNPRIVILEGED_DIR))?;
    }

    // SAFETY: plain syscalls without pointer arguments
    unsafe {
        check(libc::setgid(gid)).context("setgid")?;
        check(libc::setegid(gid)).context("setegid")?;
        check(libc::setuid(uid)).context("setuid")?;
        check(libc::seteuid(uid)).context("seteuid")?;
    }

    debug!("now running as uid {} gid {}", uid, gid);
    Ok(true)
}

//==============================================================================
// Lock File
//==============================================================================

/// An exclusive advisory lock held for the life of the process
///
/// The lock is released when the value is dropped or the process exits.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Takes the lock at `path`, creating the file if needed
    ///
    /// # Errors
    ///
    /// Fails when another instance holds the lock, or the file cannot be
    /// opened or written.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        // SAFETY: fd is owned by `file` for the duration of the call
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if let Err(e) = check(ret) {
            if e.kind() == io::ErrorKind::WouldBlock {
                return Err(anyhow!(
                    "another instance is already running (lock held on {})",
                    path.display()
                ));
            }
            return Err(e).with_context(|| format!("lock {}", path.display()));
        }

        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("write lock file {}", path.display()))?;

        debug!("lock acquired: {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // SAFETY: fd is still owned by `self.file`
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

//==============================================================================
// Terminal Echo
//==============================================================================

/// Restores terminal echo on stdin when dropped
pub struct EchoGuard {
    saved: libc::termios,
}

/// Turns off echo on stdin, for reading a password
///
/// Returns `None` when stdin is not a terminal.
pub fn disable_echo() -> io::Result<Option<EchoGuard>> {
    // SAFETY: isatty has no pointer arguments
    if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
        return Ok(None);
    }

    // SAFETY: termios is plain data; tcgetattr fills it in
    let mut saved: libc::termios = unsafe { std::mem::zeroed() };
    check(unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut saved) })?;

    let mut quiet = saved;
    quiet.c_lflag &= !libc::ECHO;
    // SAFETY: `quiet` is a valid termios copied from the terminal
    check(unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &quiet) })?;

    Ok(Some(EchoGuard { saved }))
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        // SAFETY: `saved` came from tcgetattr on the same descriptor
        unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.saved) };
    }
}

//==============================================================================
// Tests
//==============================================================================
