//! PTY allocation and shell fork (§4.4 steps 2–3).
//!
//! This is a direct, minimal translation of the original's
//! `posix_openpt`/`grantpt`/`unlockpt`/`ptsname` + `fork`/`setsid`/`dup2`/`exec`
//! sequence rather than a higher-level PTY crate, so that the exact
//! fork-failure and close-inherited-descriptors steps required by §4.4 and §9
//! stay under our control instead of a library's.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{self, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult, Pid};

use crate::error::ConnError;

/// A pty master plus the pid of the shell attached to its slave. The master
/// is wrapped as a `File` (rather than a bare `OwnedFd`) purely so the relay
/// handler can use the same `Read`/`Write` calls it uses on the client
/// socket; no file-specific behavior is relied upon.
pub struct PtySession {
  pub master: File,
  pub child: Pid,
}

/// Sets the process-wide disposition for `SIGCHLD` to "ignore" so the kernel
/// reaps shell children automatically (§9, "Signal-driven child reaping").
/// Must run once, before any worker can fork a shell.
pub fn ignore_sigchld() {
  unsafe {
    // SAFETY: installing SIG_IGN touches no shared state and happens
    // before any other thread is spawned.
    let _ = signal::signal(Signal::SIGCHLD, SigHandler::SigIgn);
  }
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
  // SAFETY: `fd` is borrowed only for the duration of these two calls and
  // is not closed or otherwise taken ownership of here.
  let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
  let flags = fcntl::fcntl(borrowed, FcntlArg::F_GETFL)?;
  let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
  fcntl::fcntl(borrowed, FcntlArg::F_SETFL(flags))?;
  Ok(())
}

/// Allocates a PTY, forks, and execs `shell` in the child with the slave as
/// its controlling terminal. On success returns the parent's view: an owned,
/// non-blocking master descriptor and the child's pid.
pub fn spawn_shell(shell: &str) -> Result<PtySession, ConnError> {
  let master =
    posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC).map_err(ConnError::PtyAlloc)?;
  grantpt(&master).map_err(ConnError::PtyAlloc)?;
  unlockpt(&master).map_err(ConnError::PtyAlloc)?;
  let slave_name = ptsname_r(&master).map_err(ConnError::PtyAlloc)?;
  let slave_name = CString::new(slave_name).map_err(|_| ConnError::PtyAlloc(nix::Error::EINVAL))?;

  // Built before fork: constructing a CString in the child risks touching
  // an allocator lock another thread held at fork time.
  let shell_path = CString::new(shell).map_err(|_| ConnError::PtyAlloc(nix::Error::EINVAL))?;
  let argv = [shell_path.clone()];

  let master_fd = master.as_raw_fd();

  // SAFETY: the child performs only async-signal-safe-ish work (close,
  // setsid, open, dup2, execvp) using data prepared before the fork; on any
  // failure it exits immediately rather than unwinding back into the
  // parent's Rust state.
  match unsafe { unistd::fork() }.map_err(ConnError::Fork)? {
    ForkResult::Child => {
      // Close the descriptors this process inherited that belong to
      // the server, not to this session (§4.4 step 3).
      let _ = unistd::close(master_fd);

      if unistd::setsid().is_err() {
        std::process::exit(1);
      }

      let slave_fd = match fcntl::open(slave_name.as_c_str(), OFlag::O_RDWR, Mode::empty()) {
        Ok(fd) => fd,
        Err(_) => std::process::exit(1),
      };
      let slave_raw = slave_fd.as_raw_fd();

      for target in [0, 1, 2] {
        // SAFETY: `target` is one of the standard descriptors; ownership is
        // given back via `mem::forget` immediately after the call so this
        // wrapper never closes it itself.
        let mut target_fd = unsafe { OwnedFd::from_raw_fd(target) };
        let result = unistd::dup2(&slave_fd, &mut target_fd);
        std::mem::forget(target_fd);
        if result.is_err() {
          std::process::exit(1);
        }
      }
      if slave_raw > 2 {
        drop(slave_fd);
      } else {
        std::mem::forget(slave_fd);
      }

      let _ = unistd::execvp(&shell_path, &argv);
      // execvp only returns on failure.
      std::process::exit(1);
    }
    ForkResult::Parent { child } => {
      set_nonblocking(master_fd).map_err(ConnError::PtyAlloc)?;
      // `File::from` takes ownership of the fd without touching it;
      // the master stays open exactly as long as this session lives.
      let master: std::os::fd::OwnedFd = master.into();
      Ok(PtySession {
        master: File::from(master),
        child,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn spawn_shell_runs_true_and_exits() {
    // A minimal smoke test: allocate a real pty and fork `true`, which
    // exits immediately. We don't assert on reap timing here since
    // SIGCHLD is process-wide and shared with other tests; we only
    // assert that the session was constructed with a valid master fd.
    let session = spawn_shell("true").expect("spawn true");
    assert!(session.master.as_raw_fd() >= 0);
  }
}
