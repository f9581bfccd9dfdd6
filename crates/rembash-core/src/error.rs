//! Typed distinction between the error categories of the component design:
//! per-connection setup errors, protocol errors, and terminal I/O errors all
//! resolve to "tear this pair down and keep serving"; only startup errors are
//! fatal, and those are plain `anyhow::Result` out of the entry point.

use std::io;

/// A failure confined to a single connection. Every variant is handled by
/// closing the affected descriptor(s) and discarding the connection record;
/// none of them propagate past the worker that encountered them.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
  /// The handshake token didn't match, or never arrived within the bound.
  #[error("protocol error: bad or truncated handshake token")]
  BadToken,

  /// PTY allocation (open/grant/unlock/ptsname) failed.
  #[error("failed to allocate pty: {0}")]
  PtyAlloc(#[source] nix::Error),

  /// `fork` itself failed. Per §9, this must not fall through to the
  /// success path; the Rust control flow makes that structurally true.
  #[error("fork failed: {0}")]
  Fork(#[source] nix::Error),

  /// The master couldn't be registered with the readiness facility.
  #[error("failed to register pty master: {0}")]
  Register(#[source] io::Error),

  /// The peer disconnected or errored during an ordinary relay read/write.
  #[error("connection closed: {0}")]
  Closed(#[source] io::Error),

  /// End-of-file observed on read; not a failure, but it still tears the
  /// pair down, so it is represented here rather than as `Ok(0)` threaded
  /// through every caller.
  #[error("end of file")]
  Eof,
}

impl ConnError {
  /// Whether `<error>\n` should be attempted, best-effort, before closing.
  /// Only a genuine protocol violation warrants it; plain disconnects and
  /// internal setup failures should not write to a socket that may already
  /// be gone.
  pub fn should_notify_peer(&self) -> bool {
    matches!(self, ConnError::BadToken)
  }
}
