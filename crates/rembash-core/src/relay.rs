//! Dispatch, handshake handler (§4.4), and relay handler (§4.5).
//!
//! Both handlers are invoked by a worker thread with exactly one descriptor
//! in scope (§5: "a single descriptor is handled by at most one worker at a
//! time"); neither ever touches a slot other than the one it was dispatched
//! for and, for the relay handler, that slot's recorded peer.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use mio::{Interest, Registry, Token};

use crate::config;
use crate::error::ConnError;
use crate::protocol::{self, TokenMatch};
use crate::pty;
use crate::table::{ConnState, Handle, PairingTable};

/// Everything a worker needs to service a descriptor: the pairing table and
/// a handle to the readiness facility's registry (§9, "Process-wide state").
pub struct ServerCtx {
  pub table: Arc<PairingTable>,
  pub registry: Registry,
}

/// Picks the handshake or relay handler based on the descriptor's recorded
/// state (§4.3: "Dispatch selects handshake or relay by the connection's
/// state tag").
pub fn dispatch(ctx: &ServerCtx, fd: RawFd) {
  let state = ctx.table.with_slot(fd, |slot| slot.state);
  match state {
    Some(ConnState::AwaitingSecret) => handshake(ctx, fd),
    Some(ConnState::Relaying) => relay(ctx, fd),
    // Slot already torn down by a concurrent event (e.g. the demux
    // thread saw a hang-up before this queued readiness was serviced).
    None => {}
  }
}

enum ReadOutcome {
  Pending,
  Matched,
  Mismatch,
  Eof,
}

fn handshake(ctx: &ServerCtx, fd: RawFd) {
  let mut buf = [0u8; protocol::HANDSHAKE_READ_CAP];
  let outcome = ctx.table.with_slot(fd, |slot| -> io::Result<ReadOutcome> {
    let Handle::Socket(stream) = &mut slot.handle else {
      unreachable!("AwaitingSecret slot always holds a socket");
    };
    loop {
      match stream.read(&mut buf) {
        Ok(0) => return Ok(ReadOutcome::Eof),
        Ok(n) => {
          slot.pending.extend_from_slice(&buf[..n]);
          match protocol::match_token(&slot.pending) {
            TokenMatch::Matched => return Ok(ReadOutcome::Matched),
            TokenMatch::Mismatch => return Ok(ReadOutcome::Mismatch),
            TokenMatch::Pending => continue,
          }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Pending),
        Err(e) => return Err(e),
      }
    }
  });

  match outcome {
    None => {}
    Some(Err(_)) => teardown_pair(ctx, fd),
    Some(Ok(ReadOutcome::Pending)) => {}
    Some(Ok(ReadOutcome::Eof)) => teardown_pair(ctx, fd),
    Some(Ok(ReadOutcome::Mismatch)) => {
      ctx.table.with_slot(fd, |slot| {
        if let Handle::Socket(stream) = &mut slot.handle {
          let _ = stream.write_all(protocol::ERROR);
        }
      });
      teardown_pair(ctx, fd);
    }
    Some(Ok(ReadOutcome::Matched)) => complete_handshake(ctx, fd),
  }
}

fn complete_handshake(ctx: &ServerCtx, fd: RawFd) {
  let session = match pty::spawn_shell(config::SHELL) {
    Ok(session) => session,
    Err(_) => {
      teardown_pair(ctx, fd);
      return;
    }
  };
  let master_fd = session.master.as_raw_fd();

  if !ctx.table.in_domain(master_fd) {
    // Session drops here, closing the master; the shell sees SIGHUP and
    // is reaped by the kernel (SIGCHLD is ignored process-wide).
    teardown_pair(ctx, fd);
    return;
  }

  // Insert the master's slot *before* registering it with the readiness
  // facility: registration is what can start generating events, and the
  // dispatch path assumes a slot always exists for a registered fd.
  if !ctx.table.pair_with_master(fd, master_fd, session) {
    teardown_pair(ctx, fd);
    return;
  }

  let mut source = mio::unix::SourceFd(&master_fd);
  if ctx
    .registry
    .register(&mut source, Token(master_fd as usize), Interest::READABLE)
    .is_err()
  {
    teardown_pair(ctx, fd);
    return;
  }

  // Ordering requirement (§4.4): the master must be registered before
  // `<ok>\n` reaches the client, which has already happened above.
  let wrote_ok = ctx.table.with_slot(fd, |slot| {
    let Handle::Socket(stream) = &mut slot.handle else {
      unreachable!("socket slot always holds a socket");
    };
    stream.write_all(protocol::OK)
  });

  if !matches!(wrote_ok, Some(Ok(()))) {
    teardown_pair(ctx, fd);
  }
}

const MAX_WRITE_RETRIES: u32 = 64;

fn relay(ctx: &ServerCtx, fd: RawFd) {
  let mut buf = [0u8; config::RELAY_BUFFER_SIZE];
  loop {
    let read_outcome = ctx.table.with_slot(fd, |slot| read_handle(&mut slot.handle, &mut buf));

    let n = match read_outcome {
      None => { eprintln!("DBG relay({fd}): read None"); return },
      Some(Ok(0)) => {
        eprintln!("DBG relay({fd}): read 0");
        teardown_pair(ctx, fd);
        return;
      }
      Some(Ok(n)) => n,
      Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => return,
      Some(Err(e)) => {
        eprintln!("DBG relay({fd}): read err {e:?}");
        teardown_pair(ctx, fd);
        return;
      }
    };

    let peer_fd = match ctx.table.peer_of(fd) {
      Some(peer) if peer >= 0 => peer,
      other => {
        eprintln!("DBG relay({fd}): no peer {other:?}");
        teardown_pair(ctx, fd);
        return;
      }
    };

    let write_result = ctx
      .table
      .with_slot(peer_fd, |slot| write_all_draining(&mut slot.handle, &buf[..n]));

    match write_result {
      Some(Ok(())) => continue,
      other => {
        eprintln!("DBG relay({fd}): write to peer {peer_fd} result {other:?}");
        teardown_pair(ctx, fd);
        return;
      }
    }
  }
}

fn read_handle(handle: &mut Handle, buf: &mut [u8]) -> io::Result<usize> {
  match handle {
    Handle::Socket(stream) => stream.read(buf),
    Handle::Master(session) => session.master.read(buf),
  }
}

fn write_handle(handle: &mut Handle, buf: &[u8]) -> io::Result<usize> {
  match handle {
    Handle::Socket(stream) => stream.write(buf),
    Handle::Master(session) => session.master.write(buf),
  }
}

/// Writes `buf` in full, accumulating across partial writes (§4.5 step 2).
/// A write that would block is retried a bounded number of times with a
/// short sleep rather than looping forever: "a truly stuck target is
/// treated as an error and the pair is torn down."
fn write_all_draining(handle: &mut Handle, mut buf: &[u8]) -> io::Result<()> {
  let mut retries = 0u32;
  while !buf.is_empty() {
    match write_handle(handle, buf) {
      Ok(0) => {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "peer accepted zero bytes"));
      }
      Ok(n) => {
        buf = &buf[n..];
        retries = 0;
      }
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        retries += 1;
        if retries > MAX_WRITE_RETRIES {
          return Err(io::Error::new(io::ErrorKind::TimedOut, "peer write stalled"));
        }
        std::thread::sleep(Duration::from_millis(1));
      }
      Err(e) => return Err(e),
    }
  }
  Ok(())
}

/// Tears down both descriptors of a pair idempotently (§4.2, §8). Safe to
/// call on a descriptor with no recorded peer (the `AwaitingSecret` case)
/// or on one that was already removed by a concurrent teardown.
pub fn teardown_pair(ctx: &ServerCtx, fd: RawFd) {
  let peer = ctx.table.peer_of(fd);
  teardown_one(ctx, fd);
  if let Some(peer_fd) = peer.filter(|&p| p >= 0) {
    teardown_one(ctx, peer_fd);
  }
}

fn teardown_one(ctx: &ServerCtx, fd: RawFd) {
  if let Some(mut slot) = ctx.table.remove(fd) {
    // Open Question resolution (§9): deregister before close rather
    // than relying on the platform to do it implicitly.
    match &mut slot.handle {
      Handle::Socket(stream) => {
        let _ = ctx.registry.deregister(stream);
      }
      Handle::Master(session) => {
        let master_fd = session.master.as_raw_fd();
        let _ = ctx.registry.deregister(&mut mio::unix::SourceFd(&master_fd));
      }
    }
    // `slot` drops here: the socket or the pty master file closes,
    // which for the master also sends SIGHUP to the shell.
  }
}

#[allow(dead_code)]
fn notify_protocol_error(err: &ConnError) -> bool {
  err.should_notify_peer()
}
