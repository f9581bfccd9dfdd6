//! Listener setup and the accept loop (§4.1).

use std::io;
use std::net::TcpListener as StdTcpListener;
use std::os::fd::AsRawFd;

use mio::net::TcpStream;
use mio::{Interest, Token};
use socket2::{Domain, Socket, Type};

use crate::config;
use crate::relay::ServerCtx;

/// Binds and listens on `port`, with `SO_REUSEADDR` set before bind so a
/// restarted server doesn't have to wait out `TIME_WAIT` (§4.1 step 1).
pub fn bind_listener(port: u16) -> io::Result<StdTcpListener> {
  let address: std::net::SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
  let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
  socket.set_reuse_address(true)?;
  socket.bind(&address.into())?;
  socket.listen(config::BACKLOG)?;
  // Deliberately left blocking: `run` below dedicates its own thread to a
  // blocking `accept()` loop, separate from the demultiplexer thread.
  Ok(socket.into())
}

/// Runs the accept loop forever. A transient per-connection error is logged
/// and skipped; an error on the listener itself is fatal (§9, "a listener
/// accept loop that treats most errors as transient and logs them,
/// reserving process exit for conditions that indicate the listener itself
/// is unusable").
pub fn run(listener: StdTcpListener, ctx: &ServerCtx) -> ! {
  loop {
    match listener.accept() {
      Ok((stream, addr)) => {
        log::debug!("accepted connection from {addr}");
        accept_one(ctx, stream);
      }
      Err(e) if is_transient(&e) => {
        // The listener itself is non-blocking; under mio this
        // accept loop is driven from a blocking wrapper so a
        // `WouldBlock` here would be a bug, but treat it as
        // transient defensively rather than exiting.
        log::warn!("transient accept error: {e}");
      }
      Err(e) => {
        log::error!("fatal accept error, shutting down: {e}");
        std::process::exit(1);
      }
    }
  }
}

fn accept_one(ctx: &ServerCtx, stream: std::net::TcpStream) {
  let fd = stream.as_raw_fd();

  if !ctx.table.in_domain(fd) {
    log::warn!("rejecting connection: descriptor {fd} exceeds session capacity");
    drop(stream);
    return;
  }

  if let Err(e) = stream.set_nonblocking(true) {
    log::warn!("failed to set non-blocking on accepted socket: {e}");
    return;
  }

  let socket = TcpStream::from_std(stream);

  // Table insert happens before mio registration (§9 resolution): once
  // registered, the demultiplexer thread may enqueue this descriptor for
  // a worker at any moment, and dispatch assumes a slot already exists.
  if !ctx.table.insert_awaiting(fd, socket) {
    log::warn!("failed to insert accepted connection {fd} into pairing table");
    return;
  }

  let register_result = ctx.table.with_slot(fd, |slot| {
    let crate::table::Handle::Socket(stream) = &mut slot.handle else {
      unreachable!("just-inserted slot always holds a socket");
    };
    ctx.registry
      .register(stream, Token(fd as usize), Interest::READABLE)
  });

  if !matches!(register_result, Some(Ok(()))) {
    log::warn!("failed to register accepted connection {fd}");
    ctx.table.remove(fd);
    return;
  }

  let write_result = ctx.table.with_slot(fd, |slot| {
    let crate::table::Handle::Socket(stream) = &mut slot.handle else {
      unreachable!("just-registered slot always holds a socket");
    };
    std::io::Write::write_all(stream, crate::protocol::SECRET)
  });

  if !matches!(write_result, Some(Ok(()))) {
    log::debug!("failed to write greeting to {fd}");
    crate::relay::teardown_pair(ctx, fd);
  }
}

fn is_transient(e: &io::Error) -> bool {
  matches!(
    e.kind(),
    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::table::PairingTable;
  use std::io::Read;
  use std::net::TcpListener;
  use std::sync::Arc;
  use std::time::Duration;

  fn test_ctx(capacity: usize) -> ServerCtx {
    ServerCtx {
      table: Arc::new(PairingTable::new(capacity)),
      registry: mio::Poll::new().unwrap().registry().try_clone().unwrap(),
    }
  }

  // Scenario 6 (§8): beyond session capacity, a connection is accepted then
  // immediately closed with no greeting readable.
  #[test]
  fn connection_beyond_capacity_is_closed_without_a_greeting() {
    let ctx = test_ctx(0);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut client = std::net::TcpStream::connect(addr).unwrap();
    let (server_side, _) = listener.accept().unwrap();

    accept_one(&ctx, server_side);

    client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "over-capacity connection must not receive a greeting");
  }
}
