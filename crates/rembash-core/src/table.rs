//! FD pairing table (§4.6): a fixed-capacity array indexed by descriptor
//! value. The source relies on disjoint ownership in time to avoid locking;
//! this expanded specification (§9, Open Question resolutions) sanctions
//! per-slot locking instead, which is what this module does. It keeps the
//! O(1) indexed-by-descriptor-value shape while being safe to share across
//! the demultiplexer and worker threads.

use std::os::fd::RawFd;
use std::sync::Mutex;

use mio::net::TcpStream;

use crate::pty::PtySession;

/// Per-connection state, as seen from the socket's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
  AwaitingSecret,
  Relaying,
}

/// What a slot owns, beyond the bookkeeping every slot carries.
pub enum Handle {
  Socket(TcpStream),
  Master(PtySession),
}

/// One entry in the table: a descriptor's peer, its connection state, and
/// the resource that keeps the descriptor open.
pub struct Slot {
  pub peer: RawFd,
  pub state: ConnState,
  /// Bytes accumulated so far while `state == AwaitingSecret` (§9).
  pub pending: Vec<u8>,
  pub handle: Handle,
}

/// Fixed-capacity, per-slot-locked pairing table, indexed by raw descriptor
/// value (§4.6).
pub struct PairingTable {
  slots: Vec<Mutex<Option<Slot>>>,
}

impl PairingTable {
  pub fn new(capacity: usize) -> Self {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || Mutex::new(None));
    Self { slots }
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Whether `fd` falls within the table's key domain (§3, §4.1 step 2).
  pub fn in_domain(&self, fd: RawFd) -> bool {
    fd >= 0 && (fd as usize) < self.slots.len()
  }

  /// Inserts a freshly-accepted socket in `AwaitingSecret` state. Returns
  /// `false` (and does nothing) if `fd` is out of the table's domain.
  pub fn insert_awaiting(&self, fd: RawFd, socket: TcpStream) -> bool {
    let Some(slot) = self.slot(fd) else {
      return false;
    };
    let mut guard = slot.lock().unwrap();
    *guard = Some(Slot {
      peer: -1,
      state: ConnState::AwaitingSecret,
      pending: Vec::new(),
      handle: Handle::Socket(socket),
    });
    true
  }

  /// Inserts the master's slot and flips both sides to `Relaying`,
  /// pairing `socket_fd` and `master_fd` together (§4.4 step 4). Returns
  /// `false` if either fd is out of domain or the socket slot is gone.
  pub fn pair_with_master(&self, socket_fd: RawFd, master_fd: RawFd, master: PtySession) -> bool {
    let (Some(socket_slot), Some(master_slot)) = (self.slot(socket_fd), self.slot(master_fd))
    else {
      return false;
    };

    let mut socket_guard = socket_slot.lock().unwrap();
    let Some(socket_entry) = socket_guard.as_mut() else {
      return false;
    };
    socket_entry.peer = master_fd;
    socket_entry.state = ConnState::Relaying;
    socket_entry.pending.clear();

    let mut master_guard = master_slot.lock().unwrap();
    *master_guard = Some(Slot {
      peer: socket_fd,
      state: ConnState::Relaying,
      pending: Vec::new(),
      handle: Handle::Master(master),
    });

    true
  }

  /// Runs `f` with exclusive access to `fd`'s slot, if present.
  pub fn with_slot<R>(&self, fd: RawFd, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
    let slot = self.slot(fd)?;
    let mut guard = slot.lock().unwrap();
    guard.as_mut().map(f)
  }

  /// Removes and returns `fd`'s slot, if present. Idempotent: removing an
  /// already-empty or out-of-domain slot is a no-op that returns `None`
  /// (§8, "Idempotent close").
  pub fn remove(&self, fd: RawFd) -> Option<Slot> {
    let slot = self.slot(fd)?;
    slot.lock().unwrap().take()
  }

  /// Reads the peer of `fd`'s slot without removing it.
  pub fn peer_of(&self, fd: RawFd) -> Option<RawFd> {
    let slot = self.slot(fd)?;
    slot.lock().unwrap().as_ref().map(|s| s.peer)
  }

  fn slot(&self, fd: RawFd) -> Option<&Mutex<Option<Slot>>> {
    if fd < 0 {
      return None;
    }
    self.slots.get(fd as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::TcpListener as StdTcpListener;

  fn dummy_socket() -> (TcpStream, RawFd) {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = std::net::TcpStream::connect(addr).unwrap();
    stream.set_nonblocking(true).unwrap();
    let fd = std::os::fd::AsRawFd::as_raw_fd(&stream);
    (TcpStream::from_std(stream), fd)
  }

  #[test]
  fn capacity_boundary_rejects_out_of_domain_fd() {
    let table = PairingTable::new(4);
    assert!(!table.in_domain(4));
    assert!(table.in_domain(3));
  }

  #[test]
  fn insert_then_remove_is_idempotent() {
    let table = PairingTable::new(64);
    let (socket, fd) = dummy_socket();
    assert!(table.in_domain(fd));
    assert!(table.insert_awaiting(fd, socket));
    assert!(table.remove(fd).is_some());
    assert!(table.remove(fd).is_none());
  }

  #[test]
  fn remove_of_never_inserted_slot_is_noop() {
    let table = PairingTable::new(64);
    assert!(table.remove(5).is_none());
  }

  #[test]
  fn insert_outside_domain_fails() {
    let table = PairingTable::new(4);
    let (socket, _fd) = dummy_socket();
    assert!(!table.insert_awaiting(100, socket));
  }
}
