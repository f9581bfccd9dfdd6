//! The worker pool's FIFO work queue (§4.3).
//!
//! The source hand-rolls a circular buffer with a separate count mutex and a
//! condition variable, growing by doubling and relinearizing the
//! wrap-around region on growth. `VecDeque` already implements a correctly
//! relinearizing, doubling ring buffer, so wrapping one in a single
//! `Mutex` + `Condvar` gets every property §4.3 asks for (FIFO order, no
//! lost wake-ups, tolerance of spurious wake-ups, correct growth) without
//! hand-writing the index arithmetic. Collapsing the source's two mutexes
//! into one is safe: the count and the buffer change together, under the
//! same lock, so there is nothing left for a second mutex to protect.

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::{Condvar, Mutex};

pub struct WorkQueue {
  inner: Mutex<VecDeque<RawFd>>,
  nonempty: Condvar,
}

impl WorkQueue {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(VecDeque::with_capacity(capacity)),
      nonempty: Condvar::new(),
    }
  }

  /// Enqueues `fd`. Never blocks; growth is amortized and handled by
  /// `VecDeque` internally.
  pub fn push(&self, fd: RawFd) {
    let mut queue = self.inner.lock().unwrap();
    queue.push_back(fd);
    // Signaling while still holding the lock is lost-wake-up-safe: any
    // waiter that hasn't yet observed the new length will re-check the
    // predicate under the same mutex before actually sleeping again.
    self.nonempty.notify_one();
  }

  /// Blocks until a work item is available, then dequeues and returns it.
  pub fn pop(&self) -> RawFd {
    let mut queue = self.inner.lock().unwrap();
    loop {
      if let Some(fd) = queue.pop_front() {
        return fd;
      }
      queue = self.nonempty.wait(queue).unwrap();
    }
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.inner.lock().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn fifo_within_a_single_producer() {
    let queue = WorkQueue::with_capacity(4);
    queue.push(1);
    queue.push(2);
    queue.push(3);
    assert_eq!(queue.pop(), 1);
    assert_eq!(queue.pop(), 2);
    assert_eq!(queue.pop(), 3);
  }

  #[test]
  fn grows_past_initial_capacity_without_losing_order() {
    let queue = WorkQueue::with_capacity(2);
    for fd in 0..16 {
      queue.push(fd);
    }
    assert_eq!(queue.len(), 16);
    for fd in 0..16 {
      assert_eq!(queue.pop(), fd);
    }
  }

  #[test]
  fn pop_blocks_until_a_push_wakes_it() {
    let queue = Arc::new(WorkQueue::with_capacity(4));
    let queue_clone = Arc::clone(&queue);
    let handle = thread::spawn(move || queue_clone.pop());

    thread::sleep(Duration::from_millis(50));
    queue.push(42);

    assert_eq!(handle.join().unwrap(), 42);
  }

  #[test]
  fn many_producers_each_fd_observed_exactly_once() {
    let queue = Arc::new(WorkQueue::with_capacity(4));
    let producers: Vec<_> = (0..8)
      .map(|base| {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
          for i in 0..32 {
            queue.push(base * 32 + i);
          }
        })
      })
      .collect();
    for producer in producers {
      producer.join().unwrap();
    }

    let mut seen = Vec::with_capacity(256);
    for _ in 0..256 {
      seen.push(queue.pop());
    }
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 256);
  }
}
