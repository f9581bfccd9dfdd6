//! The demultiplexer: a single thread blocked in `Poll::poll`, translating
//! readiness events into either an immediate teardown or a work item handed
//! to the worker pool (§4.2).

use std::sync::Arc;

use mio::Events;

use crate::queue::WorkQueue;
use crate::relay::{self, ServerCtx};

const EVENTS_CAPACITY: usize = 1024;

/// Runs forever. Edge-triggered readiness (mio's default on Linux) means a
/// missed event here is lost for good, which is why every registration
/// elsewhere in the crate happens only after its slot already exists in the
/// pairing table (§9 resolution).
pub fn run(mut poll: mio::Poll, ctx: Arc<ServerCtx>, queue: Arc<WorkQueue>) -> ! {
  let mut events = Events::with_capacity(EVENTS_CAPACITY);
  loop {
    if let Err(e) = poll.poll(&mut events, None) {
      if e.kind() == std::io::ErrorKind::Interrupted {
        continue;
      }
      log::error!("demultiplexer poll failed, shutting down: {e}");
      std::process::exit(1);
    }

    for event in events.iter() {
      let fd = event.token().0 as std::os::fd::RawFd;

      if event.is_error() || event.is_read_closed() || event.is_write_closed() {
        relay::teardown_pair(&ctx, fd);
        continue;
      }

      if event.is_readable() {
        queue.push(fd);
      }
    }
  }
}
