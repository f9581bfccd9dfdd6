//! Fixed worker pool (§4.3): `N` threads, each looping on "wait for a work
//! item, dispatch it". Sized to the number of online processors, matching
//! the source's `sysconf(_SC_NPROCESSORS_ONLN)`.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::queue::WorkQueue;

pub struct WorkerPool {
  _handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
  /// Spawns `worker_count` threads, each running `dispatch` for every
  /// descriptor it dequeues, forever. Workers are never joined; shutdown
  /// is not required by the core (§4.3) and the process exits as a whole.
  pub fn spawn<F>(worker_count: usize, queue: Arc<WorkQueue>, dispatch: F) -> Self
  where
    F: Fn(RawFd) + Send + Sync + 'static,
  {
    let dispatch = Arc::new(dispatch);
    let handles = (0..worker_count.max(1))
      .map(|i| {
        let queue = Arc::clone(&queue);
        let dispatch = Arc::clone(&dispatch);
        thread::Builder::new()
          .name(format!("rembash-worker-{i}"))
          .spawn(move || loop {
            let fd = queue.pop();
            dispatch(fd);
          })
          .expect("failed to spawn worker thread")
      })
      .collect();
    Self { _handles: handles }
  }
}
