//! Server-side library: accept loop, readiness demultiplexer, worker pool,
//! and the protocol handlers they drive.

pub mod acceptor;
pub mod config;
pub mod demux;
pub mod error;
pub mod protocol;
pub mod pty;
pub mod queue;
pub mod relay;
pub mod table;
pub mod workerpool;

use std::sync::Arc;
use std::thread;

use anyhow::Context;

use queue::WorkQueue;
use relay::ServerCtx;
use table::PairingTable;
use workerpool::WorkerPool;

/// Wires up every component and hands off to the accept loop, which never
/// returns under normal operation (§2).
pub fn run_server() -> anyhow::Result<()> {
  run_server_on(config::PORT)
}

/// Same as [`run_server`], but listening on `port` instead of the fixed
/// default. Exposed so tests can bind an ephemeral port instead of
/// contending for the real one.
pub fn run_server_on(port: u16) -> anyhow::Result<()> {
  pty::ignore_sigchld();

  let listener =
    acceptor::bind_listener(port).with_context(|| format!("failed to bind listener on port {port}"))?;
  let bound_port = listener.local_addr().context("failed to read bound address")?.port();

  let poll = mio::Poll::new().context("failed to create readiness facility")?;
  let registry = poll
    .registry()
    .try_clone()
    .context("failed to clone registry")?;

  let table = Arc::new(PairingTable::new(2 * config::MAX_SESSIONS + config::RESERVED_DESCRIPTORS));
  let ctx = Arc::new(ServerCtx {
    table: Arc::clone(&table),
    registry,
  });

  let worker_count = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
  let queue = Arc::new(WorkQueue::with_capacity(worker_count * config::INIT_TASKS_PER_WORKER));

  let dispatch_ctx = Arc::clone(&ctx);
  let _pool = WorkerPool::spawn(worker_count, Arc::clone(&queue), move |fd| {
    relay::dispatch(&dispatch_ctx, fd);
  });

  let demux_ctx = Arc::clone(&ctx);
  let demux_queue = Arc::clone(&queue);
  thread::Builder::new()
    .name("rembash-demux".into())
    .spawn(move || demux::run(poll, demux_ctx, demux_queue))
    .context("failed to spawn demultiplexer thread")?;

  log::info!("listening on port {bound_port} with {worker_count} worker thread(s)");

  acceptor::run(listener, &ctx);
}
