//! Fixed server configuration. The server takes no arguments and reads no
//! files (§6); every knob the original source has as a `#define` lives here
//! as a `const` instead.

/// Default and only listening port.
pub const PORT: u16 = 4070;

/// Minimum listen backlog; `socket2` is asked for at least this many.
pub const BACKLOG: i32 = 16;

/// Maximum number of concurrent sessions the pairing table can hold.
pub const MAX_SESSIONS: usize = 1024;

/// Reserved low descriptor numbers (stdio, the listener itself) added on top
/// of `2 * MAX_SESSIONS` when sizing the pairing table (§4.6).
pub const RESERVED_DESCRIPTORS: usize = 16;

/// Initial work queue capacity is `workers * INIT_TASKS_PER_THREAD` (§4.3).
pub const INIT_TASKS_PER_WORKER: usize = 4;

/// Relay buffer size (§4.5).
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// The shell executed for every session (§6, "Shell child contract").
pub const SHELL: &str = "bash";
