//! Terminal mode helper for the interactive client (§10).

use anyhow::Result;
use crossterm::terminal;

/// Enables raw terminal mode for the lifetime of this guard, restoring the
/// prior mode on drop regardless of how the session ends (§10, "restored
/// unconditionally on every exit path").
pub struct RawModeGuard;

impl RawModeGuard {
  pub fn enable() -> Result<Self> {
    terminal::enable_raw_mode()?;
    Ok(Self)
  }
}

impl Drop for RawModeGuard {
  fn drop(&mut self) {
    let _ = terminal::disable_raw_mode();
  }
}
