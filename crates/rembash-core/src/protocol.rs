//! Wire protocol constants and the bounded handshake-token matcher.

/// The server's greeting and the client's shared token are byte-identical.
pub const SECRET: &[u8] = b"<rembash>\n";

/// Sent by the server after a successful handshake.
pub const OK: &[u8] = b"<ok>\n";

/// Sent by the server, best-effort, before closing on a protocol error.
pub const ERROR: &[u8] = b"<error>\n";

/// Upper bound on a single handshake-phase read, per the wire protocol.
pub const HANDSHAKE_READ_CAP: usize = 512;

/// Upper bound on the accumulated pending bytes while waiting for the full
/// token to arrive across several non-blocking reads. The source assumes a
/// single read; we loop instead, bounded so a hostile or confused peer can't
/// keep a slot open indefinitely by trickling bytes.
pub const HANDSHAKE_PENDING_CAP: usize = 64;

/// Outcome of feeding newly-read bytes into a pending handshake buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum TokenMatch {
  /// Not enough bytes yet to decide; keep the connection `AwaitingSecret`.
  Pending,
  /// The accumulated bytes equal `SECRET` exactly.
  Matched,
  /// The accumulated bytes can never equal `SECRET`, or the bound was exceeded.
  Mismatch,
}

/// Compares `pending` against `SECRET` given the rule described in §9
/// ("Handshake read assumption"): accumulate until the expected length is
/// reached or the bound is exceeded, then compare exactly.
pub fn match_token(pending: &[u8]) -> TokenMatch {
  if pending.len() > HANDSHAKE_PENDING_CAP {
    return TokenMatch::Mismatch;
  }
  if pending.len() < SECRET.len() {
    if SECRET[..pending.len()] != *pending {
      return TokenMatch::Mismatch;
    }
    return TokenMatch::Pending;
  }
  if pending == SECRET {
    TokenMatch::Matched
  } else {
    TokenMatch::Mismatch
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_is_pending() {
    assert_eq!(match_token(b""), TokenMatch::Pending);
  }

  #[test]
  fn prefix_is_pending() {
    assert_eq!(match_token(b"<rembash"), TokenMatch::Pending);
  }

  #[test]
  fn exact_match() {
    assert_eq!(match_token(SECRET), TokenMatch::Matched);
  }

  #[test]
  fn wrong_first_byte_is_immediate_mismatch() {
    assert_eq!(match_token(b"x"), TokenMatch::Mismatch);
  }

  #[test]
  fn right_length_wrong_bytes_is_mismatch() {
    assert_eq!(match_token(b"nope!nope!"), TokenMatch::Mismatch);
  }

  #[test]
  fn overlong_without_match_is_mismatch() {
    let junk = vec![b'a'; HANDSHAKE_PENDING_CAP + 1];
    assert_eq!(match_token(&junk), TokenMatch::Mismatch);
  }

  #[test]
  fn short_prefix_without_newline_is_still_pending() {
    assert_eq!(match_token(b"<rembash>"), TokenMatch::Pending);
  }

  #[test]
  fn wrong_byte_after_valid_prefix_is_mismatch() {
    assert_eq!(match_token(b"<rembash>x"), TokenMatch::Mismatch);
  }
}
