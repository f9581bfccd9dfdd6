//! End-to-end scenarios from §8, driven against a real server instance
//! bound to an ephemeral port on a background thread.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use rembash_core::protocol;

/// Starts `run_server_on(0)` in the background and returns the port it
/// ended up bound to, retrying briefly since the bind happens
/// asynchronously relative to this thread.
fn start_server() -> u16 {
  let (tx, rx) = std::sync::mpsc::channel();
  thread::spawn(move || {
    let listener = rembash_core::acceptor::bind_listener(0).expect("bind ephemeral port");
    let port = listener.local_addr().expect("local_addr").port();
    tx.send(port).expect("send bound port");
    drop(listener);
    let _ = rembash_core::run_server_on(port);
  });
  rx.recv_timeout(Duration::from_secs(5)).expect("server bound a port")
}

fn connect(port: u16) -> TcpStream {
  for _ in 0..50 {
    if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
      return stream;
    }
    thread::sleep(Duration::from_millis(20));
  }
  panic!("failed to connect to test server");
}

fn read_exact_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
  let mut buf = vec![0u8; n];
  stream.read_exact(&mut buf).expect("read expected bytes");
  buf
}

#[test]
fn happy_path_handshake_then_shell_echo() {
  let port = start_server();
  let mut stream = connect(port);

  let greeting = read_exact_n(&mut stream, protocol::SECRET.len());
  assert_eq!(greeting, protocol::SECRET);

  stream.write_all(protocol::SECRET).unwrap();
  let ack = read_exact_n(&mut stream, protocol::OK.len());
  assert_eq!(ack, protocol::OK);

  stream.write_all(b"echo hello-rembash\n").unwrap();

  let mut collected = Vec::new();
  let mut buf = [0u8; 256];
  stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
  loop {
    let n = stream.read(&mut buf).expect("read shell output");
    if n == 0 {
      break;
    }
    collected.extend_from_slice(&buf[..n]);
    if collected.windows(b"hello-rembash".len()).any(|w| w == b"hello-rembash") {
      break;
    }
  }
  assert!(collected.windows(b"hello-rembash".len()).any(|w| w == b"hello-rembash"));
}

#[test]
fn bad_token_gets_error_and_disconnect() {
  let port = start_server();
  let mut stream = connect(port);

  let _greeting = read_exact_n(&mut stream, protocol::SECRET.len());
  stream.write_all(b"not-the-token\n").unwrap();

  let reply = read_exact_n(&mut stream, protocol::ERROR.len());
  assert_eq!(reply, protocol::ERROR);

  let mut buf = [0u8; 8];
  stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
  let n = stream.read(&mut buf).unwrap_or(0);
  assert_eq!(n, 0, "server should close the connection after a bad token");
}

#[test]
fn shell_exit_closes_the_connection() {
  let port = start_server();
  let mut stream = connect(port);

  let _greeting = read_exact_n(&mut stream, protocol::SECRET.len());
  stream.write_all(protocol::SECRET).unwrap();
  let _ack = read_exact_n(&mut stream, protocol::OK.len());

  stream.write_all(b"exit\n").unwrap();

  stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
  let mut buf = [0u8; 256];
  loop {
    match stream.read(&mut buf) {
      Ok(0) => break,
      Ok(_) => continue,
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
      Err(e) => panic!("unexpected read error waiting for shell exit: {e}"),
    }
  }
}

#[test]
fn fragmented_token_across_several_writes_still_matches() {
  let port = start_server();
  let mut stream = connect(port);

  let _greeting = read_exact_n(&mut stream, protocol::SECRET.len());
  for chunk in protocol::SECRET.chunks(3) {
    stream.write_all(chunk).unwrap();
    thread::sleep(Duration::from_millis(10));
  }

  let ack = read_exact_n(&mut stream, protocol::OK.len());
  assert_eq!(ack, protocol::OK);
}
