//! Interactive client: connects, performs the three-step handshake, then
//! relays the local terminal to the remote shell (§6, §10).

mod tty;

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use rembash_core::{config, protocol};
use tty::RawModeGuard;

/// Connects to a rembash server and attaches the local terminal to it.
#[derive(Debug, Parser)]
#[command(version, about = "Remote interactive shell access client")]
struct Cli {
  /// Server address, as a dotted-quad IPv4 address.
  server: Ipv4Addr,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  match run(cli.server) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("rembash-client: {err:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(server: Ipv4Addr) -> Result<()> {
  let mut stream = TcpStream::connect((server, config::PORT))
    .with_context(|| format!("failed to connect to {server}:{}", config::PORT))?;

  handshake(&mut stream)?;

  // Raw mode is enabled only after the handshake succeeds (§10): a failed
  // handshake leaves the terminal untouched and prints a plain diagnostic.
  let _raw = RawModeGuard::enable().context("failed to enable raw terminal mode")?;

  relay(stream)
}

/// Mirrors §6 exactly: read the greeting, echo it back, then expect `<ok>\n`.
/// Any deviation is treated as fatal before raw mode is ever enabled.
fn handshake(stream: &mut TcpStream) -> Result<()> {
  let greeting = read_line(stream, protocol::SECRET.len())?;
  if greeting != protocol::SECRET {
    return Err(anyhow!("unexpected greeting from server"));
  }

  stream.write_all(protocol::SECRET).context("failed to send shared token")?;

  let reply = read_line(stream, protocol::OK.len().max(protocol::ERROR.len()))?;
  if reply == protocol::OK {
    Ok(())
  } else {
    Err(anyhow!("server rejected the connection"))
  }
}

fn read_line(stream: &mut TcpStream, expected_len: usize) -> Result<Vec<u8>> {
  let mut buf = vec![0u8; expected_len];
  stream.read_exact(&mut buf).context("connection closed during handshake")?;
  Ok(buf)
}

/// Two-thread relay (§10): the writer thread moves stdin to the socket, the
/// main thread moves the socket to stdout. Either side's EOF or error ends
/// the session and shuts the other descriptor down.
fn relay(stream: TcpStream) -> Result<()> {
  let mut reader = stream.try_clone().context("failed to duplicate connection handle")?;
  let writer_handle = thread::Builder::new()
    .name("rembash-client-writer".into())
    .spawn(move || -> io::Result<()> {
      let mut writer = stream;
      let mut stdin = std::io::stdin().lock();
      let mut buf = [0u8; config::RELAY_BUFFER_SIZE];
      loop {
        let n = stdin.read(&mut buf)?;
        if n == 0 {
          break;
        }
        writer.write_all(&buf[..n])?;
      }
      let _ = writer.shutdown(std::net::Shutdown::Write);
      Ok(())
    })
    .expect("failed to spawn writer thread");

  let mut stdout = std::io::stdout().lock();
  let mut buf = [0u8; config::RELAY_BUFFER_SIZE];
  loop {
    let n = reader.read(&mut buf).context("connection read failed")?;
    if n == 0 {
      break;
    }
    stdout.write_all(&buf[..n]).context("failed to write to stdout")?;
    stdout.flush().ok();
  }

  let _ = reader.shutdown(std::net::Shutdown::Read);
  let _ = writer_handle.join();
  Ok(())
}
