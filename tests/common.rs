// tests/common.rs
#![allow(dead_code)] // Helpers are shared across test binaries

use std::sync::Once;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static TRACING_INIT: Once = Once::new();

// Setup function to initialize tracing; RUST_LOG overrides the default.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "pubq=trace,debug";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

/// In-process broker endpoint the tests script by hand.
pub struct MockBroker {
  listener: TcpListener,
  addr: String,
}

impl MockBroker {
  pub async fn bind() -> MockBroker {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind mock broker");
    let addr = listener.local_addr().unwrap().to_string();
    MockBroker { listener, addr }
  }

  pub fn addr(&self) -> &str {
    &self.addr
  }

  pub async fn accept(&self) -> BrokerConn {
    let (stream, _) = self.listener.accept().await.expect("mock broker accept failed");
    BrokerConn {
      stream: BufReader::new(stream),
    }
  }

  /// Consumes the broker, returning the raw listener (for tests that need to
  /// assert no dial ever happens).
  pub fn into_listener(self) -> TcpListener {
    self.listener
  }
}

/// One command as the broker saw it on the wire.
#[derive(Debug)]
pub struct WireCommand {
  pub name: String,
  pub params: Vec<String>,
  pub body: Vec<u8>,
}

/// One accepted client connection, with helpers for the broker's side of
/// the protocol.
pub struct BrokerConn {
  stream: BufReader<TcpStream>,
}

impl BrokerConn {
  pub fn from_stream(stream: TcpStream) -> BrokerConn {
    BrokerConn {
      stream: BufReader::new(stream),
    }
  }

  /// Broker side for shutdown tests: completes the handshake if the client
  /// gets that far, then swallows commands without ever answering a publish.
  /// Tolerates the client disconnecting at any point.
  pub async fn serve_unanswering(mut self) {
    let mut magic = [0u8; 4];
    if self.stream.read_exact(&mut magic).await.is_err() {
      return;
    }
    if !matches!(self.read_command().await, Some(cmd) if cmd.name == "IDENTIFY") {
      return;
    }
    let mut ok = BytesMut::with_capacity(10);
    ok.put_u32(6);
    ok.put_i32(0);
    ok.put_slice(b"OK");
    if self.stream.get_mut().write_all(&ok).await.is_err() {
      return;
    }
    let _ = self.stream.get_mut().flush().await;
    while self.read_command().await.is_some() {}
  }

  pub async fn expect_magic(&mut self) {
    let mut magic = [0u8; 4];
    self.stream.read_exact(&mut magic).await.expect("failed reading magic");
    assert_eq!(&magic, b"  V2", "client sent wrong protocol magic");
  }

  /// Reads one command; `None` on a closed connection. IDENTIFY, PUB, and
  /// MPUB carry a length-prefixed body after the header line.
  pub async fn read_command(&mut self) -> Option<WireCommand> {
    let mut line = Vec::new();
    let n = self.stream.read_until(b'\n', &mut line).await.ok()?;
    if n == 0 {
      return None;
    }
    line.pop(); // trailing newline
    let text = String::from_utf8(line).expect("command header was not UTF-8");
    let mut parts = text.split(' ');
    let name = parts.next().unwrap_or_default().to_string();
    let params: Vec<String> = parts.map(str::to_string).collect();

    let body = match name.as_str() {
      "IDENTIFY" | "PUB" | "MPUB" => {
        let mut size_buf = [0u8; 4];
        self.stream.read_exact(&mut size_buf).await.ok()?;
        let size = u32::from_be_bytes(size_buf) as usize;
        let mut body = vec![0u8; size];
        self.stream.read_exact(&mut body).await.ok()?;
        body
      }
      _ => Vec::new(),
    };

    Some(WireCommand { name, params, body })
  }

  /// Performs the broker side of the handshake and acknowledges it,
  /// returning the decoded IDENTIFY body.
  pub async fn handshake(&mut self) -> serde_json::Value {
    self.expect_magic().await;
    let cmd = self.read_command().await.expect("connection closed during handshake");
    assert_eq!(cmd.name, "IDENTIFY");
    let body: serde_json::Value = serde_json::from_slice(&cmd.body).expect("IDENTIFY body was not JSON");
    self.send_response(0, b"OK").await;
    body
  }

  pub async fn send_response(&mut self, frame_type: i32, data: &[u8]) {
    let mut buf = BytesMut::with_capacity(8 + data.len());
    buf.put_u32((4 + data.len()) as u32);
    buf.put_i32(frame_type);
    buf.put_slice(data);
    self.stream.get_mut().write_all(&buf).await.expect("mock broker write failed");
    self.stream.get_mut().flush().await.expect("mock broker flush failed");
  }

  pub async fn send_heartbeat(&mut self) {
    self.send_response(0, b"_heartbeat_").await;
  }
}
