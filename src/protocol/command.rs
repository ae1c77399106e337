// src/protocol/command.rs

use crate::error::PubError;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Fields carried by the IDENTIFY handshake command.
///
/// `heartbeat_interval` is in milliseconds; `feature_negotiation` is always
/// sent as `true` by this client.
#[derive(Debug, Serialize)]
pub(crate) struct IdentifyBody<'a> {
  pub short_id: &'a str,
  pub long_id: &'a str,
  pub heartbeat_interval: i64,
  pub feature_negotiation: bool,
  pub authentication_password: &'a str,
}

/// One protocol command, ready to be written to the socket.
///
/// Rendered as `NAME [param ...]\n` followed, when a body is present, by a
/// 4-byte big-endian length prefix and the raw body bytes.
#[derive(Debug, Clone)]
pub struct Command {
  name: &'static str,
  params: Vec<String>,
  body: Option<Bytes>,
}

impl Command {
  /// IDENTIFY: the handshake command, body is a JSON object.
  pub(crate) fn identify(body: &IdentifyBody<'_>) -> Result<Command, PubError> {
    let json = serde_json::to_vec(body).map_err(|e| PubError::Protocol(format!("failed to encode IDENTIFY body: {}", e)))?;
    Ok(Command {
      name: "IDENTIFY",
      params: Vec::new(),
      body: Some(Bytes::from(json)),
    })
  }

  /// PUB: publish one message body to a topic.
  pub fn publish(topic: &str, body: impl Into<Bytes>) -> Command {
    Command {
      name: "PUB",
      params: vec![topic.to_string()],
      body: Some(body.into()),
    }
  }

  /// MPUB: publish a batch of message bodies to a topic atomically.
  ///
  /// The body is `u32 count` followed by `count` length-prefixed messages,
  /// all big-endian, under the usual outer length prefix.
  pub fn multi_publish(topic: &str, bodies: &[Bytes]) -> Command {
    let inner: usize = bodies.iter().map(|b| 4 + b.len()).sum();
    let mut buf = BytesMut::with_capacity(4 + inner);
    buf.put_u32(bodies.len() as u32);
    for body in bodies {
      buf.put_u32(body.len() as u32);
      buf.put_slice(body);
    }
    Command {
      name: "MPUB",
      params: vec![topic.to_string()],
      body: Some(buf.freeze()),
    }
  }

  /// NOP: heartbeat acknowledgment, no params, no body.
  pub fn nop() -> Command {
    Command {
      name: "NOP",
      params: Vec::new(),
      body: None,
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Encodes the full command into `dst`.
  pub fn encode(&self, dst: &mut BytesMut) {
    dst.put_slice(self.name.as_bytes());
    for param in &self.params {
      dst.put_u8(b' ');
      dst.put_slice(param.as_bytes());
    }
    dst.put_u8(b'\n');
    if let Some(body) = &self.body {
      dst.put_u32(body.len() as u32);
      dst.put_slice(body);
    }
  }

  /// Writes the command to `sink` as a single buffered write.
  pub async fn write_to<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> Result<(), PubError> {
    let mut buf = BytesMut::with_capacity(64 + self.body.as_ref().map_or(0, |b| b.len()));
    self.encode(&mut buf);
    sink.write_all(&buf).await?;
    sink.flush().await?;
    Ok(())
  }
}
