use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PubError {
  // --- Lifecycle Errors ---
  /// A publish was attempted while no connection exists, or the connection
  /// dropped before the transaction could be resolved.
  #[error("not connected")]
  NotConnected,

  /// Work was submitted after `stop()` was invoked.
  #[error("stopped")]
  Stopped,

  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// A dial, write, or read deadline expired.
  #[error("operation timed out")]
  Timeout,

  // --- Protocol Errors ---
  #[error("protocol error: {0}")]
  Protocol(String),

  /// The broker answered the handshake with an error-typed frame.
  #[error("broker error: {0}")]
  Broker(String),
}

impl Clone for PubError {
  fn clone(&self) -> Self {
    match self {
      PubError::NotConnected => PubError::NotConnected,
      PubError::Stopped => PubError::Stopped,
      // io::Error is not Clone; preserve kind and message.
      PubError::Io(e) => PubError::Io(io::Error::new(e.kind(), e.to_string())),
      PubError::Timeout => PubError::Timeout,
      PubError::Protocol(s) => PubError::Protocol(s.clone()),
      PubError::Broker(s) => PubError::Broker(s.clone()),
    }
  }
}

impl PubError {
  /// True for the expected "peer went away" I/O cases, where logging a
  /// full error would be noise during an ordinary close.
  pub(crate) fn is_connection_closed(&self) -> bool {
    match self {
      PubError::Io(e) => matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
          | io::ErrorKind::ConnectionReset
          | io::ErrorKind::BrokenPipe
          | io::ErrorKind::ConnectionAborted
      ),
      _ => false,
    }
  }
}
