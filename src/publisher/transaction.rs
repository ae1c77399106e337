// src/publisher/transaction.rs

use crate::error::PubError;
use crate::protocol::command::Command;
use crate::protocol::frame::FrameType;

use std::any::Any;
use std::fmt;

use bytes::Bytes;

/// The completion side of an async publish. A single channel may be shared
/// across many publishes; each finalized [`Transaction`] arrives on it once.
pub type DoneSender = async_channel::Sender<Transaction>;
pub type DoneReceiver = async_channel::Receiver<Transaction>;

/// Creates a completion channel pair for the async publish methods.
pub fn done_channel() -> (DoneSender, DoneReceiver) {
  async_channel::bounded(1)
}

/// One pending publish request and its eventual outcome.
///
/// Created once per publish call and mutated exactly once by the router,
/// either with the correlated response frame or with a disconnect error,
/// then finalized: delivered on its completion channel when one was
/// supplied, otherwise dropped.
pub struct Transaction {
  pub(crate) cmd: Command,
  done: Option<DoneSender>,
  /// Frame type of the correlated response; `None` until resolved.
  pub frame_type: Option<FrameType>,
  /// Payload of the correlated response.
  pub data: Bytes,
  /// The error (or `None`) of the publish command.
  pub error: Option<PubError>,
  /// Opaque caller context carried through untouched.
  pub context: Option<Box<dyn Any + Send>>,
}

impl Transaction {
  pub(crate) fn new(cmd: Command, done: Option<DoneSender>, context: Option<Box<dyn Any + Send>>) -> Self {
    Self {
      cmd,
      done,
      frame_type: None,
      data: Bytes::new(),
      error: None,
      context,
    }
  }

  /// Delivers the resolved transaction on its completion channel, if any.
  /// Must be called exactly once, after the result fields are filled in.
  pub(crate) async fn finalize(mut self) {
    if let Some(done) = self.done.take() {
      // A dropped receiver is a caller that stopped listening; nothing to do.
      let _ = done.send(self).await;
    }
  }

  /// Consumes the transaction into the synchronous-publish result shape.
  pub fn into_result(self) -> Result<(FrameType, Bytes), PubError> {
    if let Some(err) = self.error {
      return Err(err);
    }
    match self.frame_type {
      Some(frame_type) => Ok((frame_type, self.data)),
      None => Err(PubError::Protocol("transaction resolved without a frame".to_string())),
    }
  }
}

impl fmt::Debug for Transaction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Transaction")
      .field("cmd", &self.cmd.name())
      .field("has_done_chan", &self.done.is_some())
      .field("frame_type", &self.frame_type)
      .field("data_len", &self.data.len())
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}
