// src/publisher/reader.rs

use crate::protocol::frame::read_frame;
use crate::publisher::PublisherInner;

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;

/// The sole reader of the socket.
///
/// Continuously reads framed responses and hands them to the router. Every
/// read runs under a deadline of twice the heartbeat interval: a live
/// connection must produce some frame, data or heartbeat, within that
/// window. Both the read and the hand-off race the close signal so the task
/// never outlives shutdown.
pub(crate) struct InboundReader {
  inner: Arc<PublisherInner>,
  read_half: OwnedReadHalf,
  frame_tx: async_channel::Sender<Bytes>,
  close_rx: async_channel::Receiver<()>,
}

impl InboundReader {
  pub(crate) fn new(
    inner: Arc<PublisherInner>,
    read_half: OwnedReadHalf,
    frame_tx: async_channel::Sender<Bytes>,
    close_rx: async_channel::Receiver<()>,
  ) -> Self {
    Self {
      inner,
      read_half,
      frame_tx,
      close_rx,
    }
  }

  pub(crate) async fn run(mut self) {
    let addr = self.inner.addr.clone();
    let read_deadline = self.inner.config.heartbeat_interval * 2;
    tracing::debug!(addr = %addr, "reader started");

    loop {
      let frame = tokio::select! {
        res = timeout(read_deadline, read_frame(&mut self.read_half)) => {
          match res {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
              if !e.is_connection_closed() {
                tracing::error!(addr = %addr, error = %e, "failed reading response");
              }
              PublisherInner::close(&self.inner);
              break;
            }
            Err(_) => {
              tracing::error!(addr = %addr, deadline = ?read_deadline, "read deadline expired");
              PublisherInner::close(&self.inner);
              break;
            }
          }
        }
        _ = self.close_rx.recv() => break,
      };

      tokio::select! {
        res = self.frame_tx.send(frame) => {
          if res.is_err() {
            // Router gone; nothing left to deliver to.
            break;
          }
        }
        _ = self.close_rx.recv() => break,
      }
    }

    self.inner.wg.done();
    tracing::debug!(addr = %addr, "reader exiting");
  }
}
