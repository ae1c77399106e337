// src/publisher/router.rs

use crate::error::PubError;
use crate::protocol::command::Command;
use crate::protocol::frame::{is_heartbeat, unpack_response};
use crate::publisher::transaction::Transaction;
use crate::publisher::{io_deadline, PublisherInner};

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::time::sleep;

/// Interval between drain polls while waiting for racing enqueues to settle.
pub(crate) const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The sole writer to the socket.
///
/// Accepts new transactions, writes their commands, keeps the FIFO of
/// outstanding transactions, matches every inbound frame to the oldest one
/// (the wire carries no transaction ids; the broker answers in write order),
/// and auto-replies to heartbeats. On exit it drains, so no transaction is
/// ever left unresolved.
pub(crate) struct OutboundRouter {
  inner: Arc<PublisherInner>,
  write_half: OwnedWriteHalf,
  txn_rx: async_channel::Receiver<Transaction>,
  frame_rx: async_channel::Receiver<Bytes>,
  close_rx: async_channel::Receiver<()>,
  outstanding: VecDeque<Transaction>,
}

impl OutboundRouter {
  pub(crate) fn new(
    inner: Arc<PublisherInner>,
    write_half: OwnedWriteHalf,
    txn_rx: async_channel::Receiver<Transaction>,
    frame_rx: async_channel::Receiver<Bytes>,
    close_rx: async_channel::Receiver<()>,
  ) -> Self {
    Self {
      inner,
      write_half,
      txn_rx,
      frame_rx,
      close_rx,
      outstanding: VecDeque::new(),
    }
  }

  pub(crate) async fn run(mut self) {
    let addr = self.inner.addr.clone();
    tracing::debug!(addr = %addr, "router started");

    loop {
      tokio::select! {
        txn = self.txn_rx.recv() => {
          let txn = match txn {
            Ok(txn) => txn,
            // Transaction channel closed out from under us; treat as shutdown.
            Err(_) => break,
          };
          // Queue before writing so a failed write still drains this one.
          self.outstanding.push_back(txn);
          if let Err(e) = self.write_outstanding_tail().await {
            tracing::error!(addr = %addr, error = %e, "failed writing command");
            PublisherInner::close(&self.inner);
            break;
          }
        }

        frame = self.frame_rx.recv() => {
          let frame = match frame {
            Ok(frame) => frame,
            // Reader is gone; the close signal will have been raised too.
            Err(_) => break,
          };
          match self.process_frame(frame).await {
            Ok(()) => {}
            Err(e) => {
              tracing::error!(addr = %addr, error = %e, "failed processing response frame");
              PublisherInner::close(&self.inner);
              break;
            }
          }
        }

        _ = self.close_rx.recv() => break,
      }
    }

    self.drain_transactions().await;
    self.inner.wg.done();
    tracing::debug!(addr = %addr, "router exiting");
  }

  /// Writes the command of the most recently queued transaction.
  async fn write_outstanding_tail(&mut self) -> Result<(), PubError> {
    let cmd = match self.outstanding.back() {
      Some(txn) => &txn.cmd,
      None => return Ok(()),
    };
    io_deadline(self.inner.config.write_timeout, cmd.write_to(&mut self.write_half)).await
  }

  /// Unpacks one inbound frame and either answers a heartbeat or resolves
  /// the oldest outstanding transaction with it.
  async fn process_frame(&mut self, frame: Bytes) -> Result<(), PubError> {
    let (frame_type, data) = unpack_response(&frame)?;

    if is_heartbeat(frame_type, &data) {
      tracing::debug!(addr = %self.inner.addr, "heartbeat received");
      return io_deadline(
        self.inner.config.write_timeout,
        Command::nop().write_to(&mut self.write_half),
      )
      .await;
    }

    let mut txn = match self.outstanding.pop_front() {
      Some(txn) => txn,
      None => {
        // FIFO correlation has nothing to pair this frame with.
        return Err(PubError::Protocol("response frame with no outstanding transaction".to_string()));
      }
    };
    txn.frame_type = Some(frame_type);
    txn.data = data;
    txn.error = None;
    txn.finalize().await;
    Ok(())
  }

  /// Resolves everything still queued with `NotConnected`, then keeps
  /// freeing callers that raced their enqueue against this exit until no
  /// enqueue can still be in flight.
  async fn drain_transactions(&mut self) {
    while let Some(mut txn) = self.outstanding.pop_front() {
      txn.error = Some(PubError::NotConnected);
      txn.finalize().await;
    }

    loop {
      match self.txn_rx.try_recv() {
        Ok(mut txn) => {
          txn.error = Some(PubError::NotConnected);
          txn.finalize().await;
        }
        Err(async_channel::TryRecvError::Empty) => {
          // The counter must read zero *before* the emptiness re-check:
          // a sender decrements only after its send landed, so a zero
          // counter plus an empty channel means nothing can still arrive.
          if self.inner.pending_enqueues.load(Ordering::Acquire) == 0 && self.txn_rx.is_empty() {
            return;
          }
          sleep(DRAIN_POLL_INTERVAL).await;
        }
        Err(async_channel::TryRecvError::Closed) => return,
      }
    }
  }
}
