// src/publisher/mod.rs

//! The publisher connection handle: lazy connect, handshake, publish
//! entry points, and the shutdown coordinator.

pub mod config;
pub(crate) mod reader;
pub(crate) mod router;
pub(crate) mod state;
pub mod transaction;

use crate::error::PubError;
use crate::protocol::command::{Command, IdentifyBody};
use crate::protocol::frame::{read_frame, unpack_response, FrameType, MAGIC_V2};
use crate::runtime::WaitGroup;

use self::config::PublisherConfig;
use self::reader::InboundReader;
use self::router::OutboundRouter;
use self::state::{ConnState, StateCell};
use self::transaction::{done_channel, DoneSender, Transaction};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Bound on the initial TCP dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `fut` under `dur`, collapsing deadline expiry into [`PubError::Timeout`].
pub(crate) async fn io_deadline<T, F>(dur: Duration, fut: F) -> Result<T, PubError>
where
  F: Future<Output = Result<T, PubError>>,
{
  match timeout(dur, fut).await {
    Ok(res) => res,
    Err(_) => Err(PubError::Timeout),
  }
}

/// Brackets an enqueue attempt so the drain protocol can account for callers
/// that are mid-submission when the router exits.
struct EnqueueGuard<'a>(&'a AtomicUsize);

impl<'a> EnqueueGuard<'a> {
  fn new(counter: &'a AtomicUsize) -> Self {
    counter.fetch_add(1, Ordering::AcqRel);
    Self(counter)
  }
}

impl Drop for EnqueueGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::AcqRel);
  }
}

/// Shared core of a [`Publisher`]; the I/O tasks hold clones of this.
pub(crate) struct PublisherInner {
  pub(crate) addr: String,
  auth_token: String,
  pub(crate) config: PublisherConfig,

  pub(crate) state: StateCell,
  stop_flag: AtomicBool,
  pub(crate) pending_enqueues: AtomicUsize,

  txn_tx: async_channel::Sender<Transaction>,
  pub(crate) txn_rx: async_channel::Receiver<Transaction>,
  stop_tx: async_channel::Sender<()>,
  stop_rx: async_channel::Receiver<()>,
  // Present only while a connection cycle is live; taken (and closed) by
  // the one caller that wins the Connected→Disconnected transition.
  close_tx: Mutex<Option<async_channel::Sender<()>>>,

  pub(crate) wg: WaitGroup,
}

impl PublisherInner {
  /// Lazily establishes the connection. Exactly one caller wins the
  /// `Init→Connected` transition; losers get `NotConnected` and are expected
  /// to retry the publish, not the connect.
  async fn connect(this: &Arc<Self>) -> Result<(), PubError> {
    if this.stop_flag.load(Ordering::SeqCst) {
      return Err(PubError::Stopped);
    }
    if !this.state.transition(ConnState::Init, ConnState::Connected) {
      return Err(PubError::NotConnected);
    }

    tracing::info!(addr = %this.addr, "connecting");
    let mut stream = match io_deadline(DIAL_TIMEOUT, async {
      TcpStream::connect(&this.addr).await.map_err(PubError::from)
    })
    .await
    {
      Ok(stream) => stream,
      Err(e) => {
        tracing::error!(addr = %this.addr, error = %e, "failed to dial");
        this.state.store(ConnState::Init);
        return Err(e);
      }
    };

    // The close signal must exist before any failure path that goes
    // through close().
    let (close_sender, close_rx) = async_channel::bounded::<()>(1);
    {
      let mut guard = match this.close_tx.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
      };
      *guard = Some(close_sender);
    }

    match this.handshake(&mut stream).await {
      Ok(()) => {}
      Err(e) => {
        tracing::error!(addr = %this.addr, error = %e, "handshake failed");
        Self::close(this);
        return Err(e);
      }
    }

    let (read_half, write_half) = stream.into_split();
    let (frame_tx, frame_rx) = async_channel::bounded(1);

    this.wg.add(2);
    let reader = InboundReader::new(Arc::clone(this), read_half, frame_tx, close_rx.clone());
    tokio::spawn(reader.run());
    let router = OutboundRouter::new(Arc::clone(this), write_half, this.txn_rx.clone(), frame_rx, close_rx);
    tokio::spawn(router.run());

    tracing::info!(addr = %this.addr, "connected");
    Ok(())
  }

  /// Magic marker, IDENTIFY, and the broker's acknowledgment frame.
  async fn handshake(&self, stream: &mut TcpStream) -> Result<(), PubError> {
    let write_timeout = self.config.write_timeout;

    io_deadline(write_timeout, async {
      stream.write_all(MAGIC_V2).await.map_err(PubError::from)
    })
    .await?;

    let identify = Command::identify(&IdentifyBody {
      short_id: &self.config.short_id,
      long_id: &self.config.long_id,
      heartbeat_interval: self.config.heartbeat_interval.as_millis() as i64,
      feature_negotiation: true,
      authentication_password: &self.auth_token,
    })?;
    io_deadline(write_timeout, identify.write_to(stream)).await?;

    let frame = io_deadline(self.config.heartbeat_interval * 2, read_frame(stream)).await?;
    let (frame_type, data) = unpack_response(&frame)?;
    if frame_type == FrameType::Error {
      return Err(PubError::Broker(String::from_utf8_lossy(&data).into_owned()));
    }
    Ok(())
  }

  /// Tears the live connection down. At most one caller per connection cycle
  /// does the work; the rest are no-ops. Never blocks: the wait for both I/O
  /// tasks (and the final reset to `Init` enabling reconnect) runs detached.
  pub(crate) fn close(this: &Arc<Self>) {
    if !this.state.transition(ConnState::Connected, ConnState::Disconnected) {
      return;
    }
    tracing::debug!(addr = %this.addr, "closing connection");
    let taken = match this.close_tx.lock() {
      Ok(mut guard) => guard.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(sender) = taken {
      sender.close();
    }
    let inner = Arc::clone(this);
    tokio::spawn(async move {
      inner.wg.wait().await;
      inner.state.store(ConnState::Init);
      tracing::debug!(addr = %inner.addr, "connection state reset");
    });
  }

  async fn send_command_async(
    this: &Arc<Self>,
    cmd: Command,
    done: Option<DoneSender>,
    context: Option<Box<dyn Any + Send>>,
  ) -> Result<(), PubError> {
    let _guard = EnqueueGuard::new(&this.pending_enqueues);

    if this.state.load() != ConnState::Connected {
      Self::connect(this).await?;
    }

    let txn = Transaction::new(cmd, done, context);
    tokio::select! {
      res = this.txn_tx.send(txn) => res.map_err(|_| PubError::Stopped),
      _ = this.stop_rx.recv() => Err(PubError::Stopped),
    }
  }
}

/// Publisher client for a single broker endpoint.
///
/// Owns one outbound connection, established lazily by the first publish and
/// re-established the same way after a disconnect. Cloning yields another
/// handle to the same connection. All publish results are correlated FIFO:
/// the broker answers requests in the order they were written, with no
/// transaction ids on the wire.
#[derive(Clone)]
pub struct Publisher {
  inner: Arc<PublisherInner>,
}

impl Publisher {
  /// Creates a publisher for `addr` with default configuration.
  pub fn new(addr: impl Into<String>, auth_token: impl Into<String>) -> Publisher {
    Publisher::with_config(addr, auth_token, PublisherConfig::default())
  }

  /// Creates a publisher with explicit configuration. The configuration is
  /// fixed from here on; it is applied on every (re)connect.
  pub fn with_config(addr: impl Into<String>, auth_token: impl Into<String>, config: PublisherConfig) -> Publisher {
    let (txn_tx, txn_rx) = async_channel::bounded(1);
    let (stop_tx, stop_rx) = async_channel::bounded(1);
    Publisher {
      inner: Arc::new(PublisherInner {
        addr: addr.into(),
        auth_token: auth_token.into(),
        config,
        state: StateCell::new(),
        stop_flag: AtomicBool::new(false),
        pending_enqueues: AtomicUsize::new(0),
        txn_tx,
        txn_rx,
        stop_tx,
        stop_rx,
        close_tx: Mutex::new(None),
        wg: WaitGroup::new(),
      }),
    }
  }

  /// The broker address this publisher talks to.
  pub fn addr(&self) -> &str {
    &self.inner.addr
  }

  /// Publishes `body` to `topic` and waits for the correlated response.
  pub async fn publish(&self, topic: &str, body: impl Into<Bytes>) -> Result<(FrameType, Bytes), PubError> {
    self.send_command(Command::publish(topic, body)).await
  }

  /// Publishes a batch of bodies to `topic` atomically and waits for the
  /// correlated response.
  pub async fn multi_publish(&self, topic: &str, bodies: &[Bytes]) -> Result<(FrameType, Bytes), PubError> {
    self.send_command(Command::multi_publish(topic, bodies)).await
  }

  /// Submits a publish without waiting for the broker's response.
  ///
  /// When the response arrives, the transaction (with `frame_type`, `data`,
  /// `error`, and the supplied `context`) is delivered on `done`, if given.
  /// The returned error covers submission only.
  pub async fn publish_async(
    &self,
    topic: &str,
    body: impl Into<Bytes>,
    done: Option<DoneSender>,
    context: Option<Box<dyn Any + Send>>,
  ) -> Result<(), PubError> {
    self.send_command_async(Command::publish(topic, body), done, context).await
  }

  /// Batch variant of [`publish_async`](Publisher::publish_async).
  pub async fn multi_publish_async(
    &self,
    topic: &str,
    bodies: &[Bytes],
    done: Option<DoneSender>,
    context: Option<Box<dyn Any + Send>>,
  ) -> Result<(), PubError> {
    self
      .send_command_async(Command::multi_publish(topic, bodies), done, context)
      .await
  }

  /// Sends `cmd` and waits for the correlated response frame.
  pub async fn send_command(&self, cmd: Command) -> Result<(FrameType, Bytes), PubError> {
    let (done_tx, done_rx) = done_channel();
    self.send_command_async(cmd, Some(done_tx), None).await?;
    // No timeout here: resolution relies on the socket deadlines eventually
    // closing the connection and draining every outstanding transaction.
    let txn = done_rx.recv().await.map_err(|_| PubError::NotConnected)?;
    txn.into_result()
  }

  /// Submits `cmd` for transmission, connecting first if needed.
  pub async fn send_command_async(
    &self,
    cmd: Command,
    done: Option<DoneSender>,
    context: Option<Box<dyn Any + Send>>,
  ) -> Result<(), PubError> {
    PublisherInner::send_command_async(&self.inner, cmd, done, context).await
  }

  /// Disconnects and permanently stops the publisher.
  ///
  /// Idempotent; only the first caller does the work. Returns once both I/O
  /// tasks have exited and every submitted transaction has been finalized.
  pub async fn stop(&self) {
    if self.inner.stop_flag.swap(true, Ordering::SeqCst) {
      return;
    }
    tracing::info!(addr = %self.inner.addr, "stopping publisher");
    self.inner.stop_tx.close();
    PublisherInner::close(&self.inner);
    self.inner.wg.wait().await;

    // A submission racing this stop can win the connect after close() has
    // already run; its transaction then sits in the channel buffer with no
    // router left to drain it. Keep finalizing until no enqueue is in
    // flight, the buffer is empty, and no late-spawned I/O task remains.
    loop {
      match self.inner.txn_rx.try_recv() {
        Ok(mut txn) => {
          txn.error = Some(PubError::NotConnected);
          txn.finalize().await;
        }
        Err(async_channel::TryRecvError::Empty) => {
          if self.inner.pending_enqueues.load(Ordering::Acquire) == 0 && self.inner.txn_rx.is_empty() {
            if self.inner.wg.get_count() == 0 {
              return;
            }
            self.inner.wg.wait().await;
          } else {
            tokio::time::sleep(router::DRAIN_POLL_INTERVAL).await;
          }
        }
        Err(async_channel::TryRecvError::Closed) => return,
      }
    }
  }
}

impl fmt::Display for Publisher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.inner.addr)
  }
}

impl fmt::Debug for Publisher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Publisher")
      .field("addr", &self.inner.addr)
      .field("state", &self.inner.state.load())
      .finish_non_exhaustive()
  }
}
