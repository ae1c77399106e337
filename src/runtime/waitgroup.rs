// src/runtime/waitgroup.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// An asynchronous WaitGroup.
///
/// Tasks register with `add` before being spawned and call `done` on exit;
/// `wait` blocks until the counter returns to zero. Used to hold `stop()`
/// until both I/O tasks of a connection have fully exited, and by the
/// detached close waiter before the state resets for reconnect.
#[derive(Debug, Clone)]
pub(crate) struct WaitGroup {
  count: Arc<AtomicUsize>,
  notify_on_zero: Arc<Notify>,
}

impl WaitGroup {
  pub fn new() -> Self {
    Self {
      count: Arc::new(AtomicUsize::new(0)),
      notify_on_zero: Arc::new(Notify::new()),
    }
  }

  /// Adds `delta` pending tasks to the group.
  pub fn add(&self, delta: usize) {
    if delta == 0 {
      return;
    }
    self.count.fetch_add(delta, Ordering::Relaxed);
  }

  /// Marks one task as finished, releasing waiters when the count hits zero.
  ///
  /// Panics if called more times than `add` accounted for.
  pub fn done(&self) {
    let old_count = self.count.fetch_sub(1, Ordering::AcqRel);
    if old_count == 0 {
      self.count.fetch_add(1, Ordering::Relaxed);
      panic!("WaitGroup::done() called with zero count");
    }
    if old_count == 1 {
      self.notify_on_zero.notify_waiters();
    }
  }

  /// Waits until the counter is zero. Returns immediately if it already is.
  pub async fn wait(&self) {
    if self.count.load(Ordering::Acquire) == 0 {
      return;
    }
    loop {
      self.notify_on_zero.notified().await;
      if self.count.load(Ordering::Acquire) == 0 {
        return;
      }
      // Spurious or stale wakeup; re-arm.
    }
  }

  #[allow(dead_code)]
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tokio::time::timeout;

  #[tokio::test]
  async fn wait_blocks_until_all_done() {
    let wg = WaitGroup::new();
    wg.add(2);

    let wg1 = wg.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      wg1.done();
    });

    let gate = Arc::new(Notify::new());
    let gate_clone = gate.clone();
    let wg2 = wg.clone();
    tokio::spawn(async move {
      gate_clone.notified().await;
      wg2.done();
    });

    let wg_wait = wg.clone();
    let mut wait_task = tokio::spawn(async move { wg_wait.wait().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(wg.get_count(), 1);
    assert!(
      timeout(Duration::from_millis(5), &mut wait_task).await.is_err(),
      "wait released with one task still pending"
    );

    gate.notify_one();
    timeout(Duration::from_millis(100), wait_task)
      .await
      .expect("wait did not release after last done()")
      .unwrap();
    assert_eq!(wg.get_count(), 0);
  }

  #[tokio::test]
  async fn wait_on_zero_returns_immediately() {
    let wg = WaitGroup::new();
    timeout(Duration::from_millis(10), wg.wait())
      .await
      .expect("wait on empty group blocked");
  }

  #[tokio::test]
  #[should_panic]
  async fn done_on_zero_panics() {
    let wg = WaitGroup::new();
    wg.done();
  }
}
