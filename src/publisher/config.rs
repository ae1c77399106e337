// src/publisher/config.rs

use std::time::Duration;

/// Tunables fixed at publisher construction, applied on the next connect.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
  /// Deadline applied to every socket write.
  pub write_timeout: Duration,
  /// Interval requested from the broker in the handshake; reads are bounded
  /// by twice this value, since a live connection must produce either data
  /// or a heartbeat within that window.
  pub heartbeat_interval: Duration,
  /// Short client identifier sent in the handshake (hostname up to the
  /// first dot by default).
  pub short_id: String,
  /// Long client identifier sent in the handshake (full hostname by default).
  pub long_id: String,
}

impl Default for PublisherConfig {
  fn default() -> Self {
    let (short_id, long_id) = default_identifiers();
    Self {
      write_timeout: Duration::from_secs(1),
      heartbeat_interval: Duration::from_secs(30),
      short_id,
      long_id,
    }
  }
}

fn default_identifiers() -> (String, String) {
  let host = hostname::get()
    .map(|h| h.to_string_lossy().into_owned())
    .unwrap_or_else(|_| "localhost".to_string());
  let short = host.split('.').next().unwrap_or(&host).to_string();
  (short, host)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_sane() {
    let cfg = PublisherConfig::default();
    assert_eq!(cfg.write_timeout, Duration::from_secs(1));
    assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
    assert!(!cfg.short_id.is_empty());
    assert!(!cfg.short_id.contains('.'));
    assert!(cfg.long_id.starts_with(&cfg.short_id));
  }
}
