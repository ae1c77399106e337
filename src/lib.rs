//! pubq - An asynchronous publisher client for an NSQ-style framed TCP pub/sub broker.
//!
//! A [`Publisher`] owns one outbound connection to a single broker endpoint. It
//! lazily connects on the first publish (and re-connects the same way after a
//! disconnect), performs the protocol handshake, and correlates every response
//! frame to the oldest outstanding publish, FIFO, with no request ids on the wire.

pub mod error;
pub mod protocol;
pub mod publisher;
pub(crate) mod runtime;

// Re-export core types for user convenience
pub use error::PubError;
pub use protocol::command::Command;
pub use protocol::frame::FrameType;
pub use publisher::config::PublisherConfig;
pub use publisher::transaction::{done_channel, DoneReceiver, DoneSender, Transaction};
pub use publisher::Publisher;
