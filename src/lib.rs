//! An asynchronous AMQP 0-8/0-9-1 connection and channel protocol engine.
//!
//! Wire encoding/decoding is delegated entirely to [`amq_protocol`] (the
//! crate backing `lapin`); this crate owns connection/channel lifecycle,
//! the Sync-Gate that serializes synchronous method exchanges, content
//! reassembly, and reconnect.
//!
//! A connection runs as a single event-loop task
//! ([`connection::engine::ConnectionEngine`]); every public handle
//! ([`Connection`], [`channel::Channel`], [`queue::Queue`]) is a cheap,
//! cloneable front for commands sent into that task. Nothing here touches a
//! socket from more than one task.
//!
//! ```no_run
//! use amqp_engine::config::ConfigBuilder;
//! use amqp_engine::Connection;
//!
//! # async fn run() -> Result<(), amqp_engine::Error> {
//! let builder = ConfigBuilder::new()
//!     .remote_address(["localhost"])
//!     .reconnect(true);
//! let (connection, _join) = Connection::create(builder)?;
//!
//! let channel = connection.channel(None).await?;
//! channel.publish(
//!     "",
//!     "my-queue",
//!     false,
//!     false,
//!     Default::default(),
//!     b"hello".to_vec(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod channel;
pub mod config;
pub mod connection;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod publish;
pub mod queue;
pub mod spec_table;
pub mod sync_gate;
pub mod transport;

pub use channel::Channel;
pub use config::{Config, ConfigBuilder};
pub use connection::Connection;
pub use error::Error;
pub use queue::Queue;
