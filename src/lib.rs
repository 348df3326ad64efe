//! Async client for the MikroTik RouterOS binary management API.
//!
//! This crate implements the wire protocol (length-prefixed
//! word/sentence/block framing), the post-6.43/pre-6.43 login state
//! machine, the `!re`/`!done`/`!trap`/`!fatal` reply parser, and a pool of
//! serialized per-connection workers. Command convenience wrappers (e.g.
//! "list interfaces"), CLI/configuration plumbing, and logging sinks are
//! out of scope: callers pass pre-formatted command words and attribute
//! words, and plug in their own telemetry/log sinks.
//!
//! ```no_run
//! use mikrotik_rs_api::{Config, connect};
//!
//! # async fn run() -> mikrotik_rs_api::Result<()> {
//! let config = Config::new("192.168.88.1", "admin", "");
//! let mut conn = connect(&config).await?;
//! let interfaces = conn.command(&["/interface/print"]).await?;
//! for row in interfaces {
//!     println!("{:?}", row.get("name"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod errors;
pub mod handle;
pub mod pool;
pub mod reply;
pub mod telemetry;
pub mod transport;
pub mod worker;

pub use config::{CertVerification, ClientIdentity, Config, TlsOptions};
pub use errors::{Error, Kind, Result};
pub use handle::{close, connect, connect_plain, connect_tls, Connection};
pub use pool::{command as pool_command, Pool, PoolStats};
pub use reply::{Attributes, Value};
pub use telemetry::{LoggingTelemetry, NoopTelemetry, Telemetry, TelemetryEvent};
pub use transport::Transport;
pub use worker::{GenericWorker, Worker};
