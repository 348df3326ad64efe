//! Single-connection convenience API: a thin wrapper around one [`Worker`]
//! for callers that don't need pooling.

use std::sync::Arc;

use crate::config::Config;
use crate::errors::Result;
use crate::reply::Attributes;
use crate::telemetry::{NoopTelemetry, Telemetry};
use crate::worker::Worker;

/// A single authenticated connection to a router.
pub struct Connection {
    worker: Worker,
}

impl Connection {
    /// Dial per `config`'s auto-TLS-from-port rule.
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::connect_with_telemetry(config, Arc::new(NoopTelemetry)).await
    }

    pub async fn connect_with_telemetry(config: &Config, telemetry: Arc<dyn Telemetry>) -> Result<Self> {
        let worker = Worker::open(config, telemetry).await?;
        Ok(Connection { worker })
    }

    /// Force plain TCP regardless of `config.port`/`config.tls`.
    pub async fn connect_plain(config: &Config) -> Result<Self> {
        let mut forced = config.clone();
        forced.tls = Some(false);
        Self::connect(&forced).await
    }

    /// Force TLS regardless of `config.port`/`config.tls`.
    pub async fn connect_tls(config: &Config) -> Result<Self> {
        let mut forced = config.clone();
        forced.tls = Some(true);
        Self::connect(&forced).await
    }

    /// Serialized per handle: this takes `&mut self`, so the type system
    /// rules out two concurrent `command` calls racing the same
    /// connection.
    pub async fn command(&mut self, words: &[&str]) -> Result<Vec<Attributes>> {
        self.worker.execute(words).await
    }

    pub async fn command_timeout(
        &mut self,
        words: &[&str],
        deadline: std::time::Duration,
    ) -> Result<Vec<Attributes>> {
        self.worker.execute_timeout(words, deadline).await
    }

    /// Raising form of `command`: same error kinds, different propagation
    /// mechanism.
    pub async fn command_panicking(&mut self, words: &[&str]) -> Vec<Attributes> {
        match self.command(words).await {
            Ok(rows) => rows,
            Err(err) => panic!("{err}"),
        }
    }

    /// Idempotent; closes the underlying worker.
    pub fn close(&mut self) {
        self.worker.close();
    }

    pub fn is_alive(&self) -> bool {
        self.worker.is_alive()
    }
}

/// Free-function convenience constructor mirroring `Connection::connect`.
pub async fn connect(config: &Config) -> Result<Connection> {
    Connection::connect(config).await
}

pub async fn connect_plain(config: &Config) -> Result<Connection> {
    Connection::connect_plain(config).await
}

pub async fn connect_tls(config: &Config) -> Result<Connection> {
    Connection::connect_tls(config).await
}

pub fn close(mut handle: Connection) {
    handle.close();
}
