//! The connection worker: owns exactly one transport, is the sole writer
//! and reader on it, and serializes commands onto it.
//!
//! Serialization is structural, not a lock: `execute` takes `&mut self`, so
//! the borrow checker makes "at most one in-flight execute" a compile-time
//! fact rather than a runtime invariant to maintain.
//!
//! The worker is generic over its stream type, the same way a generic
//! `Client<S, T>` is: tests drive it over an in-memory `tokio::io::duplex`
//! pair, while real use goes through [`Transport`], which is plain TCP or
//! TLS.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::codec::{read_block, write_sentence};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::reply::{parse_block, Attributes};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    // Never constructed directly: a `GenericWorker` only exists once
    // `open`/`from_authenticated_stream` has produced an authenticated
    // stream. Kept to document the full state space.
    #[allow(dead_code)]
    Disconnected,
    Authenticated,
    Dead,
}

/// One authenticated connection over stream type `S`. Not `Clone`;
/// ownership is how the pool enforces single-ownership-per-worker.
pub struct GenericWorker<S> {
    stream: Option<S>,
    state: State,
    host: String,
    port: u16,
    telemetry: Arc<dyn Telemetry>,
    opened_at: Instant,
}

/// The worker type real callers use: streams backed by plain TCP or TLS.
pub type Worker = GenericWorker<Transport>;

impl Worker {
    /// Establish the transport, run authentication, and transition to
    /// `Authenticated`. Any failure closes the transport (by dropping it)
    /// and returns `connection_failed`/`auth_failed`/`timeout` — never
    /// leaves a half-open worker behind.
    pub async fn open(config: &Config, telemetry: Arc<dyn Telemetry>) -> Result<Self> {
        let (port, tls) = config.resolved_port_and_tls();
        let start = Instant::now();
        telemetry.emit(TelemetryEvent::ConnectionStart {
            system_time: SystemTime::now(),
            host: config.host.clone(),
            port,
            tls,
        });

        let dial_and_login = async {
            let mut transport = Transport::connect(config).await?;
            crate::auth::login(&mut transport, &config.username, &config.password).await?;
            Ok::<Transport, Error>(transport)
        };

        let result = timeout(config.dial_timeout, dial_and_login).await;

        match result {
            Ok(Ok(stream)) => Ok(GenericWorker {
                stream: Some(stream),
                state: State::Authenticated,
                host: config.host.clone(),
                port,
                telemetry,
                opened_at: start,
            }),
            Ok(Err(err)) => {
                telemetry.emit(TelemetryEvent::ConnectionException {
                    duration: start.elapsed(),
                    host: config.host.clone(),
                    port,
                    reason: err.to_string(),
                });
                Err(err)
            }
            Err(_) => {
                let err = Error::timeout(format!(
                    "dial/login to {} timed out after {:?}",
                    config.addr(),
                    config.dial_timeout
                ));
                telemetry.emit(TelemetryEvent::ConnectionException {
                    duration: start.elapsed(),
                    host: config.host.clone(),
                    port,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

impl<S> GenericWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Build a worker around an already-authenticated stream. Used by the
    /// real `Worker::open` indirectly (via the stream-generic impls below)
    /// and directly by tests that drive authentication over an in-memory
    /// duplex pair.
    pub fn from_authenticated_stream(
        stream: S,
        host: impl Into<String>,
        port: u16,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        GenericWorker {
            stream: Some(stream),
            state: State::Authenticated,
            host: host.into(),
            port,
            telemetry,
            opened_at: Instant::now(),
        }
    }

    /// Write the request sentence, read the reply block, parse it.
    pub async fn execute(&mut self, words: &[&str]) -> Result<Vec<Attributes>> {
        self.execute_with_deadline(words, None).await
    }

    /// Like `execute`, but kills the worker if `deadline` elapses rather
    /// than returning it to service with unknown wire state: on timeout the
    /// worker is discarded, never reused.
    pub async fn execute_timeout(
        &mut self,
        words: &[&str],
        deadline: Duration,
    ) -> Result<Vec<Attributes>> {
        self.execute_with_deadline(words, Some(deadline)).await
    }

    async fn execute_with_deadline(
        &mut self,
        words: &[&str],
        deadline: Option<Duration>,
    ) -> Result<Vec<Attributes>> {
        if self.state != State::Authenticated {
            return Err(Error::closed("worker is not in an authenticated state"));
        }
        let command_name = words.first().copied().unwrap_or("").to_string();
        let start = Instant::now();
        self.telemetry.emit(TelemetryEvent::CommandStart {
            system_time: SystemTime::now(),
            command: command_name.clone(),
        });

        let outcome = match deadline {
            Some(d) => match timeout(d, Self::run_command(&mut self.stream, words)).await {
                Ok(result) => result,
                Err(_) => {
                    self.state = State::Dead;
                    Err(Error::timeout(format!(
                        "command {command_name} timed out after {d:?}"
                    )))
                }
            },
            None => Self::run_command(&mut self.stream, words).await,
        };

        match &outcome {
            Ok(rows) => {
                self.telemetry.emit(TelemetryEvent::CommandStop {
                    duration: start.elapsed(),
                    result_count: rows.len(),
                    command: command_name,
                });
            }
            Err(err) => {
                self.telemetry.emit(TelemetryEvent::CommandException {
                    duration: start.elapsed(),
                    command: command_name,
                    reason: err.to_string(),
                });
                // Every error other than `trap` kills the worker: `fatal`
                // specifically is the RouterOS contract that the connection
                // is unusable, and any transport-level error leaves wire
                // state undefined.
                if err.is_fatal_to_worker() {
                    self.state = State::Dead;
                }
            }
        }
        outcome
    }

    async fn run_command(stream: &mut Option<S>, words: &[&str]) -> Result<Vec<Attributes>> {
        let stream = stream
            .as_mut()
            .ok_or_else(|| Error::closed("worker has no transport"))?;
        let word_bytes: Vec<&[u8]> = words.iter().map(|w| w.as_bytes()).collect();
        write_sentence(stream, &word_bytes).await?;
        let block = read_block(stream).await?;
        parse_block(&block)
    }

    /// True when the worker can still accept `execute` calls.
    pub fn is_alive(&self) -> bool {
        self.state == State::Authenticated
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Idempotent; closes the transport and transitions to dead. Safe to
    /// call even if a command is logically in flight from the caller's
    /// point of view — the pending call's own read/write will observe
    /// `closed` once the stream drops. Emits `connection.stop` exactly
    /// once, on the transition out of a live state.
    pub fn close(&mut self) {
        if self.state == State::Dead {
            return;
        }
        self.telemetry.emit(TelemetryEvent::ConnectionStop {
            duration: self.opened_at.elapsed(),
            host: self.host.clone(),
            port: self.port,
        });
        self.state = State::Dead;
        self.stream = None;
    }
}

impl<S> Drop for GenericWorker<S> {
    fn drop(&mut self) {
        // A worker killed mid-`execute` (fatal/timeout) sets `state` to
        // `Dead` directly without going through `close`; catch that case
        // here so `connection.stop` still fires exactly once per worker.
        if self.state != State::Dead {
            self.telemetry.emit(TelemetryEvent::ConnectionStop {
                duration: self.opened_at.elapsed(),
                host: self.host.clone(),
                port: self.port,
            });
        }
        self.state = State::Dead;
        self.stream = None;
    }
}
