//! The observability event contract.
//!
//! The core emits these events at fixed points; it never depends on whether
//! anything is listening. `NoopTelemetry` is the default sink; embedding
//! applications inject their own `Telemetry` impl to wire events into
//! whatever metrics/tracing backend they use.

use std::time::{Duration, SystemTime};

/// One emitted event, covering connection lifecycle, command execution,
/// and pool checkout/checkin.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    ConnectionStart {
        system_time: SystemTime,
        host: String,
        port: u16,
        tls: bool,
    },
    ConnectionStop {
        duration: Duration,
        host: String,
        port: u16,
    },
    ConnectionException {
        duration: Duration,
        host: String,
        port: u16,
        reason: String,
    },
    CommandStart {
        system_time: SystemTime,
        command: String,
    },
    CommandStop {
        duration: Duration,
        result_count: usize,
        command: String,
    },
    CommandException {
        duration: Duration,
        command: String,
        reason: String,
    },
    PoolCheckout {
        system_time: SystemTime,
        pool: String,
        command: Option<String>,
    },
    PoolCheckin {
        duration: Duration,
        pool: String,
        command: Option<String>,
    },
}

impl TelemetryEvent {
    /// Stable event name, e.g. `"connection.start"`.
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::ConnectionStart { .. } => "connection.start",
            TelemetryEvent::ConnectionStop { .. } => "connection.stop",
            TelemetryEvent::ConnectionException { .. } => "connection.exception",
            TelemetryEvent::CommandStart { .. } => "command.start",
            TelemetryEvent::CommandStop { .. } => "command.stop",
            TelemetryEvent::CommandException { .. } => "command.exception",
            TelemetryEvent::PoolCheckout { .. } => "pool.checkout",
            TelemetryEvent::PoolCheckin { .. } => "pool.checkin",
        }
    }
}

/// Injectable event sink. Object-safe so a pool/worker can hold a
/// `Arc<dyn Telemetry>` without generic parameters leaking through the
/// whole crate.
pub trait Telemetry: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Default sink: does nothing. Zero-cost enough that nobody pays for
/// telemetry they didn't ask for.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Reference sink that logs every event at `debug` level via the `log`
/// facade, demonstrating the injectable-sink design without hard-coding a
/// specific observability backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTelemetry;

impl Telemetry for LoggingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        log::debug!("{}: {:?}", event.name(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl Telemetry for Recorder {
        fn emit(&self, event: TelemetryEvent) {
            self.0.lock().unwrap().push(event.name());
        }
    }

    #[test]
    fn noop_swallows_everything() {
        let sink = NoopTelemetry;
        sink.emit(TelemetryEvent::CommandStart {
            system_time: SystemTime::now(),
            command: "/login".into(),
        });
    }

    #[test]
    fn event_names_match_the_contract_table() {
        let recorder = Recorder::default();
        recorder.emit(TelemetryEvent::ConnectionStart {
            system_time: SystemTime::now(),
            host: "router".into(),
            port: 8728,
            tls: false,
        });
        recorder.emit(TelemetryEvent::PoolCheckout {
            system_time: SystemTime::now(),
            pool: "default".into(),
            command: None,
        });
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["connection.start", "pool.checkout"]
        );
    }
}
