use std::time::Duration;

/// Default plaintext port for the RouterOS API.
pub const DEFAULT_PLAIN_PORT: u16 = 8728;
/// Default TLS port for the RouterOS API.
pub const DEFAULT_TLS_PORT: u16 = 8729;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POOL_SIZE: usize = 5;

/// How the client should verify the server's TLS certificate.
#[derive(Debug, Clone)]
pub enum CertVerification {
    /// Validate against the configured root store (default system/webpki roots
    /// plus any `extra_roots`).
    Default,
    /// Skip certificate validation entirely. Dangerous: only for talking to a
    /// router with a self-signed cert you cannot add to a trust store, in an
    /// environment where MITM is not a concern.
    AcceptInvalidCerts,
}

impl Default for CertVerification {
    fn default() -> Self {
        CertVerification::Default
    }
}

/// A client identity certificate plus its private key, both PEM-encoded.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Opaque TLS options passed through to the transport layer unmodified.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub verification: CertVerification,
    /// Extra PEM-encoded root certificates to trust, in addition to the
    /// platform/webpki defaults.
    pub extra_roots_pem: Vec<Vec<u8>>,
    /// Override the SNI server name sent during the handshake; defaults to
    /// `host` when unset.
    pub server_name: Option<String>,
    pub client_identity: Option<ClientIdentity>,
}

/// User-supplied connection configuration.
///
/// `host`/`username`/`password` are required, everything else has a
/// default. The auto-TLS-from-port invariant is resolved by
/// [`Config::resolved_port_and_tls`], not at construction time, so that
/// setting `port` after `tls` (or vice versa) via the builder always yields
/// a consistent result.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub username: String,
    pub password: String,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub tls_options: Option<TlsOptions>,
    pub dial_timeout: Duration,
    pub pool_size: usize,
}

impl Config {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            port: None,
            tls: None,
            tls_options: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn tls_options(mut self, options: TlsOptions) -> Self {
        self.tls_options = Some(options);
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Resolve the effective `(port, tls)` pair:
    /// if `port == 8729` and `tls` was never set explicitly, TLS turns on;
    /// otherwise an explicit `tls` setting always wins, and an unset `tls`
    /// with any other port defaults to plaintext.
    pub fn resolved_port_and_tls(&self) -> (u16, bool) {
        match (self.port, self.tls) {
            (Some(port), Some(tls)) => (port, tls),
            (Some(port), None) => (port, port == DEFAULT_TLS_PORT),
            (None, Some(tls)) => {
                let port = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PLAIN_PORT };
                (port, tls)
            }
            (None, None) => (DEFAULT_PLAIN_PORT, false),
        }
    }

    pub fn addr(&self) -> String {
        let (port, _) = self.resolved_port_and_tls();
        format!("{}:{}", self.host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_plain_on_default_port() {
        let cfg = Config::new("router", "admin", "pw");
        assert_eq!(cfg.resolved_port_and_tls(), (DEFAULT_PLAIN_PORT, false));
    }

    #[test]
    fn explicit_tls_port_turns_tls_on() {
        let cfg = Config::new("router", "admin", "pw").port(DEFAULT_TLS_PORT);
        assert_eq!(cfg.resolved_port_and_tls(), (DEFAULT_TLS_PORT, true));
    }

    #[test]
    fn explicit_tls_false_wins_over_tls_port() {
        let cfg = Config::new("router", "admin", "pw")
            .port(DEFAULT_TLS_PORT)
            .tls(false);
        assert_eq!(cfg.resolved_port_and_tls(), (DEFAULT_TLS_PORT, false));
    }

    #[test]
    fn explicit_tls_true_picks_tls_port_when_unset() {
        let cfg = Config::new("router", "admin", "pw").tls(true);
        assert_eq!(cfg.resolved_port_and_tls(), (DEFAULT_TLS_PORT, true));
    }

    #[test]
    fn explicit_port_and_tls_both_respected() {
        let cfg = Config::new("router", "admin", "pw").port(1234).tls(true);
        assert_eq!(cfg.resolved_port_and_tls(), (1234, true));
    }
}
