//! Transport abstraction: the codec and auth state machine only ever see a
//! `AsyncRead + AsyncWrite` stream; this module is where that stream is
//! either a plain `TcpStream` or a `tokio-rustls` TLS stream over one.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::config::{CertVerification, Config, TlsOptions};
use crate::errors::{Error, Result};

/// Either a plain TCP socket or a TLS stream wrapping one. The worker only
/// depends on this enum implementing `AsyncRead + AsyncWrite`; it never
/// matches on the variant itself once connected.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    /// Dial `config`'s resolved address and, if TLS is selected, perform the
    /// handshake immediately (no STARTTLS upgrade; TLS is end-to-end from
    /// the first byte).
    pub async fn connect(config: &Config) -> Result<Self> {
        let (_, tls) = config.resolved_port_and_tls();
        if tls {
            Self::connect_tls(config).await
        } else {
            Self::connect_plain(config).await
        }
    }

    pub async fn connect_plain(config: &Config) -> Result<Self> {
        let stream = TcpStream::connect(config.addr())
            .await
            .map_err(|e| Error::connection_failed(format!("dial {}: {e}", config.addr())))?;
        Ok(Transport::Plain(stream))
    }

    pub async fn connect_tls(config: &Config) -> Result<Self> {
        let stream = TcpStream::connect(config.addr())
            .await
            .map_err(|e| Error::connection_failed(format!("dial {}: {e}", config.addr())))?;

        let tls_options = config.tls_options.clone().unwrap_or_default();
        let connector = build_connector(&tls_options)?;
        let server_name = tls_options.server_name.clone().unwrap_or_else(|| config.host.clone());
        let dns_name = rustls::ServerName::try_from(server_name.as_str())
            .map_err(|e| Error::connection_failed(format!("invalid TLS server name: {e}")))?;

        let tls_stream = connector
            .connect(dns_name, stream)
            .await
            .map_err(|e| Error::connection_failed(format!("TLS handshake failed: {e}")))?;
        Ok(Transport::Tls(Box::new(tls_stream)))
    }
}

fn build_connector(options: &TlsOptions) -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots_iter());

    for pem in &options.extra_roots_pem {
        let mut cursor = std::io::Cursor::new(pem.clone());
        let certs = rustls_pemfile::certs(&mut cursor)
            .map_err(|e| Error::connection_failed(format!("bad extra root cert: {e}")))?;
        for der in certs {
            roots
                .add(&rustls::Certificate(der))
                .map_err(|e| Error::connection_failed(format!("bad extra root cert: {e}")))?;
        }
    }

    let builder = rustls::ClientConfig::builder().with_safe_defaults();

    let mut client_config = match options.verification {
        CertVerification::Default => {
            let builder = builder.with_root_certificates(roots);
            match &options.client_identity {
                Some(identity) => {
                    let (certs, key) = load_identity(identity)?;
                    builder
                        .with_client_auth_cert(certs, key)
                        .map_err(|e| Error::connection_failed(format!("bad client identity: {e}")))?
                }
                None => builder.with_no_client_auth(),
            }
        }
        CertVerification::AcceptInvalidCerts => {
            let builder = builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth();
            builder
        }
    };
    client_config.enable_sni = true;

    Ok(TlsConnector::from(Arc::new(client_config)))
}

fn load_identity(
    identity: &crate::config::ClientIdentity,
) -> Result<(Vec<rustls::Certificate>, rustls::PrivateKey)> {
    let mut cert_cursor = std::io::Cursor::new(identity.cert_pem.clone());
    let certs = rustls_pemfile::certs(&mut cert_cursor)
        .map_err(|e| Error::connection_failed(format!("bad client cert: {e}")))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();

    let mut key_cursor = std::io::Cursor::new(identity.key_pem.clone());
    let keys = rustls_pemfile::pkcs8_private_keys(&mut key_cursor)
        .map_err(|e| Error::connection_failed(format!("bad client key: {e}")))?;
    let key = keys
        .into_iter()
        .next()
        .map(rustls::PrivateKey)
        .ok_or_else(|| Error::connection_failed("no private key found in client identity"))?;

    Ok((certs, key))
}

fn webpki_roots_iter() -> impl Iterator<Item = rustls::OwnedTrustAnchor> {
    webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    })
}

/// Verifier for `CertVerification::AcceptInvalidCerts`. Opt-in only, never
/// the default.
struct AcceptAnyServerCert;

impl rustls::client::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
