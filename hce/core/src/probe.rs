use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt as _};
use log::{debug, warn};
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use x509_parser::parse_x509_certificate;

use crate::outcome::ProbeOutcome;

/// Port of HTTPS
pub const DEFAULT_PORT: u16 = 443;

/// Anything that can tell how many days are left on the certificate of a domain name
///
/// Implementations never fail: every error is folded into [`ProbeOutcome::Failed`].
pub trait Probe: Send + Sync {
    /// Check one domain name
    fn probe<'a>(&'a self, domain_name: &'a str) -> BoxFuture<'a, ProbeOutcome>;
}

/// Error occurred when checking one domain name
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Domain name cannot be used as TLS server name
    #[error("invalid DNS name: {0:?}")]
    InvalidDnsName(String),
    /// DNS lookup, TCP connection or TLS handshake failed
    #[error("{0}")]
    Io(#[from] io::Error),
    /// Peer did not present any certificate
    #[error("no peer certificate found")]
    NoPeerCertificate,
    /// Leaf certificate cannot be parsed
    #[error("failed to parse certificate: {0}")]
    Certificate(String),
    /// Expiration date is out of range
    #[error("invalid expiration timestamp: {0}")]
    Timestamp(i64),
    /// Check did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Remaining whole days from `now` to `not_after`, truncated toward zero
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use hce::days_until;
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// assert_eq!(30, days_until(now + Duration::days(30), now));
/// ```
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_days()
}

/// Probe which reads the leaf certificate from a TLS handshake
pub struct TlsProbe {
    config: Arc<ClientConfig>,
    /// Port to connect to
    pub port: u16,
    /// Give up after this long, wait for the transport otherwise
    pub timeout: Option<Duration>,
}

impl fmt::Debug for TlsProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsProbe")
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for TlsProbe {
    fn default() -> TlsProbe {
        let mut root_store = RootCertStore::empty();
        root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        TlsProbe::new(Arc::new(config))
    }
}

impl TlsProbe {
    /// Create a probe with custom TLS client configuration e.g. private trust roots
    pub fn new(config: Arc<ClientConfig>) -> Self {
        TlsProbe {
            config,
            port: DEFAULT_PORT,
            timeout: None,
        }
    }

    async fn check<'a>(&'a self, domain_name: &'a str) -> Result<i64, ProbeError> {
        let (days, tls) = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.handshake(domain_name))
                .await
                .map_err(|_elapsed| ProbeError::Timeout(timeout))??,
            None => self.handshake(domain_name).await?,
        };
        // days are known at this point, closing cannot fail the check
        self.close(domain_name, tls).await;
        Ok(days)
    }

    async fn handshake(
        &self,
        domain_name: &str,
    ) -> Result<(i64, TlsStream<TcpStream>), ProbeError> {
        let server_name = ServerName::try_from(domain_name)
            .map_err(|_e| ProbeError::InvalidDnsName(domain_name.to_string()))?;

        let stream = TcpStream::connect((domain_name, self.port)).await?;
        let connector = TlsConnector::from(self.config.clone());
        let tls = connector.connect(server_name, stream).await?;

        let days = {
            let (_, conn) = tls.get_ref();
            let certificate = conn
                .peer_certificates()
                .and_then(|cs| cs.first())
                .ok_or(ProbeError::NoPeerCertificate)?;

            let (_, cert) = parse_x509_certificate(certificate.as_ref())
                .map_err(|e| ProbeError::Certificate(e.to_string()))?;
            let timestamp = cert.validity().not_after.timestamp();
            let not_after = Utc
                .timestamp_opt(timestamp, 0)
                .single()
                .ok_or(ProbeError::Timestamp(timestamp))?;
            days_until(not_after, Utc::now())
        };
        Ok((days, tls))
    }

    async fn close<S>(&self, domain_name: &str, mut stream: S)
    where
        S: AsyncWrite + Unpin,
    {
        let closed = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, stream.shutdown())
                .await
                .unwrap_or_else(|_elapsed| Err(io::ErrorKind::TimedOut.into())),
            None => stream.shutdown().await,
        };
        if let Err(e) = closed {
            debug!("failed to close connection to {domain_name}: {e}");
        }
    }
}

impl Probe for TlsProbe {
    fn probe<'a>(&'a self, domain_name: &'a str) -> BoxFuture<'a, ProbeOutcome> {
        async move {
            match self.check(domain_name).await {
                Ok(days) => ProbeOutcome::Days(days),
                Err(e) => {
                    warn!("failed to check {domain_name}: {e}");
                    ProbeOutcome::failed(e)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use chrono::Duration as ChronoDuration;
    use rcgen::{
        BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DnType, IsCa,
    };
    use rustls::{Certificate, PrivateKey, ServerConfig};
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    use super::*;

    struct Authority {
        ca_der: Vec<u8>,
        leaf_der: Vec<u8>,
        key_der: Vec<u8>,
    }

    fn build_authority(valid_for: time::Duration) -> Authority {
        let mut params = CertificateParams::new(Vec::<String>::new());
        params
            .distinguished_name
            .push(DnType::CommonName, "hce test authority");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = RcgenCertificate::from_params(params).unwrap();

        let now = time::OffsetDateTime::now_utc();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]);
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + valid_for;
        let leaf = RcgenCertificate::from_params(params).unwrap();

        Authority {
            ca_der: ca.serialize_der().unwrap(),
            leaf_der: leaf.serialize_der_with_signer(&ca).unwrap(),
            key_der: leaf.serialize_private_key_der(),
        }
    }

    async fn serve_tls(authority: &Authority) -> SocketAddr {
        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                vec![Certificate(authority.leaf_der.clone())],
                PrivateKey(authority.key_der.clone()),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(mut tls) = acceptor.accept(stream).await {
                        tls.shutdown().await.ok();
                    }
                });
            }
        });
        addr
    }

    fn build_probe(authority: &Authority, port: u16) -> TlsProbe {
        let mut root_store = RootCertStore::empty();
        root_store
            .add(&Certificate(authority.ca_der.clone()))
            .unwrap();
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let mut probe = TlsProbe::new(Arc::new(config));
        probe.port = port;
        probe
    }

    #[test]
    fn t_days_until() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(30, days_until(now + ChronoDuration::days(30), now));
        assert_eq!(
            29,
            days_until(now + ChronoDuration::days(30) - ChronoDuration::seconds(1), now)
        );
        assert_eq!(0, days_until(now + ChronoDuration::hours(23), now));
        assert_eq!(-1, days_until(now - ChronoDuration::hours(36), now));
    }

    #[tokio::test]
    async fn t_good_certificate() {
        let authority = build_authority(time::Duration::days(30) + time::Duration::hours(1));
        let addr = serve_tls(&authority).await;

        let probe = build_probe(&authority, addr.port());
        let outcome = probe.probe("localhost").await;
        assert_eq!(ProbeOutcome::Days(30), outcome);
        assert_eq!("30", outcome.to_string());
    }

    #[tokio::test]
    async fn t_good_certificate_with_timeout() {
        let authority = build_authority(time::Duration::days(30) + time::Duration::hours(1));
        let addr = serve_tls(&authority).await;

        let mut probe = build_probe(&authority, addr.port());
        probe.timeout = Some(Duration::from_secs(5));
        assert_eq!(ProbeOutcome::Days(30), probe.probe("localhost").await);
    }

    // accepts writes but never finishes closing
    struct StalledWriter;

    impl AsyncWrite for StalledWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn t_stalled_close() {
        let mut probe = TlsProbe::default();
        probe.timeout = Some(Duration::from_millis(100));
        let closed =
            tokio::time::timeout(Duration::from_secs(5), probe.close("localhost", StalledWriter))
                .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn t_untrusted_certificate() {
        let authority = build_authority(time::Duration::days(30));
        let addr = serve_tls(&authority).await;

        let mut probe = TlsProbe::default();
        probe.port = addr.port();
        let outcome = probe.probe("localhost").await;
        assert!(outcome.days().is_none());
    }

    #[tokio::test]
    async fn t_connection_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut probe = TlsProbe::default();
        probe.port = port;
        let outcome = probe.probe("localhost").await;
        assert!(matches!(outcome, ProbeOutcome::Failed(..)));

        let text = outcome.to_string();
        assert!(text.parse::<i64>().is_err());
        assert!(!text.starts_with("timed out"), "{text}");
        assert!(text.to_lowercase().contains("refused"), "{text}");
    }

    #[tokio::test]
    async fn t_check_one_invalid() {
        let probe = TlsProbe::default();
        let outcome = probe.probe("").await;
        assert_eq!(ProbeOutcome::failed(r#"invalid DNS name: """#), outcome);
    }

    #[tokio::test]
    async fn t_timeout() {
        // accepts TCP but never answers the handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut probe = TlsProbe::default();
        probe.port = port;
        probe.timeout = Some(Duration::from_millis(200));
        let outcome = probe.probe("localhost").await;
        assert_eq!(ProbeOutcome::failed("timed out after 200ms"), outcome);
    }
}
