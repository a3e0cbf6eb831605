//! TCP(+TLS) transport layer.
//!
//! A tunnel turns a socket into a running session: accepting (server) or
//! dialing (client) yields a [`SessionChannel`] whose read/write pump tasks
//! are already moving frames. The pumps are the only tasks that touch the
//! socket; everything else talks to the session through its channels.

use crate::channel::{session_pair, SessionChannel, TransportSide};
use crate::codec;
use crate::config::TunnelConfig;
use crate::encoder::EncoderChain;
use crate::error::{Result, TunError};
use crate::packet::Packet;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Install a process-wide rustls crypto provider. Safe to call repeatedly;
/// only the first call wins.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Listening side of the transport.
pub struct TcpServerTunnel {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    chain: Arc<EncoderChain>,
}

impl TcpServerTunnel {
    /// Bind the listener, loading the TLS identity when enabled.
    pub async fn bind(config: &TunnelConfig, chain: EncoderChain) -> Result<Self> {
        let tls = if config.tls {
            ensure_crypto_provider();
            // validate() guarantees both paths are present when tls is set.
            let cert = config
                .cert
                .as_deref()
                .ok_or_else(|| TunError::ConfigMissing("tunnel.cert".into()))?;
            let key = config
                .key
                .as_deref()
                .ok_or_else(|| TunError::ConfigMissing("tunnel.key".into()))?;
            Some(TlsAcceptor::from(Arc::new(server_tls_config(cert, key)?)))
        } else {
            None
        };

        let listener = TcpListener::bind(&config.addr).await?;
        log::info!("listening on {}", config.addr);
        Ok(Self {
            listener,
            tls,
            chain: Arc::new(chain),
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next client and return its running session.
    ///
    /// Per-connection setup failures (socket options, TLS handshake) only
    /// cost that one connection and the wait continues; an error from the
    /// listener itself is returned and is fatal to the accept loop.
    pub async fn accept(&self) -> Result<SessionChannel> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(err) = stream.set_nodelay(true) {
                log::warn!("dropping connection from {peer}: {err}");
                continue;
            }
            log::info!("accepted connection from {peer}");

            match &self.tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => return Ok(spawn_pumps(stream, self.chain.clone())),
                    Err(err) => {
                        log::warn!("TLS handshake with {peer} failed: {err}");
                        continue;
                    }
                },
                None => return Ok(spawn_pumps(stream, self.chain.clone())),
            }
        }
    }
}

/// Dialing side of the transport. `connect` establishes the socket (and TLS
/// session when enabled); `start` attaches the pumps and hands back the
/// session.
pub struct TcpClientTunnel {
    stream: ClientStream,
    chain: Arc<EncoderChain>,
}

enum ClientStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl TcpClientTunnel {
    /// Dial the server.
    pub async fn connect(config: &TunnelConfig, chain: EncoderChain) -> Result<Self> {
        log::info!("connecting to {}", config.addr);
        let stream = TcpStream::connect(&config.addr).await?;
        stream.set_nodelay(true)?;

        let stream = if config.tls {
            ensure_crypto_provider();
            let connector = TlsConnector::from(Arc::new(client_tls_config(config)?));
            let server_name = ServerName::try_from(config.host().to_string()).map_err(|e| {
                TunError::config_invalid("tunnel.addr", format!("invalid TLS server name: {e}"))
            })?;
            ClientStream::Tls(Box::new(connector.connect(server_name, stream).await?))
        } else {
            ClientStream::Plain(stream)
        };

        Ok(Self {
            stream,
            chain: Arc::new(chain),
        })
    }

    /// Spawn the pump tasks on the established connection.
    pub fn start(self) -> SessionChannel {
        match self.stream {
            ClientStream::Plain(stream) => spawn_pumps(stream, self.chain),
            ClientStream::Tls(stream) => spawn_pumps(*stream, self.chain),
        }
    }
}

/// Split the stream and launch one read and one write pump, returning the
/// session side of the channel trio.
fn spawn_pumps<S>(stream: S, chain: Arc<EncoderChain>) -> SessionChannel
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (session, transport) = session_pair();
    let TransportSide {
        inbound,
        outbound,
        termination,
    } = transport;

    let (read_half, write_half) = tokio::io::split(stream);
    tokio::spawn(read_pump(
        read_half,
        inbound,
        termination.clone(),
        chain.clone(),
    ));
    tokio::spawn(write_pump(write_half, outbound, termination, chain));
    session
}

/// Read frames off the socket and push them inbound until the socket fails
/// or the session side hangs up.
async fn read_pump<R>(
    mut reader: R,
    inbound: mpsc::Sender<Packet>,
    termination: mpsc::Sender<TunError>,
    chain: Arc<EncoderChain>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match codec::read_packet(&mut reader, &chain).await {
            Ok(packet) => {
                if inbound.send(packet).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                let _ = termination.try_send(err);
                break;
            }
        }
    }
}

/// Drain outbound packets onto the socket; a closed channel is normal
/// session teardown, a write failure is reported.
async fn write_pump<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Packet>,
    termination: mpsc::Sender<TunError>,
    chain: Arc<EncoderChain>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = outbound.recv().await {
        if let Err(err) = codec::write_packet(&mut writer, &chain, &packet).await {
            let _ = termination.try_send(err);
            break;
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(TunError::config_invalid(
            "tunnel.cert",
            format!("no certificates found in {}", path.display()),
        ));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        TunError::config_invalid(
            "tunnel.key",
            format!("no private key found in {}", path.display()),
        )
    })
}

fn server_tls_config(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(load_certs(cert)?, load_key(key)?)?;
    Ok(config)
}

fn client_tls_config(config: &TunnelConfig) -> Result<rustls::ClientConfig> {
    if config.verify {
        let cert = config
            .cert
            .as_deref()
            .ok_or_else(|| TunError::ConfigMissing("tunnel.cert".into()))?;
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(cert)? {
            roots.add(cert)?;
        }
        Ok(rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    } else {
        log::warn!("TLS certificate verification is disabled; enable `tunnel.verify` to pin a certificate");
        Ok(rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth())
    }
}

/// Verifier that accepts whatever certificate the server presents.
///
/// Signatures are still checked against the presented certificate, so this
/// protects against passive tampering but not impersonation.
#[derive(Debug)]
struct AcceptAnyServerCert {
    crypto: Arc<rustls::crypto::CryptoProvider>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            crypto: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.crypto
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;
    use tokio::io::AsyncWriteExt;

    fn plain_tunnel_config(addr: &str) -> TunnelConfig {
        TunnelConfig {
            name: "tcp".into(),
            addr: addr.into(),
            tls: false,
            verify: false,
            cert: None,
            key: None,
        }
    }

    #[tokio::test]
    async fn test_pumps_carry_packets_both_ways() {
        let server = TcpServerTunnel::bind(&plain_tunnel_config("127.0.0.1:0"), EncoderChain::empty())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let client_config = plain_tunnel_config(&addr.to_string());
        let (server_session, client_session) = tokio::join!(server.accept(), async {
            let tunnel = TcpClientTunnel::connect(&client_config, EncoderChain::empty())
                .await
                .unwrap();
            tunnel.start()
        });
        let mut server_session = server_session.unwrap();
        let mut client_session = client_session;

        client_session
            .send(Packet::p2p(b"hello".to_vec()))
            .await
            .unwrap();
        let received = server_session.recv().await.unwrap();
        assert_eq!(received.kind, PacketKind::P2p);
        assert_eq!(received.data, b"hello");

        server_session
            .send(Packet::p2p(b"world".to_vec()))
            .await
            .unwrap();
        let received = client_session.recv().await.unwrap();
        assert_eq!(received.data, b"world");
    }

    #[tokio::test]
    async fn test_malformed_frame_surfaces_on_termination() {
        let server = TcpServerTunnel::bind(&plain_tunnel_config("127.0.0.1:0"), EncoderChain::empty())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (session, _raw) = tokio::join!(server.accept(), async {
            let mut raw = TcpStream::connect(addr).await.unwrap();
            // Claims 100 payload bytes, delivers 3, then closes.
            raw.write_all(&[1u8, 0, 100, 0xde, 0xad, 0xbe]).await.unwrap();
            raw.shutdown().await.unwrap();
        });
        let mut session = session.unwrap();

        let err = session.recv().await.unwrap_err();
        assert!(matches!(err, TunError::Transport(_)));
    }

    #[tokio::test]
    async fn test_peer_disconnect_ends_session() {
        let server = TcpServerTunnel::bind(&plain_tunnel_config("127.0.0.1:0"), EncoderChain::empty())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (session, _) = tokio::join!(server.accept(), async {
            let stream = TcpStream::connect(addr).await.unwrap();
            drop(stream);
        });
        let mut session = session.unwrap();
        assert!(session.recv().await.is_err());
    }
}
