// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Async TLS client over a tokio `TcpStream`, driven by hand with rustls.
//!
//! The server certificate is not validated at the transport layer: the
//! IPA probe only wants to look at it and decides on its own.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Accepts any server certificate but still checks handshake signatures,
/// so the peer must hold the key of the certificate it presents.
#[derive(Debug)]
pub struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyCertificate {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Crypto provider used for every TLS operation in the crate.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client configuration that accepts any server certificate.
pub fn accept_any_config() -> Result<Arc<ClientConfig>> {
    let provider = provider();
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new(provider)))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// A TLS session with a server.
pub struct TlsClient {
    stream: TcpStream,
    conn: ClientConnection,
    peer: SocketAddr,
    io_timeout: Duration,
    eof: bool,
}

impl TlsClient {
    /// Connect to `addr` and complete the handshake, using `server_name`
    /// for SNI.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        config: Arc<ClientConfig>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name '{}': {}", server_name, e)))?;
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::TimedOut(format!("connecting to {}", addr)))??;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream,
            conn: ClientConnection::new(config, name)?,
            peer: addr,
            io_timeout,
            eof: false,
        };
        client.handshake().await?;
        debug!(
            "[IPA] TLS established with {} ({:?})",
            addr,
            client.conn.protocol_version()
        );
        Ok(client)
    }

    /// Certificate chain presented by the server, leaf first.
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.conn.peer_certificates()
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.conn.writer().write_all(data)?;
        self.flush_tls().await
    }

    /// Read application data until the server closes, or `limit` bytes.
    pub async fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            if self.drain_plaintext(&mut out, limit)? || out.len() >= limit || self.eof {
                out.truncate(limit);
                return Ok(out);
            }
            self.read_tls().await?;
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        while self.conn.is_handshaking() {
            self.flush_tls().await?;
            if self.conn.is_handshaking() && self.conn.wants_read() {
                self.read_tls().await?;
                if self.eof {
                    return Err(Error::Tls(format!(
                        "{} closed the connection during the handshake",
                        self.peer
                    )));
                }
            }
        }
        self.flush_tls().await
    }

    async fn flush_tls(&mut self) -> Result<()> {
        while self.conn.wants_write() {
            let mut buf = Vec::new();
            self.conn.write_tls(&mut buf)?;
            timeout(self.io_timeout, self.stream.write_all(&buf))
                .await
                .map_err(|_| Error::TimedOut(format!("writing to {}", self.peer)))??;
        }
        Ok(())
    }

    /// Read one chunk of TLS records from the socket and process them.
    async fn read_tls(&mut self) -> Result<()> {
        let mut buf = [0u8; 8192];
        let n = timeout(self.io_timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| Error::TimedOut(format!("reading from {}", self.peer)))??;
        if n == 0 {
            trace!("[IPA] {} closed the TCP stream", self.peer);
            self.eof = true;
            return Ok(());
        }

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            if self.conn.read_tls(&mut pending)? == 0 {
                break;
            }
            self.conn.process_new_packets()?;
        }
        // Alerts generated while processing must reach the peer.
        self.flush_tls().await
    }

    /// Move decrypted bytes into `out`. Returns true once the server sent
    /// close_notify.
    fn drain_plaintext(&mut self, out: &mut Vec<u8>, limit: usize) -> Result<bool> {
        let mut chunk = [0u8; 4096];
        while out.len() < limit {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                // Peer closed TCP without close_notify; HTTP/1.0 servers do this.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(true),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Blocking rustls server used by probe tests.

    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::ServerConfig;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;

    pub struct Pki {
        pub ca_pem: String,
        pub ca_der: Vec<u8>,
        pub leaf_der: Vec<u8>,
        pub leaf_key: Vec<u8>,
    }

    /// A CA and a leaf for `host` signed by it.
    pub fn pki(host: &str) -> Pki {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "Test IPA CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_key = KeyPair::generate().expect("ca key");
        let ca = ca_params.self_signed(&ca_key).expect("ca cert");

        let mut leaf_params = CertificateParams::new(vec![host.to_string()]).expect("leaf params");
        leaf_params.distinguished_name.push(DnType::CommonName, host);
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf_key = KeyPair::generate().expect("leaf key");
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).expect("leaf cert");

        Pki {
            ca_pem: ca.pem(),
            ca_der: ca.der().to_vec(),
            leaf_der: leaf.der().to_vec(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    /// Serve one HTTPS connection on a background thread, answering any
    /// request with `response`. Returns the bound port.
    pub fn serve_once(pki: &Pki, response: Vec<u8>) -> u16 {
        let config = ServerConfig::builder_with_provider(super::provider())
            .with_safe_default_protocol_versions()
            .expect("versions")
            .with_no_client_auth()
            .with_single_cert(
                vec![pki.leaf_der.clone().into()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pki.leaf_key.clone())),
            )
            .expect("server config");
        let config = Arc::new(config);

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        std::thread::spawn(move || {
            let (tcp, _) = listener.accept().expect("accept");
            let conn = rustls::ServerConnection::new(config).expect("server conn");
            let mut tls = rustls::StreamOwned::new(conn, tcp);

            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            while !request.ends_with(b"\r\n\r\n") {
                if tls.read(&mut byte).unwrap_or(0) == 0 {
                    return;
                }
                request.push(byte[0]);
            }
            let _ = tls.write_all(&response);
            tls.conn.send_close_notify();
            let _ = tls.flush();
        });
        port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_and_exchange() {
        let pki = test_server::pki("localhost");
        let body = b"HTTP/1.0 200 OK\r\n\r\nhello".to_vec();
        let port = test_server::serve_once(&pki, body.clone());

        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let mut client = TlsClient::connect(
            addr,
            "localhost",
            accept_any_config().expect("config"),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .expect("connect");

        let chain = client.peer_certificates().expect("peer certs");
        assert_eq!(chain[0].as_ref(), pki.leaf_der.as_slice());

        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.expect("write");
        assert_eq!(client.read_to_end(1024).await.expect("read"), body);
    }

    #[tokio::test]
    async fn test_read_limit() {
        let pki = test_server::pki("localhost");
        let port = test_server::serve_once(&pki, vec![b'x'; 10_000]);

        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let mut client = TlsClient::connect(
            addr,
            "localhost",
            accept_any_config().expect("config"),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .expect("connect");
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.expect("write");
        assert_eq!(client.read_to_end(100).await.expect("read").len(), 100);
    }
}
