//! Byte transports for the client.
//!
//! A transport is shared between the receive thread and every sender, so
//! all methods take `&self`. `send` writes the whole buffer or fails.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};

use crate::config::{ClientConfig, TlsConfig};
use crate::error::{ClientError, Result};

/// A bidirectional byte channel to the broker.
pub trait Transport: Send + Sync {
    /// Open the connection. May be called again after `close`.
    fn connect(&self) -> Result<()>;

    /// Write all of `buf`.
    fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Block until data arrives. 0 means the peer closed the connection.
    fn receive(&self, buf: &mut [u8]) -> Result<usize>;

    /// Like `receive` but gives up after `timeout`, returning 0.
    fn receive_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection, unblocking a pending `receive`.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn connect(&self) -> Result<()> {
        (**self).connect()
    }

    fn send(&self, buf: &[u8]) -> Result<usize> {
        (**self).send(buf)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).receive(buf)
    }

    fn receive_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive_timeout(buf, timeout)
    }

    fn close(&self) {
        (**self).close()
    }
}

fn communication(e: io::Error) -> ClientError {
    ClientError::Communication(e.to_string())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port).to_socket_addrs().map_err(communication)?;
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(communication)?;
                // Writes give up after the connect timeout
                stream.set_write_timeout(Some(timeout)).map_err(communication)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => communication(e),
        None => ClientError::Communication(format!("{} did not resolve", host)),
    })
}

/// Plain TCP transport. Reads go through a cloned handle so a blocked
/// reader never holds up a writer.
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.connect_timeout_duration())
    }

    fn read_with(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let mut guard = self.reader.lock();
        let Some(stream) = guard.as_mut() else {
            return Ok(0);
        };
        stream.set_read_timeout(timeout).map_err(communication)?;
        loop {
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if timeout.is_some() && is_timeout(&e) => return Ok(0),
                Err(e) => return Err(communication(e)),
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> Result<()> {
        let stream = open_tcp(&self.host, self.port, self.connect_timeout)?;
        let reader = stream.try_clone().map_err(communication)?;
        debug!("TCP connection to {}:{} open", self.host, self.port);
        *self.reader.lock() = Some(reader);
        *self.writer.lock() = Some(stream);
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock();
        let stream = guard.as_mut().ok_or(ClientError::NotConnected)?;
        stream.write_all(buf).map_err(communication)?;
        Ok(buf.len())
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_with(buf, None)
    }

    fn receive_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        // A zero timeout would mean "block forever" to the socket
        self.read_with(buf, Some(timeout.max(Duration::from_millis(1))))
    }

    fn close(&self) {
        // Shutting down through the writer wakes a reader blocked on the
        // cloned handle without taking its lock
        if let Some(stream) = self.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// TLS transport over rustls.
///
/// A rustls stream cannot be split, so reads poll in short slices and
/// release the lock in between to let writers through.
pub struct TlsTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
    stream: Mutex<Option<TlsStream>>,
    poll_interval: Duration,
}

impl TlsTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let tls_config = build_client_config(&config.tls)?;
        let name = config.tls.server_name.as_deref().unwrap_or(&config.host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| ClientError::Tls(format!("Invalid server name: {}", name)))?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout_duration(),
            config: Arc::new(tls_config),
            server_name,
            stream: Mutex::new(None),
            poll_interval: Duration::from_millis(50),
        })
    }

    fn read_slice(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut guard = self.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Ok(Some(0));
        };
        stream
            .get_ref()
            .set_read_timeout(Some(self.poll_interval))
            .map_err(communication)?;
        match stream.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::Interrupted || is_timeout(&e) => Ok(None),
            Err(e) => Err(communication(e)),
        }
    }
}

impl Transport for TlsTransport {
    fn connect(&self) -> Result<()> {
        let tcp = open_tcp(&self.host, self.port, self.connect_timeout)?;
        tcp.set_read_timeout(Some(self.connect_timeout)).map_err(communication)?;

        let conn = ClientConnection::new(self.config.clone(), self.server_name.clone())
            .map_err(|e| ClientError::Tls(e.to_string()))?;
        let mut stream = StreamOwned::new(conn, tcp);
        while stream.conn.is_handshaking() {
            stream
                .conn
                .complete_io(&mut stream.sock)
                .map_err(|e| ClientError::Tls(format!("Handshake failed: {}", e)))?;
        }

        debug!("TLS connection to {}:{} open", self.host, self.port);
        *self.stream.lock() = Some(stream);
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> Result<usize> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(ClientError::NotConnected)?;
        stream.write_all(buf).map_err(communication)?;
        stream.flush().map_err(communication)?;
        Ok(buf.len())
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(n) = self.read_slice(buf)? {
                return Ok(n);
            }
        }
    }

    fn receive_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(n) = self.read_slice(buf)? {
                return Ok(n);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(0);
            }
        }
    }

    fn close(&self) {
        if let Some(mut stream) = self.stream.lock().take() {
            stream.conn.send_close_notify();
            let _ = stream.flush();
            let _ = stream.sock.shutdown(Shutdown::Both);
        }
    }
}

/// Adapts a transport to `std::io::Read` for the packet codec.
pub struct TransportReader<'a> {
    transport: &'a dyn Transport,
}

impl<'a> TransportReader<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }
}

impl Read for TransportReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport
            .receive(buf)
            .map_err(|e| io::Error::new(ErrorKind::Other, e.to_string()))
    }
}

/// Resolve `TlsConfig` into a rustls client configuration.
///
/// Server trust comes from `ca_cert`, the bundled web PKI roots, or nothing
/// at all under `accept_invalid_certs`. A client identity is presented in
/// every case when `client_cert` and `client_key` are set.
pub fn build_client_config(tls: &TlsConfig) -> Result<rustls::ClientConfig> {
    let builder = rustls::ClientConfig::builder();
    let builder = if tls.accept_invalid_certs {
        warn!("TLS server certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnyServerCert::new()))
    } else {
        builder.with_root_certificates(trust_anchors(tls)?)
    };

    match client_identity(tls)? {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| ClientError::Tls(format!("Client certificate rejected: {}", e))),
        None => Ok(builder.with_no_client_auth()),
    }
}

fn trust_anchors(tls: &TlsConfig) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let Some(path) = &tls.ca_cert else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let (added, ignored) = roots.add_parsable_certificates(read_certs(path)?);
    if ignored > 0 {
        warn!("Skipped {} unusable certificates in {}", ignored, path.display());
    }
    if added == 0 {
        return Err(ClientError::Tls(format!(
            "No CA certificates in {}",
            path.display()
        )));
    }
    debug!("Trusting {} CA certificates from {}", added, path.display());
    Ok(roots)
}

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn client_identity(tls: &TlsConfig) -> Result<Option<Identity>> {
    let (cert_path, key_path) = match (&tls.client_cert, &tls.client_key) {
        (None, None) => return Ok(None),
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(ClientError::Tls(
                "client_cert and client_key must be set together".into(),
            ))
        }
    };

    let chain = read_certs(cert_path)?;
    if chain.is_empty() {
        return Err(ClientError::Tls(format!(
            "No certificates in {}",
            cert_path.display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut open_pem(key_path)?)
        .map_err(|e| ClientError::Tls(format!("Bad key in {}: {}", key_path.display(), e)))?
        .ok_or_else(|| ClientError::Tls(format!("No private key in {}", key_path.display())))?;
    Ok(Some((chain, key)))
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ClientError::Tls(format!("Cannot open {}: {}", path.display(), e)))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| ClientError::Tls(format!("Bad certificate in {}: {}", path.display(), e)))
}

/// Server verifier for `accept_invalid_certs`: any certificate chain is
/// taken at face value, but handshake signatures are still checked against
/// the presented certificate.
#[derive(Debug)]
struct AnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AnyServerCert {
    fn new() -> Self {
        Self {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        debug!("Accepting unverified certificate for {:?}", server_name);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
