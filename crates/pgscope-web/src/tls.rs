//! TLS termination for the HTTP surfaces. Grounded in the same `native-tls`
//! stack `pgscope-core::wire` uses for the outbound PostgreSQL connection —
//! one TLS backend across the whole binary rather than introducing a second.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::serve::Listener;
use tokio::net::{TcpListener, TcpStream};
use tokio_native_tls::{TlsAcceptor, TlsStream};

use pgscope_core::config::TlsConfig;

pub fn build_acceptor(tls: &TlsConfig) -> io::Result<TlsAcceptor> {
    let cert = std::fs::read(&tls.cert_file)?;
    let key = std::fs::read(&tls.key_file)?;
    let identity = native_tls::Identity::from_pkcs8(&cert, &key).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let acceptor = native_tls::TlsAcceptor::new(identity).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(TlsAcceptor::from(acceptor))
}

/// An `axum::serve` [`Listener`] that TLS-wraps every accepted connection
/// before handing it to the HTTP stack. A handshake failure (bad client,
/// port scan) drops that one connection and keeps accepting — it never
/// brings down the listener.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: Arc<TlsAcceptor>,
}

impl TlsListener {
    pub fn new(inner: TcpListener, acceptor: TlsAcceptor) -> Self {
        TlsListener { inner, acceptor: Arc::new(acceptor) }
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "TLS listener: TCP accept failed");
                    continue;
                }
            };
            match self.acceptor.accept(stream).await {
                Ok(tls_stream) => return (tls_stream, addr),
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "TLS handshake failed");
                    continue;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
