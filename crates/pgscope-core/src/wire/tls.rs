//! `SSLRequest` negotiation: a fixed 8-byte probe sent before the real startup
//! packet, answered with a single `S` (proceed with TLS) or `N` (plaintext
//! only) byte.

use std::io::{Read, Write};
use std::net::TcpStream;

use super::error::WireError;

const SSL_REQUEST_CODE: i32 = 80877103;

pub enum Negotiated {
    Plain(TcpStream),
    Tls(native_tls::TlsStream<TcpStream>),
}

/// Sends `SSLRequest` and, if the server agrees, performs the TLS handshake
/// using `native-tls` against `sni_hostname`. `accept_invalid_certs` mirrors
/// PostgreSQL's `sslmode=require` (encrypt, don't verify) vs `verify-full`.
pub(super) fn negotiate(mut sock: TcpStream, sni_hostname: &str, accept_invalid_certs: bool) -> Result<Negotiated, WireError> {
    let mut req = Vec::with_capacity(8);
    req.extend_from_slice(&8i32.to_be_bytes());
    req.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    sock.write_all(&req)?;
    sock.flush()?;

    let mut reply = [0u8; 1];
    sock.read_exact(&mut reply)?;
    match reply[0] {
        b'S' => {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(accept_invalid_certs)
                .danger_accept_invalid_hostnames(accept_invalid_certs)
                .build()?;
            let stream = connector.connect(sni_hostname, sock)?;
            Ok(Negotiated::Tls(stream))
        }
        b'N' => Ok(Negotiated::Plain(sock)),
        other => Err(WireError::Tls(format!("unexpected SSLRequest reply byte {other:#x}"))),
    }
}
