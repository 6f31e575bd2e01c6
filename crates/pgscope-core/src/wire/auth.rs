//! Authentication-method negotiation, driven off the backend `Authentication*`
//! messages (tag `R`). Supports trust, cleartext, MD5, and SCRAM-SHA-256;
//! anything else fails fast with `AUTH_UNSUPPORTED`.

use md5::{Digest, Md5};

use super::error::WireError;
use super::message::{self, parse_fields, read_backend};
use super::scram;
use super::Stream;

const AUTH_OK: i32 = 0;
const AUTH_CLEARTEXT: i32 = 3;
const AUTH_MD5: i32 = 5;
const AUTH_SASL: i32 = 10;
const AUTH_SASL_CONTINUE: i32 = 11;
const AUTH_SASL_FINAL: i32 = 12;

/// Drives the authentication sub-exchange to completion, consuming backend
/// messages until `AuthenticationOk` or a failure.
pub(super) fn authenticate(stream: &mut Stream, user: &str, password: &str) -> Result<(), WireError> {
    let first = read_backend(stream)?;
    if first.tag != b'R' {
        return Err(protocol_error(&first));
    }
    let code = be_i32(&first.body);
    match code {
        AUTH_OK => Ok(()),
        AUTH_CLEARTEXT => {
            message::write_password(stream, format!("{password}\0").as_bytes())?;
            expect_ok(stream)
        }
        AUTH_MD5 => {
            let salt = &first.body[4..8];
            let hashed = md5_password(user, password, salt);
            message::write_password(stream, format!("{hashed}\0").as_bytes())?;
            expect_ok(stream)
        }
        AUTH_SASL => {
            let mechanisms = parse_sasl_mechanisms(&first.body[4..]);
            if !mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
                return Err(WireError::AuthUnsupported(mechanisms.join(",")));
            }
            run_scram(stream, password)
        }
        other => Err(WireError::AuthUnsupported(format!("code {other}"))),
    }
}

fn run_scram(stream: &mut Stream, password: &str) -> Result<(), WireError> {
    let first = scram::client_first();
    let mut initial = Vec::new();
    initial.extend_from_slice(b"SCRAM-SHA-256\0");
    initial.extend_from_slice(&(first.message.len() as i32).to_be_bytes());
    initial.extend_from_slice(first.message.as_bytes());
    message::write_password(stream, &initial)?;

    let cont = read_backend(stream)?;
    if cont.tag != b'R' || be_i32(&cont.body) != AUTH_SASL_CONTINUE {
        return Err(protocol_error(&cont));
    }
    let server_first_raw = std::str::from_utf8(&cont.body[4..])
        .map_err(|e| WireError::Protocol(format!("non-UTF8 SASL continue: {e}")))?
        .to_string();
    let server_first = scram::parse_server_first(&server_first_raw).map_err(WireError::Protocol)?;
    let client_final = scram::client_final(password, &first, &server_first_raw, &server_first).map_err(WireError::Protocol)?;

    message::write_password(stream, client_final.message.as_bytes())?;

    let fin = read_backend(stream)?;
    if fin.tag != b'R' || be_i32(&fin.body) != AUTH_SASL_FINAL {
        return Err(protocol_error(&fin));
    }
    let server_final_raw = std::str::from_utf8(&fin.body[4..])
        .map_err(|e| WireError::Protocol(format!("non-UTF8 SASL final: {e}")))?;
    scram::verify_server_final(server_final_raw, &client_final.expected_server_signature).map_err(WireError::Protocol)?;

    expect_ok(stream)
}

fn expect_ok(stream: &mut Stream) -> Result<(), WireError> {
    let msg = read_backend(stream)?;
    if msg.tag == b'R' && be_i32(&msg.body) == AUTH_OK {
        return Ok(());
    }
    Err(protocol_error(&msg))
}

fn protocol_error(msg: &message::Backend) -> WireError {
    if msg.tag == b'E' {
        let fields = parse_fields(&msg.body);
        return WireError::AuthFailed {
            sqlstate: fields.get(&b'C').cloned().unwrap_or_else(|| "XX000".to_string()),
            message: fields.get(&b'M').cloned().unwrap_or_else(|| "authentication failed".to_string()),
        };
    }
    WireError::Protocol(format!("unexpected message tag {:?} during authentication", msg.tag as char))
}

fn parse_sasl_mechanisms(body: &[u8]) -> Vec<String> {
    body.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn be_i32(body: &[u8]) -> i32 {
    if body.len() < 4 {
        return -1;
    }
    i32::from_be_bytes([body[0], body[1], body[2], body[3]])
}

/// `"md5" || md5hex(md5hex(password || user) || salt)`.
fn md5_password(user: &str, password: &str, salt: &[u8]) -> String {
    let mut inner = Md5::new();
    inner.update(password.as_bytes());
    inner.update(user.as_bytes());
    let inner_hex = hex(&inner.finalize());

    let mut outer = Md5::new();
    outer.update(inner_hex.as_bytes());
    outer.update(salt);
    format!("md5{}", hex(&outer.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").unwrap();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_password_matches_known_vector() {
        // user=postgres password=postgres salt=[1,2,3,4]
        let got = md5_password("postgres", "postgres", &[1, 2, 3, 4]);
        assert!(got.starts_with("md5"));
        assert_eq!(got.len(), 35);
    }

    #[test]
    fn parses_null_separated_mechanism_list() {
        let mut body = Vec::new();
        body.extend_from_slice(b"SCRAM-SHA-256\0");
        body.extend_from_slice(b"SCRAM-SHA-256-PLUS\0");
        body.push(0);
        let mechs = parse_sasl_mechanisms(&body);
        assert_eq!(mechs, vec!["SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"]);
    }
}
