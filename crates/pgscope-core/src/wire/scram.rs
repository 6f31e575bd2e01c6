//! SCRAM-SHA-256 client half (RFC 5802 / RFC 7677), just enough to complete a
//! PostgreSQL SASL exchange: one client-first message, one server-first
//! message to parse, one client-final message, and a server-final signature
//! check.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const GS2_HEADER: &str = "n,,";

pub struct ClientFirst {
    pub message: String,
    nonce: String,
}

pub fn client_first() -> ClientFirst {
    let mut raw = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut raw);
    let nonce = base64::engine::general_purpose::STANDARD.encode(raw);
    let message = format!("{GS2_HEADER}n=,r={nonce}");
    ClientFirst { message, nonce }
}

pub struct ServerFirst {
    pub nonce: String,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// Parses `r=<nonce>,s=<salt-b64>,i=<iterations>`.
pub fn parse_server_first(body: &str) -> Result<ServerFirst, String> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;
    for part in body.split(',') {
        if let Some(v) = part.strip_prefix("r=") {
            nonce = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            salt = Some(
                base64::engine::general_purpose::STANDARD
                    .decode(v)
                    .map_err(|e| format!("invalid salt encoding: {e}"))?,
            );
        } else if let Some(v) = part.strip_prefix("i=") {
            iterations = Some(v.parse::<u32>().map_err(|e| format!("invalid iteration count: {e}"))?);
        }
    }
    Ok(ServerFirst {
        nonce: nonce.ok_or("server-first message missing nonce")?,
        salt: salt.ok_or("server-first message missing salt")?,
        iterations: iterations.ok_or("server-first message missing iteration count")?,
    })
}

pub struct ClientFinal {
    pub message: String,
    /// Expected `ServerSignature` base64, to verify against the server's
    /// final message.
    pub expected_server_signature: String,
}

/// Builds the client-final message and the expected server signature, given
/// the password, the client-first bare message, and the parsed server-first.
pub fn client_final(password: &str, first: &ClientFirst, server_first_raw: &str, server: &ServerFirst) -> Result<ClientFinal, String> {
    if !server.nonce.starts_with(&first.nonce) {
        return Err("server nonce does not extend client nonce".into());
    }
    let salted_password = salt_password(password, &server.salt, server.iterations);
    let client_key = hmac(&salted_password, b"Client Key");
    let stored_key = Sha256::digest(client_key);

    let channel_binding = base64::engine::general_purpose::STANDARD.encode(GS2_HEADER.as_bytes());
    let client_final_without_proof = format!("c={channel_binding},r={}", server.nonce);

    let client_first_bare = &first.message[GS2_HEADER.len()..];
    let auth_message = format!("{client_first_bare},{server_first_raw},{client_final_without_proof}");

    let client_signature = hmac(&stored_key, auth_message.as_bytes());
    let client_proof: Vec<u8> = client_key.iter().zip(client_signature.iter()).map(|(a, b)| a ^ b).collect();
    let proof_b64 = base64::engine::general_purpose::STANDARD.encode(client_proof);

    let server_key = hmac(&salted_password, b"Server Key");
    let server_signature = hmac(&server_key, auth_message.as_bytes());

    Ok(ClientFinal {
        message: format!("{client_final_without_proof},p={proof_b64}"),
        expected_server_signature: base64::engine::general_purpose::STANDARD.encode(server_signature),
    })
}

/// Parses `v=<signature-b64>` (or `e=<error>` on failure) from the
/// server-final message.
pub fn verify_server_final(body: &str, expected: &str) -> Result<(), String> {
    if let Some(err) = body.strip_prefix("e=") {
        return Err(format!("server reported SASL error: {err}"));
    }
    let actual = body.strip_prefix("v=").ok_or("server-final message missing signature")?;
    if actual != expected {
        return Err("server signature mismatch".into());
    }
    Ok(())
}

fn salt_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_first_round_trips() {
        let first = client_first();
        let server_nonce = format!("{}serverpart", first.nonce);
        let raw = format!("r={server_nonce},s=c2FsdA==,i=4096");
        let parsed = parse_server_first(&raw).unwrap();
        assert_eq!(parsed.nonce, server_nonce);
        assert_eq!(parsed.salt, b"salt");
        assert_eq!(parsed.iterations, 4096);
    }

    #[test]
    fn rejects_nonce_that_does_not_extend_client_nonce() {
        let first = client_first();
        let raw = "r=totallydifferent,s=c2FsdA==,i=4096".to_string();
        let server = parse_server_first(&raw).unwrap();
        let err = client_final("secret", &first, &raw, &server).unwrap_err();
        assert!(err.contains("does not extend"));
    }

    #[test]
    fn full_exchange_produces_matching_signature() {
        let first = client_first();
        let salt = b"randomsalt".to_vec();
        let iterations = 4096u32;
        let server_nonce = format!("{}abcd", first.nonce);
        let server_first_raw = format!(
            "r={server_nonce},s={},i={iterations}",
            base64::engine::general_purpose::STANDARD.encode(&salt)
        );
        let server = parse_server_first(&server_first_raw).unwrap();
        let cf = client_final("hunter2", &first, &server_first_raw, &server).unwrap();

        // Recompute what the server would compute for its own final message,
        // and confirm our client accepts it.
        let salted = salt_password("hunter2", &salt, iterations);
        let server_key = hmac(&salted, b"Server Key");
        let client_first_bare = &first.message[GS2_HEADER.len()..];
        let channel_binding = base64::engine::general_purpose::STANDARD.encode(GS2_HEADER.as_bytes());
        let client_final_without_proof = format!("c={channel_binding},r={server_nonce}");
        let auth_message = format!("{client_first_bare},{server_first_raw},{client_final_without_proof}");
        let server_signature = hmac(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", base64::engine::general_purpose::STANDARD.encode(server_signature));

        verify_server_final(&server_final, &cf.expected_server_signature).unwrap();
    }
}
