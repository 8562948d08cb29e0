//! Contextualization input validation
//!
//! SSH public keys and user-data ride inside platform allocation templates.
//! Both are validated before any platform call is made; invalid input is a
//! `ResourceNotValid` rejection.

use crate::error::{Error, Result};
use base64::Engine;

/// Maximum accepted user-data payload
pub const USER_DATA_MAX_BYTES: usize = 16 * 1024;

/// Key types accepted in `occi.credentials.ssh.publickey`
const SSH_KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
];

/// Validate an OpenSSH-format public key: a known key type followed by a
/// decodable base64 body, with an optional comment.
pub fn validate_ssh_public_key(key: &str) -> Result<()> {
    let mut parts = key.split_whitespace();

    let key_type = parts
        .next()
        .ok_or_else(|| Error::ResourceNotValid("SSH public key is empty".into()))?;
    if !SSH_KEY_TYPES.contains(&key_type) {
        return Err(Error::ResourceNotValid(format!(
            "unsupported SSH key type: {}",
            key_type
        )));
    }

    let body = parts
        .next()
        .ok_or_else(|| Error::ResourceNotValid("SSH public key has no body".into()))?;
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|_| Error::ResourceNotValid("SSH public key body is not base64".into()))?;

    Ok(())
}

/// Validate user-data: at most 16 KiB, strict base64 charset. Embedded
/// newlines are tolerated (clients line-wrap encoded payloads).
pub fn validate_user_data(data: &str) -> Result<()> {
    if data.len() > USER_DATA_MAX_BYTES {
        return Err(Error::ResourceNotValid(format!(
            "user data exceeds {} bytes",
            USER_DATA_MAX_BYTES
        )));
    }

    let compact: String = data.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    if compact.is_empty() {
        return Ok(());
    }

    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| Error::ResourceNotValid("user data is not valid base64".into()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // 'test key' base64-encoded
    const BODY: &str = "dGVzdCBrZXk=";

    #[test]
    fn test_accepts_known_key_types() {
        for key_type in ["ssh-rsa", "ssh-ed25519", "ecdsa-sha2-nistp256"] {
            let key = format!("{} {} user@host", key_type, BODY);
            assert!(validate_ssh_public_key(&key).is_ok(), "{}", key_type);
        }
    }

    #[test]
    fn test_rejects_unknown_type_and_bad_body() {
        assert_matches!(
            validate_ssh_public_key(&format!("ssh-foo {}", BODY)),
            Err(Error::ResourceNotValid(_))
        );
        assert_matches!(
            validate_ssh_public_key("ssh-rsa not*base64!"),
            Err(Error::ResourceNotValid(_))
        );
        assert_matches!(validate_ssh_public_key(""), Err(Error::ResourceNotValid(_)));
        assert_matches!(
            validate_ssh_public_key("ssh-rsa"),
            Err(Error::ResourceNotValid(_))
        );
    }

    #[test]
    fn test_user_data_size_limit() {
        let oversized = "A".repeat(USER_DATA_MAX_BYTES + 4);
        assert_matches!(validate_user_data(&oversized), Err(Error::ResourceNotValid(_)));
    }

    #[test]
    fn test_user_data_charset() {
        assert!(validate_user_data("aGVsbG8gd29ybGQ=").is_ok());
        assert!(validate_user_data("aGVsbG8g\nd29ybGQ=").is_ok());
        assert!(validate_user_data("").is_ok());
        assert_matches!(
            validate_user_data("#!/bin/sh\necho hi"),
            Err(Error::ResourceNotValid(_))
        );
    }
}
