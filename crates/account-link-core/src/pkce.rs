//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! The client keeps a random verifier and sends only the derived challenge
//! with the authorization request. The server stores the challenge with the
//! authorization code and recomputes it from the verifier presented at the
//! token endpoint.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::crypto::constant_time_eq;

/// Verifiers and challenges must be 43 to 128 characters.
pub const MIN_LENGTH: usize = 43;
pub const MAX_LENGTH: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported code_challenge_method: {0}")]
pub struct UnsupportedMethod(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl ChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
            ChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(ChallengeMethod::S256),
            "plain" => Ok(ChallengeMethod::Plain),
            other => Err(UnsupportedMethod(other.to_string())),
        }
    }
}

/// Derive the challenge for `verifier`.
pub fn challenge(verifier: &str, method: ChallengeMethod) -> String {
    match method {
        ChallengeMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
        ChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Check a submitted verifier against the challenge stored with the code.
pub fn verify(stored_challenge: &str, method: ChallengeMethod, verifier: &str) -> bool {
    if !is_well_formed(verifier) {
        return false;
    }
    constant_time_eq(&challenge(verifier, method), stored_challenge)
}

/// Length 43..=128 over the unreserved URI characters.
pub fn is_well_formed(value: &str) -> bool {
    (MIN_LENGTH..=MAX_LENGTH).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Verifier/challenge pair generated by the client for one flow.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// 64 random bytes, base64url-encoded (86 chars), with its S256 challenge.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 64];
        rand::rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = challenge(&verifier, ChallengeMethod::S256);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn method(&self) -> ChallengeMethod {
        ChallengeMethod::S256
    }
}
