//! Signed selection tokens.
//!
//! A token is minted at selection time and carries everything the trainer
//! needs to apply the eventual reward: routing ids, the chosen arm, the
//! state version observed at selection, and the request context for the
//! contextual families. The payload is self-describing JSON, hex-encoded
//! and signed with truncated HMAC-SHA256, so feedback can arrive hours
//! later through a different process without any server-side session.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::errors::{Result, TokenError};
use crate::policy::AlgorithmFamily;

type HmacSha256 = Hmac<Sha256>;

/// Signature length after truncation, in bytes.
const SIGNATURE_BYTES: usize = 16;

/// Claims carried inside a selection token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub tenant_id: String,
    pub experiment_id: String,
    pub pool_id: String,
    /// Index of the arm that was served
    pub arm_index: usize,
    pub family: AlgorithmFamily,
    /// Parameter state version observed at selection time
    pub state_version: u64,
    /// Request context captured for the contextual families; empty otherwise
    #[serde(default)]
    pub context: Vec<f64>,
    pub issued_at_ms: i64,
    /// Unique per selection, used for reward deduplication
    pub nonce: Uuid,
}

/// Encodes and verifies selection tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    max_age_ms: i64,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            max_age_ms: config.max_age_ms,
        }
    }

    /// Serialize and sign claims into the wire form `hex(payload).hex(sig)`.
    pub fn encode(&self, claims: &TokenClaims) -> Result<String> {
        let payload = serde_json::to_vec(claims)?;
        let signature = self.sign(&payload);
        Ok(format!("{}.{signature}", hex_encode(&payload)))
    }

    /// Verify the signature and expiry, then deserialize the claims.
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        self.decode_at(token, Utc::now().timestamp_millis())
    }

    /// Verification against an explicit clock, for deterministic tests.
    pub fn decode_at(&self, token: &str, now_ms: i64) -> Result<TokenClaims> {
        let (payload_hex, signature_hex) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Invalid("missing signature separator".into()))?;
        let payload = hex_decode(payload_hex)
            .ok_or_else(|| TokenError::Invalid("payload is not valid hex".into()))?;

        if !self.verify(&payload, signature_hex) {
            return Err(TokenError::Invalid("signature mismatch".into()).into());
        }

        let claims: TokenClaims = serde_json::from_slice(&payload)
            .map_err(|e| TokenError::Invalid(format!("malformed claims: {e}")))?;

        let age_ms = now_ms - claims.issued_at_ms;
        if age_ms > self.max_age_ms {
            return Err(TokenError::Expired {
                age_ms,
                max_age_ms: self.max_age_ms,
            }
            .into());
        }
        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> String {
        let tag = self.mac(payload).finalize().into_bytes();
        hex_encode(&tag[..SIGNATURE_BYTES])
    }

    /// Constant-time comparison of the truncated tag. The length check
    /// comes first so a shorter prefix cannot pass as a weaker signature.
    fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Some(signature) = hex_decode(signature_hex) else {
            return false;
        };
        if signature.len() != SIGNATURE_BYTES {
            return false;
        }
        self.mac(payload).verify_truncated_left(&signature).is_ok()
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        mac
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, b| {
            use std::fmt::Write;
            let _ = write!(out, "{b:02x}");
            out
        },
    )
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BanditError;

    fn codec() -> TokenCodec {
        TokenCodec::new(&TokenConfig {
            secret: b"test-secret".to_vec(),
            max_age_ms: 60_000,
        })
    }

    fn claims(issued_at_ms: i64) -> TokenClaims {
        TokenClaims {
            tenant_id: "acme".into(),
            experiment_id: "exp-1".into(),
            pool_id: "landing-cta".into(),
            arm_index: 2,
            family: AlgorithmFamily::BetaTs,
            state_version: 7,
            context: vec![0.5, -1.0],
            issued_at_ms,
            nonce: Uuid::new_v4(),
        }
    }

    #[test]
    fn round_trip_preserves_claims() {
        let codec = codec();
        let original = claims(1_000);
        let token = codec.encode(&original).unwrap();
        let decoded = codec.decode_at(&token, 2_000).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let codec = codec();
        let token = codec.encode(&claims(1_000)).unwrap();
        // Flip one hex digit in the payload.
        let mut bytes = token.into_bytes();
        bytes[4] = if bytes[4] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(bytes).unwrap();
        let err = codec.decode_at(&tampered, 2_000).unwrap_err();
        assert!(matches!(err, BanditError::Token(TokenError::Invalid(_))));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = codec().encode(&claims(1_000)).unwrap();
        let other = TokenCodec::new(&TokenConfig {
            secret: b"different-secret".to_vec(),
            max_age_ms: 60_000,
        });
        assert!(matches!(
            other.decode_at(&token, 2_000),
            Err(BanditError::Token(TokenError::Invalid(_)))
        ));
    }

    #[test]
    fn expiry_is_an_exclusive_boundary() {
        let codec = codec();
        let token = codec.encode(&claims(0)).unwrap();
        // Exactly at max age still valid, one past is expired.
        assert!(codec.decode_at(&token, 60_000).is_ok());
        let err = codec.decode_at(&token, 60_001).unwrap_err();
        assert!(matches!(
            err,
            BanditError::Token(TokenError::Expired {
                age_ms: 60_001,
                max_age_ms: 60_000
            })
        ));
    }

    #[test]
    fn shortened_signature_is_rejected() {
        let codec = codec();
        let token = codec.encode(&claims(1_000)).unwrap();
        let (payload_hex, signature_hex) = token.split_once('.').unwrap();
        // A valid prefix of the real tag must not verify.
        let shortened = format!("{payload_hex}.{}", &signature_hex[..8]);
        assert!(matches!(
            codec.decode_at(&shortened, 2_000),
            Err(BanditError::Token(TokenError::Invalid(_)))
        ));
    }

    #[test]
    fn garbage_token_is_invalid_not_a_panic() {
        let codec = codec();
        for bad in ["", "no-separator", "zz.zz", "abc.00112233"] {
            assert!(matches!(
                codec.decode_at(bad, 0),
                Err(BanditError::Token(TokenError::Invalid(_)))
            ));
        }
    }
}
