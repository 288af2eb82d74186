//! Opaque continuation tokens for paginated searches.
//!
//! A token is `base64url(payload) "." base64url(hmac-sha256(payload))`.
//! The payload carries the backend kind, a fingerprint of the query it was
//! issued for, the version tag of the underlying resource, and the typed
//! resumption cursor. Tokens are self-contained; the server keeps no
//! session state between pages.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Which backend issued a token. A token replayed against a different
/// endpoint kind is rejected before the cursor is even looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Datasets,
    ReferenceSets,
    References,
    VariantSets,
    CallSets,
    ReadGroupSets,
    Variants,
    Reads,
    Bases,
}

/// Resumption state, immediately after the last returned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    /// Index into a catalog-backed listing.
    Offset { offset: u64 },
    /// File-backed interval scan: 0-based start of the last emitted record
    /// and the number of records already emitted at that start.
    Interval { start: u64, skip: u32 },
    /// Reference-bases chunking: next base to return, 0-based.
    Bases { offset: u64 },
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    kind: TokenKind,
    query: String,
    version: String,
    cursor: Cursor,
}

/// Issues and verifies continuation tokens with a process-wide MAC key.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generate a random MAC key. Tokens signed with it do not survive a
    /// restart, which is the safe default when no key is configured.
    pub fn generate_secret() -> Vec<u8> {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let state = RandomState::new();
        let mut bytes = Vec::with_capacity(32);
        for _ in 0..4 {
            let hasher = state.build_hasher();
            bytes.extend_from_slice(&hasher.finish().to_le_bytes());
        }
        bytes
    }

    pub fn issue(
        &self,
        kind: TokenKind,
        query_fingerprint: &str,
        resource_version: &str,
        cursor: Cursor,
    ) -> String {
        let payload = TokenPayload {
            kind,
            query: query_fingerprint.to_string(),
            version: resource_version.to_string(),
            cursor,
        };
        let bytes = serde_json::to_vec(&payload).expect("token payload serializes");
        let mac = self.mac(&bytes);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&bytes),
            URL_SAFE_NO_PAD.encode(mac)
        )
    }

    /// Verify a token against the replayed query. Every failure mode is
    /// `BadToken`; the message distinguishes them for the client's benefit
    /// but carries nothing usable for forgery.
    pub fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        query_fingerprint: &str,
        resource_version: &str,
    ) -> Result<Cursor> {
        let (payload_b64, mac_b64) = token
            .split_once('.')
            .ok_or_else(|| Error::BadToken("malformed token".to_string()))?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| Error::BadToken("malformed token".to_string()))?;
        let mac_bytes = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| Error::BadToken("malformed token".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(&payload_bytes);
        mac.verify_slice(&mac_bytes)
            .map_err(|_| Error::BadToken("token failed verification".to_string()))?;

        let payload: TokenPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|_| Error::BadToken("malformed token payload".to_string()))?;

        if payload.kind != kind {
            return Err(Error::BadToken(
                "token was issued for a different endpoint".to_string(),
            ));
        }
        if payload.query != query_fingerprint {
            return Err(Error::BadToken(
                "token was issued for a different query".to_string(),
            ));
        }
        if payload.version != resource_version {
            return Err(Error::BadToken(
                "underlying resource has changed since the token was issued".to_string(),
            ));
        }

        Ok(payload.cursor)
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Fingerprint of every query parameter other than `pageToken`. A token is
/// replayable only against a request whose fingerprint matches.
pub fn query_fingerprint<T: Serialize>(query: &T) -> String {
    let json = serde_json::to_vec(query).expect("query fingerprint serializes");
    let mut hasher = Sha256::new();
    hasher.update(&json);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
