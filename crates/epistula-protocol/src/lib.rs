// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

//! epistula-protocol
//!
//! The Epistula signed-request scheme: every inbound request carries a
//! sender address, an ed25519 signature, a millisecond timestamp and a
//! request-unique nonce. Signer and verifier build the identical canonical
//! message
//!
//! `{sha256_hex(body)}.{nonce}.{timestamp_ms}.{signed_for or ""}`
//!
//! and the signature is checked against the sender's declared key. Any
//! difference in construction (key ordering in a structured body, a stray
//! separator) breaks every valid signature, so both directions live in this
//! one crate.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod canonical;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Replay window: a request older than `timestamp + ALLOWED_SKEW_MS` is
/// rejected as stale.
pub const ALLOWED_SKEW_MS: u64 = 8_000;

/// One stable reason per rejection branch. Callers surface the string as a
/// client error; none of these are retryable with the same request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Invalid Signature")]
    InvalidSignature,
    #[error("Invalid Timestamp")]
    InvalidTimestamp,
    #[error("Invalid Sender key")]
    InvalidSender,
    #[error("Invalid Nonce")]
    InvalidNonce,
    #[error("Invalid Body")]
    InvalidBody,
    #[error("Request is too stale: {deadline_ms} < {now_ms}")]
    Stale { deadline_ms: u64, now_ms: u64 },
    #[error("Signature Mismatch")]
    SignatureMismatch,
}

/// Raw header values as received off the wire. Fields are optional because
/// a peer may omit any header; each absence maps to its own error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestEnvelope<'a> {
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub signed_by: Option<&'a str>,
    pub signed_for: Option<&'a str>,
}

/// What gets hashed into the canonical message.
///
/// `Raw` bytes are hashed as-is. `Structured` values are first serialized
/// with the pinned canonical encoding (sorted keys, no insignificant
/// whitespace) so that structurally equal bodies hash identically no matter
/// how the sender serialized them.
#[derive(Debug, Clone, Copy)]
pub enum Body<'a> {
    Raw(&'a [u8]),
    Structured(&'a serde_json::Value),
}

impl Body<'_> {
    fn content_hash_hex(&self) -> Result<String, VerifyError> {
        match self {
            Body::Raw(bytes) => Ok(hex::encode(Sha256::digest(bytes))),
            Body::Structured(value) => {
                let encoded =
                    canonical::canonical_json(value).map_err(|_| VerifyError::InvalidBody)?;
                Ok(hex::encode(Sha256::digest(encoded)))
            }
        }
    }
}

/// Builds the canonical message both sides sign over.
pub fn signing_material(
    body: Body<'_>,
    nonce: &str,
    timestamp_ms: u64,
    signed_for: Option<&str>,
) -> Result<String, VerifyError> {
    let body_hash = body.content_hash_hex()?;
    Ok(format!(
        "{body_hash}.{nonce}.{timestamp_ms}.{}",
        signed_for.unwrap_or("")
    ))
}

/// Signer-side helper: produces the `0x`-prefixed hex signature a peer puts
/// in the `Epistula-Request-Signature` header.
pub fn sign_request(
    key: &SigningKey,
    body: Body<'_>,
    nonce: &str,
    timestamp_ms: u64,
    signed_for: Option<&str>,
) -> Result<String, VerifyError> {
    let material = signing_material(body, nonce, timestamp_ms, signed_for)?;
    let signature = key.sign(material.as_bytes());
    Ok(format!("0x{}", hex::encode(signature.to_bytes())))
}

/// Hex encoding of a verifying key, the form peers use as their address.
pub fn sender_address(key: &VerifyingKey) -> String {
    format!("0x{}", hex::encode(key.to_bytes()))
}

/// Verifies a signed request. Pure check, no side effects: each request is
/// independently re-evaluated and a failure is never fatal to the process.
///
/// Validation order is cheapest-first: field shape, freshness, body hash,
/// and only then the ed25519 verification.
pub fn verify_signed_request(
    envelope: &RequestEnvelope<'_>,
    body: Body<'_>,
    now_ms: u64,
) -> Result<(), VerifyError> {
    let signature = envelope.signature.ok_or(VerifyError::InvalidSignature)?;
    let timestamp_ms: u64 = envelope
        .timestamp
        .ok_or(VerifyError::InvalidTimestamp)?
        .trim()
        .parse()
        .map_err(|_| VerifyError::InvalidTimestamp)?;
    let signed_by = envelope.signed_by.ok_or(VerifyError::InvalidSender)?;
    let nonce = envelope.nonce.ok_or(VerifyError::InvalidNonce)?;
    if nonce.is_empty() {
        return Err(VerifyError::InvalidNonce);
    }

    // The window only bounds age. A timestamp claiming to come from the
    // future passes; deployed signers rely on this asymmetry.
    let deadline_ms = timestamp_ms.saturating_add(ALLOWED_SKEW_MS);
    if deadline_ms < now_ms {
        return Err(VerifyError::Stale { deadline_ms, now_ms });
    }

    let verifying_key = decode_verifying_key(signed_by)?;
    let signature = decode_signature(signature)?;
    let material = signing_material(body, nonce, timestamp_ms, envelope.signed_for)?;
    verifying_key
        .verify_strict(material.as_bytes(), &signature)
        .map_err(|_| VerifyError::SignatureMismatch)
}

fn decode_verifying_key(signed_by: &str) -> Result<VerifyingKey, VerifyError> {
    let raw = hex::decode(strip_hex_prefix(signed_by)).map_err(|_| VerifyError::InvalidSender)?;
    let key_arr: [u8; 32] = raw.try_into().map_err(|_| VerifyError::InvalidSender)?;
    VerifyingKey::from_bytes(&key_arr).map_err(|_| VerifyError::InvalidSender)
}

fn decode_signature(signature: &str) -> Result<Signature, VerifyError> {
    let raw =
        hex::decode(strip_hex_prefix(signature)).map_err(|_| VerifyError::InvalidSignature)?;
    let sig_arr: [u8; 64] = raw.try_into().map_err(|_| VerifyError::InvalidSignature)?;
    Ok(Signature::from_bytes(&sig_arr))
}

fn strip_hex_prefix(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}
