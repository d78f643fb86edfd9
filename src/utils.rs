// Copyright 2025, Horizen Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte and codec helpers shared by the decoders and verifiers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A fixed-width field did not have the expected length.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} bytes, got {actual}")]
pub struct LengthError {
    /// Required length.
    pub expected: usize,
    /// Length that was found.
    pub actual: usize,
}

/// Copies `input` into a fixed array, failing unless the lengths match exactly.
pub fn to_array<const N: usize>(input: &[u8]) -> Result<[u8; N], LengthError> {
    input.try_into().map_err(|_| LengthError {
        expected: N,
        actual: input.len(),
    })
}

/// Reads a little-endian `u16` at `offset`.
pub fn le_u16(input: &[u8], offset: usize) -> Result<u16, LengthError> {
    let bytes = input.get(offset..offset + 2).ok_or(LengthError {
        expected: offset + 2,
        actual: input.len(),
    })?;
    Ok(u16::from_le_bytes(to_array(bytes)?))
}

/// Reads a little-endian `u32` at `offset`.
pub fn le_u32(input: &[u8], offset: usize) -> Result<u32, LengthError> {
    let bytes = input.get(offset..offset + 4).ok_or(LengthError {
        expected: offset + 4,
        actual: input.len(),
    })?;
    Ok(u32::from_le_bytes(to_array(bytes)?))
}

/// Interprets an 8 byte field as a little-endian `u64`.
pub fn le_u64(input: &[u8; 8]) -> u64 {
    u64::from_le_bytes(*input)
}

/// Interprets up to 16 bytes as a little-endian unsigned integer.
pub fn le_big_int(input: &[u8]) -> Option<u128> {
    if input.len() > 16 {
        return None;
    }
    Some(
        input
            .iter()
            .rev()
            .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte)),
    )
}

/// URL-safe base64 without padding.
pub fn b64url_encode(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// `SHA256(input)`.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

/// Decodes a hex string, accepting an optional `0x` prefix.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = input.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
}

/// Raw P-256 public key (x || y) in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcPublicJwk {
    /// Always `EC`.
    pub kty: &'static str,
    /// Always `P-256`.
    pub crv: &'static str,
    /// base64url of the x coordinate.
    pub x: String,
    /// base64url of the y coordinate.
    pub y: String,
}

impl EcPublicJwk {
    /// Builds the JWK of a 64 byte uncompressed point without its `0x04` tag.
    pub fn from_raw_p256(key: &[u8; 64]) -> Self {
        Self {
            kty: "EC",
            crv: "P-256",
            x: b64url_encode(&key[..32]),
            y: b64url_encode(&key[32..]),
        }
    }
}

/// Errors from the raw ECDSA helper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcdsaError {
    /// The public key is not a valid P-256 point.
    #[error("invalid P-256 public key")]
    InvalidKey,
    /// The signature is not 64 bytes of r || s.
    #[error("invalid raw ECDSA signature encoding")]
    InvalidSignature,
    /// The signature does not verify.
    #[error("ECDSA signature verification failed")]
    Mismatch,
}

/// Verifies a raw `r || s` ECDSA P-256/SHA-256 signature with a raw `x || y` key.
pub fn verify_p256_raw(
    public_key: &[u8; 64],
    message: &[u8],
    signature: &[u8],
) -> Result<(), EcdsaError> {
    let key = VerifyingKey::from_sec1_bytes(&[&[0x04], &public_key[..]].concat())
        .map_err(|_| EcdsaError::InvalidKey)?;
    verify_p256_with_key(&key, message, signature)
}

pub(crate) fn verify_p256_with_key(
    key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), EcdsaError> {
    let signature = Signature::from_slice(signature).map_err(|_| EcdsaError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| EcdsaError::Mismatch)
}
