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

//! Binding of a TDX attestation to a TLS channel.
//!
//! The TD puts `CHALLENGE_DOMAIN_SEPARATOR || .. || SHA256(compressed key)` in
//! its report data and signs `SHA256(SIGN_DOMAIN_SEPARATOR || exporter key)`
//! with that secp256k1 key.

use std::time::{SystemTime, UNIX_EPOCH};

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::Deserialize;

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::intel::fetch::{HttpsGetter, PcsEndpoints, ReqwestGetter, RetryingGetter};
use crate::intel::validate::validate_quote;
use crate::intel::verify::verify_quote_with_collateral;
use crate::measurements::hash_variants;
use crate::registry::{verify_quote_registered, EthRegistry, MeasurementRegistry};
use crate::utils::{decode_hex, sha256};

/// Prefix of report data built for RPC channel binding.
pub const CHALLENGE_DOMAIN_SEPARATOR: &[u8] = b"CUSTOM-RPC ATTEST:";
/// Prefix of the message signed over the exporter key.
pub const SIGN_DOMAIN_SEPARATOR: &[u8] = b"CUSTOM-RPC SIGN:";

const SIGNATURE_SIZE: usize = 65;
const KEY_HASH_SIZE: usize = 32;

/// Errors specific to the channel binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    /// The body is not the expected JSON document.
    #[error("invalid TDX attestation body JSON: {0}")]
    InvalidBody(String),
    /// A field is not valid hex.
    #[error("invalid hex in {field}: {reason}")]
    InvalidHex {
        /// Offending field.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },
    /// The report data was built for something else.
    #[error("quote constructed for alternate purpose")]
    AlternatePurpose,
    /// No measurement variant is registered.
    #[error("TDX measurement not registered in verification registry")]
    NotRegistered,
    /// Too few bytes follow the domain separator.
    #[error("report data too short: {0}")]
    ChallengeTooShort(usize),
    /// The signature is not 65 bytes.
    #[error("invalid signature length: {0} (expected 65)")]
    SignatureLength(usize),
    /// The recovery byte is not 0, 1, 27 or 28.
    #[error("invalid recovery id {0}")]
    RecoveryId(u8),
    /// No public key could be recovered.
    #[error("failed to recover public key from signature: {0}")]
    Recovery(String),
}

/// The JSON document posted by the TD.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationBody {
    /// Hex of the raw quote.
    pub quote: String,
    /// Hex of the 65 byte recoverable signature.
    pub signature: String,
}

impl AttestationBody {
    /// Parses a UTF-8 JSON body, ignoring surrounding whitespace.
    pub fn parse(body: &[u8]) -> Result<Self, ChallengeError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| ChallengeError::InvalidBody(e.to_string()))?;
        serde_json::from_str(text.trim()).map_err(|e| ChallengeError::InvalidBody(e.to_string()))
    }
}

fn hex_field(field: &'static str, value: &str) -> Result<Vec<u8>, ChallengeError> {
    decode_hex(value).map_err(|e| ChallengeError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// The report data after the domain separator.
pub fn strip_domain_separator(report_data: &[u8]) -> Result<&[u8], ChallengeError> {
    report_data
        .strip_prefix(CHALLENGE_DOMAIN_SEPARATOR)
        .ok_or(ChallengeError::AlternatePurpose)
}

/// Recovers the compressed secp256k1 key that signed
/// `SHA256(SIGN_DOMAIN_SEPARATOR || message)`.
pub fn recover_signature_pubkey(
    message: &[u8],
    signature_hex: &str,
) -> Result<[u8; 33], ChallengeError> {
    let digest = sha256(&[SIGN_DOMAIN_SEPARATOR, message].concat());

    let raw = hex_field("signature", signature_hex)?;
    let Ok(raw) = <[u8; SIGNATURE_SIZE]>::try_from(raw.as_slice()) else {
        return Err(ChallengeError::SignatureLength(raw.len()));
    };
    let v = match raw[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        v => return Err(ChallengeError::RecoveryId(v)),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(ChallengeError::RecoveryId(v))?;
    let signature =
        Signature::from_slice(&raw[..64]).map_err(|e| ChallengeError::Recovery(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| ChallengeError::Recovery(e.to_string()))?;
    let compressed = key.to_encoded_point(true);
    <[u8; 33]>::try_from(compressed.as_bytes())
        .map_err(|_| ChallengeError::Recovery("unexpected compressed key size".into()))
}

/// Whether the key that signed the exporter key is the one committed to in
/// `challenge`.
pub fn check_challenge(
    challenge: &[u8],
    exporter_key: &[u8],
    signature_hex: &str,
) -> Result<bool, ChallengeError> {
    if challenge.len() < KEY_HASH_SIZE {
        return Err(ChallengeError::ChallengeTooShort(challenge.len()));
    }
    let committed = &challenge[challenge.len() - KEY_HASH_SIZE..];
    let key = recover_signature_pubkey(exporter_key, signature_hex)?;
    Ok(sha256(&key) == committed)
}

/// Checks attestations posted over an RPC channel.
#[derive(Debug)]
pub struct Auditor<G, R> {
    config: AuditConfig,
    getter: RetryingGetter<G>,
    registry: R,
}

impl<G: HttpsGetter + Sync, R: MeasurementRegistry + Sync> Auditor<G, R> {
    /// An auditor fetching collateral with `getter` and looking measurements
    /// up in `registry`.
    pub fn new(config: AuditConfig, getter: G, registry: R) -> Self {
        let getter = RetryingGetter::new(getter, &config.retry);
        Self {
            config,
            getter,
            registry,
        }
    }

    /// [`Auditor::validate_tdx_attestation_at`] at the current time.
    pub async fn validate_tdx_attestation(
        &self,
        body: &[u8],
        exporter_key: &[u8],
    ) -> Result<bool, AuditError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.validate_tdx_attestation_at(body, exporter_key, now).await
    }

    /// Verifies the quote in `body` with fresh collateral, applies the
    /// validation policy, requires the RPC domain separator and a registered
    /// measurement, then checks that the signer of `exporter_key` is the key
    /// committed to in the report data.
    ///
    /// `Ok(false)` means everything checked out except the final key match.
    pub async fn validate_tdx_attestation_at(
        &self,
        body: &[u8],
        exporter_key: &[u8],
        now: u64,
    ) -> Result<bool, AuditError> {
        let body = AttestationBody::parse(body)?;
        let raw_quote = hex_field("quote", &body.quote)?;

        let options = self.config.verify_options(now)?;
        let endpoints = PcsEndpoints::new(&self.config.pcs);
        let verified =
            verify_quote_with_collateral(&raw_quote, &self.getter, &endpoints, &options).await?;
        validate_quote(&verified.quote, &self.config.validation)?;

        let challenge = strip_domain_separator(&verified.quote.td_body.report_data)?;

        let variants = hash_variants(&verified.quote.td_body, &verified.extensions)?;
        if !verify_quote_registered(&self.registry, &variants).await? {
            return Err(ChallengeError::NotRegistered.into());
        }

        let bound = check_challenge(challenge, exporter_key, &body.signature)?;
        tracing::info!(
            bound,
            fmspc = %verified.extensions.fmspc,
            tcb_status = ?verified.tcb.as_ref().map(|t| &t.status),
            "TDX attestation checked"
        );
        Ok(bound)
    }
}

/// Checks `body` against `exporter_key` with the default configuration, the
/// Intel PCS and the registry contract at `registry_address` behind
/// `l1_rpc_url`.
pub async fn validate_tdx_attestation(
    body: &[u8],
    exporter_key: &[u8],
    l1_rpc_url: &str,
    registry_address: &str,
) -> Result<bool, AuditError> {
    let registry = EthRegistry::new(l1_rpc_url, registry_address)?;
    Auditor::new(AuditConfig::default(), ReqwestGetter::default(), registry)
        .validate_tdx_attestation(body, exporter_key)
        .await
}

#[cfg(test)]
mod should {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rstest::rstest;

    const EXPORTER_KEY: &[u8] = b"tls exporter secret";

    fn signing_key() -> SigningKey {
        SigningKey::from_slice(&[0x42; 32]).unwrap()
    }

    fn sign(key: &SigningKey, message: &[u8], v_offset: u8) -> String {
        let digest = sha256(&[SIGN_DOMAIN_SEPARATOR, message].concat());
        let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut raw = signature.to_bytes().to_vec();
        raw.push(recovery_id.to_byte() + v_offset);
        hex::encode(raw)
    }

    fn compressed(key: &SigningKey) -> Vec<u8> {
        key.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }

    fn challenge_for(key: &SigningKey) -> Vec<u8> {
        [&[0u8; 14][..], &sha256(&compressed(key))].concat()
    }

    #[rstest]
    #[case::raw_v(0, "")]
    #[case::ethereum_v(27, "")]
    #[case::prefixed(0, "0x")]
    fn recover_compressed_signer(#[case] v_offset: u8, #[case] prefix: &str) {
        let key = signing_key();
        let signature = format!("{prefix}{}", sign(&key, EXPORTER_KEY, v_offset));
        assert_eq!(
            recover_signature_pubkey(EXPORTER_KEY, &signature).unwrap().to_vec(),
            compressed(&key)
        );
    }

    #[test]
    fn reject_signature_of_wrong_length() {
        let signature = &sign(&signing_key(), EXPORTER_KEY, 0)[..128];
        assert_eq!(
            recover_signature_pubkey(EXPORTER_KEY, signature),
            Err(ChallengeError::SignatureLength(64))
        );
    }

    #[test]
    fn reject_unknown_recovery_byte() {
        let mut signature = sign(&signing_key(), EXPORTER_KEY, 0);
        signature.replace_range(128.., "05");
        assert_eq!(
            recover_signature_pubkey(EXPORTER_KEY, &signature),
            Err(ChallengeError::RecoveryId(5))
        );
    }

    #[test]
    fn bind_signer_committed_in_challenge() {
        let key = signing_key();
        let signature = sign(&key, EXPORTER_KEY, 27);
        assert_eq!(check_challenge(&challenge_for(&key), EXPORTER_KEY, &signature), Ok(true));
    }

    #[test]
    fn refuse_signature_over_other_exporter_key() {
        let key = signing_key();
        let signature = sign(&key, b"another session", 0);
        assert_eq!(check_challenge(&challenge_for(&key), EXPORTER_KEY, &signature), Ok(false));
    }

    #[test]
    fn reject_short_challenge() {
        let signature = sign(&signing_key(), EXPORTER_KEY, 0);
        assert_eq!(
            check_challenge(&[0u8; 31], EXPORTER_KEY, &signature),
            Err(ChallengeError::ChallengeTooShort(31))
        );
    }

    #[test]
    fn strip_rpc_domain_separator() {
        let report_data = [CHALLENGE_DOMAIN_SEPARATOR, &[7u8; 46]].concat();
        assert_eq!(strip_domain_separator(&report_data), Ok(&[7u8; 46][..]));
    }

    #[test]
    fn reject_report_data_built_for_alternate_purpose() {
        let report_data = [b"CUSTOM-RPC ATTEST;".as_slice(), &[7u8; 46]].concat();
        assert_eq!(
            strip_domain_separator(&report_data),
            Err(ChallengeError::AlternatePurpose)
        );
    }

    #[rstest]
    #[case::json(b"{\"quote\":\"00\",\"signature\":\"11\"}\n", true)]
    #[case::missing_signature(b"{\"quote\":\"00\"}", false)]
    #[case::not_json(b"quote=00", false)]
    #[case::not_utf8(&[0xff, 0xfe], false)]
    fn parse_attestation_body(#[case] body: &[u8], #[case] valid: bool) {
        assert_eq!(AttestationBody::parse(body).is_ok(), valid);
    }
}
