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

//! Integration tests for the tdx-audit crate.
//!
//! These tests run the complete attestation workflow against a generated
//! Intel PKI: quote decoding, PCK chain and CRL checks, collateral retrieval
//! and verification, TCB evaluation, registry lookup and channel binding.

mod intel;

use assert_ok::assert_ok;

use intel::*;
use tdx_audit::intel::quote::TdQuoteBody;
use tdx_audit::intel::{
    verify_quote_with_collateral, CollateralError, PcsEndpoints, RetryingGetter, TcbStatus,
    VerifiedQuote,
};
use tdx_audit::measurements::hash_measurements;
use tdx_audit::{
    hash_variants, parse_quote, verify_quote_registered, AuditConfig, AuditError, Auditor,
    CertificateError, ChallengeError, ErrorKind, ParseError, ValidationError, VerificationError,
};

/// Registry key of the TD code only: `MRTD || RTMR0..3`.
fn code_td_hash(body: &TdQuoteBody) -> [u8; 32] {
    hash_measurements(&[&body.mr_td[..], &body.rtmrs.concat()].concat())
}

async fn audit(
    config: AuditConfig,
    pcs: MockPcs,
    registry: &MockRegistry,
    attestation: &[u8],
    now: u64,
) -> Result<bool, AuditError> {
    Auditor::new(config, pcs, registry)
        .validate_tdx_attestation_at(attestation, EXPORTER_KEY, now)
        .await
}

async fn verify(world: &World, pcs: MockPcs, quote: &[u8]) -> Result<VerifiedQuote, VerificationError> {
    let config = world.config();
    let getter = RetryingGetter::new(pcs, &config.retry);
    let options = config.verify_options(NOW).unwrap();
    verify_quote_with_collateral(quote, &getter, &PcsEndpoints::new(&config.pcs), &options).await
}

// =============================================================================
// End-to-End Attestation Tests
// =============================================================================

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn accept_registered_attestation_bound_to_channel() {
        let world = World::new();
        let body = world.body();
        let registry = MockRegistry::with(code_td_hash(&body));
        let pcs = world.pcs();
        let log = pcs.call_log();

        let attestation = world.attestation(&world.quote(body), EXPORTER_KEY);
        let bound = assert_ok!(audit(world.config(), pcs, &registry, &attestation, NOW).await);

        assert!(bound);
        assert_eq!(*registry.lookups.lock().unwrap(), 1);
        assert_eq!(log.count(&tcb_info_url()), 1);
        assert_eq!(log.count(&qe_identity_url()), 1);
        assert_eq!(log.count(&pck_crl_url()), 1);
        assert_eq!(log.count(ROOT_CRL_URL), 1);
    }

    #[tokio::test]
    async fn report_signature_over_other_channel_as_unbound() {
        let world = World::new();
        let quote = world.quote(world.body());
        let attestation = world.attestation(&quote, b"another tls session");

        let bound = audit(
            world.config(),
            world.pcs(),
            &MockRegistry::accepting_all(),
            &attestation,
            NOW,
        )
        .await;
        assert!(matches!(bound, Ok(false)));
    }

    #[tokio::test]
    async fn reject_quote_built_for_alternate_purpose() {
        let world = World::new();
        let mut body = world.body();
        body.report_data = world.report_data(b"CUSTOM-RPC OTHER:");
        let attestation = world.attestation(&world.quote(body), EXPORTER_KEY);

        let err = audit(
            world.config(),
            world.pcs(),
            &MockRegistry::accepting_all(),
            &attestation,
            NOW,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::Challenge(ChallengeError::AlternatePurpose)
        ));
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[tokio::test]
    async fn reject_unregistered_measurements_after_every_variant() {
        let world = World::new();
        let attestation = world.attestation(&world.quote(world.body()), EXPORTER_KEY);
        let registry = MockRegistry::default();

        let err = audit(world.config(), world.pcs(), &registry, &attestation, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Challenge(ChallengeError::NotRegistered)));
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert_eq!(*registry.lookups.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn accept_debug_td_unless_rejection_requested() {
        let world = World::new();
        let mut body = world.body();
        body.td_attributes[0] = 0x01;
        let attestation = world.attestation(&world.quote(body), EXPORTER_KEY);
        let registry = MockRegistry::accepting_all();

        assert!(assert_ok!(
            audit(world.config(), world.pcs(), &registry, &attestation, NOW).await
        ));

        let mut config = world.config();
        config.validation.reject_debug = true;
        let err = audit(config, world.pcs(), &registry, &attestation, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Validation(ValidationError::DebugTd)));
        assert_eq!(err.kind(), ErrorKind::Policy);
    }

    #[tokio::test]
    async fn reject_body_that_is_not_json() {
        let world = World::new();
        let err = audit(
            world.config(),
            world.pcs(),
            &MockRegistry::accepting_all(),
            b"quote=00",
            NOW,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuditError::Challenge(ChallengeError::InvalidBody(_))));
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}

// =============================================================================
// Quote Parsing Tests
// =============================================================================

mod quote_parsing {
    use super::*;

    #[test]
    fn parse_generated_quote() {
        let world = World::new();
        let quote = world.quote(world.body());
        assert_eq!(assert_ok!(parse_quote(&quote.to_bytes())), quote);
    }

    #[test]
    fn parse_truncated_quote_fails() {
        assert!(matches!(
            parse_quote(&[0u8; 10]),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[tokio::test]
    async fn classify_unknown_attestation_key_type_as_unsupported() {
        let world = World::new();
        let mut raw = world.quote(world.body()).to_bytes();
        raw[2] = 0xff;
        raw[3] = 0xff;
        assert!(matches!(
            parse_quote(&raw),
            Err(ParseError::UnsupportedAttestationKeyType(0xffff))
        ));

        let attestation = format!(r#"{{"quote":"{}","signature":"00"}}"#, hex::encode(raw));
        let err = audit(
            world.config(),
            world.pcs(),
            &MockRegistry::accepting_all(),
            attestation.as_bytes(),
            NOW,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}

// =============================================================================
// Chain Trust Tests
// =============================================================================

mod chain_trust {
    use super::*;

    #[tokio::test]
    async fn reject_revoked_pck_certificate() {
        let world = World::new();
        let attestation = world.attestation(&world.quote(world.body()), EXPORTER_KEY);
        let pcs = MockPcs::new(&world.pki, &[PCK_SERIAL]);

        let err = audit(
            world.config(),
            pcs,
            &MockRegistry::accepting_all(),
            &attestation,
            NOW,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::Verification(VerificationError::Certificate {
                context: "leaf",
                source: CertificateError::RevokedCertificate(_),
            })
        ));
        assert_eq!(err.kind(), ErrorKind::ChainTrust);
    }

    #[tokio::test]
    async fn skip_crls_when_revocation_checks_are_off() {
        let world = World::new();
        let attestation = world.attestation(&world.quote(world.body()), EXPORTER_KEY);
        let pcs = MockPcs::new(&world.pki, &[PCK_SERIAL]);
        let log = pcs.call_log();
        let mut config = world.config();
        config.check_revocations = false;

        let bound = audit(config, pcs, &MockRegistry::accepting_all(), &attestation, NOW).await;
        assert!(matches!(bound, Ok(true)));
        assert_eq!(log.count(&pck_crl_url()), 0);
        assert_eq!(log.count(ROOT_CRL_URL), 0);
    }

    #[tokio::test]
    async fn reject_chain_to_untrusted_root() {
        let world = World::new();
        let attestation = world.attestation(&world.quote(world.body()), EXPORTER_KEY);
        let mut config = world.config();
        config.trusted_roots = vec![make_root().pem()];

        let err = audit(
            config,
            world.pcs(),
            &MockRegistry::accepting_all(),
            &attestation,
            NOW,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::Verification(VerificationError::Certificate {
                context: "root",
                source: CertificateError::UntrustedRoot(_),
            })
        ));
        assert_eq!(err.kind(), ErrorKind::ChainTrust);
    }

    #[tokio::test]
    async fn reject_body_changed_after_signing() {
        let world = World::new();
        let mut quote = world.quote(world.body());
        quote.td_body.mr_td[0] ^= 0x01;

        let result = verify(&world, world.pcs(), &quote.to_bytes()).await;
        assert!(matches!(result, Err(VerificationError::QuoteSignature(_))));
    }
}

// =============================================================================
// Collateral Tests
// =============================================================================

mod collateral {
    use super::*;

    #[tokio::test]
    async fn evaluate_platform_module_and_qe_tcb() {
        let world = World::new();
        let quote = world.quote(world.body());

        let verified = assert_ok!(verify(&world, world.pcs(), &quote.to_bytes()).await);
        let tcb = verified.tcb.unwrap();
        assert_eq!(tcb.status, TcbStatus::UpToDate);
        assert_eq!(tcb.module_status, Some(TcbStatus::UpToDate));
        assert_eq!(tcb.advisory_ids, vec!["INTEL-SA-00837"]);
        assert_eq!(verified.qe_tcb_status, Some(TcbStatus::UpToDate));
        assert_eq!(verified.extensions.fmspc, hex::encode(FMSPC));
        assert_eq!(verified.attestation_key.crv, "P-256");
        assert_eq!(verified.quote, quote);
    }

    #[tokio::test]
    async fn reject_collateral_past_next_update() {
        let world = World::new();
        let attestation = world.attestation(&world.quote(world.body()), EXPORTER_KEY);

        let err = audit(
            world.config(),
            world.pcs(),
            &MockRegistry::accepting_all(),
            &attestation,
            AFTER_NEXT_UPDATE,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AuditError::Verification(VerificationError::Collateral(CollateralError::Expired(
                "tcbInfo"
            )))
        ));
        assert_eq!(err.kind(), ErrorKind::ChainTrust);
    }

    #[tokio::test(start_paused = true)]
    async fn give_up_on_unreachable_service_after_timeout() {
        let world = World::new();
        let attestation = world.attestation(&world.quote(world.body()), EXPORTER_KEY);
        let pcs = MockPcs::offline();
        let log = pcs.call_log();

        let err = audit(
            world.config(),
            pcs,
            &MockRegistry::accepting_all(),
            &attestation,
            NOW,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollateralUnavailable);
        let AuditError::Verification(VerificationError::Collateral(CollateralError::Unavailable {
            url,
            causes,
        })) = &err
        else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*url, tcb_info_url());
        assert!(causes.len() > 1);
        assert_eq!(log.total(), causes.len());
    }
}

// =============================================================================
// Registry Tests
// =============================================================================

mod registry {
    use super::*;

    #[tokio::test]
    async fn derive_registry_keys_from_verified_quote() {
        let world = World::new();
        let body = world.body();
        let quote = world.quote(body.clone());
        let verified = assert_ok!(verify(&world, world.pcs(), &quote.to_bytes()).await);

        let variants = assert_ok!(hash_variants(&verified.quote.td_body, &verified.extensions));
        assert_eq!(variants[0], code_td_hash(&body));

        let registry = MockRegistry::with(variants[2]);
        assert!(assert_ok!(verify_quote_registered(&registry, &variants).await));
        assert_eq!(*registry.lookups.lock().unwrap(), 3);
    }
}
