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

//! Quote verification pipeline: chain, collateral, signatures and TCB.

use x509_verify::x509_cert::Certificate;

use crate::cert::{
    check_not_revoked, check_validity, parse_der_certificate, validate_certificate,
    validate_crl, verify_signature, CertificateError, TrustAnchor,
};
use crate::intel::collaterals::{
    verify_collateral, CollateralError, EnclaveIdentity, RevocationCollateral, TcbInfo,
    TcbStatus, VerifiedCollateral,
};
use crate::intel::constants::*;
use crate::intel::fetch::{obtain_collateral, HttpsGetter, PcsEndpoints, RetryingGetter};
use crate::intel::pck::{extract_pck_extensions, PckCa, PckExtensionError, PckExtensions};
use crate::intel::quote::{EnclaveReport, ParseError, Quote, TdQuoteBody};
use crate::intel::tcb::{check_qe_tcb_status, evaluate_tcb, TcbError, TcbEvaluation};
use crate::utils::{sha256, verify_p256_raw, EcPublicJwk, EcdsaError};

/// Errors raised while verifying a quote.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The quote could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The PCK leaf extension could not be decoded.
    #[error(transparent)]
    PckExtension(#[from] PckExtensionError),
    /// A certificate of the PCK chain did not check out.
    #[error("PCK chain {context}: {source}")]
    Certificate {
        /// Which certificate or CRL was being checked.
        context: &'static str,
        /// Underlying failure.
        source: CertificateError,
    },
    /// Collateral could not be obtained or verified.
    #[error(transparent)]
    Collateral(#[from] CollateralError),
    /// TCB evaluation failed.
    #[error(transparent)]
    Tcb(#[from] TcbError),
    /// Header and body are not signed by the attestation key.
    #[error("quote signature does not verify: {0}")]
    QuoteSignature(EcdsaError),
    /// The QE report is not signed by the PCK leaf.
    #[error("QE report signature does not verify")]
    QeReportSignature,
    /// The QE report data does not commit to the attestation key.
    #[error("QE report data does not match SHA256(attestation key || QE auth data)")]
    AttestationKeyBinding,
    /// A field of the TD body or PCK extension differs from the TCB info.
    #[error("{0} does not match TCB info")]
    TcbInfoMismatch(&'static str),
    /// A field of the QE report differs from the QE identity.
    #[error("QE report {0} does not match QE identity")]
    QeIdentityMismatch(&'static str),
}

fn chain_err(context: &'static str) -> impl Fn(CertificateError) -> VerificationError {
    move |source| VerificationError::Certificate { context, source }
}

/// Per-call verification settings.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Current time, unix seconds.
    pub now: u64,
    /// Check the PCK chain and the collateral signers against CRLs.
    pub check_revocations: bool,
    /// Fetch TCB info and QE identity and evaluate the TCB.
    pub get_collateral: bool,
    /// Roots every chain must end in.
    pub trust_anchor: TrustAnchor,
}

impl VerifyOptions {
    /// Collateral and revocation checks on, at time `now`.
    pub fn new(now: u64, trust_anchor: TrustAnchor) -> Self {
        Self {
            now,
            check_revocations: true,
            get_collateral: true,
            trust_anchor,
        }
    }
}

/// The decoded PCK chain of a quote.
#[derive(Debug, Clone)]
pub struct PckCertChain {
    /// PCK certificate.
    pub leaf: Certificate,
    /// Platform or Processor CA.
    pub intermediate: Certificate,
    /// Root CA as embedded in the quote.
    pub root: Certificate,
    /// Decoded SGX extension of the leaf.
    pub extensions: PckExtensions,
    /// CA that issued the leaf.
    pub ca: PckCa,
}

/// A PCK chain that links to a trusted root and is neither expired nor revoked.
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// PCK certificate.
    pub leaf: Certificate,
    /// Decoded SGX extension of the leaf.
    pub extensions: PckExtensions,
    /// CA that issued the leaf.
    pub ca: PckCa,
}

/// A quote whose signatures, bindings and TCB have been checked.
#[derive(Debug, Clone)]
pub struct VerifiedQuote {
    /// The quote itself.
    pub quote: Quote,
    /// Platform identifiers from the PCK leaf.
    pub extensions: PckExtensions,
    /// Platform TCB evaluation, present when collateral was used.
    pub tcb: Option<TcbEvaluation>,
    /// QE TCB status, present when collateral was used.
    pub qe_tcb_status: Option<TcbStatus>,
    /// The attestation key.
    pub attestation_key: EcPublicJwk,
}

/// Parses the three certificates embedded in `quote` and the leaf extension.
pub fn extract_chain(quote: &Quote) -> Result<PckCertChain, VerificationError> {
    let mut certs = quote
        .qe_report_data()
        .pck_cert_chain
        .certificates
        .iter()
        .map(|der| parse_der_certificate(der));
    let (Some(leaf), Some(intermediate), Some(root), None) =
        (certs.next(), certs.next(), certs.next(), certs.next())
    else {
        return Err(ParseError::PckChainLength(
            quote.qe_report_data().pck_cert_chain.certificates.len(),
        )
        .into());
    };
    let leaf = leaf.map_err(chain_err("leaf"))?;
    let intermediate = intermediate.map_err(chain_err("intermediate"))?;
    let root = root.map_err(chain_err("root"))?;

    let extensions = extract_pck_extensions(&leaf)?;
    let ca = PckCa::from_pck_certificate(&leaf)?;
    tracing::debug!(fmspc = %extensions.fmspc, ca = ca.id(), "extracted PCK chain");

    Ok(PckCertChain {
        leaf,
        intermediate,
        root,
        extensions,
        ca,
    })
}

/// Checks names, signatures, validity and, when requested, revocation of
/// root, intermediate and leaf.
pub fn verify_pck_chain(
    chain: PckCertChain,
    revocation: Option<&RevocationCollateral>,
    options: &VerifyOptions,
) -> Result<VerifiedChain, VerificationError> {
    let PckCertChain {
        leaf,
        intermediate,
        root,
        extensions,
        ca,
    } = chain;

    options
        .trust_anchor
        .check(&root)
        .map_err(chain_err("root"))?;
    validate_certificate(&root, &root, ROOT_CA_PHRASE).map_err(chain_err("root"))?;
    validate_certificate(&intermediate, &root, ca.phrase()).map_err(chain_err("intermediate"))?;
    validate_certificate(&leaf, &intermediate, PCK_CERT_PHRASE).map_err(chain_err("leaf"))?;

    if options.check_revocations {
        let revocation = revocation.ok_or(CollateralError::MissingRevocationData)?;
        validate_crl(&revocation.root_crl, &root).map_err(chain_err("root CRL"))?;
        validate_crl(&revocation.pck_crl, &intermediate).map_err(chain_err("PCK CRL"))?;
        check_not_revoked(&revocation.root_crl, &intermediate)
            .map_err(chain_err("intermediate"))?;
        check_not_revoked(&revocation.pck_crl, &leaf).map_err(chain_err("leaf"))?;
    }

    check_validity(&root, options.now).map_err(chain_err("root"))?;
    check_validity(&intermediate, options.now).map_err(chain_err("intermediate"))?;
    check_validity(&leaf, options.now).map_err(chain_err("leaf"))?;

    tracing::debug!("PCK chain verified");
    Ok(VerifiedChain {
        leaf,
        extensions,
        ca,
    })
}

/// `SHA256(attestation key || QE auth data)` padded with zeros to the size
/// of the QE report data.
pub fn attestation_key_binding(attestation_key: &[u8], qe_auth_data: &[u8]) -> [u8; REPORT_DATA_SIZE] {
    let mut output = [0u8; REPORT_DATA_SIZE];
    output[..32].copy_from_slice(&sha256(&[attestation_key, qe_auth_data].concat()));
    output
}

/// The QE report data must commit to the attestation key and auth data.
pub fn check_attestation_key_binding(quote: &Quote) -> Result<(), VerificationError> {
    let qe = quote.qe_report_data();
    let expected = attestation_key_binding(&quote.signed_data.attestation_key, &qe.qe_auth_data);
    if qe.qe_report.report_data != expected {
        return Err(VerificationError::AttestationKeyBinding);
    }
    Ok(())
}

/// Checks the quote signature over header || body.
pub fn verify_quote_signature(quote: &Quote) -> Result<(), VerificationError> {
    verify_p256_raw(
        &quote.signed_data.attestation_key,
        &quote.signed_message(),
        &quote.signed_data.signature,
    )
    .map_err(VerificationError::QuoteSignature)
}

fn masked_eq(value: &[u8], mask: &[u8], expected: &[u8]) -> bool {
    value.len() == mask.len()
        && mask.len() == expected.len()
        && value
            .iter()
            .zip(mask)
            .zip(expected)
            .all(|((value, mask), expected)| value & mask == *expected)
}

/// Cross-checks the platform and the TDX module against `tcb_info`.
pub fn check_td_body(
    body: &TdQuoteBody,
    extensions: &PckExtensions,
    tcb_info: &TcbInfo,
) -> Result<(), VerificationError> {
    if !tcb_info.fmspc.eq_ignore_ascii_case(&extensions.fmspc) {
        return Err(VerificationError::TcbInfoMismatch("FMSPC"));
    }
    if !tcb_info.pce_id.eq_ignore_ascii_case(&extensions.pceid) {
        return Err(VerificationError::TcbInfoMismatch("PCEID"));
    }
    let module = &tcb_info.tdx_module;
    if module.mrsigner != body.mr_signer_seam {
        return Err(VerificationError::TcbInfoMismatch("MR_SIGNER_SEAM"));
    }
    if !masked_eq(&body.seam_attributes, &module.attributes_mask, &module.attributes) {
        return Err(VerificationError::TcbInfoMismatch("SEAM attributes"));
    }
    Ok(())
}

/// Cross-checks the QE report against the QE identity.
pub fn check_qe_identity(
    report: &EnclaveReport,
    identity: &EnclaveIdentity,
) -> Result<(), VerificationError> {
    if !masked_eq(
        &report.misc_select.to_le_bytes(),
        &identity.miscselect_mask,
        &identity.miscselect,
    ) {
        return Err(VerificationError::QeIdentityMismatch("MISCSELECT"));
    }
    if !masked_eq(&report.attributes, &identity.attributes_mask, &identity.attributes) {
        return Err(VerificationError::QeIdentityMismatch("attributes"));
    }
    if identity.mrsigner != report.mr_signer {
        return Err(VerificationError::QeIdentityMismatch("MRSIGNER"));
    }
    if identity.isv_prod_id != report.isv_prod_id {
        return Err(VerificationError::QeIdentityMismatch("ISVPRODID"));
    }
    Ok(())
}

/// Verifies the quote signature, the QE report signature and the attestation
/// key binding, then, with collateral, the TD body, QE identity and TCB.
pub fn verify_quote(
    quote: Quote,
    chain: &VerifiedChain,
    collateral: Option<&VerifiedCollateral>,
) -> Result<VerifiedQuote, VerificationError> {
    verify_quote_signature(&quote)?;

    let qe = quote.qe_report_data();
    verify_signature(&chain.leaf, &qe.qe_report.to_bytes(), &qe.qe_report_signature)
        .map_err(|_| VerificationError::QeReportSignature)?;
    check_attestation_key_binding(&quote)?;

    let (tcb, qe_tcb_status) = match collateral {
        Some(collateral) => {
            check_td_body(&quote.td_body, &chain.extensions, &collateral.tcb_info)?;
            let tcb = evaluate_tcb(
                &collateral.tcb_info,
                &quote.td_body.tee_tcb_svn,
                &chain.extensions.tcb,
            )?;
            check_qe_identity(&qe.qe_report, &collateral.qe_identity)?;
            let qe_status =
                check_qe_tcb_status(&collateral.qe_identity.tcb_levels, qe.qe_report.isv_svn)?;
            (Some(tcb), Some(qe_status))
        }
        None => (None, None),
    };

    tracing::debug!(tcb_status = ?tcb.as_ref().map(|t| &t.status), "quote verified");
    let attestation_key = EcPublicJwk::from_raw_p256(&quote.signed_data.attestation_key);
    Ok(VerifiedQuote {
        extensions: chain.extensions.clone(),
        quote,
        tcb,
        qe_tcb_status,
        attestation_key,
    })
}

/// Decodes `raw`, fetches collateral when `options.get_collateral` is set
/// and runs every verification stage.
pub async fn verify_quote_with_collateral<G: HttpsGetter + Sync>(
    raw: &[u8],
    getter: &RetryingGetter<G>,
    endpoints: &PcsEndpoints<'_>,
    options: &VerifyOptions,
) -> Result<VerifiedQuote, VerificationError> {
    let quote = Quote::from_bytes(raw)?;
    let chain = extract_chain(&quote)?;

    let collateral = if options.get_collateral {
        Some(
            obtain_collateral(
                getter,
                endpoints,
                &chain.extensions.fmspc,
                chain.ca,
                options.check_revocations,
            )
            .await?,
        )
    } else {
        None
    };

    let revocation = collateral.as_ref().and_then(|c| c.revocation.as_ref());
    let chain = verify_pck_chain(chain, revocation, options)?;
    let collateral = collateral
        .map(|c| verify_collateral(c, options))
        .transpose()?;
    verify_quote(quote, &chain, collateral.as_ref())
}
