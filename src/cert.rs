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

//! X.509 helpers: chain links, validity windows, CRLs and trust anchors.

use x509_verify::{
    x509_cert::{
        crl::CertificateList,
        der::{Decode, Encode},
        ext::pkix::{
            name::{DistributionPointName, GeneralName},
            CrlDistributionPoints,
        },
        name::Name,
        Certificate,
    },
    Signature, VerifyInfo, VerifyingKey,
};

use crate::intel::constants::{COMMON_NAME_OID, CRL_DISTRIBUTION_POINTS_OID};
use crate::utils::verify_p256_with_key;

/// Errors that can occur during certificate operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Failed to parse certificate data.
    #[error("failed to parse {0}")]
    Parse(&'static str),
    /// The parent key could not be used or rejected the signature.
    #[error("signature of {0} does not verify against its issuer key")]
    KeyVerification(String),
    /// The signature is invalid.
    #[error("invalid signature")]
    BadSignature,
    /// The subject common name is not the expected one.
    #[error("expected subject CN {expected:?}, found {found:?}")]
    UnexpectedSubject {
        /// Expected common name.
        expected: String,
        /// Common name found, if any.
        found: Option<String>,
    },
    /// The issuer name does not equal the parent subject name.
    #[error("issuer {issuer:?} does not match parent subject {parent:?}")]
    IssuerMismatch {
        /// Issuer of the child certificate.
        issuer: String,
        /// Subject of the parent certificate.
        parent: String,
    },
    /// The certificate has been revoked.
    #[error("certificate {0} has been revoked")]
    RevokedCertificate(String),
    /// The certificate is not yet valid.
    #[error("certificate {0} is not yet valid")]
    CertificateNotYetValid(String),
    /// The certificate has expired.
    #[error("certificate {0} has expired")]
    CertificateExpired(String),
    /// The CRL is past its next update.
    #[error("CRL issued by {0} has expired")]
    CrlExpired(String),
    /// A root is not among the trusted anchors.
    #[error("root certificate {0} is not a trusted anchor")]
    UntrustedRoot(String),
}

/// Root certificates a chain must end in.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    roots: Vec<Certificate>,
}

impl Default for TrustAnchor {
    /// The embedded Intel root, or an anchor that trusts nothing if it
    /// cannot be parsed.
    fn default() -> Self {
        Self::intel().unwrap_or_else(|e| {
            tracing::error!(%e, "embedded Intel root CA is unreadable");
            Self { roots: Vec::new() }
        })
    }
}

impl TrustAnchor {
    /// The Intel SGX root CA shipped with the crate.
    pub fn intel() -> Result<Self, CertificateError> {
        Self::from_pem_bundle(&[crate::intel::INTEL_ROOT_CA_PEM])
    }

    /// Builds an anchor from PEM strings, each holding one or more certificates.
    pub fn from_pem_bundle<S: AsRef<str>>(bundle: &[S]) -> Result<Self, CertificateError> {
        let mut roots = Vec::new();
        for pem in bundle {
            roots.extend(parse_pem_certificates(pem.as_ref().as_bytes())?);
        }
        if roots.is_empty() {
            return Err(CertificateError::Parse("empty trust anchor bundle"));
        }
        Ok(Self { roots })
    }

    /// Fails unless `cert` is byte-identical to one of the anchors.
    pub fn check(&self, cert: &Certificate) -> Result<(), CertificateError> {
        let der = cert.to_der().map_err(|_| CertificateError::Parse("certificate"))?;
        let trusted = self
            .roots
            .iter()
            .any(|root| root.to_der().map(|r| r == der).unwrap_or(false));
        if trusted {
            Ok(())
        } else {
            Err(CertificateError::UntrustedRoot(describe(cert)))
        }
    }
}

/// Parses a single DER certificate.
pub fn parse_der_certificate(der: &[u8]) -> Result<Certificate, CertificateError> {
    Certificate::from_der(der).map_err(|_| CertificateError::Parse("certificate"))
}

/// Parses every certificate in a PEM bundle.
pub fn parse_pem_certificates(pem: &[u8]) -> Result<Vec<Certificate>, CertificateError> {
    let pems = pem::parse_many(pem).map_err(|_| CertificateError::Parse("PEM"))?;
    pems.iter()
        .map(|pem| parse_der_certificate(pem.contents()))
        .collect()
}

/// Parses a DER CRL.
pub fn parse_crl(der: &[u8]) -> Result<CertificateList, CertificateError> {
    CertificateList::from_der(der).map_err(|_| CertificateError::Parse("CRL"))
}

/// First common name of `name`, if any.
pub fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == COMMON_NAME_OID)
        .and_then(|atv| core::str::from_utf8(atv.value.value()).ok())
        .map(str::to_owned)
}

fn describe(cert: &Certificate) -> String {
    common_name(&cert.tbs_certificate.subject)
        .unwrap_or_else(|| cert.tbs_certificate.subject.to_string())
}

fn verifying_key(cert: &Certificate) -> Result<VerifyingKey, CertificateError> {
    cert.tbs_certificate
        .subject_public_key_info
        .clone()
        .try_into()
        .map_err(|_| CertificateError::KeyVerification(describe(cert)))
}

/// Checks one link of a chain: the subject CN of `cert`, the issuer name
/// against the subject of `parent`, and the signature with `parent`'s key.
pub fn validate_certificate(
    cert: &Certificate,
    parent: &Certificate,
    expected_cn: &str,
) -> Result<(), CertificateError> {
    let found = common_name(&cert.tbs_certificate.subject);
    if found.as_deref() != Some(expected_cn) {
        return Err(CertificateError::UnexpectedSubject {
            expected: expected_cn.to_owned(),
            found,
        });
    }

    let issuer = cert.tbs_certificate.issuer.to_string();
    let parent_subject = parent.tbs_certificate.subject.to_string();
    if issuer != parent_subject {
        return Err(CertificateError::IssuerMismatch {
            issuer,
            parent: parent_subject,
        });
    }

    let verify_info = VerifyInfo::new(
        cert.tbs_certificate
            .to_der()
            .map_err(|_| CertificateError::Parse("TBS certificate"))?
            .into(),
        Signature::new(
            &cert.signature_algorithm,
            cert.signature
                .as_bytes()
                .ok_or(CertificateError::BadSignature)?,
        ),
    );
    verifying_key(parent)?
        .verify(&verify_info)
        .map_err(|_| CertificateError::KeyVerification(describe(cert)))
}

/// Checks the validity window of `cert` against `now` (unix seconds).
pub fn check_validity(cert: &Certificate, now: u64) -> Result<(), CertificateError> {
    let validity = &cert.tbs_certificate.validity;
    if now < validity.not_before.to_unix_duration().as_secs() {
        return Err(CertificateError::CertificateNotYetValid(describe(cert)));
    }
    if now > validity.not_after.to_unix_duration().as_secs() {
        return Err(CertificateError::CertificateExpired(describe(cert)));
    }
    Ok(())
}

/// Checks that `crl` was issued by `issuer` and carries its valid signature.
pub fn validate_crl(crl: &CertificateList, issuer: &Certificate) -> Result<(), CertificateError> {
    let crl_issuer = crl.tbs_cert_list.issuer.to_string();
    let subject = issuer.tbs_certificate.subject.to_string();
    if crl_issuer != subject {
        return Err(CertificateError::IssuerMismatch {
            issuer: crl_issuer,
            parent: subject,
        });
    }

    let verify_info = VerifyInfo::new(
        crl.tbs_cert_list
            .to_der()
            .map_err(|_| CertificateError::Parse("TBS CRL"))?
            .into(),
        Signature::new(
            &crl.signature_algorithm,
            crl.signature
                .as_bytes()
                .ok_or(CertificateError::BadSignature)?,
        ),
    );
    verifying_key(issuer)?
        .verify(&verify_info)
        .map_err(|_| CertificateError::KeyVerification(format!("CRL of {}", describe(issuer))))
}

/// A CRL without `nextUpdate` never expires.
pub fn check_crl_validity(crl: &CertificateList, now: u64) -> Result<(), CertificateError> {
    match &crl.tbs_cert_list.next_update {
        Some(next) if now > next.to_unix_duration().as_secs() => Err(
            CertificateError::CrlExpired(crl.tbs_cert_list.issuer.to_string()),
        ),
        _ => Ok(()),
    }
}

/// Fails if the serial number of `cert` is listed in `crl`.
pub fn check_not_revoked(crl: &CertificateList, cert: &Certificate) -> Result<(), CertificateError> {
    let serial = &cert.tbs_certificate.serial_number;
    let revoked = crl
        .tbs_cert_list
        .revoked_certificates
        .iter()
        .flatten()
        .any(|entry| entry.serial_number == *serial);
    if revoked {
        return Err(CertificateError::RevokedCertificate(format!(
            "{} (serial {})",
            describe(cert),
            hex::encode(serial.as_bytes())
        )));
    }
    Ok(())
}

/// URIs of the first CRL distribution point of `cert`.
pub fn crl_distribution_points(cert: &Certificate) -> Result<Vec<String>, CertificateError> {
    let Some(ext) = cert
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|e| e.extn_id == CRL_DISTRIBUTION_POINTS_OID)
    else {
        return Ok(Vec::new());
    };
    let points = CrlDistributionPoints::from_der(ext.extn_value.as_bytes())
        .map_err(|_| CertificateError::Parse("CRL distribution points"))?;

    let Some(Some(DistributionPointName::FullName(names))) =
        points.0.first().map(|p| p.distribution_point.as_ref())
    else {
        return Ok(Vec::new());
    };
    Ok(names
        .iter()
        .filter_map(|name| match name {
            GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
            _ => None,
        })
        .collect())
}

/// Verifies a raw `r || s` P-256 signature made with the key of `cert`.
pub fn verify_signature(
    cert: &Certificate,
    data: &[u8],
    signature: &[u8],
) -> Result<(), CertificateError> {
    let point = p256::EncodedPoint::from_bytes(
        cert.tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .as_bytes()
            .ok_or(CertificateError::BadSignature)?,
    )
    .map_err(|_| CertificateError::BadSignature)?;
    let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
        .map_err(|_| CertificateError::BadSignature)?;

    verify_p256_with_key(&key, data, signature).map_err(|_| CertificateError::BadSignature)
}
