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

use crate::cert::CertificateError;
use crate::challenge::ChallengeError;
use crate::intel::collaterals::CollateralError;
use crate::intel::pck::PckExtensionError;
use crate::intel::quote::ParseError;
use crate::intel::validate::ValidationError;
use crate::intel::verify::VerificationError;
use crate::measurements::MeasurementError;
use crate::registry::RegistryError;

/// Coarse classification of an [`AuditError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input that does not decode.
    Malformed,
    /// A well-formed input of a kind that is not handled.
    Unsupported,
    /// A certificate, CRL or signature did not check out.
    ChainTrust,
    /// Collateral could not be obtained within the retry budget.
    CollateralUnavailable,
    /// The platform or TD does not meet the required TCB or policy.
    Policy,
    /// A value is not bound to the key or channel it should be.
    Binding,
    /// The registry could not be queried.
    Registry,
}

/// Any failure of the audit entry point.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Quote verification failed.
    #[error(transparent)]
    Verification(#[from] VerificationError),
    /// The verified quote violates the validation policy.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Registry keys could not be derived.
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
    /// A registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The channel binding failed.
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    /// The configured trust anchor is unusable.
    #[error("invalid trust anchor: {0}")]
    TrustAnchor(#[from] CertificateError),
}

impl AuditError {
    /// Where the failure sits in the error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::Verification(e) => verification_kind(e),
            AuditError::Validation(_) => ErrorKind::Policy,
            AuditError::Measurement(_) => ErrorKind::Malformed,
            AuditError::Registry(RegistryError::InvalidAddress(_)) => ErrorKind::Malformed,
            AuditError::Registry(_) => ErrorKind::Registry,
            AuditError::Challenge(e) => match e {
                ChallengeError::AlternatePurpose | ChallengeError::Recovery(_) => {
                    ErrorKind::Binding
                }
                ChallengeError::NotRegistered => ErrorKind::Policy,
                _ => ErrorKind::Malformed,
            },
            AuditError::TrustAnchor(_) => ErrorKind::Malformed,
        }
    }
}

fn verification_kind(error: &VerificationError) -> ErrorKind {
    match error {
        VerificationError::Parse(e) => match e {
            ParseError::UnsupportedVersion(_)
            | ParseError::UnsupportedAttestationKeyType(_)
            | ParseError::UnsupportedTeeType(_)
            | ParseError::UnsupportedCertificationDataType { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Malformed,
        },
        VerificationError::PckExtension(PckExtensionError::UnknownIssuer(_)) => {
            ErrorKind::ChainTrust
        }
        VerificationError::PckExtension(_) => ErrorKind::Malformed,
        VerificationError::Certificate {
            source: CertificateError::Parse(_),
            ..
        } => ErrorKind::Malformed,
        VerificationError::Certificate { .. } => ErrorKind::ChainTrust,
        VerificationError::Collateral(e) => collateral_kind(e),
        VerificationError::Tcb(_) => ErrorKind::Policy,
        VerificationError::QuoteSignature(_) | VerificationError::QeReportSignature => {
            ErrorKind::ChainTrust
        }
        VerificationError::AttestationKeyBinding => ErrorKind::Binding,
        VerificationError::TcbInfoMismatch(_) | VerificationError::QeIdentityMismatch(_) => {
            ErrorKind::Policy
        }
    }
}

fn collateral_kind(error: &CollateralError) -> ErrorKind {
    match error {
        CollateralError::Unavailable { .. }
        | CollateralError::CrlUnavailable { .. }
        | CollateralError::MissingRevocationData
        | CollateralError::NoCrlDistributionPoint => ErrorKind::CollateralUnavailable,
        CollateralError::Parse { .. }
        | CollateralError::UnexpectedId { .. }
        | CollateralError::UnexpectedVersion { .. }
        | CollateralError::InvalidTcb(_)
        | CollateralError::IssuerChain { .. } => ErrorKind::Malformed,
        CollateralError::TooEarly(_)
        | CollateralError::Expired(_)
        | CollateralError::BadSignature(_)
        | CollateralError::Certificate { .. } => ErrorKind::ChainTrust,
    }
}
