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

//! TCB info and QE identity documents, their issuer chains and CRLs.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use x509_verify::x509_cert::{crl::CertificateList, Certificate};

use crate::cert::{
    check_crl_validity, check_not_revoked, check_validity, parse_pem_certificates,
    validate_certificate, validate_crl, verify_signature, CertificateError, TrustAnchor,
};
use crate::intel::constants::{
    ECDSA_SIGNATURE_SIZE, QE_IDENTITY_ID, QE_IDENTITY_VERSION, ROOT_CA_PHRASE, TCB_INFO_ID,
    TCB_INFO_VERSION, TCB_SIGNING_PHRASE, TCB_SVN_COUNT,
};
use crate::intel::fetch::FetchError;
use crate::intel::pck::PckCa;
use crate::intel::VerifyOptions;

/// Errors that can occur while parsing, fetching or verifying collateral.
#[derive(Debug, thiserror::Error)]
pub enum CollateralError {
    /// Failed to parse collateral data.
    #[error("cannot parse {document}: {reason}")]
    Parse {
        /// Document being parsed.
        document: &'static str,
        /// Parser message.
        reason: String,
    },
    /// The document has an unexpected id.
    #[error("{document} id {found:?} does not match expected {expected:?}")]
    UnexpectedId {
        /// Document being checked.
        document: &'static str,
        /// Required id.
        expected: &'static str,
        /// Id found.
        found: String,
    },
    /// The document has an unexpected version.
    #[error("{document} version {found} does not match expected {expected}")]
    UnexpectedVersion {
        /// Document being checked.
        document: &'static str,
        /// Required version.
        expected: u8,
        /// Version found.
        found: u32,
    },
    /// The TCB levels are empty or malformed.
    #[error("{0} contains no usable TCB levels")]
    InvalidTcb(&'static str),
    /// The collateral is not yet valid.
    #[error("{0} is not yet valid")]
    TooEarly(&'static str),
    /// The collateral has expired.
    #[error("{0} has expired")]
    Expired(&'static str),
    /// The document signature is invalid.
    #[error("signature of {0} does not verify")]
    BadSignature(&'static str),
    /// An issuer chain header is missing or malformed.
    #[error("issuer chain {header}: {reason}")]
    IssuerChain {
        /// Response header carrying the chain.
        header: &'static str,
        /// What went wrong.
        reason: String,
    },
    /// A certificate or CRL in the collateral did not check out.
    #[error("collateral {context}: {source}")]
    Certificate {
        /// What was being checked.
        context: &'static str,
        /// Underlying failure.
        source: CertificateError,
    },
    /// Revocation checks were requested without revocation collateral.
    #[error("revocation check requested but no CRLs were obtained")]
    MissingRevocationData,
    /// The root certificate carries no CRL distribution point.
    #[error("root certificate declares no CRL distribution point")]
    NoCrlDistributionPoint,
    /// A document could not be fetched within the retry budget.
    #[error("collateral at {url} unavailable after {} attempts", .causes.len())]
    Unavailable {
        /// URL that was requested.
        url: String,
        /// Every failed attempt, in order.
        causes: Vec<FetchError>,
    },
    /// No distribution point delivered a usable CRL.
    #[error("CRL is unavailable ({} causes)", .causes.len())]
    CrlUnavailable {
        /// Failures of every distribution point, in order.
        causes: Vec<CollateralError>,
    },
}

fn cert_err(context: &'static str) -> impl Fn(CertificateError) -> CollateralError {
    move |source| CollateralError::Certificate { context, source }
}

/// A signed TCB status as published by Intel.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum TcbStatus {
    /// The platform is fully patched.
    UpToDate,
    /// Software hardening is needed.
    SWHardeningNeeded,
    /// Platform configuration is needed.
    ConfigurationNeeded,
    /// Configuration and software hardening are needed.
    ConfigurationAndSWHardeningNeeded,
    /// The TCB is out of date.
    OutOfDate,
    /// The TCB is out of date and configuration is needed.
    OutOfDateConfigurationNeeded,
    /// The TCB level has been revoked.
    Revoked,
}

/// One TCB level, ordered most capable first inside its table.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TcbLevel {
    /// Required security versions.
    pub tcb: Tcb,
    /// Date of the TCB recovery this level belongs to.
    pub tcb_date: String,
    /// Status of platforms matching this level.
    pub tcb_status: TcbStatus,
    /// Security advisories applying to this level.
    #[serde(rename = "advisoryIDs", default, skip_serializing_if = "Vec::is_empty")]
    pub advisory_ids: Vec<String>,
}

/// Security versions required by a [`TcbLevel`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Tcb {
    /// SGX TCB components, 16 entries.
    #[serde(rename = "sgxtcbcomponents", skip_serializing_if = "Option::is_none")]
    pub sgx_components: Option<Vec<TcbComponent>>,
    /// PCE security version.
    #[serde(rename = "pcesvn", skip_serializing_if = "Option::is_none")]
    pub pce_svn: Option<u16>,
    /// TDX TCB components, 16 entries.
    #[serde(rename = "tdxtcbcomponents", skip_serializing_if = "Option::is_none")]
    pub tdx_components: Option<Vec<TcbComponent>>,
    /// Enclave or module security version.
    #[serde(rename = "isvsvn", skip_serializing_if = "Option::is_none")]
    pub isv_svn: Option<u16>,
}

/// A single TCB component.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TcbComponent {
    /// Security version number.
    pub svn: u8,
    /// Component category, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Component type, informational.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
}

/// Identity of the TDX module expected on the platform.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TdxModule {
    /// Signer of the module.
    #[serde(with = "hex::serde")]
    pub mrsigner: Vec<u8>,
    /// Required SEAM attributes after masking.
    #[serde(with = "hex::serde")]
    pub attributes: Vec<u8>,
    /// Mask applied to the reported SEAM attributes.
    #[serde(with = "hex::serde")]
    pub attributes_mask: Vec<u8>,
}

/// Per-version identity of a TDX module, with its own TCB levels.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TdxModuleIdentity {
    /// `TDX_` followed by the module major version in hex.
    pub id: String,
    /// Signer of the module.
    #[serde(with = "hex::serde")]
    pub mrsigner: Vec<u8>,
    /// Required SEAM attributes after masking.
    #[serde(with = "hex::serde")]
    pub attributes: Vec<u8>,
    /// Mask applied to the reported SEAM attributes.
    #[serde(with = "hex::serde")]
    pub attributes_mask: Vec<u8>,
    /// Levels keyed on the module ISV SVN.
    pub tcb_levels: Vec<TcbLevel>,
}

/// The `tcbInfo` member of a TDX TCB info response.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbInfo {
    /// Always `TDX`.
    pub id: String,
    /// Always 3.
    pub version: u32,
    /// RFC 3339 issue date.
    pub issue_date: String,
    /// RFC 3339 date after which the document is stale.
    pub next_update: String,
    /// Hex FMSPC the document applies to.
    pub fmspc: String,
    /// Hex PCE id the document applies to.
    pub pce_id: String,
    /// TCB type.
    pub tcb_type: u32,
    /// Evaluation data number.
    pub tcb_evaluation_data_number: u32,
    /// Expected TDX module.
    pub tdx_module: TdxModule,
    /// Per-version TDX module identities.
    #[serde(default)]
    pub tdx_module_identities: Vec<TdxModuleIdentity>,
    /// Platform TCB levels.
    pub tcb_levels: Vec<TcbLevel>,
}

/// The `enclaveIdentity` member of a QE identity response.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclaveIdentity {
    /// Always `TD_QE`.
    pub id: String,
    /// Always 2.
    pub version: u32,
    /// RFC 3339 issue date.
    pub issue_date: String,
    /// RFC 3339 date after which the document is stale.
    pub next_update: String,
    /// Evaluation data number.
    pub tcb_evaluation_data_number: u32,
    /// Expected MISCSELECT after masking, 4 bytes.
    #[serde(with = "hex::serde")]
    pub miscselect: Vec<u8>,
    /// MISCSELECT mask, 4 bytes.
    #[serde(with = "hex::serde")]
    pub miscselect_mask: Vec<u8>,
    /// Expected attributes after masking, 16 bytes.
    #[serde(with = "hex::serde")]
    pub attributes: Vec<u8>,
    /// Attributes mask, 16 bytes.
    #[serde(with = "hex::serde")]
    pub attributes_mask: Vec<u8>,
    /// Expected MRSIGNER of the QE.
    #[serde(with = "hex::serde")]
    pub mrsigner: Vec<u8>,
    /// Expected product id of the QE.
    #[serde(rename = "isvprodid", alias = "isvProdID")]
    pub isv_prod_id: u16,
    /// Levels keyed on the QE ISV SVN.
    pub tcb_levels: Vec<TcbLevel>,
}

/// A document together with the exact bytes its signature covers.
#[derive(Clone, Debug)]
pub struct SignedDocument<T> {
    /// Decoded document.
    pub body: T,
    /// Raw JSON of the signed member.
    pub raw: Vec<u8>,
    /// Raw `r || s` signature over `raw`.
    pub signature: [u8; ECDSA_SIGNATURE_SIZE],
}

impl<T: DeserializeOwned> SignedDocument<T> {
    /// Parses a response of the form `{"<member>": {...}, "signature": "<hex>"}`.
    pub fn parse(input: &[u8], member: &'static str) -> Result<Self, CollateralError> {
        let parse_err = |reason: String| CollateralError::Parse {
            document: member,
            reason,
        };
        let envelope: HashMap<String, Box<RawValue>> =
            serde_json::from_slice(input).map_err(|e| parse_err(e.to_string()))?;

        let raw = envelope
            .get(member)
            .ok_or_else(|| parse_err(format!("missing {member:?} member")))?;
        let signature: String = envelope
            .get("signature")
            .ok_or_else(|| parse_err("missing signature".into()))
            .and_then(|s| serde_json::from_str(s.get()).map_err(|e| parse_err(e.to_string())))?;

        let mut signature_bytes = [0u8; ECDSA_SIGNATURE_SIZE];
        hex::decode_to_slice(&signature, &mut signature_bytes)
            .map_err(|e| parse_err(format!("signature: {e}")))?;

        Ok(SignedDocument {
            body: serde_json::from_str(raw.get()).map_err(|e| parse_err(e.to_string()))?,
            raw: raw.get().as_bytes().to_vec(),
            signature: signature_bytes,
        })
    }
}

impl<T> SignedDocument<T> {
    /// Checks the issuer chain and the document signature.
    ///
    /// When a root CRL is given, the signing certificate must not be on it.
    pub fn verify(
        &self,
        document: &'static str,
        issuer: &IssuerChain,
        root_crl: Option<&CertificateList>,
        anchor: &TrustAnchor,
    ) -> Result<(), CollateralError> {
        issuer.validate(TCB_SIGNING_PHRASE, anchor, document)?;
        verify_signature(&issuer.intermediate, &self.raw, &self.signature)
            .map_err(|_| CollateralError::BadSignature(document))?;

        if let Some(crl) = root_crl {
            validate_crl(crl, &issuer.root).map_err(cert_err("root CRL"))?;
            check_not_revoked(crl, &issuer.intermediate).map_err(cert_err(document))?;
        }
        Ok(())
    }
}

/// Signing certificate and root delivered in a response header.
#[derive(Clone, Debug)]
pub struct IssuerChain {
    /// Certificate that signed the document or CRL.
    pub intermediate: Certificate,
    /// Root the intermediate chains to.
    pub root: Certificate,
}

impl IssuerChain {
    /// Decodes a URL-encoded header value holding exactly two PEM blocks.
    pub fn from_header_value(header: &'static str, value: &str) -> Result<Self, CollateralError> {
        let chain_err = |reason: String| CollateralError::IssuerChain { header, reason };

        let decoded = percent_decode_str(value)
            .decode_utf8()
            .map_err(|e| chain_err(e.to_string()))?;
        let mut certs = parse_pem_certificates(decoded.as_bytes())
            .map_err(|e| chain_err(e.to_string()))?
            .into_iter();
        match (certs.next(), certs.next(), certs.next()) {
            (Some(intermediate), Some(root), None) => Ok(IssuerChain { intermediate, root }),
            _ => Err(chain_err(
                "expected 2 PEM blocks (intermediate and root)".into(),
            )),
        }
    }

    /// Root must be trusted and self signed, intermediate must be `expected_cn`
    /// issued by the root.
    pub fn validate(
        &self,
        expected_cn: &str,
        anchor: &TrustAnchor,
        context: &'static str,
    ) -> Result<(), CollateralError> {
        anchor.check(&self.root).map_err(cert_err(context))?;
        validate_certificate(&self.root, &self.root, ROOT_CA_PHRASE).map_err(cert_err(context))?;
        validate_certificate(&self.intermediate, &self.root, expected_cn)
            .map_err(cert_err(context))
    }

    fn check_validity(&self, now: u64, context: &'static str) -> Result<(), CollateralError> {
        check_validity(&self.intermediate, now).map_err(cert_err(context))?;
        check_validity(&self.root, now).map_err(cert_err(context))
    }
}

/// CRLs needed to check revocation of the PCK chain and the collateral signers.
#[derive(Clone, Debug)]
pub struct RevocationCollateral {
    /// CA that issued the PCK leaf.
    pub ca: PckCa,
    /// CRL of the PCK issuing CA.
    pub pck_crl: CertificateList,
    /// Chain of the PCK CRL issuer.
    pub pck_crl_issuer: IssuerChain,
    /// CRL of the root CA.
    pub root_crl: CertificateList,
}

/// Everything fetched from the certification service for one quote.
#[derive(Clone, Debug)]
pub struct Collateral {
    /// TDX TCB info for the platform FMSPC.
    pub tcb_info: SignedDocument<TcbInfo>,
    /// Chain of the TCB info signer.
    pub tcb_info_issuer: IssuerChain,
    /// Identity of the TD quoting enclave.
    pub qe_identity: SignedDocument<EnclaveIdentity>,
    /// Chain of the QE identity signer.
    pub qe_identity_issuer: IssuerChain,
    /// Present when revocation data was requested.
    pub revocation: Option<RevocationCollateral>,
}

/// Collateral whose signatures, chains and validity windows have been checked.
#[derive(Clone, Debug)]
pub struct VerifiedCollateral {
    /// Checked TCB info.
    pub tcb_info: TcbInfo,
    /// Checked QE identity.
    pub qe_identity: EnclaveIdentity,
}

impl TcbInfo {
    /// Structural checks on id, version and TCB levels.
    pub fn check(&self) -> Result<(), CollateralError> {
        if self.id != TCB_INFO_ID {
            return Err(CollateralError::UnexpectedId {
                document: "tcbInfo",
                expected: TCB_INFO_ID,
                found: self.id.clone(),
            });
        }
        if self.version != u32::from(TCB_INFO_VERSION) {
            return Err(CollateralError::UnexpectedVersion {
                document: "tcbInfo",
                expected: TCB_INFO_VERSION,
                found: self.version,
            });
        }
        let well_formed = |components: &Option<Vec<TcbComponent>>| {
            components
                .as_ref()
                .map_or(true, |c| c.len() == TCB_SVN_COUNT)
        };
        if self.tcb_levels.is_empty()
            || !self
                .tcb_levels
                .iter()
                .all(|l| well_formed(&l.tcb.sgx_components) && well_formed(&l.tcb.tdx_components))
        {
            return Err(CollateralError::InvalidTcb("tcbInfo"));
        }
        Ok(())
    }

    /// The issue date must have passed and the next update must not have.
    pub fn verify(&self, now: u64) -> Result<(), CollateralError> {
        check_dates("tcbInfo", &self.issue_date, &self.next_update, now)
    }
}

impl EnclaveIdentity {
    /// Structural checks on id, version and TCB levels.
    pub fn check(&self) -> Result<(), CollateralError> {
        if self.id != QE_IDENTITY_ID {
            return Err(CollateralError::UnexpectedId {
                document: "enclaveIdentity",
                expected: QE_IDENTITY_ID,
                found: self.id.clone(),
            });
        }
        if self.version != u32::from(QE_IDENTITY_VERSION) {
            return Err(CollateralError::UnexpectedVersion {
                document: "enclaveIdentity",
                expected: QE_IDENTITY_VERSION,
                found: self.version,
            });
        }
        if self.tcb_levels.is_empty() {
            return Err(CollateralError::InvalidTcb("enclaveIdentity"));
        }
        Ok(())
    }

    /// The issue date must have passed and the next update must not have.
    pub fn verify(&self, now: u64) -> Result<(), CollateralError> {
        check_dates("enclaveIdentity", &self.issue_date, &self.next_update, now)
    }
}

fn timestamp(document: &'static str, date: &str) -> Result<u64, CollateralError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(date).map_err(|e| CollateralError::Parse {
        document,
        reason: format!("date {date:?}: {e}"),
    })?;
    Ok(parsed.timestamp().max(0) as u64)
}

fn check_dates(
    document: &'static str,
    issue_date: &str,
    next_update: &str,
    now: u64,
) -> Result<(), CollateralError> {
    if now < timestamp(document, issue_date)? {
        return Err(CollateralError::TooEarly(document));
    }
    if now > timestamp(document, next_update)? {
        return Err(CollateralError::Expired(document));
    }
    Ok(())
}

/// Checks every signature, chain, revocation status and validity window of
/// `collateral` and hands back the documents.
pub fn verify_collateral(
    collateral: Collateral,
    options: &VerifyOptions,
) -> Result<VerifiedCollateral, CollateralError> {
    tracing::debug!("verifying collateral");
    let revocation = match (&collateral.revocation, options.check_revocations) {
        (None, true) => return Err(CollateralError::MissingRevocationData),
        (revocation, true) => revocation.as_ref(),
        (_, false) => None,
    };
    let root_crl = revocation.map(|r| &r.root_crl);

    collateral.tcb_info.body.check()?;
    collateral.qe_identity.body.check()?;

    collateral.tcb_info.verify(
        "tcbInfo",
        &collateral.tcb_info_issuer,
        root_crl,
        &options.trust_anchor,
    )?;
    collateral.qe_identity.verify(
        "enclaveIdentity",
        &collateral.qe_identity_issuer,
        root_crl,
        &options.trust_anchor,
    )?;

    let now = options.now;
    collateral.tcb_info.body.verify(now)?;
    collateral.qe_identity.body.verify(now)?;
    collateral
        .tcb_info_issuer
        .check_validity(now, "tcbInfo issuer chain")?;
    collateral
        .qe_identity_issuer
        .check_validity(now, "enclaveIdentity issuer chain")?;

    if let Some(revocation) = revocation {
        revocation.pck_crl_issuer.validate(
            revocation.ca.phrase(),
            &options.trust_anchor,
            "PCK CRL issuer chain",
        )?;
        validate_crl(&revocation.pck_crl, &revocation.pck_crl_issuer.intermediate)
            .map_err(cert_err("PCK CRL"))?;
        check_crl_validity(&revocation.root_crl, now).map_err(cert_err("root CRL"))?;
        check_crl_validity(&revocation.pck_crl, now).map_err(cert_err("PCK CRL"))?;
        revocation
            .pck_crl_issuer
            .check_validity(now, "PCK CRL issuer chain")?;
    }

    Ok(VerifiedCollateral {
        tcb_info: collateral.tcb_info.body,
        qe_identity: collateral.qe_identity.body,
    })
}
