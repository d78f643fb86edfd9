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

//! Binary layout of a version 4 TDX quote.
//!
//! Decoding is eager and strict: every fixed-size structure must be handed a
//! slice of exactly its size and every declared length must match the bytes
//! that follow it.

use crate::intel::constants::*;
use crate::utils::{le_u16, le_u32, to_array, LengthError};

/// Errors raised while decoding a quote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A fixed-size structure was given the wrong number of bytes.
    #[error("{structure}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Structure being decoded.
        structure: &'static str,
        /// Required size.
        expected: usize,
        /// Size that was provided.
        actual: usize,
    },
    /// Not enough bytes for a variable-size structure.
    #[error("{structure}: need at least {expected} bytes, got {actual}")]
    TooShort {
        /// Structure being decoded.
        structure: &'static str,
        /// Minimum size.
        expected: usize,
        /// Size that was provided.
        actual: usize,
    },
    /// A declared length disagrees with the bytes that follow it.
    #[error("{structure}: declared {declared} bytes but {actual} remain")]
    DeclaredSizeMismatch {
        /// Structure being decoded.
        structure: &'static str,
        /// Length read from the buffer.
        declared: usize,
        /// Bytes actually available.
        actual: usize,
    },
    /// Quote version other than 4.
    #[error("unsupported quote version {0}")]
    UnsupportedVersion(u16),
    /// Attestation key type other than ECDSA P-256.
    #[error("unsupported attestation key type {0}")]
    UnsupportedAttestationKeyType(u16),
    /// TEE type other than TDX.
    #[error("unsupported TEE type {0:#x}")]
    UnsupportedTeeType(u32),
    /// Certification data of a kind this crate does not handle.
    #[error("unsupported certification data type {found}, expected {expected}")]
    UnsupportedCertificationDataType {
        /// The only accepted type at this position.
        expected: u16,
        /// Type found in the quote.
        found: u16,
    },
    /// The embedded PCK chain is not valid PEM.
    #[error("invalid PEM in PCK certificate chain: {0}")]
    InvalidPem(String),
    /// The embedded PCK chain does not hold leaf, intermediate and root.
    #[error("PCK certificate chain holds {0} certificates, expected 3")]
    PckChainLength(usize),
}

fn fixed<const N: usize>(structure: &'static str, input: &[u8]) -> Result<[u8; N], ParseError> {
    to_array(input).map_err(|LengthError { expected, actual }| ParseError::SizeMismatch {
        structure,
        expected,
        actual,
    })
}

fn short(structure: &'static str) -> impl Fn(LengthError) -> ParseError {
    move |LengthError { expected, actual }| ParseError::TooShort {
        structure,
        expected,
        actual,
    }
}

fn require_len(structure: &'static str, input: &[u8], min: usize) -> Result<(), ParseError> {
    if input.len() < min {
        return Err(ParseError::TooShort {
            structure,
            expected: min,
            actual: input.len(),
        });
    }
    Ok(())
}

/// The 48 byte quote header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Version of the quote data structure.
    pub version: u16,
    /// Type of the Attestation Key used by the Quoting Enclave.
    /// 2 (ECDSA-256-with-P-256 curve) is the only supported value.
    pub attestation_key_type: u16,
    /// TEE for this attestation. 0x00000081 for TDX.
    pub tee_type: u32,
    /// Security version of the Quoting Enclave.
    pub qe_svn: u16,
    /// Security version of the Provisioning Certification Enclave.
    pub pce_svn: u16,
    /// Unique identifier of the QE Vendor.
    /// Value: 939A7233F79C4CA9940A0DB3957F0607 (Intel® SGX QE Vendor)
    pub qe_vendor_id: [u8; HEADER_QE_VENDOR_ID_SIZE],
    /// Custom user-defined data. For the Intel® TDX DCAP Quote Generation
    /// Libraries the first 16 bytes hold a Platform Identifier.
    pub user_data: [u8; HEADER_USER_DATA_SIZE],
}

impl Header {
    /// Decodes exactly [`QUOTE_HEADER_SIZE`] bytes.
    pub fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        let input: [u8; QUOTE_HEADER_SIZE] = fixed("header", input)?;
        Ok(Header {
            version: u16::from_le_bytes(fixed(
                "header",
                &input[HEADER_VERSION_OFFSET..HEADER_ATTESTATION_KEY_TYPE_OFFSET],
            )?),
            attestation_key_type: u16::from_le_bytes(fixed(
                "header",
                &input[HEADER_ATTESTATION_KEY_TYPE_OFFSET..HEADER_TEE_TYPE_OFFSET],
            )?),
            tee_type: u32::from_le_bytes(fixed(
                "header",
                &input[HEADER_TEE_TYPE_OFFSET..HEADER_QE_SVN_OFFSET],
            )?),
            qe_svn: u16::from_le_bytes(fixed(
                "header",
                &input[HEADER_QE_SVN_OFFSET..HEADER_PCE_SVN_OFFSET],
            )?),
            pce_svn: u16::from_le_bytes(fixed(
                "header",
                &input[HEADER_PCE_SVN_OFFSET..HEADER_QE_VENDOR_ID_OFFSET],
            )?),
            qe_vendor_id: fixed(
                "header",
                &input[HEADER_QE_VENDOR_ID_OFFSET..HEADER_USER_DATA_OFFSET],
            )?,
            user_data: fixed("header", &input[HEADER_USER_DATA_OFFSET..QUOTE_HEADER_SIZE])?,
        })
    }

    /// Encodes the header in the layout [`Header::from_bytes`] consumes.
    pub fn to_bytes(&self) -> [u8; QUOTE_HEADER_SIZE] {
        let mut output = [0u8; QUOTE_HEADER_SIZE];
        output[HEADER_VERSION_OFFSET..HEADER_ATTESTATION_KEY_TYPE_OFFSET]
            .copy_from_slice(&self.version.to_le_bytes());
        output[HEADER_ATTESTATION_KEY_TYPE_OFFSET..HEADER_TEE_TYPE_OFFSET]
            .copy_from_slice(&self.attestation_key_type.to_le_bytes());
        output[HEADER_TEE_TYPE_OFFSET..HEADER_QE_SVN_OFFSET]
            .copy_from_slice(&self.tee_type.to_le_bytes());
        output[HEADER_QE_SVN_OFFSET..HEADER_PCE_SVN_OFFSET]
            .copy_from_slice(&self.qe_svn.to_le_bytes());
        output[HEADER_PCE_SVN_OFFSET..HEADER_QE_VENDOR_ID_OFFSET]
            .copy_from_slice(&self.pce_svn.to_le_bytes());
        output[HEADER_QE_VENDOR_ID_OFFSET..HEADER_USER_DATA_OFFSET]
            .copy_from_slice(&self.qe_vendor_id);
        output[HEADER_USER_DATA_OFFSET..QUOTE_HEADER_SIZE].copy_from_slice(&self.user_data);
        output
    }

    /// Rejects anything but a v4, ECDSA P-256, TDX header.
    pub fn check(&self) -> Result<(), ParseError> {
        if self.version != QUOTE_VERSION_V4 {
            return Err(ParseError::UnsupportedVersion(self.version));
        }
        if self.attestation_key_type != ATTESTATION_KEY_TYPE_ECDSA_256_P256 {
            return Err(ParseError::UnsupportedAttestationKeyType(
                self.attestation_key_type,
            ));
        }
        if self.tee_type != TEE_TYPE_TDX {
            return Err(ParseError::UnsupportedTeeType(self.tee_type));
        }
        Ok(())
    }
}

/// Security versions of the TDX module and its loaders.
pub type TeeTcbSvn = [u8; BODY_TEE_TCB_SVN_SIZE];
/// A 48 byte measurement register.
pub type Measurement = [u8; BODY_MRTD_SIZE];

/// The TD report carried by the quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdQuoteBody {
    /// Describes the TCB of TDX.
    pub tee_tcb_svn: TeeTcbSvn,
    /// Measurement of the TDX Module.
    pub mr_seam: Measurement,
    /// Zero for the Intel® TDX Module.
    pub mr_signer_seam: Measurement,
    /// Must be zero for TDX 1.0
    pub seam_attributes: [u8; BODY_SEAMATTRIBUTES_SIZE],
    /// TD Attributes
    pub td_attributes: [u8; BODY_TDATTRIBUTES_SIZE],
    /// XFAM (eXtended Features Available Mask), same format as XCR0.
    pub xfam: [u8; BODY_XFAM_SIZE],
    /// Measurement of the initial contents of the TD.
    pub mr_td: Measurement,
    /// Software-defined ID for non-owner-defined configuration of the TD.
    pub mr_config_id: Measurement,
    /// Software-defined ID for the TD's owner
    pub mr_owner: Measurement,
    /// Software-defined ID for owner-defined configuration of the TD.
    pub mr_owner_config: Measurement,
    /// Runtime extendable measurement registers.
    pub rtmrs: [Measurement; BODY_RTMR_COUNT],
    /// 64 bytes of custom data chosen by the TD.
    pub report_data: [u8; BODY_REPORTDATA_SIZE],
}

impl TdQuoteBody {
    /// Decodes exactly [`QUOTE_BODY_SIZE`] bytes.
    pub fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        const S: &str = "TD quote body";
        let input: [u8; QUOTE_BODY_SIZE] = fixed(S, input)?;
        let rtmr = |i: usize| {
            let start = BODY_RTMR0_OFFSET + i * BODY_RTMR_SIZE;
            fixed(S, &input[start..start + BODY_RTMR_SIZE])
        };
        Ok(TdQuoteBody {
            tee_tcb_svn: fixed(S, &input[BODY_TEE_TCB_SVN_OFFSET..BODY_MRSEAM_OFFSET])?,
            mr_seam: fixed(S, &input[BODY_MRSEAM_OFFSET..BODY_MRSIGNERSEAM_OFFSET])?,
            mr_signer_seam: fixed(S, &input[BODY_MRSIGNERSEAM_OFFSET..BODY_SEAMATTRIBUTES_OFFSET])?,
            seam_attributes: fixed(S, &input[BODY_SEAMATTRIBUTES_OFFSET..BODY_TDATTRIBUTES_OFFSET])?,
            td_attributes: fixed(S, &input[BODY_TDATTRIBUTES_OFFSET..BODY_XFAM_OFFSET])?,
            xfam: fixed(S, &input[BODY_XFAM_OFFSET..BODY_MRTD_OFFSET])?,
            mr_td: fixed(S, &input[BODY_MRTD_OFFSET..BODY_MRCONFIGID_OFFSET])?,
            mr_config_id: fixed(S, &input[BODY_MRCONFIGID_OFFSET..BODY_MROWNER_OFFSET])?,
            mr_owner: fixed(S, &input[BODY_MROWNER_OFFSET..BODY_MROWNERCONFIG_OFFSET])?,
            mr_owner_config: fixed(S, &input[BODY_MROWNERCONFIG_OFFSET..BODY_RTMR0_OFFSET])?,
            rtmrs: [rtmr(0)?, rtmr(1)?, rtmr(2)?, rtmr(3)?],
            report_data: fixed(S, &input[BODY_REPORTDATA_OFFSET..QUOTE_BODY_SIZE])?,
        })
    }

    /// Encodes the body in the layout [`TdQuoteBody::from_bytes`] consumes.
    pub fn to_bytes(&self) -> [u8; QUOTE_BODY_SIZE] {
        let mut output = [0u8; QUOTE_BODY_SIZE];
        output[BODY_TEE_TCB_SVN_OFFSET..BODY_MRSEAM_OFFSET].copy_from_slice(&self.tee_tcb_svn);
        output[BODY_MRSEAM_OFFSET..BODY_MRSIGNERSEAM_OFFSET].copy_from_slice(&self.mr_seam);
        output[BODY_MRSIGNERSEAM_OFFSET..BODY_SEAMATTRIBUTES_OFFSET]
            .copy_from_slice(&self.mr_signer_seam);
        output[BODY_SEAMATTRIBUTES_OFFSET..BODY_TDATTRIBUTES_OFFSET]
            .copy_from_slice(&self.seam_attributes);
        output[BODY_TDATTRIBUTES_OFFSET..BODY_XFAM_OFFSET].copy_from_slice(&self.td_attributes);
        output[BODY_XFAM_OFFSET..BODY_MRTD_OFFSET].copy_from_slice(&self.xfam);
        output[BODY_MRTD_OFFSET..BODY_MRCONFIGID_OFFSET].copy_from_slice(&self.mr_td);
        output[BODY_MRCONFIGID_OFFSET..BODY_MROWNER_OFFSET].copy_from_slice(&self.mr_config_id);
        output[BODY_MROWNER_OFFSET..BODY_MROWNERCONFIG_OFFSET].copy_from_slice(&self.mr_owner);
        output[BODY_MROWNERCONFIG_OFFSET..BODY_RTMR0_OFFSET]
            .copy_from_slice(&self.mr_owner_config);
        for (i, rtmr) in self.rtmrs.iter().enumerate() {
            let start = BODY_RTMR0_OFFSET + i * BODY_RTMR_SIZE;
            output[start..start + BODY_RTMR_SIZE].copy_from_slice(rtmr);
        }
        output[BODY_REPORTDATA_OFFSET..QUOTE_BODY_SIZE].copy_from_slice(&self.report_data);
        output
    }
}

/// SGX report of the Quoting Enclave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveReport {
    /// Security version of the CPU.
    pub cpu_svn: [u8; REPORT_CPU_SVN_SIZE],
    /// SSA frame extended feature set.
    pub misc_select: u32,
    /// reserved
    pub reserved1: [u8; REPORT_RESERVED1_SIZE],
    /// Enclave attributes.
    pub attributes: [u8; REPORT_ATTRIBUTES_SIZE],
    /// Measurement of the enclave.
    pub mr_enclave: [u8; REPORT_MR_ENCLAVE_SIZE],
    /// reserved
    pub reserved2: [u8; REPORT_RESERVED2_SIZE],
    /// Hash of the enclave signer's public key.
    pub mr_signer: [u8; REPORT_MR_SIGNER_SIZE],
    /// reserved
    pub reserved3: [u8; REPORT_RESERVED3_SIZE],
    /// Product id of the enclave.
    pub isv_prod_id: u16,
    /// Security version of the enclave.
    pub isv_svn: u16,
    /// reserved
    pub reserved4: [u8; REPORT_RESERVED4_SIZE],
    /// SHA256(attestation key || QE authentication data) || 32 zero bytes.
    pub report_data: [u8; REPORT_DATA_SIZE],
}

impl EnclaveReport {
    /// Decodes exactly [`QE_REPORT_SIZE`] bytes.
    pub fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        const S: &str = "QE report";
        let input: [u8; QE_REPORT_SIZE] = fixed(S, input)?;
        Ok(EnclaveReport {
            cpu_svn: fixed(S, &input[REPORT_CPU_SVN_OFFSET..REPORT_MISC_SELECT_OFFSET])?,
            misc_select: le_u32(&input, REPORT_MISC_SELECT_OFFSET).map_err(short(S))?,
            reserved1: fixed(S, &input[REPORT_RESERVED1_OFFSET..REPORT_ATTRIBUTES_OFFSET])?,
            attributes: fixed(S, &input[REPORT_ATTRIBUTES_OFFSET..REPORT_MR_ENCLAVE_OFFSET])?,
            mr_enclave: fixed(S, &input[REPORT_MR_ENCLAVE_OFFSET..REPORT_RESERVED2_OFFSET])?,
            reserved2: fixed(S, &input[REPORT_RESERVED2_OFFSET..REPORT_MR_SIGNER_OFFSET])?,
            mr_signer: fixed(S, &input[REPORT_MR_SIGNER_OFFSET..REPORT_RESERVED3_OFFSET])?,
            reserved3: fixed(S, &input[REPORT_RESERVED3_OFFSET..REPORT_ISV_PROD_ID_OFFSET])?,
            isv_prod_id: le_u16(&input, REPORT_ISV_PROD_ID_OFFSET).map_err(short(S))?,
            isv_svn: le_u16(&input, REPORT_ISV_SVN_OFFSET).map_err(short(S))?,
            reserved4: fixed(S, &input[REPORT_RESERVED4_OFFSET..REPORT_DATA_OFFSET])?,
            report_data: fixed(S, &input[REPORT_DATA_OFFSET..QE_REPORT_SIZE])?,
        })
    }

    /// Encodes the report exactly as the PCK key signed it.
    pub fn to_bytes(&self) -> [u8; QE_REPORT_SIZE] {
        let mut output = [0u8; QE_REPORT_SIZE];
        output[REPORT_CPU_SVN_OFFSET..REPORT_MISC_SELECT_OFFSET].copy_from_slice(&self.cpu_svn);
        output[REPORT_MISC_SELECT_OFFSET..REPORT_RESERVED1_OFFSET]
            .copy_from_slice(&self.misc_select.to_le_bytes());
        output[REPORT_RESERVED1_OFFSET..REPORT_ATTRIBUTES_OFFSET].copy_from_slice(&self.reserved1);
        output[REPORT_ATTRIBUTES_OFFSET..REPORT_MR_ENCLAVE_OFFSET]
            .copy_from_slice(&self.attributes);
        output[REPORT_MR_ENCLAVE_OFFSET..REPORT_RESERVED2_OFFSET]
            .copy_from_slice(&self.mr_enclave);
        output[REPORT_RESERVED2_OFFSET..REPORT_MR_SIGNER_OFFSET].copy_from_slice(&self.reserved2);
        output[REPORT_MR_SIGNER_OFFSET..REPORT_RESERVED3_OFFSET].copy_from_slice(&self.mr_signer);
        output[REPORT_RESERVED3_OFFSET..REPORT_ISV_PROD_ID_OFFSET]
            .copy_from_slice(&self.reserved3);
        output[REPORT_ISV_PROD_ID_OFFSET..REPORT_ISV_SVN_OFFSET]
            .copy_from_slice(&self.isv_prod_id.to_le_bytes());
        output[REPORT_ISV_SVN_OFFSET..REPORT_RESERVED4_OFFSET]
            .copy_from_slice(&self.isv_svn.to_le_bytes());
        output[REPORT_RESERVED4_OFFSET..REPORT_DATA_OFFSET].copy_from_slice(&self.reserved4);
        output[REPORT_DATA_OFFSET..QE_REPORT_SIZE].copy_from_slice(&self.report_data);
        output
    }
}

/// The PCK certificate chain embedded in the quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PckCertChainData {
    /// PEM text exactly as it appears in the quote.
    pub pem: Vec<u8>,
    /// DER of leaf, intermediate and root, in that order.
    pub certificates: Vec<Vec<u8>>,
}

impl PckCertChainData {
    /// Splits a PEM chain and requires exactly leaf, intermediate and root.
    pub fn from_pem(pem_chain: &[u8]) -> Result<Self, ParseError> {
        let blocks =
            pem::parse_many(pem_chain).map_err(|e| ParseError::InvalidPem(e.to_string()))?;
        if blocks.len() != PCK_CHAIN_LENGTH {
            return Err(ParseError::PckChainLength(blocks.len()));
        }
        Ok(PckCertChainData {
            pem: pem_chain.to_vec(),
            certificates: blocks.into_iter().map(pem::Pem::into_contents).collect(),
        })
    }

    fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        const S: &str = "PCK certificate chain data";
        require_len(S, input, CERT_DATA_HEADER_SIZE)?;
        let data_type = le_u16(input, 0).map_err(short(S))?;
        if data_type != CERT_DATA_TYPE_PCK_CHAIN {
            return Err(ParseError::UnsupportedCertificationDataType {
                expected: CERT_DATA_TYPE_PCK_CHAIN,
                found: data_type,
            });
        }
        let size = le_u32(input, CERT_DATA_TYPE_FIELD_SIZE).map_err(short(S))? as usize;
        let chain = &input[CERT_DATA_HEADER_SIZE..];
        if size != chain.len() {
            return Err(ParseError::DeclaredSizeMismatch {
                structure: S,
                declared: size,
                actual: chain.len(),
            });
        }
        Self::from_pem(chain)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(CERT_DATA_HEADER_SIZE + self.pem.len());
        output.extend_from_slice(&CERT_DATA_TYPE_PCK_CHAIN.to_le_bytes());
        output.extend_from_slice(&(self.pem.len() as u32).to_le_bytes());
        output.extend_from_slice(&self.pem);
        output
    }
}

/// QE report, its signature, the QE authentication data and the PCK chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QeReportCertificationData {
    /// Report of the Quoting Enclave that generated the attestation key.
    pub qe_report: EnclaveReport,
    /// ECDSA signature over the QE report with the PCK.
    pub qe_report_signature: [u8; ECDSA_SIGNATURE_SIZE],
    /// Variable-length data chosen by the QE and bound into its report data.
    pub qe_auth_data: Vec<u8>,
    /// Certificates vouching for the PCK.
    pub pck_cert_chain: PckCertChainData,
}

impl QeReportCertificationData {
    fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        const S: &str = "QE report certification data";
        let auth_offset = QE_REPORT_SIZE + ECDSA_SIGNATURE_SIZE;
        require_len(S, input, auth_offset + AUTH_DATA_SIZE_FIELD)?;

        let qe_report = EnclaveReport::from_bytes(&input[..QE_REPORT_SIZE])?;
        let qe_report_signature = fixed(S, &input[QE_REPORT_SIZE..auth_offset])?;

        let auth_len = le_u16(input, auth_offset).map_err(short(S))? as usize;
        let auth_start = auth_offset + AUTH_DATA_SIZE_FIELD;
        let auth_end = auth_start + auth_len;
        require_len(S, input, auth_end + CERT_DATA_HEADER_SIZE)?;

        Ok(QeReportCertificationData {
            qe_report,
            qe_report_signature,
            qe_auth_data: input[auth_start..auth_end].to_vec(),
            pck_cert_chain: PckCertChainData::from_bytes(&input[auth_end..])?,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::new();
        output.extend_from_slice(&self.qe_report.to_bytes());
        output.extend_from_slice(&self.qe_report_signature);
        output.extend_from_slice(&(self.qe_auth_data.len() as u16).to_le_bytes());
        output.extend_from_slice(&self.qe_auth_data);
        output.extend_from_slice(&self.pck_cert_chain.to_bytes());
        output
    }
}

/// Certification data attached to the quote signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificationData {
    /// Type 6: QE report certification data.
    QeReport(QeReportCertificationData),
}

impl CertificationData {
    fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        const S: &str = "certification data";
        require_len(S, input, CERT_DATA_HEADER_SIZE)?;
        let data_type = le_u16(input, 0).map_err(short(S))?;
        if data_type != CERT_DATA_TYPE_QE_REPORT {
            return Err(ParseError::UnsupportedCertificationDataType {
                expected: CERT_DATA_TYPE_QE_REPORT,
                found: data_type,
            });
        }
        let size = le_u32(input, CERT_DATA_TYPE_FIELD_SIZE).map_err(short(S))? as usize;
        let data = &input[CERT_DATA_HEADER_SIZE..];
        if size != data.len() {
            return Err(ParseError::DeclaredSizeMismatch {
                structure: S,
                declared: size,
                actual: data.len(),
            });
        }
        Ok(CertificationData::QeReport(
            QeReportCertificationData::from_bytes(data)?,
        ))
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            CertificationData::QeReport(data) => {
                let inner = data.to_bytes();
                let mut output = Vec::with_capacity(CERT_DATA_HEADER_SIZE + inner.len());
                output.extend_from_slice(&CERT_DATA_TYPE_QE_REPORT.to_le_bytes());
                output.extend_from_slice(&(inner.len() as u32).to_le_bytes());
                output.extend_from_slice(&inner);
                output
            }
        }
    }

    /// The QE report certification data.
    pub fn qe_report_data(&self) -> &QeReportCertificationData {
        match self {
            CertificationData::QeReport(data) => data,
        }
    }
}

/// Version 4 of the ECDSA 256 bit signature data structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    /// Signature over header || body with the attestation key.
    pub signature: [u8; ECDSA_SIGNATURE_SIZE],
    /// Raw (x || y) P-256 attestation public key.
    pub attestation_key: [u8; ATTESTATION_KEY_SIZE],
    /// Data vouching for the attestation key.
    pub certification_data: CertificationData,
}

impl SignedData {
    fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        const S: &str = "signed data";
        let key_end = ECDSA_SIGNATURE_SIZE + ATTESTATION_KEY_SIZE;
        require_len(S, input, key_end)?;
        Ok(SignedData {
            signature: fixed(S, &input[..ECDSA_SIGNATURE_SIZE])?,
            attestation_key: fixed(S, &input[ECDSA_SIGNATURE_SIZE..key_end])?,
            certification_data: CertificationData::from_bytes(&input[key_end..])?,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::new();
        output.extend_from_slice(&self.signature);
        output.extend_from_slice(&self.attestation_key);
        output.extend_from_slice(&self.certification_data.to_bytes());
        output
    }
}

/// A decoded version 4 TDX quote. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// Quote header.
    pub header: Header,
    /// TD report.
    pub td_body: TdQuoteBody,
    /// Signature, attestation key and certification data.
    pub signed_data: SignedData,
    /// Bytes found after the declared signed data, if any.
    pub extra_bytes: Option<Vec<u8>>,
}

impl Quote {
    /// Decodes a raw quote buffer.
    pub fn from_bytes(input: &[u8]) -> Result<Self, ParseError> {
        require_len("quote", input, QUOTE_MIN_SIZE)?;

        let version = le_u16(input, HEADER_VERSION_OFFSET).map_err(short("quote"))?;
        if version != QUOTE_VERSION_V4 {
            return Err(ParseError::UnsupportedVersion(version));
        }

        let header = Header::from_bytes(&input[..QUOTE_HEADER_SIZE])?;
        header.check()?;
        let td_body = TdQuoteBody::from_bytes(&input[QUOTE_HEADER_SIZE..SIGNED_DATA_LEN_OFFSET])?;

        let signed_len = le_u32(input, SIGNED_DATA_LEN_OFFSET).map_err(short("quote"))? as usize;
        let signed_end = SIGNED_DATA_OFFSET + signed_len;
        if input.len() < signed_end {
            return Err(ParseError::DeclaredSizeMismatch {
                structure: "signed data",
                declared: signed_len,
                actual: input.len() - SIGNED_DATA_OFFSET,
            });
        }
        let signed_data = SignedData::from_bytes(&input[SIGNED_DATA_OFFSET..signed_end])?;
        let extra_bytes = (input.len() > signed_end).then(|| input[signed_end..].to_vec());

        Ok(Quote {
            header,
            td_body,
            signed_data,
            extra_bytes,
        })
    }

    /// Encodes the quote back into its wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let signed = self.signed_data.to_bytes();
        let mut output = self.signed_message();
        output.extend_from_slice(&(signed.len() as u32).to_le_bytes());
        output.extend_from_slice(&signed);
        if let Some(extra) = &self.extra_bytes {
            output.extend_from_slice(extra);
        }
        output
    }

    /// header || body, the bytes covered by the quote signature.
    pub fn signed_message(&self) -> Vec<u8> {
        [&self.header.to_bytes()[..], &self.td_body.to_bytes()[..]].concat()
    }

    /// Shortcut to the QE report certification data.
    pub fn qe_report_data(&self) -> &QeReportCertificationData {
        self.signed_data.certification_data.qe_report_data()
    }
}
