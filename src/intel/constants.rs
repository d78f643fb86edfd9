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

//! Constants for Intel TDX quote parsing and verification.

use spki::ObjectIdentifier;

// =============================================================================
// Quote format discriminators
// =============================================================================

/// The only quote layout this crate decodes.
pub const QUOTE_VERSION_V4: u16 = 4;
/// ECDSA-256-with-P-256 curve attestation key type
pub const ATTESTATION_KEY_TYPE_ECDSA_256_P256: u16 = 2;
/// TEE type of a TDX quote (0x00000000 would be SGX).
pub const TEE_TYPE_TDX: u32 = 0x81;
/// Smallest buffer that can hold a v4 quote with its fixed parts.
pub const QUOTE_MIN_SIZE: usize = 0x3fc;

pub const INTEL_QE_VENDOR_ID: [u8; 16] = hex_literal::hex!("939A7233F79C4CA9940A0DB3957F0607");

// =============================================================================
// Top-level structure sizes
// =============================================================================

pub const QE_REPORT_SIZE: usize = 384;
pub const ECDSA_SIGNATURE_SIZE: usize = 64;
pub const ATTESTATION_KEY_SIZE: usize = 64;
pub const QUOTE_HEADER_SIZE: usize = 48;
pub const QUOTE_BODY_SIZE: usize = 584;
pub const SIGNED_DATA_LEN_SIZE: usize = 4;
pub const SIGNED_DATA_LEN_OFFSET: usize = QUOTE_HEADER_SIZE + QUOTE_BODY_SIZE;
pub const SIGNED_DATA_OFFSET: usize = SIGNED_DATA_LEN_OFFSET + SIGNED_DATA_LEN_SIZE;

// =============================================================================
// Certification data types
// =============================================================================

pub const CERT_DATA_TYPE_PCK_CHAIN: u16 = 5;
pub const CERT_DATA_TYPE_QE_REPORT: u16 = 6;

pub const CERT_DATA_TYPE_FIELD_SIZE: usize = 2;
pub const CERT_DATA_SIZE_FIELD: usize = 4;
pub const CERT_DATA_HEADER_SIZE: usize = CERT_DATA_TYPE_FIELD_SIZE + CERT_DATA_SIZE_FIELD;
pub const AUTH_DATA_SIZE_FIELD: usize = 2;

/// Leaf, intermediate and root.
pub const PCK_CHAIN_LENGTH: usize = 3;

// =============================================================================
// QuoteHeader field sizes
// =============================================================================

pub const HEADER_VERSION_SIZE: usize = 2;
pub const HEADER_ATTESTATION_KEY_TYPE_SIZE: usize = 2;
pub const HEADER_TEE_TYPE_SIZE: usize = 4;
pub const HEADER_QE_SVN_SIZE: usize = 2;
pub const HEADER_PCE_SVN_SIZE: usize = 2;
pub const HEADER_QE_VENDOR_ID_SIZE: usize = 16;
pub const HEADER_USER_DATA_SIZE: usize = 20;

// QuoteHeader field offsets (derived from sizes)
pub const HEADER_VERSION_OFFSET: usize = 0;
pub const HEADER_ATTESTATION_KEY_TYPE_OFFSET: usize = HEADER_VERSION_OFFSET + HEADER_VERSION_SIZE;
pub const HEADER_TEE_TYPE_OFFSET: usize =
    HEADER_ATTESTATION_KEY_TYPE_OFFSET + HEADER_ATTESTATION_KEY_TYPE_SIZE;
pub const HEADER_QE_SVN_OFFSET: usize = HEADER_TEE_TYPE_OFFSET + HEADER_TEE_TYPE_SIZE;
pub const HEADER_PCE_SVN_OFFSET: usize = HEADER_QE_SVN_OFFSET + HEADER_QE_SVN_SIZE;
pub const HEADER_QE_VENDOR_ID_OFFSET: usize = HEADER_PCE_SVN_OFFSET + HEADER_PCE_SVN_SIZE;
pub const HEADER_USER_DATA_OFFSET: usize = HEADER_QE_VENDOR_ID_OFFSET + HEADER_QE_VENDOR_ID_SIZE;

// =============================================================================
// TdQuoteBody field sizes
// =============================================================================

pub const BODY_TEE_TCB_SVN_SIZE: usize = 16;
pub const BODY_MRSEAM_SIZE: usize = 48;
pub const BODY_MRSIGNERSEAM_SIZE: usize = 48;
pub const BODY_SEAMATTRIBUTES_SIZE: usize = 8;
pub const BODY_TDATTRIBUTES_SIZE: usize = 8;
pub const BODY_XFAM_SIZE: usize = 8;
pub const BODY_MRTD_SIZE: usize = 48;
pub const BODY_MRCONFIGID_SIZE: usize = 48;
pub const BODY_MROWNER_SIZE: usize = 48;
pub const BODY_MROWNERCONFIG_SIZE: usize = 48;
pub const BODY_RTMR_SIZE: usize = 48;
pub const BODY_RTMR_COUNT: usize = 4;
pub const BODY_REPORTDATA_SIZE: usize = 64;

// TdQuoteBody field offsets (derived from sizes)
pub const BODY_TEE_TCB_SVN_OFFSET: usize = 0;
pub const BODY_MRSEAM_OFFSET: usize = BODY_TEE_TCB_SVN_OFFSET + BODY_TEE_TCB_SVN_SIZE;
pub const BODY_MRSIGNERSEAM_OFFSET: usize = BODY_MRSEAM_OFFSET + BODY_MRSEAM_SIZE;
pub const BODY_SEAMATTRIBUTES_OFFSET: usize = BODY_MRSIGNERSEAM_OFFSET + BODY_MRSIGNERSEAM_SIZE;
pub const BODY_TDATTRIBUTES_OFFSET: usize = BODY_SEAMATTRIBUTES_OFFSET + BODY_SEAMATTRIBUTES_SIZE;
pub const BODY_XFAM_OFFSET: usize = BODY_TDATTRIBUTES_OFFSET + BODY_TDATTRIBUTES_SIZE;
pub const BODY_MRTD_OFFSET: usize = BODY_XFAM_OFFSET + BODY_XFAM_SIZE;
pub const BODY_MRCONFIGID_OFFSET: usize = BODY_MRTD_OFFSET + BODY_MRTD_SIZE;
pub const BODY_MROWNER_OFFSET: usize = BODY_MRCONFIGID_OFFSET + BODY_MRCONFIGID_SIZE;
pub const BODY_MROWNERCONFIG_OFFSET: usize = BODY_MROWNER_OFFSET + BODY_MROWNER_SIZE;
pub const BODY_RTMR0_OFFSET: usize = BODY_MROWNERCONFIG_OFFSET + BODY_MROWNERCONFIG_SIZE;
pub const BODY_REPORTDATA_OFFSET: usize = BODY_RTMR0_OFFSET + BODY_RTMR_COUNT * BODY_RTMR_SIZE;

// =============================================================================
// EnclaveReport (QE report) field sizes
// =============================================================================

pub const REPORT_CPU_SVN_SIZE: usize = 16;
pub const REPORT_MISC_SELECT_SIZE: usize = 4;
pub const REPORT_RESERVED1_SIZE: usize = 28;
pub const REPORT_ATTRIBUTES_SIZE: usize = 16;
pub const REPORT_MR_ENCLAVE_SIZE: usize = 32;
pub const REPORT_RESERVED2_SIZE: usize = 32;
pub const REPORT_MR_SIGNER_SIZE: usize = 32;
pub const REPORT_RESERVED3_SIZE: usize = 96;
pub const REPORT_ISV_PROD_ID_SIZE: usize = 2;
pub const REPORT_ISV_SVN_SIZE: usize = 2;
pub const REPORT_RESERVED4_SIZE: usize = 60;
pub const REPORT_DATA_SIZE: usize = 64;

// EnclaveReport field offsets (derived from sizes)
pub const REPORT_CPU_SVN_OFFSET: usize = 0;
pub const REPORT_MISC_SELECT_OFFSET: usize = REPORT_CPU_SVN_OFFSET + REPORT_CPU_SVN_SIZE;
pub const REPORT_RESERVED1_OFFSET: usize = REPORT_MISC_SELECT_OFFSET + REPORT_MISC_SELECT_SIZE;
pub const REPORT_ATTRIBUTES_OFFSET: usize = REPORT_RESERVED1_OFFSET + REPORT_RESERVED1_SIZE;
pub const REPORT_MR_ENCLAVE_OFFSET: usize = REPORT_ATTRIBUTES_OFFSET + REPORT_ATTRIBUTES_SIZE;
pub const REPORT_RESERVED2_OFFSET: usize = REPORT_MR_ENCLAVE_OFFSET + REPORT_MR_ENCLAVE_SIZE;
pub const REPORT_MR_SIGNER_OFFSET: usize = REPORT_RESERVED2_OFFSET + REPORT_RESERVED2_SIZE;
pub const REPORT_RESERVED3_OFFSET: usize = REPORT_MR_SIGNER_OFFSET + REPORT_MR_SIGNER_SIZE;
pub const REPORT_ISV_PROD_ID_OFFSET: usize = REPORT_RESERVED3_OFFSET + REPORT_RESERVED3_SIZE;
pub const REPORT_ISV_SVN_OFFSET: usize = REPORT_ISV_PROD_ID_OFFSET + REPORT_ISV_PROD_ID_SIZE;
pub const REPORT_RESERVED4_OFFSET: usize = REPORT_ISV_SVN_OFFSET + REPORT_ISV_SVN_SIZE;
pub const REPORT_DATA_OFFSET: usize = REPORT_RESERVED4_OFFSET + REPORT_RESERVED4_SIZE;

// =============================================================================
// Intel OIDs
// =============================================================================

pub const INTEL_SGX_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113741.1.13.1");
pub const INTEL_PPID_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113741.1.13.1.1");
pub const INTEL_TCB_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113741.1.13.1.2");
pub const INTEL_PCEID_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113741.1.13.1.3");
pub const INTEL_FMSPC_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113741.1.13.1.4");
pub const CRL_DISTRIBUTION_POINTS_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.31");
pub const COMMON_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

// =============================================================================
// Certificate / TCB extraction constants
// =============================================================================

pub const TCB_SVN_COUNT: usize = 16;
pub const PPID_SIZE: usize = 16;
pub const PCEID_SIZE: usize = 2;
pub const FMSPC_SIZE: usize = 6;
pub const CPU_SVN_SIZE: usize = 16;
/// Last arc of the PCESVN entry inside the TCB sequence.
pub const TCB_PCESVN_ARC: u32 = 17;
/// Last arc of the CPUSVN entry inside the TCB sequence.
pub const TCB_CPUSVN_ARC: u32 = 18;
/// The SGX extension carries at least PPID, TCB, PCEID and FMSPC.
pub const SGX_EXTENSION_MIN_ENTRIES: usize = 4;

// =============================================================================
// Expected subject common names
// =============================================================================

pub const ROOT_CA_PHRASE: &str = "Intel SGX Root CA";
pub const PLATFORM_CA_PHRASE: &str = "Intel SGX PCK Platform CA";
pub const PROCESSOR_CA_PHRASE: &str = "Intel SGX PCK Processor CA";
pub const PCK_CERT_PHRASE: &str = "Intel SGX PCK Certificate";
pub const TCB_SIGNING_PHRASE: &str = "Intel SGX TCB Signing";

pub const PLATFORM_CA_ID: &str = "platform";
pub const PROCESSOR_CA_ID: &str = "processor";

// =============================================================================
// Collateral documents
// =============================================================================

pub const TCB_INFO_ID: &str = "TDX";
pub const TCB_INFO_VERSION: u8 = 3;
pub const QE_IDENTITY_ID: &str = "TD_QE";
pub const QE_IDENTITY_VERSION: u8 = 2;
pub const TDX_MODULE_ID_PREFIX: &str = "TDX_";

pub const TCB_INFO_ISSUER_CHAIN_HEADER: &str = "tcb-info-issuer-chain";
pub const QE_IDENTITY_ISSUER_CHAIN_HEADER: &str = "sgx-enclave-identity-issuer-chain";
pub const PCK_CRL_ISSUER_CHAIN_HEADER: &str = "sgx-pck-crl-issuer-chain";

// =============================================================================
// TD Attributes / XFAM policy
// =============================================================================

pub const XFAM_FIXED1: u64 = 0x0000_0003;
pub const XFAM_FIXED0: u64 = 0x0006_dbe7;

pub const TDATTRIBUTES_DEBUG: u64 = 1;
pub const TDATTRIBUTES_SEPT_VE_DISABLE: u64 = 1 << 28;
pub const TDATTRIBUTES_PKS: u64 = 1 << 30;
pub const TDATTRIBUTES_PERFMON: u64 = 1 << 63;
pub const TDATTRIBUTES_FIXED1: u64 = 0;
pub const TDATTRIBUTES_FIXED0: u64 =
    TDATTRIBUTES_DEBUG | TDATTRIBUTES_SEPT_VE_DISABLE | TDATTRIBUTES_PKS | TDATTRIBUTES_PERFMON;
