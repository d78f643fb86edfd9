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

//! Decoding of the Intel SGX extension carried by PCK certificates.

use asn1_der::{
    typed::{DerDecodable, Sequence},
    DerObject,
};
use x509_verify::x509_cert::Certificate;

use crate::cert::common_name;
use crate::intel::constants::*;

const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SET: u8 = 0x31;

/// Errors raised while decoding the SGX extension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PckExtensionError {
    /// The certificate has no extensions at all.
    #[error("PCK certificate has no extensions")]
    NoExtensions,
    /// Zero or several SGX extensions.
    #[error("expected exactly one SGX extension, found {0}")]
    SgxExtensionCount(usize),
    /// The DER could not be decoded.
    #[error("malformed ASN.1 in {0}")]
    Asn1(&'static str),
    /// The SGX extension is shorter than the four required entries.
    #[error("SGX extension holds {0} entries, expected at least 4")]
    TooFewEntries(usize),
    /// A value had an unexpected ASN.1 tag.
    #[error("{field}: unexpected ASN.1 tag {tag:#04x}")]
    UnexpectedTag {
        /// Field being decoded.
        field: &'static str,
        /// Tag that was found.
        tag: u8,
    },
    /// A value had the wrong length.
    #[error("{field}: expected {expected} bytes, got {actual}")]
    FieldSize {
        /// Field being decoded.
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Length found.
        actual: usize,
    },
    /// A SET wrapper did not hold exactly one element.
    #[error("{0}: SET wrapper must hold exactly one value")]
    SetNotSingleton(&'static str),
    /// A required entry is absent.
    #[error("SGX extension is missing {0}")]
    MissingField(&'static str),
    /// The PCK leaf was issued by neither the Platform nor the Processor CA.
    #[error("unknown PCK issuer {0:?}")]
    UnknownIssuer(Option<String>),
}

/// The intermediate CA that issued a PCK certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PckCa {
    /// Intel SGX PCK Platform CA.
    Platform,
    /// Intel SGX PCK Processor CA.
    Processor,
}

impl PckCa {
    /// Reads the issuer common name of a PCK leaf.
    pub fn from_pck_certificate(cert: &Certificate) -> Result<Self, PckExtensionError> {
        match common_name(&cert.tbs_certificate.issuer).as_deref() {
            Some(PLATFORM_CA_PHRASE) => Ok(PckCa::Platform),
            Some(PROCESSOR_CA_PHRASE) => Ok(PckCa::Processor),
            other => Err(PckExtensionError::UnknownIssuer(other.map(str::to_owned))),
        }
    }

    /// Value of the `ca` query parameter of the PCK CRL endpoint.
    pub fn id(&self) -> &'static str {
        match self {
            PckCa::Platform => PLATFORM_CA_ID,
            PckCa::Processor => PROCESSOR_CA_ID,
        }
    }

    /// Subject common name of the CA certificate.
    pub fn phrase(&self) -> &'static str {
        match self {
            PckCa::Platform => PLATFORM_CA_PHRASE,
            PckCa::Processor => PROCESSOR_CA_PHRASE,
        }
    }
}

/// TCB values carried by the PCK certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PckCertTcb {
    /// Security version of the PCE.
    pub pce_svn: u16,
    /// The raw CPUSVN.
    pub cpu_svn: [u8; CPU_SVN_SIZE],
    /// The 16 SGX TCB component SVNs.
    pub cpu_svn_components: [u8; TCB_SVN_COUNT],
}

/// Platform identifiers and TCB decoded from a PCK certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PckExtensions {
    /// Platform provisioning id, lower case hex of 16 bytes.
    pub ppid: String,
    /// Platform TCB.
    pub tcb: PckCertTcb,
    /// PCE id, lower case hex of 2 bytes.
    pub pceid: String,
    /// Family-model-stepping-platform id, lower case hex of 6 bytes.
    pub fmspc: String,
}

/// Finds the single SGX extension of `cert` and decodes it.
pub fn extract_pck_extensions(cert: &Certificate) -> Result<PckExtensions, PckExtensionError> {
    let extensions = cert
        .tbs_certificate
        .extensions
        .as_ref()
        .ok_or(PckExtensionError::NoExtensions)?;
    let sgx: Vec<_> = extensions
        .iter()
        .filter(|e| e.extn_id == INTEL_SGX_OID)
        .collect();
    match sgx.as_slice() {
        [ext] => parse_sgx_extension(ext.extn_value.as_bytes()),
        others => Err(PckExtensionError::SgxExtensionCount(others.len())),
    }
}

/// Decodes the DER value of the SGX extension.
pub fn parse_sgx_extension(der: &[u8]) -> Result<PckExtensions, PckExtensionError> {
    let entries = decode_oid_value_pairs(der, "SGX extension")?;
    if entries.len() < SGX_EXTENSION_MIN_ENTRIES {
        return Err(PckExtensionError::TooFewEntries(entries.len()));
    }

    let mut ppid = None;
    let mut tcb = None;
    let mut pceid = None;
    let mut fmspc = None;
    for (oid, value) in entries {
        if oid == INTEL_PPID_OID.as_bytes() {
            ppid = Some(hex::encode(octets(value, "PPID", PPID_SIZE)?));
        } else if oid == INTEL_TCB_OID.as_bytes() {
            tcb = Some(parse_tcb(value)?);
        } else if oid == INTEL_PCEID_OID.as_bytes() {
            pceid = Some(hex::encode(octets(value, "PCEID", PCEID_SIZE)?));
        } else if oid == INTEL_FMSPC_OID.as_bytes() {
            fmspc = Some(hex::encode(octets(value, "FMSPC", FMSPC_SIZE)?));
        }
    }

    Ok(PckExtensions {
        ppid: ppid.ok_or(PckExtensionError::MissingField("PPID"))?,
        tcb: tcb.ok_or(PckExtensionError::MissingField("TCB"))?,
        pceid: pceid.ok_or(PckExtensionError::MissingField("PCEID"))?,
        fmspc: fmspc.ok_or(PckExtensionError::MissingField("FMSPC"))?,
    })
}

fn parse_tcb(value: DerObject<'_>) -> Result<PckCertTcb, PckExtensionError> {
    let value = unwrap_set(value, "TCB")?;
    let entries = decode_oid_value_pairs(value.raw(), "TCB")?;

    let mut components = [None; TCB_SVN_COUNT];
    let mut pce_svn = None;
    let mut cpu_svn = None;
    for (oid, value) in entries {
        // Sub-entries are the TCB OID plus one arc below 128.
        let Some(&[arc]) = oid.strip_prefix(INTEL_TCB_OID.as_bytes()) else {
            continue;
        };
        let value = unwrap_set(value, "TCB component")?;
        match u32::from(arc) {
            arc @ 1..=16 => {
                components[arc as usize - 1] = Some(
                    u8::load(value).map_err(|_| PckExtensionError::Asn1("TCB component SVN"))?,
                );
            }
            TCB_PCESVN_ARC => {
                pce_svn = Some(u16::load(value).map_err(|_| PckExtensionError::Asn1("PCESVN"))?);
            }
            TCB_CPUSVN_ARC => {
                cpu_svn = Some(octets(value, "CPUSVN", CPU_SVN_SIZE)?);
            }
            _ => {}
        }
    }

    let mut cpu_svn_components = [0u8; TCB_SVN_COUNT];
    for (slot, component) in cpu_svn_components.iter_mut().zip(components) {
        *slot = component.ok_or(PckExtensionError::MissingField("TCB component"))?;
    }
    let cpu_svn = cpu_svn.ok_or(PckExtensionError::MissingField("CPUSVN"))?;

    Ok(PckCertTcb {
        pce_svn: pce_svn.ok_or(PckExtensionError::MissingField("PCESVN"))?,
        cpu_svn: cpu_svn
            .try_into()
            .map_err(|_| PckExtensionError::Asn1("CPUSVN"))?,
        cpu_svn_components,
    })
}

/// Decodes a SEQUENCE of `SEQUENCE { OID, value }` pairs, returning the OID
/// content bytes and the value object of each pair.
fn decode_oid_value_pairs<'a>(
    der: &'a [u8],
    field: &'static str,
) -> Result<Vec<(&'a [u8], DerObject<'a>)>, PckExtensionError> {
    let object = DerObject::decode(der).map_err(|_| PckExtensionError::Asn1(field))?;
    if object.raw().len() != der.len() {
        return Err(PckExtensionError::Asn1(field));
    }
    let seq = Sequence::load(object).map_err(|_| PckExtensionError::Asn1(field))?;

    let mut pairs = Vec::with_capacity(seq.len());
    for i in 0..seq.len() {
        let elem = seq.get(i).map_err(|_| PckExtensionError::Asn1(field))?;
        let item = Sequence::load(elem).map_err(|_| PckExtensionError::Asn1(field))?;
        if item.len() != 2 {
            return Err(PckExtensionError::Asn1(field));
        }
        let oid = item.get(0).map_err(|_| PckExtensionError::Asn1(field))?;
        if oid.tag() != TAG_OID {
            return Err(PckExtensionError::UnexpectedTag {
                field,
                tag: oid.tag(),
            });
        }
        let value = item.get(1).map_err(|_| PckExtensionError::Asn1(field))?;
        pairs.push((oid.value(), value));
    }
    Ok(pairs)
}

/// Values may come wrapped in a SET of one element.
fn unwrap_set<'a>(
    value: DerObject<'a>,
    field: &'static str,
) -> Result<DerObject<'a>, PckExtensionError> {
    if value.tag() != TAG_SET {
        return Ok(value);
    }
    let inner = DerObject::decode(value.value()).map_err(|_| PckExtensionError::Asn1(field))?;
    if inner.raw().len() != value.value().len() {
        return Err(PckExtensionError::SetNotSingleton(field));
    }
    Ok(inner)
}

fn octets<'a>(
    value: DerObject<'a>,
    field: &'static str,
    size: usize,
) -> Result<&'a [u8], PckExtensionError> {
    let value = unwrap_set(value, field)?;
    if value.tag() != TAG_OCTET_STRING {
        return Err(PckExtensionError::UnexpectedTag {
            field,
            tag: value.tag(),
        });
    }
    let bytes = value.value();
    if bytes.len() != size {
        return Err(PckExtensionError::FieldSize {
            field,
            expected: size,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}
