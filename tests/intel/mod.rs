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

//! A self-contained Intel PKI, certification service and registry.
//!
//! Every certificate, CRL and collateral document is generated on the fly
//! and signed with throwaway keys, so the end-to-end tests never touch the
//! network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hex_literal::hex;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, CertificateRevocationListParams,
    CrlDistributionPoint, CustomExtension, DistinguishedName, DnType, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevokedCertParams, SerialNumber, PKCS_ECDSA_P256_SHA256,
};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use yasna::models::ObjectIdentifier;

use tdx_audit::challenge::{CHALLENGE_DOMAIN_SEPARATOR, SIGN_DOMAIN_SEPARATOR};
use tdx_audit::config::{AuditConfig, PcsConfig, RetryConfig};
use tdx_audit::intel::quote::{
    CertificationData, EnclaveReport, Header, PckCertChainData, QeReportCertificationData, Quote,
    SignedData, TdQuoteBody,
};
use tdx_audit::intel::verify::attestation_key_binding;
use tdx_audit::intel::{FetchError, HttpResponse, HttpsGetter};
use tdx_audit::{MeasurementRegistry, RegistryError};

/// 2025-01-15T00:00:00Z, inside every validity window below.
pub const NOW: u64 = 1_736_899_200;
/// 2025-02-01T00:00:01Z, one second past the collateral next update.
pub const AFTER_NEXT_UPDATE: u64 = 1_738_368_001;

pub const EXPORTER_KEY: &[u8] = b"tls exporter secret";

pub const TDX_BASE_URL: &str = "https://pcs.test/tdx/certification/v4";
pub const SGX_BASE_URL: &str = "https://pcs.test/sgx/certification/v4";
pub const ROOT_CRL_URL: &str = "https://certificates.test/IntelSGXRootCA.der";

pub const FMSPC: [u8; 6] = hex!("90c06f000000");
pub const PCE_SVN: u16 = 13;
pub const CPU_SVN: [u8; 16] = [2; 16];
pub const QE_ISV_SVN: u16 = 8;
pub const QE_MR_SIGNER: [u8; 32] = [0x44; 32];
pub const PCK_SERIAL: u8 = 3;

const SGX_ARCS: [u64; 7] = [1, 2, 840, 113741, 1, 13, 1];
const INTEL_QE_VENDOR_ID: [u8; 16] = hex!("939A7233F79C4CA9940A0DB3957F0607");

pub fn tcb_info_url() -> String {
    format!("{TDX_BASE_URL}/tcb?fmspc={}", hex::encode(FMSPC))
}

pub fn qe_identity_url() -> String {
    format!("{TDX_BASE_URL}/qe/identity")
}

pub fn pck_crl_url() -> String {
    format!("{SGX_BASE_URL}/pckcrl?ca=platform&encoding=der")
}

// =============================================================================
// PKI
// =============================================================================

pub struct Issued {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_pkcs8_der(&self.key.serialize_der()).unwrap()
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key().sign(data);
        signature.to_bytes().as_slice().try_into().unwrap()
    }
}

fn params(cn: &str, serial: u8, ca: bool) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Intel Corporation");
    dn.push(DnType::CountryName, "US");
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(vec![serial]));
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2030, 1, 1);
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    }
    params
}

fn new_key() -> KeyPair {
    KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap()
}

fn issue(params: CertificateParams, parent: &Issued) -> Issued {
    let key = new_key();
    let cert = params.signed_by(&key, &parent.cert, &parent.key).unwrap();
    Issued { cert, key }
}

pub fn make_root() -> Issued {
    let key = new_key();
    let mut p = params("Intel SGX Root CA", 1, true);
    p.crl_distribution_points = vec![CrlDistributionPoint {
        uris: vec![ROOT_CRL_URL.into()],
    }];
    Issued {
        cert: p.self_signed(&key).unwrap(),
        key,
    }
}

fn oid(suffix: &[u64]) -> ObjectIdentifier {
    let mut arcs = SGX_ARCS.to_vec();
    arcs.extend_from_slice(suffix);
    ObjectIdentifier::from_slice(&arcs)
}

/// DER of the SGX extension carried by the PCK leaf.
pub fn sgx_extension() -> Vec<u8> {
    yasna::construct_der(|w| {
        w.write_sequence(|w| {
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[1]));
                w.next().write_bytes(&[0x11; 16]);
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[2]));
                w.next().write_sequence(|w| {
                    for (i, svn) in CPU_SVN.iter().enumerate() {
                        w.next().write_sequence(|w| {
                            w.next().write_oid(&oid(&[2, i as u64 + 1]));
                            w.next().write_u8(*svn);
                        });
                    }
                    w.next().write_sequence(|w| {
                        w.next().write_oid(&oid(&[2, 17]));
                        w.next().write_u16(PCE_SVN);
                    });
                    w.next().write_sequence(|w| {
                        w.next().write_oid(&oid(&[2, 18]));
                        w.next().write_bytes(&CPU_SVN);
                    });
                });
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[3]));
                w.next().write_bytes(&[0x00, 0x00]);
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[4]));
                w.next().write_bytes(&FMSPC);
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[5]));
                w.next().write_enum(0);
            });
        });
    })
}

/// Root, PCK Platform CA, PCK leaf and TCB signing certificates.
pub struct Pki {
    pub root: Issued,
    pub platform: Issued,
    pub pck: Issued,
    pub tcb_signing: Issued,
}

impl Pki {
    pub fn new() -> Self {
        let root = make_root();
        let platform = issue(params("Intel SGX PCK Platform CA", 2, true), &root);

        let mut leaf = params("Intel SGX PCK Certificate", PCK_SERIAL, false);
        leaf.custom_extensions = vec![CustomExtension::from_oid_content(
            &SGX_ARCS,
            sgx_extension(),
        )];
        let pck = issue(leaf, &platform);

        let tcb_signing = issue(params("Intel SGX TCB Signing", 4, false), &root);
        Pki {
            root,
            platform,
            pck,
            tcb_signing,
        }
    }

    pub fn pck_chain_pem(&self) -> Vec<u8> {
        [self.pck.pem(), self.platform.pem(), self.root.pem()]
            .concat()
            .into_bytes()
    }
}

/// DER CRL issued by `issuer`, revoking `serials`.
pub fn crl(issuer: &Issued, serials: &[u8]) -> Vec<u8> {
    CertificateRevocationListParams {
        this_update: date_time_ymd(2025, 1, 1),
        next_update: date_time_ymd(2025, 2, 1),
        crl_number: SerialNumber::from(vec![1]),
        issuing_distribution_point: None,
        revoked_certs: serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from(vec![*serial]),
                revocation_time: date_time_ymd(2024, 12, 1),
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    }
    .signed_by(&issuer.cert, &issuer.key)
    .unwrap()
    .der()
    .to_vec()
}

fn issuer_chain(intermediate: &Issued, root: &Issued) -> HeaderValue {
    let pem = [intermediate.pem(), root.pem()].concat();
    HeaderValue::from_str(&utf8_percent_encode(&pem, NON_ALPHANUMERIC).to_string()).unwrap()
}

fn response(header: &'static str, chain: HeaderValue, body: Vec<u8>) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header, chain);
    HttpResponse { headers, body }
}

/// `{"<member>": <document>, "signature": "<hex>"}` signed by the TCB signer.
fn signed_document(member: &str, document: serde_json::Value, signer: &Issued) -> Vec<u8> {
    let raw = document.to_string();
    let signature = hex::encode(signer.sign(raw.as_bytes()));
    format!(r#"{{"{member}":{raw},"signature":"{signature}"}}"#).into_bytes()
}

// =============================================================================
// Collateral documents
// =============================================================================

fn components(svns: &[u8]) -> serde_json::Value {
    svns.iter().map(|svn| json!({ "svn": svn })).collect()
}

pub fn tcb_info() -> serde_json::Value {
    let mut tdx = [0u8; 16];
    tdx[2] = 2;
    json!({
        "id": "TDX",
        "version": 3,
        "issueDate": "2025-01-01T00:00:00Z",
        "nextUpdate": "2025-02-01T00:00:00Z",
        "fmspc": hex::encode_upper(FMSPC),
        "pceId": "0000",
        "tcbType": 0,
        "tcbEvaluationDataNumber": 17,
        "tdxModule": {
            "mrsigner": hex::encode([0u8; 48]),
            "attributes": "0000000000000000",
            "attributesMask": "FFFFFFFFFFFFFFFF"
        },
        "tdxModuleIdentities": [{
            "id": "TDX_01",
            "mrsigner": hex::encode([0u8; 48]),
            "attributes": "0000000000000000",
            "attributesMask": "FFFFFFFFFFFFFFFF",
            "tcbLevels": [
                { "tcb": { "isvsvn": 3 }, "tcbDate": "2024-03-13T00:00:00Z", "tcbStatus": "UpToDate" },
                { "tcb": { "isvsvn": 1 }, "tcbDate": "2023-08-09T00:00:00Z", "tcbStatus": "OutOfDate" }
            ]
        }],
        "tcbLevels": [{
            "tcb": {
                "sgxtcbcomponents": components(&CPU_SVN),
                "pcesvn": PCE_SVN,
                "tdxtcbcomponents": components(&tdx)
            },
            "tcbDate": "2024-03-13T00:00:00Z",
            "tcbStatus": "UpToDate",
            "advisoryIDs": ["INTEL-SA-00837"]
        }]
    })
}

pub fn qe_identity() -> serde_json::Value {
    json!({
        "id": "TD_QE",
        "version": 2,
        "issueDate": "2025-01-01T00:00:00Z",
        "nextUpdate": "2025-02-01T00:00:00Z",
        "tcbEvaluationDataNumber": 17,
        "miscselect": "00000000",
        "miscselectMask": "FFFFFFFF",
        "attributes": "11000000000000000000000000000000",
        "attributesMask": "FBFFFFFFFFFFFFFF0000000000000000",
        "mrsigner": hex::encode(QE_MR_SIGNER),
        "isvprodid": 2,
        "tcbLevels": [
            { "tcb": { "isvsvn": 8 }, "tcbDate": "2024-03-13T00:00:00Z", "tcbStatus": "UpToDate" },
            { "tcb": { "isvsvn": 0 }, "tcbDate": "2021-11-10T00:00:00Z", "tcbStatus": "OutOfDate" }
        ]
    })
}

// =============================================================================
// Certification service
// =============================================================================

/// Serves collateral for the [`Pki`] it was built from and records requests.
pub struct MockPcs {
    responses: HashMap<String, HttpResponse>,
    offline: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockPcs {
    pub fn new(pki: &Pki, revoked: &[u8]) -> Self {
        let responses = HashMap::from([
            (
                tcb_info_url(),
                response(
                    "tcb-info-issuer-chain",
                    issuer_chain(&pki.tcb_signing, &pki.root),
                    signed_document("tcbInfo", tcb_info(), &pki.tcb_signing),
                ),
            ),
            (
                qe_identity_url(),
                response(
                    "sgx-enclave-identity-issuer-chain",
                    issuer_chain(&pki.tcb_signing, &pki.root),
                    signed_document("enclaveIdentity", qe_identity(), &pki.tcb_signing),
                ),
            ),
            (
                pck_crl_url(),
                response(
                    "sgx-pck-crl-issuer-chain",
                    issuer_chain(&pki.platform, &pki.root),
                    crl(&pki.platform, revoked),
                ),
            ),
            (
                ROOT_CRL_URL.to_owned(),
                HttpResponse {
                    headers: HeaderMap::new(),
                    body: crl(&pki.root, &[]),
                },
            ),
        ]);
        Self {
            responses,
            offline: false,
            calls: Arc::default(),
        }
    }

    /// Every request fails with 503.
    pub fn offline() -> Self {
        Self {
            responses: HashMap::new(),
            offline: true,
            calls: Arc::default(),
        }
    }

    /// Shared log of requested URLs, readable after the getter moved.
    pub fn call_log(&self) -> CallLog {
        CallLog(self.calls.clone())
    }
}

#[derive(Clone)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn count(&self, url: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    pub fn total(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl HttpsGetter for MockPcs {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.calls.lock().unwrap().push(url.to_owned());
        let status = if self.offline { 503 } else { 404 };
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_owned(),
                status,
            })
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
pub struct MockRegistry {
    pub registered: Vec<[u8; 32]>,
    pub accept_all: bool,
    pub lookups: Mutex<usize>,
}

impl MockRegistry {
    pub fn accepting_all() -> Self {
        Self {
            accept_all: true,
            ..Default::default()
        }
    }

    pub fn with(registered: [u8; 32]) -> Self {
        Self {
            registered: vec![registered],
            ..Default::default()
        }
    }
}

impl MeasurementRegistry for MockRegistry {
    async fn is_measurement_registered(&self, measurement: [u8; 32]) -> Result<bool, RegistryError> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self.accept_all || self.registered.contains(&measurement))
    }
}

impl MeasurementRegistry for &MockRegistry {
    async fn is_measurement_registered(&self, measurement: [u8; 32]) -> Result<bool, RegistryError> {
        (**self).is_measurement_registered(measurement).await
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// A PKI, the TD's channel binding key and the quote attestation key.
pub struct World {
    pub pki: Pki,
    pub binding_key: k256::ecdsa::SigningKey,
    pub attestation_key: SigningKey,
}

impl World {
    pub fn new() -> Self {
        World {
            pki: Pki::new(),
            binding_key: k256::ecdsa::SigningKey::from_slice(&[0x42; 32]).unwrap(),
            attestation_key: SigningKey::from_slice(&[0x21; 32]).unwrap(),
        }
    }

    pub fn config(&self) -> AuditConfig {
        AuditConfig {
            pcs: PcsConfig {
                tdx_base_url: TDX_BASE_URL.into(),
                sgx_base_url: SGX_BASE_URL.into(),
            },
            retry: RetryConfig {
                initial_delay_secs: 2,
                max_delay_secs: 30,
                timeout_secs: 120,
            },
            trusted_roots: vec![self.pki.root.pem()],
            ..Default::default()
        }
    }

    pub fn pcs(&self) -> MockPcs {
        MockPcs::new(&self.pki, &[])
    }

    /// Report data committing to the binding key under `separator`.
    pub fn report_data(&self, separator: &[u8]) -> [u8; 64] {
        let compressed = self.binding_key.verifying_key().to_encoded_point(true);
        let key_hash = tdx_audit::utils::sha256(compressed.as_bytes());
        let mut report_data = [0u8; 64];
        report_data[..separator.len()].copy_from_slice(separator);
        report_data[32..].copy_from_slice(&key_hash);
        report_data
    }

    /// A production TD on TDX module 1.x whose report data binds the channel.
    pub fn body(&self) -> TdQuoteBody {
        let mut xfam = [0u8; 8];
        xfam[0] = 0x03;
        TdQuoteBody {
            tee_tcb_svn: [3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            mr_seam: [0x5e; 48],
            mr_signer_seam: [0; 48],
            seam_attributes: [0; 8],
            td_attributes: [0; 8],
            xfam,
            mr_td: [0x7d; 48],
            mr_config_id: [0; 48],
            mr_owner: [0; 48],
            mr_owner_config: [0; 48],
            rtmrs: [[0xa0; 48], [0xa1; 48], [0xa2; 48], [0xa3; 48]],
            report_data: self.report_data(CHALLENGE_DOMAIN_SEPARATOR),
        }
    }

    fn qe_report(&self, auth_data: &[u8]) -> EnclaveReport {
        let attestation_key = self.raw_attestation_key();
        let mut attributes = [0u8; 16];
        attributes[0] = 0x11;
        EnclaveReport {
            cpu_svn: CPU_SVN,
            misc_select: 0,
            reserved1: [0; 28],
            attributes,
            mr_enclave: [0x33; 32],
            reserved2: [0; 32],
            mr_signer: QE_MR_SIGNER,
            reserved3: [0; 96],
            isv_prod_id: 2,
            isv_svn: QE_ISV_SVN,
            reserved4: [0; 60],
            report_data: attestation_key_binding(&attestation_key, auth_data),
        }
    }

    fn raw_attestation_key(&self) -> [u8; 64] {
        let point = self.attestation_key.verifying_key().to_encoded_point(false);
        point.as_bytes()[1..].try_into().unwrap()
    }

    /// A quote over `body`, signed by the attestation key and vouched for by
    /// the PCK leaf.
    pub fn quote(&self, body: TdQuoteBody) -> Quote {
        let auth_data = vec![0x5a; 32];
        let qe_report = self.qe_report(&auth_data);
        let qe_report_signature = self.pki.pck.sign(&qe_report.to_bytes());

        let mut quote = Quote {
            header: Header {
                version: 4,
                attestation_key_type: 2,
                tee_type: 0x81,
                qe_svn: QE_ISV_SVN,
                pce_svn: PCE_SVN,
                qe_vendor_id: INTEL_QE_VENDOR_ID,
                user_data: [0; 20],
            },
            td_body: body,
            signed_data: SignedData {
                signature: [0; 64],
                attestation_key: self.raw_attestation_key(),
                certification_data: CertificationData::QeReport(QeReportCertificationData {
                    qe_report,
                    qe_report_signature,
                    qe_auth_data: auth_data,
                    pck_cert_chain: PckCertChainData::from_pem(&self.pki.pck_chain_pem())
                        .unwrap(),
                }),
            },
            extra_bytes: None,
        };
        let signature: Signature = self.attestation_key.sign(&quote.signed_message());
        quote.signed_data.signature = signature.to_bytes().as_slice().try_into().unwrap();
        quote
    }

    /// Hex signature of the binding key over the exporter key.
    pub fn sign_exporter_key(&self, exporter_key: &[u8]) -> String {
        let digest = tdx_audit::utils::sha256(&[SIGN_DOMAIN_SEPARATOR, exporter_key].concat());
        let (signature, recovery_id) = self.binding_key.sign_prehash_recoverable(&digest).unwrap();
        let mut raw = signature.to_bytes().to_vec();
        raw.push(recovery_id.to_byte() + 27);
        hex::encode(raw)
    }

    /// The JSON body a TD would post for `quote` on the channel of
    /// `exporter_key`.
    pub fn attestation(&self, quote: &Quote, exporter_key: &[u8]) -> Vec<u8> {
        json!({
            "quote": hex::encode(quote.to_bytes()),
            "signature": self.sign_exporter_key(exporter_key),
        })
        .to_string()
        .into_bytes()
    }
}
