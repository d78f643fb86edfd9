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

//! Caller facing configuration of the audit entry point.

use serde::{Deserialize, Serialize};

use crate::cert::{CertificateError, TrustAnchor};
use crate::intel::validate::ValidateOptions;
use crate::intel::verify::VerifyOptions;

/// Intel PCS v4 TDX endpoints.
pub const INTEL_PCS_TDX_URL: &str = "https://api.trustedservices.intel.com/tdx/certification/v4";
/// Intel PCS v4 SGX endpoints, serving the PCK CRLs.
pub const INTEL_PCS_SGX_URL: &str = "https://api.trustedservices.intel.com/sgx/certification/v4";

/// Base URLs of the provisioning certification service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PcsConfig {
    /// Serves TCB info and QE identity.
    pub tdx_base_url: String,
    /// Serves PCK CRLs.
    pub sgx_base_url: String,
}

impl Default for PcsConfig {
    fn default() -> Self {
        Self {
            tdx_base_url: INTEL_PCS_TDX_URL.into(),
            sgx_base_url: INTEL_PCS_SGX_URL.into(),
        }
    }
}

/// Exponential backoff of collateral fetches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Delay after the first failed attempt.
    pub initial_delay_secs: u64,
    /// Upper bound of the doubling delay.
    pub max_delay_secs: u64,
    /// Wall-clock budget of one fetch including retries.
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 2,
            max_delay_secs: 30,
            timeout_secs: 120,
        }
    }
}

/// Everything the audit entry point needs besides its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    /// Certification service.
    pub pcs: PcsConfig,
    /// Fetch retries.
    pub retry: RetryConfig,
    /// Check every chain against CRLs.
    pub check_revocations: bool,
    /// PEM bundles replacing the embedded Intel root when not empty.
    pub trusted_roots: Vec<String>,
    /// Policy applied to the verified quote.
    pub validation: ValidateOptions,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            pcs: PcsConfig::default(),
            retry: RetryConfig::default(),
            check_revocations: true,
            trusted_roots: Vec::new(),
            validation: ValidateOptions::default(),
        }
    }
}

impl AuditConfig {
    /// The configured roots, or the embedded Intel root.
    pub fn trust_anchor(&self) -> Result<TrustAnchor, CertificateError> {
        if self.trusted_roots.is_empty() {
            TrustAnchor::intel()
        } else {
            TrustAnchor::from_pem_bundle(&self.trusted_roots)
        }
    }

    /// Options for a verification at `now`, collateral always fetched.
    pub fn verify_options(&self, now: u64) -> Result<VerifyOptions, CertificateError> {
        Ok(VerifyOptions {
            now,
            check_revocations: self.check_revocations,
            get_collateral: true,
            trust_anchor: self.trust_anchor()?,
        })
    }
}
