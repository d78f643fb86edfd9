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

//! Intel TDX attestation audit library.
//!
//! Decodes and verifies TDX quotes against Intel collateral, derives
//! measurement hashes for an on-chain registry and binds the attestation to
//! the TLS channel it was delivered over.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]

pub mod cert;
pub mod challenge;
pub mod config;
mod error;
pub mod intel;
pub mod measurements;
pub mod registry;
pub mod utils;

pub use crate::{
    cert::{CertificateError, TrustAnchor},
    challenge::{validate_tdx_attestation, Auditor, ChallengeError},
    config::{AuditConfig, PcsConfig, RetryConfig},
    error::{AuditError, ErrorKind},
    intel::{
        CollateralError, ParseError, Quote, ValidateOptions, ValidationError, VerificationError,
        VerifiedQuote, VerifyOptions,
    },
    measurements::{hash_variants, HashVariant, MeasurementError},
    registry::{verify_quote_registered, EthRegistry, MeasurementRegistry, RegistryError},
};

// =============================================================================
// Intel Specific
// =============================================================================

/// Parse an Intel TDX quote from binary data.
pub fn parse_quote(input: &[u8]) -> Result<Quote, ParseError> {
    Quote::from_bytes(input)
}
