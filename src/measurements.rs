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

//! Registry keys derived from the measurements of a verified quote.
//!
//! Each variant concatenates a different subset of the TD body, optionally
//! with PCS identifiers, and hashes it as `SHA256(SHA256(..))`.

use crate::intel::pck::PckExtensions;
use crate::intel::quote::TdQuoteBody;
use crate::utils::{decode_hex, sha256};

/// Number of hash variants looked up in the registry.
pub const HASH_VARIANT_COUNT: usize = 5;

/// A PCK identifier is not valid hex.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("PCK {field} is not valid hex: {source}")]
pub struct MeasurementError {
    /// Identifier that failed to decode.
    pub field: &'static str,
    /// Decoder error.
    pub source: hex::FromHexError,
}

/// Trust granularity of a hash variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashVariant {
    /// MR_TD and the RTMRs.
    CodeTd,
    /// Every measurement register.
    CodeAll,
    /// Every register, attributes, XFAM and TEE TCB SVN.
    All,
    /// Every register, attributes, XFAM, FMSPC and PPID.
    AllPcs,
    /// Every register and FMSPC.
    CodeAllPcs,
}

impl HashVariant {
    /// Lookup order.
    pub const ALL: [HashVariant; HASH_VARIANT_COUNT] = [
        HashVariant::CodeTd,
        HashVariant::CodeAll,
        HashVariant::All,
        HashVariant::AllPcs,
        HashVariant::CodeAllPcs,
    ];
}

/// `SHA256(SHA256(input))`.
pub fn hash_measurements(input: &[u8]) -> [u8; 32] {
    sha256(&sha256(input))
}

fn identifier(field: &'static str, value: &str) -> Result<Vec<u8>, MeasurementError> {
    decode_hex(value).map_err(|source| MeasurementError { field, source })
}

/// Concatenates the fields covered by `variant`.
pub fn aggregate(
    variant: HashVariant,
    body: &TdQuoteBody,
    extensions: &PckExtensions,
) -> Result<Vec<u8>, MeasurementError> {
    let registers: [&[u8]; 6] = [
        &body.mr_config_id,
        &body.mr_owner,
        &body.mr_owner_config,
        &body.mr_seam,
        &body.mr_signer_seam,
        &body.mr_td,
    ];
    let rtmrs = body.rtmrs.concat();

    let mut output = Vec::new();
    match variant {
        HashVariant::CodeTd => {
            output.extend_from_slice(&body.mr_td);
            output.extend_from_slice(&rtmrs);
        }
        HashVariant::CodeAll => {
            output.extend(registers.concat());
            output.extend_from_slice(&rtmrs);
        }
        HashVariant::All => {
            output.extend(registers.concat());
            output.extend_from_slice(&body.seam_attributes);
            output.extend_from_slice(&body.td_attributes);
            output.extend_from_slice(&body.tee_tcb_svn);
            output.extend_from_slice(&body.xfam);
            output.extend_from_slice(&rtmrs);
        }
        HashVariant::AllPcs => {
            // TEE TCB SVN and report data change between machines and quotes.
            output.extend(registers.concat());
            output.extend_from_slice(&body.seam_attributes);
            output.extend_from_slice(&body.td_attributes);
            output.extend_from_slice(&body.xfam);
            output.extend_from_slice(&rtmrs);
            output.extend(identifier("FMSPC", &extensions.fmspc)?);
            output.extend(identifier("PPID", &extensions.ppid)?);
        }
        HashVariant::CodeAllPcs => {
            output.extend(registers.concat());
            output.extend_from_slice(&rtmrs);
            output.extend(identifier("FMSPC", &extensions.fmspc)?);
        }
    }
    Ok(output)
}

/// The hash of every variant, in lookup order.
pub fn hash_variants(
    body: &TdQuoteBody,
    extensions: &PckExtensions,
) -> Result<[[u8; 32]; HASH_VARIANT_COUNT], MeasurementError> {
    let mut hashes = [[0u8; 32]; HASH_VARIANT_COUNT];
    for (hash, variant) in hashes.iter_mut().zip(HashVariant::ALL) {
        *hash = hash_measurements(&aggregate(variant, body, extensions)?);
    }
    Ok(hashes)
}
