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

//! Policy checks on the fields of a verified quote.

use serde::{Deserialize, Serialize};

use crate::intel::constants::*;
use crate::intel::quote::Quote;
use crate::utils::{le_big_int, le_u64};

/// A quote field that does not satisfy the validation policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An expected value was configured with the wrong length.
    #[error("{field} option must be {expected} bytes, got {actual}")]
    OptionSize {
        /// Field name.
        field: String,
        /// Length of the quote field.
        expected: usize,
        /// Length of the configured value.
        actual: usize,
    },
    /// The RTMR option does not list exactly 4 entries.
    #[error("RTMR option lists {0} entries, expected 4")]
    RtmrCount(usize),
    /// A field differs from its expected value.
    #[error("{field} mismatch at byte {index}")]
    Mismatch {
        /// Field name.
        field: String,
        /// First differing byte.
        index: usize,
    },
    /// A security version is below its configured minimum.
    #[error("{field} {reported} is less than the required minimum {minimum}")]
    SvnTooLow {
        /// Field name.
        field: &'static str,
        /// Version reported by the quote.
        reported: u128,
        /// Configured minimum.
        minimum: u128,
    },
    /// Bits required to be set are clear.
    #[error("unauthorized {field} {value:#x}: fixed-1 bits {fixed1:#x} are not all set")]
    Fixed1 {
        /// Field name.
        field: &'static str,
        /// Reported value.
        value: u64,
        /// Required bits.
        fixed1: u64,
    },
    /// Bits required to be clear are set.
    #[error("unauthorized {field} {value:#x}: bits outside fixed-0 {fixed0:#x} are set")]
    Fixed0 {
        /// Field name.
        field: &'static str,
        /// Reported value.
        value: u64,
        /// Allowed bits.
        fixed0: u64,
    },
    /// The TD runs in debug mode.
    #[error("TD is in debug mode")]
    DebugTd,
}

/// Bytes that (de)serialize as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HexBytes(#[serde(with = "hex::serde")] pub Vec<u8>);

impl From<&[u8]> for HexBytes {
    fn from(bytes: &[u8]) -> Self {
        HexBytes(bytes.to_vec())
    }
}

/// Policy applied to a quote after its signatures and TCB have been checked.
///
/// Every expected value is optional and skipped when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateOptions {
    /// Minimum QE security version.
    pub minimum_qe_svn: Option<u16>,
    /// Minimum PCE security version.
    pub minimum_pce_svn: Option<u16>,
    /// Expected QE vendor id.
    pub qe_vendor_id: Option<HexBytes>,
    /// Minimum TEE TCB SVN, compared component by component.
    pub minimum_tee_tcb_svn: Option<HexBytes>,
    /// Expected MR_SEAM.
    pub mr_seam: Option<HexBytes>,
    /// Expected TD attributes.
    pub td_attributes: Option<HexBytes>,
    /// Expected XFAM.
    pub xfam: Option<HexBytes>,
    /// Expected MR_TD.
    pub mr_td: Option<HexBytes>,
    /// Expected MR_CONFIG_ID.
    pub mr_config_id: Option<HexBytes>,
    /// Expected MR_OWNER.
    pub mr_owner: Option<HexBytes>,
    /// Expected MR_OWNER_CONFIG.
    pub mr_owner_config: Option<HexBytes>,
    /// Expected RTMRs; an unset entry is not checked.
    pub rtmrs: Option<Vec<Option<HexBytes>>>,
    /// Expected report data.
    pub report_data: Option<HexBytes>,
    /// Reject TDs whose debug attribute is set.
    pub reject_debug: bool,
}

fn exact_match(
    field: &str,
    reported: &[u8],
    expected: Option<&HexBytes>,
) -> Result<(), ValidationError> {
    let Some(HexBytes(expected)) = expected else {
        return Ok(());
    };
    if expected.len() != reported.len() {
        return Err(ValidationError::OptionSize {
            field: field.to_owned(),
            expected: reported.len(),
            actual: expected.len(),
        });
    }
    match reported.iter().zip(expected).position(|(r, e)| r != e) {
        Some(index) => Err(ValidationError::Mismatch {
            field: field.to_owned(),
            index,
        }),
        None => Ok(()),
    }
}

fn check_fixed_bits(
    field: &'static str,
    value: u64,
    fixed1: u64,
    fixed0: u64,
) -> Result<(), ValidationError> {
    if value & fixed1 != fixed1 {
        return Err(ValidationError::Fixed1 {
            field,
            value,
            fixed1,
        });
    }
    if value & !fixed0 != 0 {
        return Err(ValidationError::Fixed0 {
            field,
            value,
            fixed0,
        });
    }
    Ok(())
}

fn minimum(field: &'static str, reported: u16, minimum: Option<u16>) -> Result<(), ValidationError> {
    match minimum {
        Some(minimum) if reported < minimum => Err(ValidationError::SvnTooLow {
            field,
            reported: reported.into(),
            minimum: minimum.into(),
        }),
        _ => Ok(()),
    }
}

/// Checks `quote` against `options`.
pub fn validate_quote(quote: &Quote, options: &ValidateOptions) -> Result<(), ValidationError> {
    let header = &quote.header;
    let body = &quote.td_body;

    exact_match("MR_SEAM", &body.mr_seam, options.mr_seam.as_ref())?;
    exact_match("TD_ATTRIBUTES", &body.td_attributes, options.td_attributes.as_ref())?;
    exact_match("XFAM", &body.xfam, options.xfam.as_ref())?;
    exact_match("MR_TD", &body.mr_td, options.mr_td.as_ref())?;
    exact_match("MR_CONFIG_ID", &body.mr_config_id, options.mr_config_id.as_ref())?;
    exact_match("MR_OWNER", &body.mr_owner, options.mr_owner.as_ref())?;
    exact_match(
        "MR_OWNER_CONFIG",
        &body.mr_owner_config,
        options.mr_owner_config.as_ref(),
    )?;
    if let Some(rtmrs) = &options.rtmrs {
        if rtmrs.len() != BODY_RTMR_COUNT {
            return Err(ValidationError::RtmrCount(rtmrs.len()));
        }
        for (i, (reported, expected)) in body.rtmrs.iter().zip(rtmrs).enumerate() {
            exact_match(&format!("RTMR[{i}]"), reported, expected.as_ref())?;
        }
    }
    exact_match("REPORT_DATA", &body.report_data, options.report_data.as_ref())?;
    exact_match("QE_VENDOR_ID", &header.qe_vendor_id, options.qe_vendor_id.as_ref())?;

    if let Some(HexBytes(required)) = &options.minimum_tee_tcb_svn {
        if required.len() != body.tee_tcb_svn.len() {
            return Err(ValidationError::OptionSize {
                field: "MINIMUM_TEE_TCB_SVN".into(),
                expected: body.tee_tcb_svn.len(),
                actual: required.len(),
            });
        }
        if body.tee_tcb_svn.iter().zip(required).any(|(r, m)| r < m) {
            return Err(ValidationError::SvnTooLow {
                field: "TEE TCB SVN",
                reported: le_big_int(&body.tee_tcb_svn).unwrap_or_default(),
                minimum: le_big_int(required).unwrap_or_default(),
            });
        }
    }
    minimum("QE SVN", header.qe_svn, options.minimum_qe_svn)?;
    minimum("PCE SVN", header.pce_svn, options.minimum_pce_svn)?;

    check_fixed_bits("XFAM", le_u64(&body.xfam), XFAM_FIXED1, XFAM_FIXED0)?;
    let td_attributes = le_u64(&body.td_attributes);
    check_fixed_bits(
        "TD attributes",
        td_attributes,
        TDATTRIBUTES_FIXED1,
        TDATTRIBUTES_FIXED0,
    )?;
    if options.reject_debug && td_attributes & TDATTRIBUTES_DEBUG != 0 {
        return Err(ValidationError::DebugTd);
    }
    Ok(())
}
