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

//! TCB level matching for the platform, the TDX module and the QE.

use crate::intel::collaterals::{TcbComponent, TcbInfo, TcbLevel, TcbStatus, TdxModuleIdentity};
use crate::intel::constants::TDX_MODULE_ID_PREFIX;
use crate::intel::pck::PckCertTcb;
use crate::intel::quote::TeeTcbSvn;

/// Errors raised while evaluating TCB status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TcbError {
    /// No platform level is dominated by the reported versions.
    #[error("no matching TCB level found, treating the platform as out of date")]
    NoMatchingLevel,
    /// The TCB info lists no identity for the running TDX module.
    #[error("no TDX module identity {0} in TCB info")]
    NoModuleIdentity(String),
    /// No level of the module identity is dominated by its ISV SVN.
    #[error("no TCB level of {id} matches module ISV SVN {isv_svn}")]
    NoModuleLevel {
        /// Module identity id.
        id: String,
        /// ISV SVN of the running module.
        isv_svn: u8,
    },
    /// No QE identity level is dominated by the QE ISV SVN.
    #[error("no QE identity TCB level matches ISV SVN {0}")]
    NoQeLevel(u16),
    /// The matching level is not up to date.
    #[error("{subject} TCB status is {status:?}, expected UpToDate")]
    NotUpToDate {
        /// Which table produced the status.
        subject: &'static str,
        /// Status of the matching level.
        status: TcbStatus,
    },
}

/// Outcome of the platform TCB evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcbEvaluation {
    /// Status of the matching platform level.
    pub status: TcbStatus,
    /// Date of the matching platform level.
    pub tcb_date: String,
    /// Advisories of the matching platform level.
    pub advisory_ids: Vec<String>,
    /// Status of the matching TDX module level, when the module is pinned.
    pub module_status: Option<TcbStatus>,
}

fn dominates(reported: &[u8], required: &Option<Vec<TcbComponent>>, start: usize) -> bool {
    let Some(required) = required else {
        return false;
    };
    reported.len() == required.len()
        && reported
            .iter()
            .zip(required)
            .skip(start)
            .all(|(reported, required)| *reported >= required.svn)
}

/// First level whose SGX components, PCE SVN and TDX components are all
/// dominated by the reported values.
///
/// When `tee_tcb_svn[1]` is set the module version is pinned and the first two
/// TDX components are left to the module identity lookup.
pub fn get_matching_tcb_level<'a>(
    levels: &'a [TcbLevel],
    tee_tcb_svn: &TeeTcbSvn,
    pck_tcb: &PckCertTcb,
) -> Result<&'a TcbLevel, TcbError> {
    let tdx_start = if tee_tcb_svn[1] > 0 { 2 } else { 0 };
    levels
        .iter()
        .find(|level| {
            dominates(&pck_tcb.cpu_svn_components, &level.tcb.sgx_components, 0)
                && level
                    .tcb
                    .pce_svn
                    .is_some_and(|required| pck_tcb.pce_svn >= required)
                && dominates(tee_tcb_svn, &level.tcb.tdx_components, tdx_start)
        })
        .ok_or(TcbError::NoMatchingLevel)
}

/// Id of the module identity for a TEE TCB SVN: `TDX_` and the major version.
pub fn tdx_module_identity_id(tee_tcb_svn: &TeeTcbSvn) -> String {
    format!("{TDX_MODULE_ID_PREFIX}{:02X}", tee_tcb_svn[1])
}

/// Looks up the identity of the running module and its first level
/// dominated by the module ISV SVN, `tee_tcb_svn[0]`.
pub fn get_matching_tdx_module_level<'a>(
    identities: &'a [TdxModuleIdentity],
    tee_tcb_svn: &TeeTcbSvn,
) -> Result<&'a TcbLevel, TcbError> {
    let id = tdx_module_identity_id(tee_tcb_svn);
    let identity = identities
        .iter()
        .find(|identity| identity.id.eq_ignore_ascii_case(&id))
        .ok_or_else(|| TcbError::NoModuleIdentity(id.clone()))?;

    let isv_svn = tee_tcb_svn[0];
    identity
        .tcb_levels
        .iter()
        .find(|level| {
            level
                .tcb
                .isv_svn
                .is_some_and(|required| u16::from(isv_svn) >= required)
        })
        .ok_or(TcbError::NoModuleLevel { id, isv_svn })
}

fn require_up_to_date(subject: &'static str, status: &TcbStatus) -> Result<(), TcbError> {
    if *status != TcbStatus::UpToDate {
        return Err(TcbError::NotUpToDate {
            subject,
            status: status.clone(),
        });
    }
    Ok(())
}

/// Evaluates the platform against `tcb_info`.
///
/// With a pinned module only the module level has to be up to date;
/// otherwise the platform level itself has to be.
pub fn evaluate_tcb(
    tcb_info: &TcbInfo,
    tee_tcb_svn: &TeeTcbSvn,
    pck_tcb: &PckCertTcb,
) -> Result<TcbEvaluation, TcbError> {
    let level = get_matching_tcb_level(&tcb_info.tcb_levels, tee_tcb_svn, pck_tcb)?;
    tracing::debug!(status = ?level.tcb_status, date = %level.tcb_date, "matched platform TCB level");

    let module_status = if tee_tcb_svn[1] > 0 {
        let module_level =
            get_matching_tdx_module_level(&tcb_info.tdx_module_identities, tee_tcb_svn)?;
        require_up_to_date("TDX module", &module_level.tcb_status)?;
        Some(module_level.tcb_status.clone())
    } else {
        require_up_to_date("platform", &level.tcb_status)?;
        None
    };

    Ok(TcbEvaluation {
        status: level.tcb_status.clone(),
        tcb_date: level.tcb_date.clone(),
        advisory_ids: level.advisory_ids.clone(),
        module_status,
    })
}

/// Status of the first QE identity level with `isvsvn <= isv_svn`, which
/// must be up to date.
pub fn check_qe_tcb_status(levels: &[TcbLevel], isv_svn: u16) -> Result<TcbStatus, TcbError> {
    let level = levels
        .iter()
        .find(|level| level.tcb.isv_svn.is_some_and(|required| required <= isv_svn))
        .ok_or(TcbError::NoQeLevel(isv_svn))?;
    require_up_to_date("QE", &level.tcb_status)?;
    Ok(level.tcb_status.clone())
}
