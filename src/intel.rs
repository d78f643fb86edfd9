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

//! Intel TDX quotes, their collateral and the checks tying them together.

/// Intel SGX Provisioning Certification root CA, PEM encoded.
pub const INTEL_ROOT_CA_PEM: &str =
    include_str!("../assets/Intel_SGX_Provisioning_Certification_RootCA.pem");

pub mod collaterals;
pub(crate) mod constants;
pub mod fetch;
pub mod pck;
pub mod quote;
pub mod tcb;
pub mod validate;
pub mod verify;

pub use collaterals::{Collateral, CollateralError, TcbStatus, VerifiedCollateral};
pub use fetch::{FetchError, HttpResponse, HttpsGetter, PcsEndpoints, ReqwestGetter, RetryingGetter};
pub use pck::{PckCa, PckExtensionError, PckExtensions};
pub use quote::{ParseError, Quote};
pub use tcb::{TcbError, TcbEvaluation};
pub use validate::{validate_quote, ValidateOptions, ValidationError};
pub use verify::{
    verify_quote_with_collateral, VerificationError, VerifiedQuote, VerifyOptions,
};
