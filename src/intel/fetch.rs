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

//! Retrieval of collateral from the Intel provisioning certification service.

use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::time::{sleep, timeout_at, Instant};

use crate::cert::{crl_distribution_points, parse_crl};
use crate::config::{PcsConfig, RetryConfig};
use crate::intel::collaterals::{
    Collateral, CollateralError, IssuerChain, RevocationCollateral, SignedDocument,
};
use crate::intel::constants::{
    PCK_CRL_ISSUER_CHAIN_HEADER, QE_IDENTITY_ISSUER_CHAIN_HEADER, TCB_INFO_ISSUER_CHAIN_HEADER,
};
use crate::intel::pck::PckCa;

/// A single failed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request did not complete.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport error message.
        message: String,
    },
    /// The server answered with a non-success status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The request was still pending when the retry deadline passed.
    #[error("request to {url} did not complete before the deadline")]
    Timeout {
        /// Requested URL.
        url: String,
    },
}

/// Headers and body of a successful response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

/// Performs HTTPS GET requests.
pub trait HttpsGetter {
    /// Fetches `url`. Any non-2xx status is an error.
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpResponse, FetchError>> + Send;
}

/// [`HttpsGetter`] backed by a `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestGetter {
    client: reqwest::Client,
}

impl ReqwestGetter {
    /// Wraps an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpsGetter for ReqwestGetter {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_owned(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport)?.to_vec();
        Ok(HttpResponse { headers, body })
    }
}

/// Retries a getter with exponential backoff until a wall-clock deadline.
#[derive(Debug, Clone)]
pub struct RetryingGetter<G> {
    inner: G,
    initial_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
}

impl<G> RetryingGetter<G> {
    /// Wraps `inner` with the delays of `config`.
    pub fn new(inner: G, config: &RetryConfig) -> Self {
        Self {
            inner,
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl<G: HttpsGetter + Sync> RetryingGetter<G> {
    /// Fetches `url`, returning every failed attempt if the deadline passes.
    pub async fn fetch(&self, url: &str) -> Result<HttpResponse, CollateralError> {
        let deadline = Instant::now() + self.timeout;
        let mut delay = self.initial_delay;
        let mut causes = Vec::new();

        loop {
            tracing::debug!(url, attempt = causes.len() + 1, "fetching collateral");
            match timeout_at(deadline, self.inner.get(url)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(cause)) => {
                    tracing::warn!(url, %cause, "collateral fetch failed");
                    causes.push(cause);
                }
                Err(_) => {
                    tracing::warn!(url, "collateral fetch still pending at the deadline");
                    causes.push(FetchError::Timeout {
                        url: url.to_owned(),
                    });
                    return Err(CollateralError::Unavailable {
                        url: url.to_owned(),
                        causes,
                    });
                }
            }
            if Instant::now() + delay > deadline {
                return Err(CollateralError::Unavailable {
                    url: url.to_owned(),
                    causes,
                });
            }
            sleep(delay).await;
            delay = (delay * 2).min(self.max_delay);
        }
    }
}

/// Endpoints of the certification service.
#[derive(Debug, Clone)]
pub struct PcsEndpoints<'a> {
    config: &'a PcsConfig,
}

impl<'a> PcsEndpoints<'a> {
    /// Endpoints rooted at the base URLs of `config`.
    pub fn new(config: &'a PcsConfig) -> Self {
        Self { config }
    }

    /// TDX TCB info for an FMSPC.
    pub fn tcb_info(&self, fmspc: &str) -> String {
        format!("{}/tcb?fmspc={fmspc}", self.config.tdx_base_url)
    }

    /// Identity of the TD quoting enclave.
    pub fn qe_identity(&self) -> String {
        format!("{}/qe/identity", self.config.tdx_base_url)
    }

    /// CRL of a PCK issuing CA, DER encoded.
    pub fn pck_crl(&self, ca: PckCa) -> String {
        format!(
            "{}/pckcrl?ca={}&encoding=der",
            self.config.sgx_base_url,
            ca.id()
        )
    }
}

/// The issuer chain of `header`, which must appear exactly once.
pub fn issuer_chain(headers: &HeaderMap, header: &'static str) -> Result<IssuerChain, CollateralError> {
    let values: Vec<_> = headers.get_all(header).iter().collect();
    let [value] = values.as_slice() else {
        return Err(CollateralError::IssuerChain {
            header,
            reason: format!("expected exactly one header, found {}", values.len()),
        });
    };
    let value = value.to_str().map_err(|e| CollateralError::IssuerChain {
        header,
        reason: e.to_string(),
    })?;
    IssuerChain::from_header_value(header, value)
}

/// Fetches TCB info, QE identity and, when `check_revocations` is set, the
/// PCK and root CRLs.
pub async fn obtain_collateral<G: HttpsGetter + Sync>(
    getter: &RetryingGetter<G>,
    endpoints: &PcsEndpoints<'_>,
    fmspc: &str,
    ca: PckCa,
    check_revocations: bool,
) -> Result<Collateral, CollateralError> {
    let response = getter.fetch(&endpoints.tcb_info(fmspc)).await?;
    let tcb_info_issuer = issuer_chain(&response.headers, TCB_INFO_ISSUER_CHAIN_HEADER)?;
    let tcb_info = SignedDocument::parse(&response.body, "tcbInfo")?;

    let response = getter.fetch(&endpoints.qe_identity()).await?;
    let qe_identity_issuer = issuer_chain(&response.headers, QE_IDENTITY_ISSUER_CHAIN_HEADER)?;
    let qe_identity = SignedDocument::parse(&response.body, "enclaveIdentity")?;

    let revocation = if check_revocations {
        let response = getter.fetch(&endpoints.pck_crl(ca)).await.map_err(|e| {
            CollateralError::CrlUnavailable { causes: vec![e] }
        })?;
        let pck_crl_issuer = issuer_chain(&response.headers, PCK_CRL_ISSUER_CHAIN_HEADER)?;
        let pck_crl = parse_crl(&response.body).map_err(|source| CollateralError::Certificate {
            context: "PCK CRL",
            source,
        })?;
        let root_crl = fetch_root_crl(getter, &qe_identity_issuer).await?;
        Some(RevocationCollateral {
            ca,
            pck_crl,
            pck_crl_issuer,
            root_crl,
        })
    } else {
        None
    };

    Ok(Collateral {
        tcb_info,
        tcb_info_issuer,
        qe_identity,
        qe_identity_issuer,
        revocation,
    })
}

/// Tries every URI of the root's first CRL distribution point, in order.
async fn fetch_root_crl<G: HttpsGetter + Sync>(
    getter: &RetryingGetter<G>,
    issuer: &IssuerChain,
) -> Result<x509_verify::x509_cert::crl::CertificateList, CollateralError> {
    let urls = crl_distribution_points(&issuer.root).map_err(|source| {
        CollateralError::Certificate {
            context: "root certificate",
            source,
        }
    })?;
    if urls.is_empty() {
        return Err(CollateralError::NoCrlDistributionPoint);
    }

    let mut causes = Vec::new();
    for url in urls {
        let attempt = getter.fetch(&url).await.and_then(|response| {
            parse_crl(&response.body).map_err(|source| CollateralError::Certificate {
                context: "root CRL",
                source,
            })
        });
        match attempt {
            Ok(crl) => return Ok(crl),
            Err(cause) => {
                tracing::warn!(%url, %cause, "root CRL distribution point failed");
                causes.push(cause);
            }
        }
    }
    Err(CollateralError::CrlUnavailable { causes })
}
