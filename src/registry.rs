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

//! Lookup of measurement hashes in the on-chain registry contract.

use std::future::Future;

use serde::Deserialize;
use sha3::{Digest, Keccak256};

use crate::utils::decode_hex;

const REGISTRY_FUNCTION: &str = "isMeasurementRegistered(bytes32)";
const ADDRESS_SIZE: usize = 20;
const WORD_SIZE: usize = 32;

/// Errors raised while querying the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The contract address is not 20 bytes of hex.
    #[error("invalid registry address {0:?}")]
    InvalidAddress(String),
    /// The request could not be sent or the response not read.
    #[error("registry transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success HTTP status.
    #[error("registry endpoint returned HTTP {0}")]
    Status(u16),
    /// The node returned a JSON-RPC error.
    #[error("registry call failed ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The call returned something other than an ABI encoded bool.
    #[error("registry returned a malformed result: {0}")]
    InvalidResult(String),
    /// A lookup of one hash variant failed.
    #[error("registry lookup failed for measurement 0x{measurement}: {source}")]
    Lookup {
        /// Hex of the hash variant.
        measurement: String,
        /// Underlying failure.
        source: Box<RegistryError>,
    },
}

/// A registry of approved measurement hashes.
pub trait MeasurementRegistry {
    /// Whether `measurement` is registered.
    fn is_measurement_registered(
        &self,
        measurement: [u8; 32],
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;
}

/// First four bytes of `keccak256(signature)`.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Call data of `isMeasurementRegistered(measurement)`.
pub fn encode_call(measurement: &[u8; 32]) -> Vec<u8> {
    [&function_selector(REGISTRY_FUNCTION)[..], &measurement[..]].concat()
}

/// Decodes an ABI `bool` return word.
pub fn decode_bool(output: &[u8]) -> Result<bool, RegistryError> {
    let Ok(word) = <[u8; WORD_SIZE]>::try_from(output) else {
        return Err(RegistryError::InvalidResult(format!(
            "expected {WORD_SIZE} bytes, got {}",
            output.len()
        )));
    };
    if word[..WORD_SIZE - 1].iter().any(|b| *b != 0) || word[WORD_SIZE - 1] > 1 {
        return Err(RegistryError::InvalidResult(format!(
            "0x{} is not a bool",
            hex::encode(word)
        )));
    }
    Ok(word[WORD_SIZE - 1] == 1)
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

/// Registry contract reached through an Ethereum JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct EthRegistry {
    client: reqwest::Client,
    endpoint: String,
    address: [u8; ADDRESS_SIZE],
}

impl EthRegistry {
    /// Registry at `address` (hex, `0x` optional) behind `endpoint`.
    pub fn new(endpoint: impl Into<String>, address: &str) -> Result<Self, RegistryError> {
        Self::with_client(reqwest::Client::new(), endpoint, address)
    }

    /// Same as [`EthRegistry::new`] with a preconfigured client.
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        address: &str,
    ) -> Result<Self, RegistryError> {
        let address = decode_hex(address)
            .ok()
            .and_then(|bytes| <[u8; ADDRESS_SIZE]>::try_from(bytes).ok())
            .ok_or_else(|| RegistryError::InvalidAddress(address.to_owned()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            address,
        })
    }

    fn request(&self, measurement: &[u8; 32]) -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                {
                    "to": format!("0x{}", hex::encode(self.address)),
                    "data": format!("0x{}", hex::encode(encode_call(measurement))),
                },
                "latest"
            ]
        })
    }
}

impl MeasurementRegistry for EthRegistry {
    async fn is_measurement_registered(&self, measurement: [u8; 32]) -> Result<bool, RegistryError> {
        let transport = |e: reqwest::Error| RegistryError::Transport(e.to_string());
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request(&measurement))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }
        let response: RpcResponse = response.json().await.map_err(transport)?;

        match response {
            RpcResponse {
                error: Some(RpcError { code, message }),
                ..
            } => Err(RegistryError::Rpc { code, message }),
            RpcResponse {
                result: Some(result),
                ..
            } => {
                let output = decode_hex(&result)
                    .map_err(|e| RegistryError::InvalidResult(e.to_string()))?;
                decode_bool(&output)
            }
            _ => Err(RegistryError::InvalidResult("response has no result".into())),
        }
    }
}

/// Looks the variants up in order and stops at the first registered one.
///
/// A failed lookup is returned at once, tagged with the variant it was for.
pub async fn verify_quote_registered<R: MeasurementRegistry + Sync>(
    registry: &R,
    variants: &[[u8; 32]],
) -> Result<bool, RegistryError> {
    for variant in variants {
        let registered = registry
            .is_measurement_registered(*variant)
            .await
            .map_err(|source| RegistryError::Lookup {
                measurement: hex::encode(variant),
                source: Box::new(source),
            })?;
        tracing::debug!(measurement = %hex::encode(variant), registered, "registry lookup");
        if registered {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
pub(crate) mod should {
    use super::*;
    use std::sync::Mutex;

    use hex_literal::hex;
    use rstest::rstest;

    /// Answers from a fixed set of registered hashes and records every lookup.
    #[derive(Default)]
    pub(crate) struct MockRegistry {
        pub(crate) registered: Vec<[u8; 32]>,
        pub(crate) failing: Vec<[u8; 32]>,
        pub(crate) lookups: Mutex<Vec<[u8; 32]>>,
    }

    impl MeasurementRegistry for MockRegistry {
        async fn is_measurement_registered(
            &self,
            measurement: [u8; 32],
        ) -> Result<bool, RegistryError> {
            self.lookups.lock().unwrap().push(measurement);
            if self.failing.contains(&measurement) {
                return Err(RegistryError::Transport("connection reset".into()));
            }
            Ok(self.registered.contains(&measurement))
        }
    }

    fn variants() -> Vec<[u8; 32]> {
        (1..=5u8).map(|i| [i; 32]).collect()
    }

    #[test]
    fn derive_keccak_selector() {
        assert_eq!(function_selector("transfer(address,uint256)"), hex!("a9059cbb"));
        assert_eq!(function_selector(REGISTRY_FUNCTION), hex!("30aa25fb"));
    }

    #[test]
    fn encode_selector_then_argument() {
        let data = encode_call(&[0xab; 32]);
        assert_eq!(data.len(), 36);
        assert_eq!(data[..4], hex!("30aa25fb"));
        assert_eq!(data[4..], [0xab; 32]);
    }

    #[rstest]
    #[case::yes(&hex!("0000000000000000000000000000000000000000000000000000000000000001"), true)]
    #[case::no(&[0u8; 32], false)]
    fn decode_abi_bool(#[case] word: &[u8], #[case] expected: bool) {
        assert_eq!(decode_bool(word), Ok(expected));
    }

    #[rstest]
    #[case::short(&[0u8; 31])]
    #[case::two(&hex!("0000000000000000000000000000000000000000000000000000000000000002"))]
    #[case::dirty_high_bytes(&hex!("0100000000000000000000000000000000000000000000000000000000000001"))]
    fn reject_malformed_bool(#[case] word: &[u8]) {
        assert!(matches!(decode_bool(word), Err(RegistryError::InvalidResult(_))));
    }

    #[rstest]
    #[case::prefixed("0x5FbDB2315678afecb367f032d93F642f64180aa3", true)]
    #[case::bare("5fbdb2315678afecb367f032d93f642f64180aa3", true)]
    #[case::short("0x5fbdb2315678afecb367f032d93f642f64180a", false)]
    #[case::not_hex("registry", false)]
    fn parse_contract_address(#[case] address: &str, #[case] valid: bool) {
        assert_eq!(EthRegistry::new("http://localhost:8545", address).is_ok(), valid);
    }

    #[test]
    fn build_eth_call_request() {
        let registry =
            EthRegistry::new("http://localhost:8545", "0x5FbDB2315678afecb367f032d93F642f64180aa3")
                .unwrap();
        let request = registry.request(&[0x01; 32]);
        assert_eq!(request["method"], "eth_call");
        assert_eq!(request["params"][0]["to"], "0x5fbdb2315678afecb367f032d93f642f64180aa3");
        assert_eq!(
            request["params"][0]["data"],
            format!("0x30aa25fb{}", "01".repeat(32))
        );
        assert_eq!(request["params"][1], "latest");
    }

    #[tokio::test]
    async fn stop_at_first_registered_variant() {
        let variants = variants();
        let registry = MockRegistry {
            registered: vec![variants[3]],
            ..Default::default()
        };
        assert_eq!(verify_quote_registered(&registry, &variants).await, Ok(true));
        assert_eq!(*registry.lookups.lock().unwrap(), variants[..4]);
    }

    #[tokio::test]
    async fn look_up_every_variant_when_none_registered() {
        let registry = MockRegistry::default();
        assert_eq!(verify_quote_registered(&registry, &variants()).await, Ok(false));
        assert_eq!(registry.lookups.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn surface_lookup_failure_immediately() {
        let variants = variants();
        let registry = MockRegistry {
            registered: vec![variants[4]],
            failing: vec![variants[1]],
            ..Default::default()
        };
        let err = verify_quote_registered(&registry, &variants).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "registry lookup failed for measurement 0x{}: registry transport error: connection reset",
                "02".repeat(32)
            )
        );
        assert_eq!(registry.lookups.lock().unwrap().len(), 2);
    }
}
