//! Contract metadata lookup, used only for failure diagnostics.
//!
//! When a message permanently fails to materialize, the worker asks the
//! chain's LCD endpoint who the contract behind it is and logs the
//! answer next to the failure. Nothing downstream depends on the lookup
//! succeeding.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Metadata the chain reports for a contract address.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContractInfo {
    #[serde(default)]
    pub code_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
}

#[async_trait]
pub trait ContractDirectory: Send + Sync {
    async fn contract_info(&self, address: &str) -> Result<ContractInfo>;
}

#[derive(Deserialize)]
struct ContractInfoResponse {
    contract_info: ContractInfo,
}

/// [`ContractDirectory`] backed by a Cosmos LCD HTTP endpoint.
pub struct HttpContractDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpContractDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ContractDirectory for HttpContractDirectory {
    async fn contract_info(&self, address: &str) -> Result<ContractInfo> {
        let url = format!("{}/cosmwasm/wasm/v1/contract/{address}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| Error::ContractLookup(err.to_string()))?
            .error_for_status()
            .map_err(|err| Error::ContractLookup(err.to_string()))?;
        let body: ContractInfoResponse = response
            .json()
            .await
            .map_err(|err| Error::ContractLookup(err.to_string()))?;
        Ok(body.contract_info)
    }
}
