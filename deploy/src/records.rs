use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
};

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Plain,
    Proxy,
    Upgrade,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Plain => write!(f, "plain"),
            DeploymentKind::Proxy => write!(f, "proxy"),
            DeploymentKind::Upgrade => write!(f, "upgrade"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub network: String,
    /// Contract address, or the proxy address for proxy deployments and upgrades.
    pub address: Address,
    pub transaction_hash: H256,
    /// Unix seconds.
    pub timestamp: u64,
    pub kind: DeploymentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<Address>,
}

/// Append-only JSON lines file of deployments.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let line = serde_json::to_string(record).map_err(|e| DeployError::Records(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DeployError::Records(format!("{}: {e}", self.path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| DeployError::Records(format!("{}: {e}", self.path.display())))
    }

    /// All records in the order they were written.
    pub fn all(&self) -> Result<Vec<DeploymentRecord>, DeployError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DeployError::Records(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    DeployError::Records(format!("{}:{}: {e}", self.path.display(), i + 1))
                })
            })
            .collect()
    }

    /// The most recent proxy deployment or upgrade of `contract` on `network`.
    /// Plain deployments of the same contract are skipped.
    pub fn latest_proxy(
        &self,
        network: &str,
        contract: &str,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(self.all()?.into_iter().rev().find(|r| {
            r.network == network
                && r.contract_name == contract
                && matches!(r.kind, DeploymentKind::Proxy | DeploymentKind::Upgrade)
        }))
    }
}
