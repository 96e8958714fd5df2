use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Environment variable read for the deployer key when a profile names none.
pub const DEFAULT_CREDENTIAL: &str = "PRIVATE_KEY";

const LOCAL_NETWORK: &str = "local";
const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545/";
const LOCAL_CHAIN_ID: u64 = 31337;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkProfile {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    /// Name of the environment variable holding the deployer private key.
    pub credential_ref: String,
    pub explorer_api_url: Option<String>,
    pub explorer_url: Option<String>,
    /// Send type 0 transactions instead of EIP-1559 ones.
    pub legacy: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NetworkEntry {
    url: String,
    chain_id: u64,
    #[serde(default = "default_credential")]
    credential: String,
    explorer_api_url: Option<String>,
    explorer_url: Option<String>,
    #[serde(default = "default_legacy")]
    legacy: bool,
}

fn default_credential() -> String {
    DEFAULT_CREDENTIAL.to_string()
}

fn default_legacy() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    networks: BTreeMap<String, NetworkEntry>,
}

/// Profiles from `[networks.<name>]` tables, on top of a built-in `local`.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    profiles: BTreeMap<String, NetworkProfile>,
}

impl NetworkRegistry {
    pub fn builtin() -> Self {
        let local = NetworkProfile {
            name: LOCAL_NETWORK.to_string(),
            rpc_url: LOCAL_RPC_URL.to_string(),
            chain_id: LOCAL_CHAIN_ID,
            credential_ref: DEFAULT_CREDENTIAL.to_string(),
            explorer_api_url: None,
            explorer_url: None,
            legacy: true,
        };
        Self {
            profiles: BTreeMap::from([(local.name.clone(), local)]),
        }
    }

    /// Loads the registry from `path`. A missing file leaves only the
    /// built-in profiles.
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents)
                .map_err(|e| DeployError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("{} not found, using built-in networks", path.display());
                Ok(Self::builtin())
            }
            Err(e) => Err(DeployError::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, DeployError> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| DeployError::Config(e.to_string()))?;

        let mut registry = Self::builtin();
        for (name, entry) in file.networks {
            if !(entry.url.starts_with("http://") || entry.url.starts_with("https://")) {
                return Err(DeployError::Config(format!(
                    "network `{name}`: rpc url `{}` must be http(s)",
                    entry.url
                )));
            }
            if entry.chain_id == 0 {
                return Err(DeployError::Config(format!(
                    "network `{name}`: chain id must be non-zero"
                )));
            }
            let profile = NetworkProfile {
                name: name.clone(),
                rpc_url: entry.url,
                chain_id: entry.chain_id,
                credential_ref: entry.credential,
                explorer_api_url: entry.explorer_api_url,
                explorer_url: entry.explorer_url,
                legacy: entry.legacy,
            };
            registry.profiles.insert(name, profile);
        }
        Ok(registry)
    }

    pub fn resolve(&self, name: &str) -> Result<NetworkProfile, DeployError> {
        self.resolve_with(name, |key| std::env::var(key).ok())
    }

    /// Resolves `name`, letting `<NAME>_RPC_URL` from `env` replace the
    /// configured endpoint.
    pub fn resolve_with(
        &self,
        name: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<NetworkProfile, DeployError> {
        let mut profile = self
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::UnknownNetwork(name.to_string()))?;

        if let Some(url) = env(&rpc_url_var(name)).filter(|url| !url.is_empty()) {
            log::debug!("{} overridden by environment", rpc_url_var(name));
            profile.rpc_url = url;
        }
        Ok(profile)
    }

    pub fn credential(&self, profile: &NetworkProfile) -> Result<String, DeployError> {
        self.credential_with(profile, |key| std::env::var(key).ok())
    }

    pub fn credential_with(
        &self,
        profile: &NetworkProfile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<String, DeployError> {
        env(&profile.credential_ref)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| DeployError::MissingCredential(profile.credential_ref.clone()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.profiles.values()
    }
}

fn rpc_url_var(network: &str) -> String {
    format!("{}_RPC_URL", network.to_uppercase().replace('-', "_"))
}
