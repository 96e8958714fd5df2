use std::time::Duration;

use ethers::{
    abi::{self, AbiEncode, ParamType, Token},
    types::{Address, Bytes, TransactionReceipt, H256, U256, U64},
    utils::id,
};
use tokio::time::{sleep, Instant};

use crate::{
    artifacts::ContractArtifact,
    client::ChainClient,
    config::NetworkProfile,
    contracts::{
        proxy_admin::{OwnerCall, UpgradeAndCallCall, UpgradeCall},
        transparent_upgradeable_proxy::{UpgradeToAndCallCall, UpgradeToCall},
        ADMIN_SLOT, IMPLEMENTATION_SLOT, UPGRADE_INTERFACE_VERSION,
    },
    error::DeployError,
    records::{DeploymentKind, DeploymentRecord},
    utils::{slot_address, unix_timestamp},
};

/// How long to wait for a broadcast transaction.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    /// Blocks, including the one that mined the transaction.
    pub confirmations: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Confirmation {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Contracts deployed next to an upgradeable implementation.
#[derive(Debug, Clone)]
pub struct ProxyKit {
    pub admin: ContractArtifact,
    pub proxy: ContractArtifact,
}

#[derive(Debug, Clone)]
pub enum DeployMode {
    /// A single contract-creation transaction; arguments go to the constructor.
    Plain,
    /// Implementation, `ProxyAdmin` and `TransparentUpgradeableProxy`;
    /// arguments go to `initializer`.
    Upgradeable { initializer: String, kit: ProxyKit },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Unknown to the node: still in the mempool, or dropped.
    Pending,
    Succeeded {
        block: u64,
        contract_address: Option<Address>,
    },
    Reverted {
        block: u64,
    },
}

pub struct Deployer<C> {
    client: C,
    network: NetworkProfile,
    confirmation: Confirmation,
}

impl<C: ChainClient> Deployer<C> {
    pub fn new(client: C, network: NetworkProfile, confirmation: Confirmation) -> Self {
        Self {
            client,
            network,
            confirmation,
        }
    }

    pub async fn deploy_new(
        &self,
        artifact: &ContractArtifact,
        args: &[String],
        mode: &DeployMode,
    ) -> Result<DeploymentRecord, DeployError> {
        log::debug!(
            "{} ({}) from {}",
            artifact.name,
            artifact.source_name.as_deref().unwrap_or("unknown source"),
            artifact.path.display()
        );
        match mode {
            DeployMode::Plain => self.deploy_plain(artifact, args).await,
            DeployMode::Upgradeable { initializer, kit } => {
                self.deploy_proxy(artifact, args, initializer, kit).await
            }
        }
    }

    async fn deploy_plain(
        &self,
        artifact: &ContractArtifact,
        args: &[String],
    ) -> Result<DeploymentRecord, DeployError> {
        let code = artifact.encode_constructor(args)?;
        self.ensure_funded().await?;

        let (address, transaction_hash) = self.create(&artifact.name, code).await?;
        Ok(self.record(
            &artifact.name,
            address,
            transaction_hash,
            DeploymentKind::Plain,
            None,
            None,
        ))
    }

    async fn deploy_proxy(
        &self,
        artifact: &ContractArtifact,
        args: &[String],
        initializer: &str,
        kit: &ProxyKit,
    ) -> Result<DeploymentRecord, DeployError> {
        let implementation_code = implementation_code(artifact)?;
        let init_data = if artifact.has_function(initializer) {
            artifact.encode_call(initializer, args)?
        } else if args.is_empty() {
            Bytes::new()
        } else {
            return Err(DeployError::InvalidArguments(format!(
                "{} has no `{initializer}` function to pass the arguments to",
                artifact.name
            )));
        };

        if kit.proxy.constructor_inputs().len() != 3 {
            return Err(DeployError::InvalidArguments(format!(
                "{} constructor must take (logic, admin, data)",
                kit.proxy.name
            )));
        }
        // 4.x proxies are handed a separately deployed ProxyAdmin. 5.x proxies
        // create their own and take its owner instead.
        let admin_code = match kit.admin.constructor_inputs() {
            [] => Some(kit.admin.encode_constructor_tokens(&[])?),
            [param] if param.kind == ParamType::Address => None,
            _ => {
                return Err(DeployError::InvalidArguments(format!(
                    "unsupported {} constructor",
                    kit.admin.name
                )))
            }
        };

        self.ensure_funded().await?;
        match admin_code {
            Some(_) => log::info!(
                "Deploying {}, {}, and then {}...",
                artifact.name,
                kit.admin.name,
                kit.proxy.name
            ),
            None => log::info!("Deploying {} and then {}...", artifact.name, kit.proxy.name),
        }

        let (implementation, _) = self.create(&artifact.name, implementation_code).await?;
        let mut deployed = vec![(artifact.name.as_str(), implementation)];

        let admin = match admin_code {
            Some(code) => {
                let (admin, _) = self
                    .create(&kit.admin.name, code)
                    .await
                    .inspect_err(|_| log_deployed(&deployed))?;
                deployed.push((kit.admin.name.as_str(), admin));
                Some(admin)
            }
            None => None,
        };

        let proxy_code = kit
            .proxy
            .encode_constructor_tokens(&[
                Token::Address(implementation),
                Token::Address(admin.unwrap_or(self.client.sender())),
                Token::Bytes(init_data.to_vec()),
            ])
            .inspect_err(|_| log_deployed(&deployed))?;
        let (proxy, transaction_hash) = self
            .create(&kit.proxy.name, proxy_code)
            .await
            .inspect_err(|_| log_deployed(&deployed))?;
        deployed.push((kit.proxy.name.as_str(), proxy));

        let admin = self
            .verify_admin(proxy, admin)
            .await
            .inspect_err(|_| log_deployed(&deployed))?;

        Ok(self.record(
            &artifact.name,
            proxy,
            transaction_hash,
            DeploymentKind::Proxy,
            Some(implementation),
            admin,
        ))
    }

    /// Checks who administers a freshly deployed proxy: `expected` for a
    /// separately deployed admin, otherwise a ProxyAdmin owned by the sender.
    /// A read that fails leaves the admin unverified rather than failing a
    /// deployment that is already on chain.
    async fn verify_admin(
        &self,
        proxy: Address,
        expected: Option<Address>,
    ) -> Result<Option<Address>, DeployError> {
        let admin = match self.client.storage_at(proxy, ADMIN_SLOT).await {
            Ok(word) => slot_address(word),
            Err(e) => {
                log::warn!("could not read the admin of proxy {proxy:#x}: {e}");
                return Ok(expected);
            }
        };
        let mismatch = |reason: String| DeployError::AdminMismatch { proxy, reason };

        if let Some(expected) = expected {
            if admin != expected {
                return Err(mismatch(format!(
                    "reports admin {admin:#x} instead of {expected:#x}"
                )));
            }
            return Ok(Some(admin));
        }

        if admin.is_zero() {
            return Err(mismatch("reports no admin".to_string()));
        }
        let sender = self.client.sender();
        match self.admin_owner(admin).await {
            Ok(owner) if owner == sender => Ok(Some(admin)),
            Ok(owner) => Err(mismatch(format!(
                "its admin {admin:#x} is owned by {owner:#x} instead of {sender:#x}"
            ))),
            Err(DeployError::UnknownAdmin(_)) => Err(mismatch(format!(
                "its admin {admin:#x} does not answer owner()"
            ))),
            Err(e) => {
                log::warn!("could not read the owner of proxy admin {admin:#x}: {e}");
                Ok(Some(admin))
            }
        }
    }

    /// Deploys `artifact` as the new implementation behind `proxy`, optionally
    /// calling `call` through the proxy in the same transaction.
    ///
    /// Authorization is checked before anything is sent, so a caller that is
    /// not the admin spends no gas and changes nothing.
    pub async fn upgrade_existing(
        &self,
        proxy: Address,
        artifact: &ContractArtifact,
        call: Option<(&str, &[String])>,
    ) -> Result<DeploymentRecord, DeployError> {
        if self.client.code_at(proxy).await?.is_empty() {
            return Err(DeployError::ProxyNotFound(proxy));
        }
        let current = slot_address(
            self.client
                .storage_at(proxy, IMPLEMENTATION_SLOT)
                .await?,
        );
        if current.is_zero() {
            return Err(DeployError::ProxyNotFound(proxy));
        }
        let admin = slot_address(self.client.storage_at(proxy, ADMIN_SLOT).await?);
        if admin.is_zero() {
            return Err(DeployError::InvalidArguments(format!(
                "proxy {proxy:#x} has no EIP-1967 admin, only transparent proxies can be upgraded"
            )));
        }

        let admin_is_contract = !self.client.code_at(admin).await?.is_empty();
        let authority = if admin_is_contract {
            self.admin_owner(admin).await?
        } else {
            admin
        };
        let interface = if admin_is_contract {
            self.upgrade_interface(admin).await?
        } else {
            None
        };
        let caller = self.client.sender();
        if authority != caller {
            return Err(DeployError::UnauthorizedUpgrade {
                proxy,
                caller,
                admin: authority,
            });
        }

        let implementation_code = implementation_code(artifact)?;
        let call_data = match call {
            Some((function, args)) => artifact.encode_call(function, args)?,
            None => Bytes::new(),
        };
        self.ensure_funded().await?;
        log::info!("upgrading proxy {proxy:#x} from {current:#x} to {}", artifact.name);

        let (implementation, _) = self.create(&artifact.name, implementation_code).await?;

        let (target, data) = if admin_is_contract {
            // 5.x ProxyAdmin only has upgradeAndCall, which accepts empty data.
            let data = if call_data.is_empty() && interface.is_none() {
                UpgradeCall {
                    proxy,
                    implementation,
                }
                .encode()
            } else {
                UpgradeAndCallCall {
                    proxy,
                    implementation,
                    data: call_data,
                }
                .encode()
            };
            (admin, data)
        } else if call_data.is_empty() {
            (
                proxy,
                UpgradeToCall {
                    new_implementation: implementation,
                }
                .encode(),
            )
        } else {
            (
                proxy,
                UpgradeToAndCallCall {
                    new_implementation: implementation,
                    data: call_data,
                }
                .encode(),
            )
        };

        let upgraded = async {
            let transaction_hash = self.client.send(Some(target), data.into()).await?;
            self.confirm(transaction_hash).await?;
            Ok::<_, DeployError>(transaction_hash)
        };
        let transaction_hash = upgraded.await.inspect_err(|_| {
            log::warn!(
                "{} was already deployed at {implementation:#x}",
                artifact.name
            )
        })?;

        match self.client.storage_at(proxy, IMPLEMENTATION_SLOT).await {
            Ok(word) if slot_address(word) != implementation => {
                return Err(DeployError::TransactionReverted(format!(
                    "proxy {proxy:#x} still points to {:#x} after {transaction_hash:#x}, \
                     {} was deployed at {implementation:#x}",
                    slot_address(word),
                    artifact.name
                )));
            }
            Ok(_) => {}
            Err(e) => log::warn!(
                "upgrade {transaction_hash:#x} was mined but the implementation of \
                 {proxy:#x} could not be read back: {e}"
            ),
        }

        Ok(self.record(
            &artifact.name,
            proxy,
            transaction_hash,
            DeploymentKind::Upgrade,
            Some(implementation),
            Some(admin),
        ))
    }

    /// Looks a transaction up without touching it, to reconcile an
    /// [`DeployError::AmbiguousOutcome`].
    pub async fn status(&self, transaction_hash: H256) -> Result<TransactionStatus, DeployError> {
        let Some(receipt) = self.client.receipt(transaction_hash).await? else {
            return Ok(TransactionStatus::Pending);
        };
        let block = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
        Ok(if receipt.status == Some(U64::zero()) {
            TransactionStatus::Reverted { block }
        } else {
            TransactionStatus::Succeeded {
                block,
                contract_address: receipt.contract_address,
            }
        })
    }

    /// Deployer address and its balance.
    pub async fn account(&self) -> Result<(Address, U256), DeployError> {
        let sender = self.client.sender();
        Ok((sender, self.client.balance(sender).await?))
    }

    async fn admin_owner(&self, admin: Address) -> Result<Address, DeployError> {
        let output = match self.client.call(admin, OwnerCall.encode().into()).await {
            Ok(output) => output,
            Err(DeployError::TransactionReverted(_) | DeployError::Rejected(_)) => {
                return Err(DeployError::UnknownAdmin(admin))
            }
            Err(e) => return Err(e),
        };
        abi::decode(&[ParamType::Address], &output)
            .ok()
            .and_then(|mut tokens| tokens.pop())
            .and_then(Token::into_address)
            .ok_or(DeployError::UnknownAdmin(admin))
    }

    /// `UPGRADE_INTERFACE_VERSION()` of a ProxyAdmin, `None` before 5.x.
    async fn upgrade_interface(&self, admin: Address) -> Result<Option<String>, DeployError> {
        let selector = id(UPGRADE_INTERFACE_VERSION);
        match self.client.call(admin, selector.to_vec().into()).await {
            Ok(output) => {
                let version = abi::decode(&[ParamType::String], &output)
                    .ok()
                    .and_then(|mut tokens| tokens.pop())
                    .and_then(Token::into_string);
                if let Some(version) = &version {
                    log::debug!("proxy admin {admin:#x} upgrade interface {version}");
                }
                Ok(version)
            }
            Err(DeployError::TransactionReverted(_) | DeployError::Rejected(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn ensure_funded(&self) -> Result<(), DeployError> {
        let (sender, balance) = self.account().await?;
        let chain_id = self.client.chain_id().await?;
        log::info!("network:{} chain id:{chain_id}", self.network.name);
        log::info!("Deploying contracts with the account: {sender:#x}");
        log::info!("Account balance: {balance}");
        if balance.is_zero() {
            return Err(DeployError::InsufficientBalance(format!(
                "{sender:#x} has no funds on `{}`",
                self.network.name
            )));
        }
        Ok(())
    }

    async fn create(&self, name: &str, code: Bytes) -> Result<(Address, H256), DeployError> {
        let transaction_hash = self.client.send(None, code).await?;
        let receipt = self.confirm(transaction_hash).await?;
        let address = receipt
            .contract_address
            .filter(|address| !address.is_zero())
            .ok_or_else(|| {
                DeployError::TransactionReverted(format!(
                    "{transaction_hash:#x} did not create {name}"
                ))
            })?;
        log::info!("{name} address:{address:#x}");
        Ok((address, transaction_hash))
    }

    /// Polls until the transaction has enough confirmations. Once broadcast,
    /// only a reverted receipt is a failure: a failed lookup or running out of
    /// time leaves the outcome unknown.
    async fn confirm(&self, transaction_hash: H256) -> Result<TransactionReceipt, DeployError> {
        let deadline = Instant::now() + self.confirmation.timeout;
        let confirmations = self.confirmation.confirmations.max(1);
        loop {
            match self.poll(transaction_hash, confirmations).await {
                Ok(Some(receipt)) if receipt.status == Some(U64::zero()) => {
                    return Err(DeployError::TransactionReverted(format!(
                        "{transaction_hash:#x}"
                    )));
                }
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => log::warn!("polling {transaction_hash:#x}: {e}"),
            }
            if Instant::now() >= deadline {
                return Err(DeployError::AmbiguousOutcome(transaction_hash));
            }
            sleep(self.confirmation.poll_interval).await;
        }
    }

    /// The receipt once it is final: reverted, or buried under enough blocks.
    async fn poll(
        &self,
        transaction_hash: H256,
        confirmations: u64,
    ) -> Result<Option<TransactionReceipt>, DeployError> {
        let Some(receipt) = self.client.receipt(transaction_hash).await? else {
            return Ok(None);
        };
        if receipt.status == Some(U64::zero()) {
            return Ok(Some(receipt));
        }
        let Some(included) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(None);
        };
        let head = self.client.block_number().await?;
        Ok((head + 1 >= included + confirmations).then_some(receipt))
    }

    fn record(
        &self,
        contract_name: &str,
        address: Address,
        transaction_hash: H256,
        kind: DeploymentKind,
        implementation: Option<Address>,
        admin: Option<Address>,
    ) -> DeploymentRecord {
        DeploymentRecord {
            contract_name: contract_name.to_string(),
            network: self.network.name.clone(),
            address,
            transaction_hash,
            timestamp: unix_timestamp(),
            kind,
            implementation,
            admin,
        }
    }
}

fn log_deployed(deployed: &[(&str, Address)]) {
    for (name, address) in deployed {
        log::warn!("{name} was already deployed at {address:#x}");
    }
}

fn implementation_code(artifact: &ContractArtifact) -> Result<Bytes, DeployError> {
    if !artifact.constructor_inputs().is_empty() {
        return Err(DeployError::InvalidArguments(format!(
            "{} has constructor arguments and cannot sit behind a proxy, use an initializer",
            artifact.name
        )));
    }
    artifact.encode_constructor_tokens(&[])
}
