use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::{H160, H256};

use crate::{
    artifacts::ArtifactResolver,
    client::EthersClient,
    config::NetworkRegistry,
    contracts::{PROXY_ADMIN_ARTIFACT, PROXY_ARTIFACT},
    deploy::{Confirmation, DeployMode, Deployer, ProxyKit, TransactionStatus},
    error::DeployError,
    records::{DeploymentKind, DeploymentRecord, RecordStore},
};

/// Deploys and upgrades compiled Solidity contracts.
#[derive(Debug, Parser)]
#[clap(name = "contract-deploy", version)]
pub struct CommandLine {
    /// Network profiles file
    #[clap(long, global = true, env = "DEPLOY_CONFIG", default_value = "deploy.toml")]
    config: PathBuf,

    /// Directory holding the compiled artifacts
    #[clap(long, global = true, env = "DEPLOY_ARTIFACTS", default_value = "artifacts")]
    artifacts: PathBuf,

    /// Deployment record file
    #[clap(long, global = true, env = "DEPLOY_RECORDS", default_value = "deployments.jsonl")]
    records: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy a contract, plain or behind a transparent upgradeable proxy
    Deploy(DeployArgs),
    /// Point an existing proxy at a new implementation
    Upgrade(UpgradeArgs),
    /// Look up a transaction whose outcome is unknown
    Status(StatusArgs),
    /// Print the deployer account and its balance
    Accounts(NetworkArgs),
    /// List the configured networks
    Networks,
    /// Print recorded deployments
    Records(RecordsArgs),
}

#[derive(Debug, Args)]
struct NetworkArgs {
    #[clap(short, long)]
    network: String,
}

#[derive(Debug, Args)]
struct ConfirmationArgs {
    /// Blocks to wait for, counting the one including the transaction
    #[clap(long, default_value_t = 1)]
    confirmations: u64,

    /// Seconds to wait before reporting the outcome as unknown
    #[clap(long, default_value_t = 300)]
    timeout: u64,

    /// Milliseconds between receipt polls
    #[clap(long, default_value_t = 1000)]
    poll_interval: u64,
}

impl From<&ConfirmationArgs> for Confirmation {
    fn from(args: &ConfirmationArgs) -> Self {
        Self {
            confirmations: args.confirmations,
            timeout: Duration::from_secs(args.timeout),
            poll_interval: Duration::from_millis(args.poll_interval),
        }
    }
}

#[derive(Debug, Args)]
struct DeployArgs {
    #[clap(short, long)]
    network: String,

    /// Contract name, or `path/Source.sol:Name`
    #[clap(short, long)]
    contract: String,

    /// Deploy behind a ProxyAdmin-managed TransparentUpgradeableProxy
    #[clap(long)]
    upgradeable: bool,

    /// Function called through the proxy with the arguments
    #[clap(long, default_value = "initialize")]
    initializer: String,

    /// Artifact of the proxy admin contract
    #[clap(long, default_value = PROXY_ADMIN_ARTIFACT)]
    proxy_admin_artifact: String,

    /// Artifact of the proxy contract
    #[clap(long, default_value = PROXY_ARTIFACT)]
    proxy_artifact: String,

    #[clap(flatten)]
    confirmation: ConfirmationArgs,

    /// Constructor arguments, or initializer arguments with --upgradeable
    #[clap(allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct UpgradeArgs {
    #[clap(short, long)]
    network: String,

    /// Proxy address
    #[clap(long, required_unless_present = "from", conflicts_with = "from")]
    proxy: Option<H160>,

    /// Upgrade the proxy recorded for this contract on the network
    #[clap(long)]
    from: Option<String>,

    /// New implementation contract
    #[clap(short, long)]
    contract: String,

    /// Function of the new implementation to call during the upgrade
    #[clap(long)]
    call: Option<String>,

    #[clap(flatten)]
    confirmation: ConfirmationArgs,

    /// Arguments of --call
    #[clap(allow_hyphen_values = true, requires = "call")]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[clap(short, long)]
    network: String,

    #[clap(long)]
    tx: H256,
}

#[derive(Debug, Args)]
struct RecordsArgs {
    #[clap(short, long)]
    network: Option<String>,
}

impl CommandLine {
    pub async fn execute(self) -> Result<()> {
        let registry = NetworkRegistry::load(&self.config)?;
        let resolver = ArtifactResolver::new(&self.artifacts);
        let records = RecordStore::new(&self.records);

        match self.command {
            Command::Deploy(args) => {
                let artifact = resolver.resolve(&args.contract)?;
                let mode = if args.upgradeable {
                    DeployMode::Upgradeable {
                        initializer: args.initializer.clone(),
                        kit: ProxyKit {
                            admin: resolver.resolve(&args.proxy_admin_artifact)?,
                            proxy: resolver.resolve(&args.proxy_artifact)?,
                        },
                    }
                } else {
                    DeployMode::Plain
                };

                let deployer = connect(&registry, &args.network, (&args.confirmation).into()).await?;
                let record = deployer.deploy_new(&artifact, &args.args, &mode).await?;
                report(&records, &record)?;
            }
            Command::Upgrade(args) => {
                let proxy = match (args.proxy, &args.from) {
                    (Some(proxy), _) => proxy,
                    (None, Some(from)) => {
                        records
                            .latest_proxy(&args.network, from)?
                            .ok_or_else(|| DeployError::RecordNotFound {
                                network: args.network.clone(),
                                contract: from.clone(),
                            })?
                            .address
                    }
                    (None, None) => {
                        return Err(DeployError::InvalidArguments(
                            "one of --proxy or --from is required".to_string(),
                        )
                        .into())
                    }
                };
                let artifact = resolver.resolve(&args.contract)?;

                let deployer = connect(&registry, &args.network, (&args.confirmation).into()).await?;
                let call = args.call.as_deref().map(|f| (f, args.args.as_slice()));
                let record = deployer.upgrade_existing(proxy, &artifact, call).await?;
                report(&records, &record)?;
            }
            Command::Status(args) => {
                let deployer = connect(&registry, &args.network, Confirmation::default()).await?;
                match deployer.status(args.tx).await? {
                    TransactionStatus::Pending => {
                        println!("transaction {:#x} is not mined, it may still be pending", args.tx)
                    }
                    TransactionStatus::Succeeded {
                        block,
                        contract_address,
                    } => {
                        println!("transaction {:#x} succeeded in block {block}", args.tx);
                        if let Some(address) = contract_address {
                            println!("contract address:{address:#x}");
                        }
                    }
                    TransactionStatus::Reverted { block } => {
                        println!("transaction {:#x} reverted in block {block}", args.tx)
                    }
                }
            }
            Command::Accounts(args) => {
                let deployer = connect(&registry, &args.network, Confirmation::default()).await?;
                let (address, balance) = deployer.account().await?;
                println!("{address:#x} balance:{balance}");
            }
            Command::Networks => {
                for profile in registry.profiles() {
                    let mut line = format!(
                        "{} chain id:{} rpc:{} key:{}",
                        profile.name, profile.chain_id, profile.rpc_url, profile.credential_ref
                    );
                    if let Some(url) = &profile.explorer_url {
                        line.push_str(&format!(" explorer:{url}"));
                    }
                    if let Some(url) = &profile.explorer_api_url {
                        line.push_str(&format!(" explorer api:{url}"));
                    }
                    println!("{line}");
                }
            }
            Command::Records(args) => {
                for record in records.all()? {
                    if args.network.as_deref().is_some_and(|n| n != record.network) {
                        continue;
                    }
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
        }
        Ok(())
    }
}

async fn connect(
    registry: &NetworkRegistry,
    network: &str,
    confirmation: Confirmation,
) -> Result<Deployer<EthersClient>> {
    let profile = registry.resolve(network)?;
    let sk = registry.credential(&profile)?;
    let client = EthersClient::connect(&profile, &sk).await?;
    log::info!("connected to {} ({})", profile.name, profile.rpc_url);
    Ok(Deployer::new(client, profile, confirmation))
}

/// Prints before recording, so a record file that cannot be written never
/// hides where the contract went.
fn report(records: &RecordStore, record: &DeploymentRecord) -> Result<()> {
    print_record(record);
    records.append(record).with_context(|| {
        format!(
            "{} succeeded on {} but could not be recorded",
            record.kind, record.network
        )
    })?;
    log::info!(
        "recorded {} of {} on {}",
        record.kind,
        record.contract_name,
        record.network
    );
    Ok(())
}

fn print_record(record: &DeploymentRecord) {
    match record.kind {
        DeploymentKind::Plain => {
            println!("{} address:{:#x}", record.contract_name, record.address)
        }
        DeploymentKind::Proxy => {
            println!(
                "Proxy of {} deployed to:{:#x}",
                record.contract_name, record.address
            );
        }
        DeploymentKind::Upgrade => {
            println!(
                "proxy {:#x} upgraded to {}",
                record.address, record.contract_name
            );
        }
    }
    if let Some(implementation) = record.implementation {
        println!("implementation address:{implementation:#x}");
    }
    if let Some(admin) = record.admin {
        println!("proxy admin address:{admin:#x}");
    }
    println!("transaction hash:{:#x}", record.transaction_hash);
}
