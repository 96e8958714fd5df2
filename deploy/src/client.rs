use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, MiddlewareError, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
        TransactionReceipt, TransactionRequest, H256, U256,
    },
};

use crate::{config::NetworkProfile, error::DeployError, utils::parse_wallet};

/// Everything the deployer needs from a node, signing with one account.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account that signs every transaction sent through this client.
    fn sender(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, DeployError>;

    async fn block_number(&self) -> Result<u64, DeployError>;

    async fn balance(&self, address: Address) -> Result<U256, DeployError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, DeployError>;

    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, DeployError>;

    /// Read-only call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError>;

    /// Signs and broadcasts a transaction, `to: None` creating a contract.
    /// Returns once the node accepted it, not once it is mined.
    async fn send(&self, to: Option<Address>, data: Bytes) -> Result<H256, DeployError>;

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, DeployError>;
}

pub struct EthersClient {
    client: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
    legacy: bool,
}

impl EthersClient {
    /// Connects to the profile's endpoint and checks that the node serves the
    /// expected chain.
    pub async fn connect(profile: &NetworkProfile, sk: &str) -> Result<Self, DeployError> {
        let wallet = parse_wallet(sk)?;
        let provider = Provider::<Http>::try_from(profile.rpc_url.as_str()).map_err(|e| {
            DeployError::Config(format!("network `{}`: {e}", profile.name))
        })?;

        let chain_id = provider.get_chainid().await.map_err(classify)?.as_u64();
        check_chain_id(profile, chain_id)?;

        let client = Arc::new(SignerMiddleware::new(
            provider,
            wallet.with_chain_id(chain_id),
        ));
        Ok(Self {
            client,
            legacy: profile.legacy,
        })
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    fn sender(&self) -> Address {
        self.client.address()
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        Ok(self.client.get_chainid().await.map_err(classify)?.as_u64())
    }

    async fn block_number(&self) -> Result<u64, DeployError> {
        Ok(self.client.get_block_number().await.map_err(classify)?.as_u64())
    }

    async fn balance(&self, address: Address) -> Result<U256, DeployError> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(classify)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, DeployError> {
        self.client.get_code(address, None).await.map_err(classify)
    }

    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, DeployError> {
        self.client
            .get_storage_at(address, slot, None)
            .await
            .map_err(classify)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.client.call(&tx, None).await.map_err(classify)
    }

    async fn send(&self, to: Option<Address>, data: Bytes) -> Result<H256, DeployError> {
        let mut tx: TypedTransaction = if self.legacy {
            let mut tx = TransactionRequest::new().data(data);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            tx.into()
        } else {
            let mut tx = Eip1559TransactionRequest::new().data(data);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            tx.into()
        };

        self.client
            .fill_transaction(&mut tx, None)
            .await
            .map_err(classify)?;

        let transaction_hash = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(classify)?
            .tx_hash();
        log::info!("transaction hash:{:?}", transaction_hash);
        Ok(transaction_hash)
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, DeployError> {
        self.client
            .get_transaction_receipt(hash)
            .await
            .map_err(classify)
    }
}

fn check_chain_id(profile: &NetworkProfile, actual: u64) -> Result<(), DeployError> {
    if actual != profile.chain_id {
        return Err(DeployError::ChainIdMismatch {
            network: profile.name.clone(),
            expected: profile.chain_id,
            actual,
        });
    }
    Ok(())
}

/// Maps a node or transport failure onto the error taxonomy.
fn classify<E: MiddlewareError>(err: E) -> DeployError {
    if let Some(response) = err.as_error_response() {
        return classify_message(&response.message);
    }
    match err.as_provider_error() {
        Some(provider) if !provider.is_serde_error() => {
            DeployError::NetworkUnreachable(err.to_string())
        }
        _ => classify_message(&err.to_string()),
    }
}

fn classify_message(message: &str) -> DeployError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        DeployError::InsufficientBalance(message.to_string())
    } else if lower.contains("revert") {
        DeployError::TransactionReverted(message.to_string())
    } else {
        DeployError::Rejected(message.to_string())
    }
}
