use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ethers::{
    abi::{self, ParamType, Token},
    contract::EthCall,
    types::{Address, Bytes, TransactionReceipt, H256, U256, U64},
    utils::{get_contract_address, id, keccak256},
};

use crate::{
    client::ChainClient,
    config::NetworkProfile,
    contracts::{
        proxy_admin::{OwnerCall, UpgradeAndCallCall, UpgradeCall},
        transparent_upgradeable_proxy::{UpgradeToAndCallCall, UpgradeToCall},
        ADMIN_SLOT, IMPLEMENTATION_SLOT, UPGRADE_INTERFACE_VERSION,
    },
    error::DeployError,
    utils::slot_address,
};

pub const CHAIN_ID: u64 = 31337;
pub const TOKEN_V1_CODE: [u8; 5] = [0x60, 0x01, 0x60, 0x01, 0x01];
pub const TOKEN_V2_CODE: [u8; 5] = [0x60, 0x02, 0x60, 0x02, 0x02];
pub const CURVE_CODE: [u8; 5] = [0x60, 0x03, 0x60, 0x03, 0x03];
pub const ADMIN_CODE: [u8; 4] = [0xad, 0x01, 0xad, 0x01];
pub const PROXY_CODE: [u8; 4] = [0xbb, 0x02, 0xbb, 0x02];
pub const PROXY_V5_CODE: [u8; 4] = [0xbb, 0x05, 0xbb, 0x05];

pub fn local_profile() -> NetworkProfile {
    NetworkProfile {
        name: "local".to_string(),
        rpc_url: "http://127.0.0.1:8545/".to_string(),
        chain_id: CHAIN_ID,
        credential_ref: "PRIVATE_KEY".to_string(),
        explorer_api_url: None,
        explorer_url: None,
        legacy: true,
    }
}

pub fn write_artifact(root: &Path, source: &str, name: &str, abi: &str, bytecode: &str) {
    let dir = root.join(source);
    fs::create_dir_all(&dir).unwrap();
    let artifact = format!(
        r#"{{
            "_format": "hh-sol-artifact-1",
            "contractName": "{name}",
            "sourceName": "{source}",
            "abi": {abi},
            "bytecode": "{bytecode}",
            "deployedBytecode": "{bytecode}",
            "linkReferences": {{}},
            "deployedLinkReferences": {{}}
        }}"#
    );
    fs::write(dir.join(format!("{name}.json")), artifact).unwrap();
}

fn hex_code(code: &[u8]) -> String {
    format!("0x{}", ethers::utils::hex::encode(code))
}

/// Hardhat-style artifacts for `TokenV1` (constructor with two addresses),
/// `TokenV2` and `Curve` (initializers), plus the proxy contracts.
pub fn write_fixtures(root: &Path) {
    write_artifact(
        root,
        "contracts/TokenV1.sol",
        "TokenV1",
        r#"[
            {"type":"constructor","stateMutability":"nonpayable","inputs":[
                {"name":"router","type":"address","internalType":"address"},
                {"name":"marketing","type":"address","internalType":"address"}]},
            {"type":"function","name":"version","stateMutability":"pure","inputs":[],
                "outputs":[{"name":"","type":"uint256","internalType":"uint256"}]}
        ]"#,
        &hex_code(&TOKEN_V1_CODE),
    );
    write_artifact(
        root,
        "contracts/TokenV2.sol",
        "TokenV2",
        r#"[
            {"type":"function","name":"initialize","stateMutability":"nonpayable","inputs":[],"outputs":[]},
            {"type":"function","name":"migrate","stateMutability":"nonpayable",
                "inputs":[{"name":"cap","type":"uint256","internalType":"uint256"}],"outputs":[]}
        ]"#,
        &hex_code(&TOKEN_V2_CODE),
    );
    write_artifact(
        root,
        "contracts/Curve.sol",
        "Curve",
        r#"[
            {"type":"function","name":"initialize","stateMutability":"nonpayable",
                "inputs":[{"name":"fee","type":"uint256","internalType":"uint256"}],"outputs":[]}
        ]"#,
        &hex_code(&CURVE_CODE),
    );
    write_artifact(
        root,
        "@openzeppelin/contracts/proxy/transparent/ProxyAdmin.sol",
        "ProxyAdmin",
        r#"[
            {"type":"function","name":"owner","stateMutability":"view","inputs":[],
                "outputs":[{"name":"","type":"address","internalType":"address"}]}
        ]"#,
        &hex_code(&ADMIN_CODE),
    );
    write_artifact(
        root,
        "@openzeppelin/contracts/proxy/transparent/TransparentUpgradeableProxy.sol",
        "TransparentUpgradeableProxy",
        r#"[
            {"type":"constructor","stateMutability":"payable","inputs":[
                {"name":"_logic","type":"address","internalType":"address"},
                {"name":"admin_","type":"address","internalType":"address"},
                {"name":"_data","type":"bytes","internalType":"bytes"}]}
        ]"#,
        &hex_code(&PROXY_CODE),
    );
}

/// Replaces the proxy artifacts with OpenZeppelin 5.x ones: `ProxyAdmin` takes
/// its initial owner and the proxy deploys its own admin.
pub fn write_v5_proxy_fixtures(root: &Path) {
    write_artifact(
        root,
        "@openzeppelin/contracts/proxy/transparent/ProxyAdmin.sol",
        "ProxyAdmin",
        r#"[
            {"type":"constructor","stateMutability":"nonpayable","inputs":[
                {"name":"initialOwner","type":"address","internalType":"address"}]},
            {"type":"function","name":"UPGRADE_INTERFACE_VERSION","stateMutability":"view","inputs":[],
                "outputs":[{"name":"","type":"string","internalType":"string"}]},
            {"type":"function","name":"owner","stateMutability":"view","inputs":[],
                "outputs":[{"name":"","type":"address","internalType":"address"}]}
        ]"#,
        &hex_code(&ADMIN_CODE),
    );
    write_artifact(
        root,
        "@openzeppelin/contracts/proxy/transparent/TransparentUpgradeableProxy.sol",
        "TransparentUpgradeableProxy",
        r#"[
            {"type":"constructor","stateMutability":"payable","inputs":[
                {"name":"_logic","type":"address","internalType":"address"},
                {"name":"initialOwner","type":"address","internalType":"address"},
                {"name":"_data","type":"bytes","internalType":"bytes"}]}
        ]"#,
        &hex_code(&PROXY_V5_CODE),
    );
}

#[derive(Default)]
struct State {
    block: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, H256), H256>,
    admin_owners: HashMap<Address, Address>,
    v5_admins: HashSet<Address>,
    receipts: HashMap<H256, TransactionReceipt>,
    stalled: bool,
    revert_next: bool,
    sent: usize,
    failing_receipts: usize,
    storage_fails_from: Option<usize>,
    misreported_admin: Option<Address>,
}

/// A chain that understands just enough of `ProxyAdmin` and
/// `TransparentUpgradeableProxy` to exercise deployments and upgrades.
/// Clones share state; [`MockChain::as_account`] switches the signer.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
    sender: Address,
}

impl MockChain {
    pub fn new(sender: Address) -> Self {
        let chain = Self {
            state: Arc::new(Mutex::new(State::default())),
            sender,
        };
        chain.fund(sender, U256::exp10(18));
        chain
    }

    pub fn as_account(&self, sender: Address) -> Self {
        Self {
            state: self.state.clone(),
            sender,
        }
    }

    pub fn fund(&self, account: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert(account, amount);
    }

    /// Accept transactions without ever mining them.
    pub fn stall(&self) {
        self.state.lock().unwrap().stalled = true;
    }

    pub fn revert_next(&self) {
        self.state.lock().unwrap().revert_next = true;
    }

    /// The next `count` receipt lookups fail the way a rate-limited node does.
    pub fn fail_receipts(&self, count: usize) {
        self.state.lock().unwrap().failing_receipts = count;
    }

    /// Storage reads fail once `sent` transactions have been sent.
    pub fn fail_storage_from(&self, sent: usize) {
        self.state.lock().unwrap().storage_fails_from = Some(sent);
    }

    /// Every proxy reports `admin` in its admin slot.
    pub fn misreport_admin(&self, admin: Address) {
        self.state.lock().unwrap().misreported_admin = Some(admin);
    }

    pub fn sent(&self) -> usize {
        self.state.lock().unwrap().sent
    }

    pub fn implementation_of(&self, proxy: Address) -> Address {
        let state = self.state.lock().unwrap();
        slot_address(
            state
                .storage
                .get(&(proxy, IMPLEMENTATION_SLOT))
                .copied()
                .unwrap_or_default(),
        )
    }

    pub fn owner_of(&self, admin: Address) -> Option<Address> {
        self.state.lock().unwrap().admin_owners.get(&admin).copied()
    }
}

impl State {
    fn create(&mut self, sender: Address, address: Address, data: &[u8]) -> bool {
        if data.starts_with(&ADMIN_CODE) {
            // 5.x admins name their owner, 4.x ones belong to the deployer.
            let owner = abi::decode(&[ParamType::Address], &data[ADMIN_CODE.len()..])
                .ok()
                .and_then(|mut tokens| tokens.pop())
                .and_then(Token::into_address)
                .unwrap_or(sender);
            self.code.insert(address, Bytes::from(ADMIN_CODE.to_vec()));
            self.admin_owners.insert(address, owner);
        } else if data.starts_with(&PROXY_CODE) || data.starts_with(&PROXY_V5_CODE) {
            let Ok(args) = abi::decode(
                &[ParamType::Address, ParamType::Address, ParamType::Bytes],
                &data[PROXY_CODE.len()..],
            ) else {
                return false;
            };
            let (Some(logic), Some(second)) =
                (args[0].clone().into_address(), args[1].clone().into_address())
            else {
                return false;
            };
            let admin = if data.starts_with(&PROXY_V5_CODE) {
                let admin = get_contract_address(address, 1u64);
                self.code.insert(admin, Bytes::from(ADMIN_CODE.to_vec()));
                self.admin_owners.insert(admin, second);
                self.v5_admins.insert(admin);
                admin
            } else {
                second
            };
            self.code.insert(address, Bytes::from(data[..4].to_vec()));
            self.storage.insert((address, IMPLEMENTATION_SLOT), H256::from(logic));
            self.storage.insert((address, ADMIN_SLOT), H256::from(admin));
        } else {
            self.code.insert(address, Bytes::from(data.to_vec()));
        }
        true
    }

    fn set_implementation(&mut self, proxy: Address, implementation: Address) -> bool {
        if !self.code.contains_key(&proxy) {
            return false;
        }
        self.storage
            .insert((proxy, IMPLEMENTATION_SLOT), H256::from(implementation));
        true
    }

    fn execute(&mut self, sender: Address, to: Address, data: &[u8]) -> bool {
        let selector = data.get(..4).unwrap_or_default();

        if let Some(owner) = self.admin_owners.get(&to).copied() {
            if owner != sender {
                return false;
            }
            if selector == UpgradeCall::selector() && !self.v5_admins.contains(&to) {
                let Ok(call) = <UpgradeCall as ethers::abi::AbiDecode>::decode(data) else {
                    return false;
                };
                return self.set_implementation(call.proxy, call.implementation);
            }
            if selector == UpgradeAndCallCall::selector() {
                let Ok(call) = <UpgradeAndCallCall as ethers::abi::AbiDecode>::decode(data) else {
                    return false;
                };
                return self.set_implementation(call.proxy, call.implementation);
            }
            return false;
        }

        let admin = self.storage.get(&(to, ADMIN_SLOT)).copied();
        if admin.map(slot_address) == Some(sender) {
            if selector == UpgradeToCall::selector() {
                let Ok(call) = <UpgradeToCall as ethers::abi::AbiDecode>::decode(data) else {
                    return false;
                };
                return self.set_implementation(to, call.new_implementation);
            }
            if selector == UpgradeToAndCallCall::selector() {
                let Ok(call) = <UpgradeToAndCallCall as ethers::abi::AbiDecode>::decode(data)
                else {
                    return false;
                };
                return self.set_implementation(to, call.new_implementation);
            }
        }
        false
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        Ok(CHAIN_ID)
    }

    async fn block_number(&self) -> Result<u64, DeployError> {
        Ok(self.state.lock().unwrap().block)
    }

    async fn balance(&self, address: Address) -> Result<U256, DeployError> {
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, DeployError> {
        let state = self.state.lock().unwrap();
        Ok(state.code.get(&address).cloned().unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, DeployError> {
        let state = self.state.lock().unwrap();
        if state.storage_fails_from.is_some_and(|sent| state.sent >= sent) {
            return Err(DeployError::NetworkUnreachable("connection reset".to_string()));
        }
        if let Some(admin) = state.misreported_admin.filter(|_| slot == ADMIN_SLOT) {
            return Ok(H256::from(admin));
        }
        Ok(state.storage.get(&(address, slot)).copied().unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        let state = self.state.lock().unwrap();
        match state.admin_owners.get(&to) {
            Some(owner) if data.starts_with(&OwnerCall::selector()) => {
                Ok(abi::encode(&[Token::Address(*owner)]).into())
            }
            Some(_)
                if state.v5_admins.contains(&to)
                    && data.starts_with(&id(UPGRADE_INTERFACE_VERSION)) =>
            {
                Ok(abi::encode(&[Token::String("5.0.0".to_string())]).into())
            }
            _ => Err(DeployError::TransactionReverted(
                "execution reverted".to_string(),
            )),
        }
    }

    async fn send(&self, to: Option<Address>, data: Bytes) -> Result<H256, DeployError> {
        let mut state = self.state.lock().unwrap();
        let sender = self.sender;
        if state.balances.get(&sender).copied().unwrap_or_default().is_zero() {
            return Err(DeployError::InsufficientBalance(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }

        let nonce = state.nonces.entry(sender).or_default();
        let current = *nonce;
        *nonce += 1;
        state.sent += 1;

        let mut preimage = sender.as_bytes().to_vec();
        preimage.extend_from_slice(&current.to_be_bytes());
        let hash = H256::from(keccak256(preimage));
        if state.stalled {
            return Ok(hash);
        }

        state.block += 1;
        let mut contract_address = None;
        let success = if std::mem::take(&mut state.revert_next) {
            false
        } else {
            match to {
                None => {
                    let address = get_contract_address(sender, current);
                    let created = state.create(sender, address, &data);
                    if created {
                        contract_address = Some(address);
                    }
                    created
                }
                Some(to) => state.execute(sender, to, &data),
            }
        };

        let receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(state.block)),
            from: sender,
            to,
            contract_address,
            status: Some(U64::from(success as u64)),
            ..Default::default()
        };
        state.receipts.insert(hash, receipt);
        Ok(hash)
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, DeployError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_receipts > 0 {
            state.failing_receipts -= 1;
            return Err(DeployError::Rejected("limit exceeded".to_string()));
        }
        Ok(state.receipts.get(&hash).cloned())
    }
}
