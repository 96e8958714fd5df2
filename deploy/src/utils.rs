use std::time::{SystemTime, UNIX_EPOCH};

use ethers::{
    signers::LocalWallet,
    types::{Address, H256},
    utils::hex,
};

use crate::error::DeployError;

/// The address stored in the low 20 bytes of a storage word.
pub fn slot_address(word: H256) -> Address {
    Address::from_slice(&word.as_bytes()[12..])
}

pub fn parse_wallet(sk: &str) -> Result<LocalWallet, DeployError> {
    let bytes = hex::decode(sk.strip_prefix("0x").unwrap_or(sk))
        .map_err(|_| DeployError::Config("private key is not valid hex".to_string()))?;
    LocalWallet::from_bytes(&bytes)
        .map_err(|_| DeployError::Config("private key is not a valid secp256k1 key".to_string()))
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
