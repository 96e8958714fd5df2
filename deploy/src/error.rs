use ethers::types::{Address, H256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    /// No profile with this name in the registry.
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),
    /// The compiled artifact is missing, usually because compilation was not run.
    #[error("artifact for `{0}` not found, compile the contracts first")]
    ArtifactNotFound(String),
    #[error("contract name `{name}` matches several artifacts ({candidates}), use `<source>:<name>`")]
    AmbiguousArtifact { name: String, candidates: String },
    #[error("invalid artifact {path}: {reason}")]
    InvalidArtifact { path: String, reason: String },
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("credential `{0}` is not set in the environment")]
    MissingCredential(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("network `{network}` expects chain id {expected} but the node reports {actual}")]
    ChainIdMismatch {
        network: String,
        expected: u64,
        actual: u64,
    },
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    /// The node answered with an error that fits none of the other variants.
    #[error("request rejected by node: {0}")]
    Rejected(String),
    #[error("no proxy found at {0:#x}")]
    ProxyNotFound(Address),
    #[error("{caller:#x} is not allowed to upgrade proxy {proxy:#x}, its admin is {admin:#x}")]
    UnauthorizedUpgrade {
        proxy: Address,
        caller: Address,
        admin: Address,
    },
    /// The proxy was deployed but its admin is not the one it was built with.
    #[error("proxy {proxy:#x} was deployed but {reason}")]
    AdminMismatch { proxy: Address, reason: String },
    #[error("proxy admin {0:#x} does not answer owner()")]
    UnknownAdmin(Address),
    /// The transaction was broadcast but its inclusion could not be confirmed.
    /// It may still be mined, so it must be reconciled instead of resubmitted.
    #[error("transaction {0:#x} was not confirmed in time, its outcome is unknown; run `status` before retrying")]
    AmbiguousOutcome(H256),
    #[error("no deployment of `{contract}` recorded on `{network}`")]
    RecordNotFound { network: String, contract: String },
    #[error("deployment records: {0}")]
    Records(String),
}
