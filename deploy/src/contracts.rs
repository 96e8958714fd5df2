use ethers::{contract::abigen, types::H256};

abigen!(
    ProxyAdmin,
    r#"[
        function owner() external view returns (address)
        function upgrade(address proxy, address implementation) external
        function upgradeAndCall(address proxy, address implementation, bytes data) external payable
    ]"#
);

// Admin-only interface of a transparent proxy, used when the admin is an account.
abigen!(
    TransparentUpgradeableProxy,
    r#"[
        function upgradeTo(address newImplementation) external
        function upgradeToAndCall(address newImplementation, bytes data) external payable
    ]"#
);

/// `keccak256("eip1967.proxy.implementation") - 1`
pub const IMPLEMENTATION_SLOT: H256 = H256([
    0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9, 0x8d,
    0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38, 0x2b, 0xbc,
]);

/// `keccak256("eip1967.proxy.admin") - 1`
pub const ADMIN_SLOT: H256 = H256([
    0xb5, 0x31, 0x27, 0x68, 0x4a, 0x56, 0x8b, 0x31, 0x73, 0xae, 0x13, 0xb9, 0xf8, 0xa6, 0x01, 0x6e,
    0x24, 0x3e, 0x63, 0xb6, 0xe8, 0xee, 0x11, 0x78, 0xd6, 0xa7, 0x17, 0x85, 0x0b, 0x5d, 0x61, 0x03,
]);

/// Only 5.x `ProxyAdmin` contracts answer this; 4.x ones revert.
pub const UPGRADE_INTERFACE_VERSION: &str = "UPGRADE_INTERFACE_VERSION()";

/// Artifact names of the proxy contracts deployed alongside an upgradeable contract.
pub const PROXY_ADMIN_ARTIFACT: &str = "ProxyAdmin";
pub const PROXY_ARTIFACT: &str = "TransparentUpgradeableProxy";
