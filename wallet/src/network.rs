//! Network-dependent constants: address prefixes and extended-key version
//! bytes. The library defaults to mainnet; embedders pick the network when
//! opening wallets.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NetworkConfig {
    pub network: Network,
    pub pubkey_hash_prefix: u8,
    pub script_hash_prefix: u8,
    pub privkey_prefix: u8,
    pub bip32_pub_version: u32,
    pub bip32_priv_version: u32,
    pub bech32_hrp: &'static str,
}

impl NetworkConfig {
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            pubkey_hash_prefix: 0x00,
            script_hash_prefix: 0x05,
            privkey_prefix: 0x80,
            bip32_pub_version: 0x0488_b21e,
            bip32_priv_version: 0x0488_ade4,
            bech32_hrp: "bc",
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            pubkey_hash_prefix: 0x6f,
            script_hash_prefix: 0xc4,
            privkey_prefix: 0xef,
            bip32_pub_version: 0x0435_87cf,
            bip32_priv_version: 0x0435_8394,
            bech32_hrp: "tb",
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}
