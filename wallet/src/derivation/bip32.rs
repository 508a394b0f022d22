//! BIP32 extended keys, built directly on the HMAC and curve primitives.

use hdwallet_crypto::ecc;
use hdwallet_crypto::hashes::{hash160, hmac_sha512};
use hdwallet_crypto::SecretBytes;

use crate::derivation::is_hardened;
use crate::error::WalletError;
use crate::network::NetworkConfig;

const SEED_DOMAIN: &[u8] = b"Bitcoin seed";
const SERIALIZED_LEN: usize = 78;

/// One node of a BIP32 tree: key material plus its position metadata.
#[derive(Clone)]
pub struct Bip32Node {
    depth: u8,
    parent_fingerprint: u32,
    child_num: u32,
    chaincode: [u8; 32],
    privkey: Option<SecretBytes>,
    pubkey: [u8; 33],
}

impl Bip32Node {
    pub fn from_seed(seed: &[u8]) -> Result<Self, WalletError> {
        let stretched = hmac_sha512(SEED_DOMAIN, seed);
        let privkey = SecretBytes::from_slice(&stretched[..32]);
        let pubkey = ecc::compute_pubkey(&privkey)?;
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&stretched[32..]);
        Ok(Self {
            depth: 0,
            parent_fingerprint: 0,
            child_num: 0,
            chaincode,
            privkey: Some(privkey),
            pubkey,
        })
    }

    pub fn from_private(
        privkey: SecretBytes,
        chaincode: [u8; 32],
        depth: u8,
        parent_fingerprint: u32,
        child_num: u32,
    ) -> Result<Self, WalletError> {
        let pubkey = ecc::compute_pubkey(&privkey)?;
        Ok(Self {
            depth,
            parent_fingerprint,
            child_num,
            chaincode,
            privkey: Some(privkey),
            pubkey,
        })
    }

    pub fn from_public(
        pubkey: [u8; 33],
        chaincode: [u8; 32],
        depth: u8,
        parent_fingerprint: u32,
        child_num: u32,
    ) -> Result<Self, WalletError> {
        ecc::validate_pubkey(&pubkey)?;
        Ok(Self {
            depth,
            parent_fingerprint,
            child_num,
            chaincode,
            privkey: None,
            pubkey,
        })
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn child_num(&self) -> u32 {
        self.child_num
    }

    pub fn parent_fingerprint(&self) -> u32 {
        self.parent_fingerprint
    }

    pub fn chaincode(&self) -> &[u8; 32] {
        &self.chaincode
    }

    pub fn public_key(&self) -> &[u8; 33] {
        &self.pubkey
    }

    pub fn private_key(&self) -> Option<&SecretBytes> {
        self.privkey.as_ref()
    }

    pub fn has_private_key(&self) -> bool {
        self.privkey.is_some()
    }

    /// First four bytes of HASH160 of the compressed public key.
    pub fn fingerprint(&self) -> u32 {
        let digest = hash160(&self.pubkey);
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    pub fn public_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.privkey = None;
        copy
    }

    /// Child derivation with private material; handles hardened steps.
    /// The next valid index is used on the (negligible) invalid-child case.
    pub fn derive_private(&self, index: u32) -> Result<Self, WalletError> {
        let privkey = self
            .privkey
            .as_ref()
            .ok_or(WalletError::HardenedFromPublic)?;

        let mut index = index;
        loop {
            let mut data = Vec::with_capacity(37);
            if is_hardened(index) {
                data.push(0);
                data.extend_from_slice(privkey);
            } else {
                data.extend_from_slice(&self.pubkey);
            }
            data.extend_from_slice(&index.to_be_bytes());

            let stretched = hmac_sha512(&self.chaincode, &data);
            match ecc::privkey_add(privkey.as_slice(), &stretched[..32]) {
                Ok(child_privkey) => {
                    let mut chaincode = [0u8; 32];
                    chaincode.copy_from_slice(&stretched[32..]);
                    return Self::from_private(
                        child_privkey,
                        chaincode,
                        self.depth + 1,
                        self.fingerprint(),
                        index,
                    );
                }
                // invalid tweak: move to the next index, per the standard
                Err(_) => index = index.wrapping_add(1),
            }
        }
    }

    /// Soft child derivation from public material only.
    pub fn derive_public(&self, index: u32) -> Result<Self, WalletError> {
        if is_hardened(index) {
            return Err(WalletError::HardenedFromPublic);
        }

        let mut index = index;
        loop {
            let mut data = Vec::with_capacity(37);
            data.extend_from_slice(&self.pubkey);
            data.extend_from_slice(&index.to_be_bytes());

            let stretched = hmac_sha512(&self.chaincode, &data);
            match ecc::pubkey_add(&self.pubkey, &stretched[..32]) {
                Ok(child_pubkey) => {
                    let mut chaincode = [0u8; 32];
                    chaincode.copy_from_slice(&stretched[32..]);
                    return Self::from_public(
                        child_pubkey,
                        chaincode,
                        self.depth + 1,
                        self.fingerprint(),
                        index,
                    );
                }
                Err(_) => index = index.wrapping_add(1),
            }
        }
    }

    /// Walks `path`, using private derivation while private material is
    /// present.
    pub fn derive_path(&self, path: &[u32]) -> Result<Self, WalletError> {
        let mut node = self.clone();
        for &step in path {
            node = if node.has_private_key() {
                node.derive_private(step)?
            } else {
                node.derive_public(step)?
            };
        }
        Ok(node)
    }

    // ---- base58 serialization ----------------------------------------------

    pub fn to_base58(&self, config: &NetworkConfig) -> String {
        let mut data = Vec::with_capacity(SERIALIZED_LEN);
        let version = if self.privkey.is_some() {
            config.bip32_priv_version
        } else {
            config.bip32_pub_version
        };
        data.extend_from_slice(&version.to_be_bytes());
        data.push(self.depth);
        data.extend_from_slice(&self.parent_fingerprint.to_be_bytes());
        data.extend_from_slice(&self.child_num.to_be_bytes());
        data.extend_from_slice(&self.chaincode);
        match &self.privkey {
            Some(privkey) => {
                data.push(0);
                data.extend_from_slice(privkey);
            }
            None => data.extend_from_slice(&self.pubkey),
        }
        bs58::encode(data).with_check().into_string()
    }

    pub fn from_base58(encoded: &str, config: &NetworkConfig) -> Result<Self, WalletError> {
        let data = bs58::decode(encoded)
            .with_check(None)
            .into_vec()
            .map_err(|_| WalletError::Deser("bad base58 extended key"))?;
        if data.len() != SERIALIZED_LEN {
            return Err(WalletError::Deser("bad extended key length"));
        }

        let version = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let depth = data[4];
        let parent_fingerprint = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        let child_num = u32::from_be_bytes([data[9], data[10], data[11], data[12]]);
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&data[13..45]);
        let key = &data[45..78];

        if version == config.bip32_priv_version {
            if key[0] != 0 {
                return Err(WalletError::Deser("bad private key padding"));
            }
            Self::from_private(
                SecretBytes::from_slice(&key[1..]),
                chaincode,
                depth,
                parent_fingerprint,
                child_num,
            )
        } else if version == config.bip32_pub_version {
            let mut pubkey = [0u8; 33];
            pubkey.copy_from_slice(key);
            Self::from_public(pubkey, chaincode, depth, parent_fingerprint, child_num)
        } else {
            Err(WalletError::Deser("unknown extended key version"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTOR1_SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const VECTOR1_XPRV_M: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";
    const VECTOR1_XPUB_M: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";
    const VECTOR1_XPRV_M_0H: &str = "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7";
    const VECTOR1_XPUB_M_0H: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

    fn config() -> NetworkConfig {
        NetworkConfig::mainnet()
    }

    #[test]
    fn vector1_master() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();
        assert_eq!(node.to_base58(&config()), VECTOR1_XPRV_M);
        assert_eq!(node.public_copy().to_base58(&config()), VECTOR1_XPUB_M);
        assert_eq!(
            hex::encode(node.chaincode()),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );
    }

    #[test]
    fn vector1_first_hardened_child() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();
        let child = node.derive_private(0x8000_0000).unwrap();
        assert_eq!(child.depth(), 1);
        assert_eq!(child.child_num(), 0x8000_0000);
        assert_eq!(child.to_base58(&config()), VECTOR1_XPRV_M_0H);
        assert_eq!(child.public_copy().to_base58(&config()), VECTOR1_XPUB_M_0H);
    }

    #[test]
    fn base58_round_trip() {
        let node = Bip32Node::from_base58(VECTOR1_XPRV_M_0H, &config()).unwrap();
        assert_eq!(node.to_base58(&config()), VECTOR1_XPRV_M_0H);
        assert_eq!(node.depth(), 1);
        assert_eq!(node.child_num(), 0x8000_0000);

        let public = Bip32Node::from_base58(VECTOR1_XPUB_M_0H, &config()).unwrap();
        assert!(!public.has_private_key());
        assert_eq!(public.public_key(), node.public_key());
        assert_eq!(public.chaincode(), node.chaincode());
    }

    #[test]
    fn soft_derivation_matches_private() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();
        let account = node.derive_private(0x8000_002c).unwrap();

        let from_private = account.derive_private(7).unwrap();
        let from_public = account.public_copy().derive_public(7).unwrap();
        assert_eq!(from_private.public_key(), from_public.public_key());
        assert_eq!(from_private.chaincode(), from_public.chaincode());
        assert_eq!(from_private.fingerprint(), from_public.fingerprint());
    }

    #[test]
    fn hardened_from_public_fails() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap().public_copy();
        assert!(matches!(
            node.derive_public(0x8000_0000),
            Err(WalletError::HardenedFromPublic)
        ));
        assert!(matches!(
            node.derive_private(0),
            Err(WalletError::HardenedFromPublic)
        ));
    }
}
