//! Reverse lookups for transaction signing: script hashes back to their
//! preimages, public keys back to private keys and derivation paths.

use std::collections::HashMap;
use std::sync::Mutex;

use hdwallet_crypto::hashes::hash160;
use hdwallet_crypto::SecretBytes;

use crate::address::{AddressEntry, WITNESS_LONG_PREFIX, WITNESS_SHORT_PREFIX};
use crate::assets::AssetId;
use crate::error::WalletError;
use crate::wallet::AssetWallet;

/// A public key's position below the seed, with an optional derived public
/// root for auditors.
#[derive(Clone, Debug)]
pub struct Bip32AssetPath {
    pub pubkey: [u8; 33],
    pub path_from_seed: Vec<u32>,
    pub seed_fingerprint: u32,
    pub derived_root_xpub: Option<String>,
}

pub struct ResolverFeed<'a> {
    wallet: &'a AssetWallet,
    // hash -> preimage
    value_cache: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    // compressed pubkey -> decrypted private key
    privkey_cache: Mutex<HashMap<[u8; 33], SecretBytes>>,
    // caller-registered derivation hints
    path_hints: Mutex<HashMap<[u8; 33], Bip32AssetPath>>,
}

impl<'a> ResolverFeed<'a> {
    pub fn new(wallet: &'a AssetWallet) -> Self {
        Self {
            wallet,
            value_cache: Mutex::new(HashMap::new()),
            privkey_cache: Mutex::new(HashMap::new()),
            path_hints: Mutex::new(HashMap::new()),
        }
    }

    /// Candidate scrAddr prefixes, tried in deterministic order.
    fn prefix_candidates(&self) -> [u8; 4] {
        let config = self.wallet.network_config();
        [
            config.pubkey_hash_prefix,
            config.script_hash_prefix,
            WITNESS_SHORT_PREFIX,
            WITNESS_LONG_PREFIX,
        ]
    }

    /// Resolves a bare hash to the preimage its script commits to. Nested
    /// entries seed the cache with their inner preimage as well.
    pub fn get_by_val(&self, hash: &[u8]) -> Result<Vec<u8>, WalletError> {
        if let Some(cached) = self.value_cache.lock().expect("cache poisoned").get(hash) {
            return Ok(cached.clone());
        }

        for prefix in self.prefix_candidates() {
            let mut prefixed = Vec::with_capacity(1 + hash.len());
            prefixed.push(prefix);
            prefixed.extend_from_slice(hash);

            let (asset_id, atype) = match self.wallet.get_asset_id_for_scr_addr(&prefixed) {
                Ok(found) => found,
                Err(_) => continue,
            };
            let asset = self.wallet.get_asset_for_id(&asset_id)?;
            let entry = AddressEntry::for_asset(&asset, atype)?;
            let preimage = entry.preimage();

            let mut cache = self.value_cache.lock().expect("cache poisoned");
            cache.insert(hash.to_vec(), preimage.clone());

            // P2SH nesting: make the inner hash resolvable without a rescan
            if let AddressEntry::P2Sh(inner) | AddressEntry::P2Wsh(inner) = &entry {
                cache.insert(inner.hash(), inner.preimage());
            }
            return Ok(preimage);
        }
        Err(WalletError::NoAsset)
    }

    /// Registers a derivation hint for later private-key resolution.
    pub fn set_bip32_path_for_pubkey(&self, pubkey: [u8; 33], path: Bip32AssetPath) {
        self.path_hints
            .lock()
            .expect("hint cache poisoned")
            .insert(pubkey, path);
    }

    /// Private key for a public key. Resolution order: cache, registered
    /// path hints, then the wallet's hash map. Requires the wallet container
    /// lock for anything not already cached.
    pub fn get_priv_key_for_pubkey(
        &self,
        pubkey: &[u8; 33],
    ) -> Result<SecretBytes, WalletError> {
        if let Some(cached) = self
            .privkey_cache
            .lock()
            .expect("privkey cache poisoned")
            .get(pubkey)
        {
            return Ok(cached.clone());
        }

        // caller-registered hint: derive along the path from the root
        let hint = self
            .path_hints
            .lock()
            .expect("hint cache poisoned")
            .get(pubkey)
            .cloned();
        if let Some(hint) = hint {
            if let Ok(privkey) = self.derive_from_hint(&hint) {
                self.privkey_cache
                    .lock()
                    .expect("privkey cache poisoned")
                    .insert(*pubkey, privkey.clone());
                return Ok(privkey);
            }
        }

        // fall back to the hash map
        let digest = hash160(pubkey);
        let (asset_id, _) = self.lookup_asset_for_hash(&digest)?;
        let asset = self.wallet.get_asset_for_id(&asset_id)?;
        if !asset.has_private_key() {
            return Err(WalletError::NoAsset);
        }
        let privkey = self.wallet.get_decrypted_private_key_for_asset(&asset)?;
        self.privkey_cache
            .lock()
            .expect("privkey cache poisoned")
            .insert(*pubkey, privkey.clone());
        Ok(privkey)
    }

    fn lookup_asset_for_hash(
        &self,
        hash: &[u8],
    ) -> Result<(AssetId, crate::address::AddressType), WalletError> {
        for prefix in self.prefix_candidates() {
            let mut prefixed = Vec::with_capacity(1 + hash.len());
            prefixed.push(prefix);
            prefixed.extend_from_slice(hash);
            if let Ok(found) = self.wallet.get_asset_id_for_scr_addr(&prefixed) {
                return Ok(found);
            }
        }
        Err(WalletError::NoAsset)
    }

    fn derive_from_hint(&self, hint: &Bip32AssetPath) -> Result<SecretBytes, WalletError> {
        self.wallet.derive_privkey_from_path(&hint.path_from_seed)
    }

    /// Resolves a public key to its path below the seed.
    pub fn resolve_bip32_path_for_pubkey(
        &self,
        pubkey: &[u8; 33],
    ) -> Result<Bip32AssetPath, WalletError> {
        let digest = hash160(pubkey);
        let (asset_id, _) = self.lookup_asset_for_hash(&digest)?;
        let path_from_seed = self.wallet.derivation_path_for_asset(&asset_id)?;
        let seed_fingerprint = self
            .wallet
            .seed_fingerprint_for_asset(&asset_id)
            .unwrap_or_default();
        let derived_root_xpub = self.wallet.get_xpub_for_asset_id(&asset_id).ok();
        Ok(Bip32AssetPath {
            pubkey: *pubkey,
            path_from_seed,
            seed_fingerprint,
            derived_root_xpub,
        })
    }

    /// Asset pair lookup used by signers: the asset owning `hash` plus its
    /// address form.
    pub fn get_asset_pair_for_key(
        &self,
        hash: &[u8],
    ) -> Result<(AssetId, crate::address::AddressType), WalletError> {
        self.lookup_asset_for_hash(hash)
    }
}
