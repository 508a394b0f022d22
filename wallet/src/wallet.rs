//! The wallet proper: header bookkeeping, account orchestration, address
//! vending, and the factories that build wallets from roots, seeds and
//! extended keys.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use hdwallet_crypto::ecc;
use hdwallet_crypto::hashes::{hash160, hmac_sha256};
use hdwallet_crypto::kdf::KdfParams;
use hdwallet_crypto::SecretBytes;

use crate::accounts::{
    AccountType, AccountTypeArmory135, AccountTypeBip32, AccountTypeEcdh, AddressAccount,
    AssetAccount, MetaAccount, MetaAccountType, ARMORY135_ACCOUNT_ID, BIP32_ACCOUNT_BASE,
};
use crate::address::{AddressEntry, AddressType};
use crate::assets::{Asset, AssetBip32Root, AssetId, AssetLegacyRoot, AssetSingle};
use crate::dbkeys::{
    singleton_key, ADDRESS_ACCOUNT_PREFIX, MAINWALLET_KEY, MAIN_ACCOUNT_KEY, MASTERID_KEY,
    ROOTASSET_KEY, WALLET_DESCR_KEY, WALLET_LABEL_KEY, WALLET_SEED_KEY,
};
use crate::decrypted_data::{DecryptedDataContainer, PassphrasePrompt};
use crate::derivation::bip32::Bip32Node;
use crate::derivation::scheme::DerivationScheme;
use crate::encode::{Reader, Writer};
use crate::encryption::{CipherData, CipherSpec, EncryptionKeyId, KdfId};
use crate::error::WalletError;
use crate::io::encrypted_db::{EncWriteTx, EncryptedDb};
use crate::io::header::{init_master_key, HeaderType, WalletHeader};
use crate::io::interface::WalletDbInterface;
use crate::network::NetworkConfig;

const MASTER_ID_DOMAIN: &[u8] = b"MasterID";
const BIP32_ID_DOMAIN: &[u8] = b"MetaEntry";

/// Default account structure for fresh BIP32 wallets: m/44'/0'/0'.
const DEFAULT_BIP32_PATH: [u32; 3] = [0x8000_002c, 0x8000_0000, 0x8000_0000];

pub struct AssetWallet {
    iface: Arc<WalletDbInterface>,
    db: Arc<EncryptedDb>,
    db_name: String,
    config: NetworkConfig,
    wallet_id: String,
    master_id: String,
    root: Option<Asset>,
    seed: Option<CipherData>,
    decrypted: Arc<DecryptedDataContainer>,
    accounts: Mutex<BTreeMap<u32, AddressAccount>>,
    main_account: Mutex<Option<u32>>,
    comments: Mutex<MetaAccount>,
    auth_peers: Mutex<MetaAccount>,
    label: Mutex<String>,
    description: Mutex<String>,
}

/// Short base58 identity derived from public key material.
fn compute_id(key_material: &[u8], config: &NetworkConfig) -> String {
    let digest = hash160(key_material);
    let mut data = Vec::with_capacity(6);
    data.push(config.pubkey_hash_prefix);
    data.extend_from_slice(&digest[..5]);
    data.reverse();
    bs58::encode(data).into_string()
}

fn compute_master_id(pub_root: &[u8], config: &NetworkConfig) -> String {
    compute_id(&hmac_sha256(MASTER_ID_DOMAIN, pub_root), config)
}

fn compute_wallet_id_legacy(
    scheme: &DerivationScheme,
    root_pubkey: &[u8; 33],
    config: &NetworkConfig,
) -> Result<String, WalletError> {
    let first = scheme.compute_next_pubkey(root_pubkey, None, 0)?;
    let uncompressed = ecc::uncompress_pubkey(&first)?;
    Ok(compute_id(&uncompressed, config))
}

fn compute_wallet_id_bip32(
    pubkey: &[u8; 33],
    chaincode: &[u8; 32],
    config: &NetworkConfig,
) -> String {
    let mut material = Vec::with_capacity(65);
    material.extend_from_slice(pubkey);
    material.extend_from_slice(chaincode);
    compute_id(&hmac_sha256(BIP32_ID_DOMAIN, &material), config)
}

fn wallet_file_path(dir: &Path, master_id: &str) -> PathBuf {
    dir.join(format!("{}_wallet.db", master_id))
}

struct WalletShell {
    iface: Arc<WalletDbInterface>,
    db: Arc<EncryptedDb>,
    db_name: String,
    decrypted: Arc<DecryptedDataContainer>,
}

impl AssetWallet {
    // ---- factories ----------------------------------------------------------

    /// Creates the file, control layer and wallet sub-database, and seeds the
    /// wallet container with a fresh master key wrapped under `passphrase`.
    fn init_wallet_shell(
        dir: &Path,
        master_id: &str,
        wallet_id: &str,
        passphrase: &SecretBytes,
        control_passphrase: &SecretBytes,
    ) -> Result<(WalletShell, KdfParams, SecretBytes, CipherSpec), WalletError> {
        let path = wallet_file_path(dir, master_id);
        let control_pass = control_passphrase.clone();
        let control_prompt: PassphrasePrompt = Arc::new(move |_| control_pass.clone());
        let iface = WalletDbInterface::setup_env(&path, control_prompt.clone())?;

        iface.lock_control_container(control_prompt)?;
        let header = WalletHeader::new(HeaderType::Single, wallet_id);
        let db = iface.add_header(header)?;
        iface.unlock_control_container();

        let mut kdf_salt = [0u8; 32];
        OsRng.fill_bytes(&mut kdf_salt);
        let kdf = KdfParams::standard(kdf_salt);
        let material = init_master_key(passphrase, kdf.clone())?;

        let decrypted: Arc<DecryptedDataContainer> = Arc::new(DecryptedDataContainer::new(
            db.clone() as Arc<dyn crate::io::RecordStore>,
        ));
        decrypted.add_kdf(kdf.clone());
        decrypted.add_encryption_key(material.master_key.clone());

        Ok((
            WalletShell {
                iface,
                db,
                db_name: wallet_id.to_string(),
                decrypted,
            },
            kdf,
            material.clear_master,
            material.cipher_template,
        ))
    }

    /// Legacy wallet from a private root, with an optional explicit
    /// chaincode.
    pub fn create_from_private_root_armory135(
        dir: impl AsRef<Path>,
        root: SecretBytes,
        chaincode: Option<[u8; 32]>,
        passphrase: &SecretBytes,
        control_passphrase: &SecretBytes,
        lookup: u32,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let root_pubkey = ecc::compute_pubkey(&root)?;
        let chaincode = chaincode.unwrap_or_else(|| ecc::chaincode_from_root(&root));
        let scheme = DerivationScheme::ArmoryLegacy { chaincode };

        let wallet_id = compute_wallet_id_legacy(&scheme, &root_pubkey, &config)?;
        let master_id = compute_master_id(&root_pubkey, &config);
        info!(wallet = %wallet_id, "creating legacy wallet");

        let (shell, kdf, clear_master, cipher_template) = Self::init_wallet_shell(
            dir.as_ref(),
            &master_id,
            &wallet_id,
            passphrase,
            control_passphrase,
        )?;

        // encrypt the root under the master key
        let root_cipher = cipher_template.fresh_copy();
        let derived_master = kdf.derive(&clear_master);
        let root_ct = hdwallet_crypto::cipher::aes_cbc_encrypt(
            derived_master.as_slice(),
            &root_cipher.iv,
            &root,
        )?;
        let root_asset = Asset::LegacyRoot(AssetLegacyRoot {
            base: AssetSingle::new(
                AssetId::root_asset_id(),
                root_pubkey,
                Some(CipherData::new(root_cipher, root_ct)),
            ),
            chaincode,
        });

        let descriptor = AccountTypeArmory135 {
            lookup,
            ..Default::default()
        };

        let wallet = Arc::new(Self {
            iface: shell.iface,
            db: shell.db,
            db_name: shell.db_name,
            config,
            wallet_id: wallet_id.clone(),
            master_id: master_id.clone(),
            root: Some(root_asset),
            seed: None,
            decrypted: shell.decrypted,
            accounts: Mutex::new(BTreeMap::new()),
            main_account: Mutex::new(None),
            comments: Mutex::new(MetaAccount::new(MetaAccountType::Comments)),
            auth_peers: Mutex::new(MetaAccount::new(MetaAccountType::AuthPeers)),
            label: Mutex::new(String::new()),
            description: Mutex::new(String::new()),
        });

        wallet.persist_base_records()?;
        wallet.with_passphrase(passphrase.clone(), |wallet| {
            wallet.create_armory135_account(&descriptor)
        })?;
        Ok(wallet)
    }

    /// BIP32 wallet from a seed, with the default account structure.
    pub fn create_from_seed_bip32(
        dir: impl AsRef<Path>,
        seed: SecretBytes,
        passphrase: &SecretBytes,
        control_passphrase: &SecretBytes,
        lookup: u32,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let wallet = Self::create_from_seed_bip32_blank(
            dir,
            seed,
            passphrase,
            control_passphrase,
            config,
        )?;

        let seed_fingerprint = wallet.seed_fingerprint()?;
        let mut address_types = BTreeSet::new();
        address_types.insert(AddressType::P2PKH);
        address_types.insert(AddressType::P2WPKH);
        address_types.insert(AddressType::P2WPKH.with(AddressType::MOD_P2SH));
        let descriptor =
            AccountTypeBip32::from_derivation_path(seed_fingerprint, DEFAULT_BIP32_PATH.to_vec())
                .with_lookup(lookup)
                .with_main(true)
                .with_address_types(address_types, AddressType::P2WPKH);
        wallet.with_passphrase(passphrase.clone(), |w| {
            w.create_bip32_account(&descriptor).map(|_| ())
        })?;
        Ok(wallet)
    }

    /// BIP32 wallet holding only its seed and root: accounts come later.
    pub fn create_from_seed_bip32_blank(
        dir: impl AsRef<Path>,
        seed: SecretBytes,
        passphrase: &SecretBytes,
        control_passphrase: &SecretBytes,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let node = Bip32Node::from_seed(&seed)?;
        let root_pubkey = *node.public_key();
        let chaincode = *node.chaincode();
        let seed_fingerprint = node.fingerprint();

        let wallet_id = compute_wallet_id_bip32(&root_pubkey, &chaincode, &config);
        let master_id = compute_master_id(&root_pubkey, &config);
        info!(wallet = %wallet_id, "creating bip32 wallet");

        let (shell, kdf, clear_master, cipher_template) = Self::init_wallet_shell(
            dir.as_ref(),
            &master_id,
            &wallet_id,
            passphrase,
            control_passphrase,
        )?;

        let derived_master = kdf.derive(&clear_master);
        let root_privkey = node
            .private_key()
            .ok_or(WalletError::EncryptedDataMissing)?;

        let root_cipher = cipher_template.fresh_copy();
        let root_ct = hdwallet_crypto::cipher::aes_cbc_encrypt(
            derived_master.as_slice(),
            &root_cipher.iv,
            root_privkey,
        )?;
        let root_asset = Asset::Bip32Root(AssetBip32Root {
            base: AssetSingle::new(
                AssetId::root_asset_id(),
                root_pubkey,
                Some(CipherData::new(root_cipher, root_ct)),
            ),
            chaincode,
            depth: 0,
            leaf_id: 0,
            parent_fingerprint: 0,
            seed_fingerprint,
            path: Vec::new(),
        });

        let seed_cipher = cipher_template.fresh_copy();
        let seed_ct = hdwallet_crypto::cipher::aes_cbc_encrypt(
            derived_master.as_slice(),
            &seed_cipher.iv,
            &seed,
        )?;
        let encrypted_seed = CipherData::new(seed_cipher, seed_ct);

        let wallet = Arc::new(Self {
            iface: shell.iface,
            db: shell.db,
            db_name: shell.db_name,
            config,
            wallet_id,
            master_id,
            root: Some(root_asset),
            seed: Some(encrypted_seed),
            decrypted: shell.decrypted,
            accounts: Mutex::new(BTreeMap::new()),
            main_account: Mutex::new(None),
            comments: Mutex::new(MetaAccount::new(MetaAccountType::Comments)),
            auth_peers: Mutex::new(MetaAccount::new(MetaAccountType::AuthPeers)),
            label: Mutex::new(String::new()),
            description: Mutex::new(String::new()),
        });
        wallet.persist_base_records()?;
        Ok(wallet)
    }

    /// Wallet rooted at an existing extended private key; no seed record is
    /// kept, so backups carry the node's own key material provenance.
    pub fn create_from_bip32_node(
        dir: impl AsRef<Path>,
        node: &Bip32Node,
        seed_fingerprint: u32,
        passphrase: &SecretBytes,
        control_passphrase: &SecretBytes,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let root_privkey = node
            .private_key()
            .ok_or(WalletError::EncryptedDataMissing)?
            .clone();
        let root_pubkey = *node.public_key();
        let chaincode = *node.chaincode();

        let wallet_id = compute_wallet_id_bip32(&root_pubkey, &chaincode, &config);
        let master_id = compute_master_id(&root_pubkey, &config);
        info!(wallet = %wallet_id, "creating wallet from extended key");

        let (shell, kdf, clear_master, cipher_template) = Self::init_wallet_shell(
            dir.as_ref(),
            &master_id,
            &wallet_id,
            passphrase,
            control_passphrase,
        )?;

        let derived_master = kdf.derive(&clear_master);
        let root_cipher = cipher_template.fresh_copy();
        let root_ct = hdwallet_crypto::cipher::aes_cbc_encrypt(
            derived_master.as_slice(),
            &root_cipher.iv,
            &root_privkey,
        )?;
        let root_asset = Asset::Bip32Root(AssetBip32Root {
            base: AssetSingle::new(
                AssetId::root_asset_id(),
                root_pubkey,
                Some(CipherData::new(root_cipher, root_ct)),
            ),
            chaincode,
            depth: node.depth(),
            leaf_id: node.child_num(),
            parent_fingerprint: node.parent_fingerprint(),
            seed_fingerprint,
            path: Vec::new(),
        });

        let wallet = Arc::new(Self {
            iface: shell.iface,
            db: shell.db,
            db_name: shell.db_name,
            config,
            wallet_id,
            master_id,
            root: Some(root_asset),
            seed: None,
            decrypted: shell.decrypted,
            accounts: Mutex::new(BTreeMap::new()),
            main_account: Mutex::new(None),
            comments: Mutex::new(MetaAccount::new(MetaAccountType::Comments)),
            auth_peers: Mutex::new(MetaAccount::new(MetaAccountType::AuthPeers)),
            label: Mutex::new(String::new()),
            description: Mutex::new(String::new()),
        });
        wallet.persist_base_records()?;
        Ok(wallet)
    }

    /// Empty watching-only shell with neither root nor seed.
    pub fn create_blank(
        dir: impl AsRef<Path>,
        name: &str,
        control_passphrase: &SecretBytes,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let master_id = format!("{}_master", name);
        let (shell, _kdf, _clear_master, _cipher) = Self::init_wallet_shell(
            dir.as_ref(),
            &master_id,
            name,
            &SecretBytes::empty(),
            control_passphrase,
        )?;

        let wallet = Arc::new(Self {
            iface: shell.iface,
            db: shell.db,
            db_name: shell.db_name,
            config,
            wallet_id: name.to_string(),
            master_id,
            root: None,
            seed: None,
            decrypted: shell.decrypted,
            accounts: Mutex::new(BTreeMap::new()),
            main_account: Mutex::new(None),
            comments: Mutex::new(MetaAccount::new(MetaAccountType::Comments)),
            auth_peers: Mutex::new(MetaAccount::new(MetaAccountType::AuthPeers)),
            label: Mutex::new(String::new()),
            description: Mutex::new(String::new()),
        });
        wallet.persist_base_records()?;
        Ok(wallet)
    }

    /// Watching-only wallet from an account xpub. The account is created
    /// directly from the supplied root.
    pub fn create_from_public_root(
        dir: impl AsRef<Path>,
        xpub: &str,
        derivation_path: Vec<u32>,
        seed_fingerprint: u32,
        control_passphrase: &SecretBytes,
        lookup: u32,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let node = Bip32Node::from_base58(xpub, &config)?;
        let wallet_id =
            compute_wallet_id_bip32(node.public_key(), node.chaincode(), &config);
        let wallet = Self::create_blank(dir, &wallet_id, control_passphrase, config)?;

        let mut address_types = BTreeSet::new();
        address_types.insert(AddressType::P2WPKH);
        let descriptor =
            AccountTypeBip32::from_derivation_path(seed_fingerprint, derivation_path.clone())
                .with_lookup(lookup)
                .with_main(true)
                .with_address_types(address_types, AddressType::P2WPKH)
                .with_root(derivation_path, xpub.to_string());
        wallet.create_bip32_account(&descriptor)?;
        Ok(wallet)
    }

    // ---- persistence of the singleton records -------------------------------

    fn persist_base_records(&self) -> Result<(), WalletError> {
        let tx = EncWriteTx::begin(&self.db);
        if let Some(root) = &self.root {
            tx.put(&singleton_key(ROOTASSET_KEY), &root.serialize());
        }
        if let Some(seed) = &self.seed {
            let mut writer = Writer::new();
            seed.serialize(&mut writer);
            tx.put(&singleton_key(WALLET_SEED_KEY), writer.as_slice());
        }
        {
            let mut writer = Writer::new();
            writer.put_var_str(&self.master_id);
            tx.put(&singleton_key(MASTERID_KEY), writer.as_slice());
        }
        self.decrypted.update_on_disk()?;
        tx.commit()?;

        self.iface
            .set_control_meta(MAINWALLET_KEY, self.db_name.as_bytes())?;
        self.iface.flush()?;
        Ok(())
    }

    /// Runs `operation` with a transient prompt answering `passphrase` and
    /// the container locked.
    pub fn with_passphrase<T>(
        &self,
        passphrase: SecretBytes,
        operation: impl FnOnce(&Self) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        self.decrypted
            .set_passphrase_prompt(Arc::new(move |_| passphrase.clone()));
        let guard = self.decrypted.lock()?;
        let result = operation(self);
        drop(guard);
        self.decrypted.clear_passphrase_prompt();
        result
    }

    // ---- account creation ---------------------------------------------------

    fn next_bip32_account_id(&self) -> u32 {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        accounts
            .keys()
            .filter(|id| **id >= BIP32_ACCOUNT_BASE)
            .max()
            .map(|id| id + 1)
            .unwrap_or(BIP32_ACCOUNT_BASE)
    }

    fn install_account(
        &self,
        account: AddressAccount,
        main: bool,
    ) -> Result<u32, WalletError> {
        let id = account.id();
        let tx = EncWriteTx::begin(&self.db);
        account.commit_meta(&tx);
        if main {
            let mut writer = Writer::new();
            writer.put_var_bytes(&id.to_be_bytes());
            tx.put(&singleton_key(MAIN_ACCOUNT_KEY), writer.as_slice());
        }
        tx.commit()?;

        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        accounts.insert(id, account);
        if main {
            *self.main_account.lock().expect("main account poisoned") = Some(id);
        }
        Ok(id)
    }

    fn create_armory135_account(
        &self,
        descriptor: &AccountTypeArmory135,
    ) -> Result<u32, WalletError> {
        let _guard = self.decrypted.lock()?;
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| WalletError::wallet("wallet has no root"))?;
        let chaincode = match root {
            Asset::LegacyRoot(legacy) => legacy.chaincode,
            _ => return Err(WalletError::WrongAssetType),
        };
        let account_id = ARMORY135_ACCOUNT_ID;

        // the single chain: receive and change share it
        let mut chain_root = root.clone();
        if let Asset::LegacyRoot(legacy) = &mut chain_root {
            legacy.base.id = AssetAccount::root_asset_id(account_id, 0);
        }
        let asset_account = AssetAccount::new(
            account_id,
            0,
            chain_root,
            DerivationScheme::ArmoryLegacy { chaincode },
        );

        let mut account = AddressAccount::new(
            account_id,
            0,
            0,
            descriptor.address_types.clone(),
            descriptor.default_address_type,
            descriptor.lookup,
        )?;
        account.add_asset_account(asset_account)?;
        account.validate()?;

        {
            let tx = EncWriteTx::begin(&self.db);
            account.extend_private_chain(&self.decrypted, &tx, descriptor.lookup)?;
            account.commit_meta(&tx);
            tx.commit()?;
        }
        account.update_address_hash_map(&self.config);
        self.install_account(account, descriptor.main)
    }

    /// Creates a BIP32 (plain or salted) account per `descriptor`. With a
    /// private wallet root the chains carry encrypted private keys; with
    /// xpub-only roots the account is watching-only.
    pub fn create_bip32_account(
        &self,
        descriptor: &AccountTypeBip32,
    ) -> Result<u32, WalletError> {
        descriptor.validate()?;
        let _guard = self.decrypted.lock()?;
        let account_id = self.next_bip32_account_id();

        let account_node = self.account_root_node(descriptor)?;

        let mut account = AddressAccount::new(
            account_id,
            descriptor.nodes[0],
            *descriptor.nodes.get(1).unwrap_or(&descriptor.nodes[0]),
            descriptor.address_types.clone(),
            descriptor.default_address_type,
            descriptor.lookup,
        )?;

        let has_private = account_node.has_private_key();
        for step in &descriptor.nodes {
            let chain_node = if has_private {
                account_node.derive_private(*step)?
            } else {
                account_node.derive_public(*step)?
            };
            let mut chain_path = descriptor.derivation_path.clone();
            chain_path.push(*step);

            let envelope = match chain_node.private_key() {
                Some(privkey) => Some(self.encrypt_under_master(privkey)?),
                None => None,
            };
            let chain_root = Asset::Bip32Root(AssetBip32Root {
                base: AssetSingle::new(
                    AssetAccount::root_asset_id(account_id, *step),
                    *chain_node.public_key(),
                    envelope,
                ),
                chaincode: *chain_node.chaincode(),
                depth: chain_node.depth(),
                leaf_id: *step,
                parent_fingerprint: chain_node.parent_fingerprint(),
                seed_fingerprint: descriptor.seed_fingerprint,
                path: chain_path,
            });

            let scheme = match descriptor.salt {
                Some(salt) => DerivationScheme::Bip32Salted {
                    chaincode: *chain_node.chaincode(),
                    salt,
                },
                None => DerivationScheme::Bip32 {
                    chaincode: *chain_node.chaincode(),
                },
            };
            account.add_asset_account(AssetAccount::new(
                account_id,
                *step,
                chain_root,
                scheme,
            ))?;
        }
        account.validate()?;

        {
            let tx = EncWriteTx::begin(&self.db);
            if has_private {
                account.extend_private_chain(&self.decrypted, &tx, descriptor.lookup)?;
            } else {
                account.extend_public_chain(&tx, descriptor.lookup)?;
            }
            account.commit_meta(&tx);
            tx.commit()?;
        }
        account.update_address_hash_map(&self.config);
        self.install_account(account, descriptor.main)
    }

    /// ECDH account over a fixed key pair.
    pub fn create_ecdh_account(
        &self,
        descriptor: &AccountTypeEcdh,
    ) -> Result<u32, WalletError> {
        let _guard = self.decrypted.lock()?;
        let account_id = self.next_bip32_account_id();

        let envelope = match &descriptor.privkey {
            Some(privkey) => Some(self.encrypt_under_master(privkey)?),
            None => None,
        };
        let chain_root = Asset::Single(AssetSingle::new(
            AssetAccount::root_asset_id(account_id, 0),
            descriptor.pubkey,
            envelope,
        ));
        let asset_account = AssetAccount::new(
            account_id,
            0,
            chain_root,
            DerivationScheme::Ecdh {
                salts: BTreeMap::new(),
            },
        );

        let mut account = AddressAccount::new(
            account_id,
            0,
            0,
            descriptor.address_types.clone(),
            descriptor.default_address_type,
            0,
        )?;
        account.add_asset_account(asset_account)?;
        account.validate()?;

        {
            let tx = EncWriteTx::begin(&self.db);
            account.commit_meta(&tx);
            tx.commit()?;
        }
        self.install_account(account, descriptor.main)
    }

    pub fn create_account(&self, descriptor: &AccountType) -> Result<u32, WalletError> {
        match descriptor {
            AccountType::Armory135(inner) => self.create_armory135_account(inner),
            AccountType::Bip32(inner) => self.create_bip32_account(inner),
            AccountType::Ecdh(inner) => self.create_ecdh_account(inner),
        }
    }

    /// Account root node for a descriptor: derived from the wallet root when
    /// it matches the seed fingerprint, otherwise taken from the supplied
    /// xpub roots.
    fn account_root_node(
        &self,
        descriptor: &AccountTypeBip32,
    ) -> Result<Bip32Node, WalletError> {
        if let Some(Asset::Bip32Root(root)) = &self.root {
            if root.seed_fingerprint() == descriptor.seed_fingerprint
                || descriptor.seed_fingerprint == 0
            {
                if let Some(envelope) = &root.base.encrypted_privkey {
                    let privkey = self
                        .decrypted
                        .get_clear_text_data(&singleton_key(ROOTASSET_KEY), envelope)?;
                    let node = Bip32Node::from_private(
                        privkey,
                        root.chaincode,
                        root.depth,
                        root.parent_fingerprint,
                        root.leaf_id,
                    )?;
                    return node.derive_path(&descriptor.derivation_path);
                }
            }
        }

        // watching-only: an explicit root must cover the account path
        let b58 = descriptor
            .roots
            .get(&descriptor.derivation_path)
            .ok_or(WalletError::FingerprintMismatch)?;
        Bip32Node::from_base58(b58, &self.config)
    }

    fn encrypt_under_master(&self, plaintext: &[u8]) -> Result<CipherData, WalletError> {
        let (kdf_id, master_key_id) = self.master_cipher_ids()?;
        let cipher = CipherSpec::new(kdf_id, master_key_id);
        let ciphertext = self.decrypted.encrypt_data(&cipher, plaintext)?;
        Ok(CipherData::new(cipher, ciphertext))
    }

    /// KDF and master-key ids for new envelopes, read off the root asset or
    /// the container registry.
    fn master_cipher_ids(&self) -> Result<(KdfId, EncryptionKeyId), WalletError> {
        if let Some(root) = &self.root {
            if let Ok(single) = root.as_single() {
                if let Some(envelope) = &single.encrypted_privkey {
                    return Ok((
                        envelope.cipher.kdf_id,
                        envelope.cipher.encryption_key_id,
                    ));
                }
            }
        }
        // fall back to the only registered key
        let key_ids = self.decrypted.encryption_key_ids();
        let key_id = key_ids.first().ok_or(WalletError::UnknownEncryptionKey)?;
        let kdf = self
            .decrypted
            .get_encryption_key(key_id)?
            .envelopes
            .values()
            .next()
            .map(|envelope| envelope.cipher.kdf_id)
            .ok_or(WalletError::UnknownKdf)?;
        Ok((kdf, *key_id))
    }

    // ---- loading ------------------------------------------------------------

    /// Loads the main wallet of `path`, prompting for the control
    /// passphrase.
    pub fn load_main_wallet_from_file(
        path: impl AsRef<Path>,
        control_prompt: PassphrasePrompt,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let iface = WalletDbInterface::setup_env(path, control_prompt)?;
        let db_name = match iface.get_control_meta(MAINWALLET_KEY)? {
            Some(name) => String::from_utf8(name)
                .map_err(|_| WalletError::Deser("main wallet name"))?,
            None => iface
                .header_names()
                .into_iter()
                .next()
                .ok_or_else(|| WalletError::wallet("no wallet headers"))?,
        };
        Self::load_from_iface(iface, &db_name, config)
    }

    fn load_from_iface(
        iface: Arc<WalletDbInterface>,
        db_name: &str,
        config: NetworkConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let db = iface.database(db_name)?;
        let decrypted: Arc<DecryptedDataContainer> = Arc::new(DecryptedDataContainer::new(
            db.clone() as Arc<dyn crate::io::RecordStore>,
        ));
        decrypted.read_from_disk()?;

        let view = db.begin_read().into_map();

        let root = view
            .get(&singleton_key(ROOTASSET_KEY))
            .map(|bytes| Asset::deserialize(bytes))
            .transpose()?;
        let seed = view
            .get(&singleton_key(WALLET_SEED_KEY))
            .map(|bytes| CipherData::deserialize(&mut Reader::new(bytes)))
            .transpose()?;
        let master_id = match view.get(&singleton_key(MASTERID_KEY)) {
            Some(bytes) => Reader::new(bytes).get_var_str()?,
            None => String::new(),
        };
        let label = match view.get(&singleton_key(WALLET_LABEL_KEY)) {
            Some(bytes) => Reader::new(bytes).get_var_str()?,
            None => String::new(),
        };
        let description = match view.get(&singleton_key(WALLET_DESCR_KEY)) {
            Some(bytes) => Reader::new(bytes).get_var_str()?,
            None => String::new(),
        };
        let main_account = match view.get(&singleton_key(MAIN_ACCOUNT_KEY)) {
            Some(bytes) => {
                let mut reader = Reader::new(bytes);
                let id_bytes = reader.get_var_bytes()?;
                if id_bytes.len() != 4 {
                    return Err(WalletError::Deser("main account id"));
                }
                Some(u32::from_be_bytes([
                    id_bytes[0],
                    id_bytes[1],
                    id_bytes[2],
                    id_bytes[3],
                ]))
            }
            None => None,
        };

        // discover account ids from their meta records
        let mut account_ids = Vec::new();
        for key in view.keys() {
            if key.len() == 5 && key[0] == ADDRESS_ACCOUNT_PREFIX {
                account_ids.push(u32::from_be_bytes([key[1], key[2], key[3], key[4]]));
            }
        }
        let mut accounts = BTreeMap::new();
        for id in account_ids {
            let account = AddressAccount::load(&view, id, &config)?;
            accounts.insert(id, account);
        }

        let comments = MetaAccount::load(&view, MetaAccountType::Comments)?;
        let auth_peers = MetaAccount::load(&view, MetaAccountType::AuthPeers)?;

        Ok(Arc::new(Self {
            iface,
            db,
            db_name: db_name.to_string(),
            config,
            wallet_id: db_name.to_string(),
            master_id,
            root,
            seed,
            decrypted,
            accounts: Mutex::new(accounts),
            main_account: Mutex::new(main_account),
            comments: Mutex::new(comments),
            auth_peers: Mutex::new(auth_peers),
            label: Mutex::new(label),
            description: Mutex::new(description),
        }))
    }

    // ---- identity -----------------------------------------------------------

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn master_id(&self) -> &str {
        &self.master_id
    }

    pub fn db_filename(&self) -> PathBuf {
        self.iface.path().to_path_buf()
    }

    pub fn network_config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn root(&self) -> Option<&Asset> {
        self.root.as_ref()
    }

    pub fn has_seed(&self) -> bool {
        self.seed.is_some()
    }

    pub fn seed_fingerprint(&self) -> Result<u32, WalletError> {
        match &self.root {
            Some(Asset::Bip32Root(root)) => Ok(root.seed_fingerprint()),
            _ => Err(WalletError::WrongAssetType),
        }
    }

    pub fn container(&self) -> &Arc<DecryptedDataContainer> {
        &self.decrypted
    }

    pub fn interface(&self) -> &Arc<WalletDbInterface> {
        &self.iface
    }

    pub fn set_passphrase_prompt(&self, prompt: PassphrasePrompt) {
        self.decrypted.set_passphrase_prompt(prompt);
    }

    pub fn lock_decrypted_container(
        &self,
    ) -> Result<crate::decrypted_data::ContainerLock<'_>, WalletError> {
        self.decrypted.lock()
    }

    // ---- label / description / comments ------------------------------------

    pub fn label(&self) -> String {
        self.label.lock().expect("label poisoned").clone()
    }

    pub fn description(&self) -> String {
        self.description.lock().expect("description poisoned").clone()
    }

    pub fn set_label(&self, value: &str) -> Result<(), WalletError> {
        let tx = EncWriteTx::begin(&self.db);
        let mut writer = Writer::new();
        writer.put_var_str(value);
        tx.put(&singleton_key(WALLET_LABEL_KEY), writer.as_slice());
        tx.commit()?;
        *self.label.lock().expect("label poisoned") = value.to_string();
        Ok(())
    }

    pub fn set_description(&self, value: &str) -> Result<(), WalletError> {
        let tx = EncWriteTx::begin(&self.db);
        let mut writer = Writer::new();
        writer.put_var_str(value);
        tx.put(&singleton_key(WALLET_DESCR_KEY), writer.as_slice());
        tx.commit()?;
        *self.description.lock().expect("description poisoned") = value.to_string();
        Ok(())
    }

    pub fn set_comment(&self, key: &[u8], comment: &str) -> Result<(), WalletError> {
        let tx = EncWriteTx::begin(&self.db);
        self.comments
            .lock()
            .expect("comments poisoned")
            .set_entry(&tx, key, comment.as_bytes());
        tx.commit()
    }

    pub fn get_comment(&self, key: &[u8]) -> Option<String> {
        self.comments
            .lock()
            .expect("comments poisoned")
            .get_entry(key)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    pub fn delete_comment(&self, key: &[u8]) -> Result<(), WalletError> {
        let tx = EncWriteTx::begin(&self.db);
        self.comments
            .lock()
            .expect("comments poisoned")
            .delete_entry(&tx, key);
        tx.commit()
    }

    pub fn comment_map(&self) -> BTreeMap<Vec<u8>, String> {
        self.comments
            .lock()
            .expect("comments poisoned")
            .entries()
            .iter()
            .map(|(key, value)| {
                (key.clone(), String::from_utf8_lossy(value).into_owned())
            })
            .collect()
    }

    /// Registers (or replaces) a named peer's public key.
    pub fn set_auth_peer(&self, name: &str, pubkey: &[u8]) -> Result<(), WalletError> {
        ecc::validate_pubkey(pubkey)?;
        let tx = EncWriteTx::begin(&self.db);
        self.auth_peers
            .lock()
            .expect("auth peers poisoned")
            .set_entry(&tx, name.as_bytes(), pubkey);
        tx.commit()
    }

    pub fn get_auth_peer(&self, name: &str) -> Option<Vec<u8>> {
        self.auth_peers
            .lock()
            .expect("auth peers poisoned")
            .get_entry(name.as_bytes())
            .map(|pubkey| pubkey.to_vec())
    }

    pub fn delete_auth_peer(&self, name: &str) -> Result<(), WalletError> {
        let tx = EncWriteTx::begin(&self.db);
        self.auth_peers
            .lock()
            .expect("auth peers poisoned")
            .delete_entry(&tx, name.as_bytes());
        tx.commit()
    }

    pub fn auth_peer_map(&self) -> BTreeMap<String, Vec<u8>> {
        self.auth_peers
            .lock()
            .expect("auth peers poisoned")
            .entries()
            .iter()
            .map(|(name, pubkey)| {
                (String::from_utf8_lossy(name).into_owned(), pubkey.clone())
            })
            .collect()
    }

    // ---- accounts and addresses ---------------------------------------------

    pub fn account_ids(&self) -> Vec<u32> {
        self.accounts
            .lock()
            .expect("accounts poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn main_account_id(&self) -> Option<u32> {
        *self.main_account.lock().expect("main account poisoned")
    }

    pub fn account_type_of(&self, account_id: u32) -> Result<Vec<AddressType>, WalletError> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts.get(&account_id).ok_or(WalletError::UnknownAccount)?;
        Ok(account.address_types().iter().copied().collect())
    }

    /// Vends the next receive address: the requested account, or the main
    /// account, or the first account (in insertion order) supporting the
    /// type.
    pub fn get_new_address(
        &self,
        account_id: Option<u32>,
        atype: Option<AddressType>,
    ) -> Result<AddressEntry, WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");

        let chosen = match account_id {
            Some(id) => id,
            None => {
                let main = *self.main_account.lock().expect("main account poisoned");
                let candidates: Vec<u32> = main
                    .into_iter()
                    .chain(accounts.keys().copied())
                    .collect();
                *candidates
                    .iter()
                    .find(|id| {
                        accounts
                            .get(id)
                            .map(|account| match atype {
                                Some(atype) => account.supports_type(atype),
                                None => true,
                            })
                            .unwrap_or(false)
                    })
                    .ok_or(WalletError::UnknownAccount)?
            }
        };

        let account = accounts.get_mut(&chosen).ok_or(WalletError::UnknownAccount)?;
        let tx = EncWriteTx::begin(&self.db);
        let entry = account.get_new_address(&tx, atype, &self.config)?;
        tx.commit()?;
        Ok(entry)
    }

    pub fn get_new_change_address(
        &self,
        atype: Option<AddressType>,
    ) -> Result<AddressEntry, WalletError> {
        let main = self
            .main_account_id()
            .or_else(|| self.account_ids().into_iter().next())
            .ok_or(WalletError::UnknownAccount)?;
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts.get_mut(&main).ok_or(WalletError::UnknownAccount)?;
        let tx = EncWriteTx::begin(&self.db);
        let entry = account.get_new_change_address(&tx, atype, &self.config)?;
        tx.commit()?;
        Ok(entry)
    }

    pub fn peek_next_change_address(&self) -> Result<AddressEntry, WalletError> {
        let main = self
            .main_account_id()
            .or_else(|| self.account_ids().into_iter().next())
            .ok_or(WalletError::UnknownAccount)?;
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts.get_mut(&main).ok_or(WalletError::UnknownAccount)?;
        let tx = EncWriteTx::begin(&self.db);
        let entry = account.peek_next_change_address(&tx, &self.config)?;
        tx.commit()?;
        Ok(entry)
    }

    pub fn get_addr_hash_set(&self) -> BTreeSet<Vec<u8>> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        let mut set = BTreeSet::new();
        for account in accounts.values() {
            set.extend(account.addr_hash_set());
        }
        set
    }

    pub fn has_scr_addr(&self, prefixed_hash: &[u8]) -> bool {
        self.get_asset_id_for_scr_addr(prefixed_hash).is_ok()
    }

    pub fn get_asset_id_for_scr_addr(
        &self,
        prefixed_hash: &[u8],
    ) -> Result<(AssetId, AddressType), WalletError> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        for account in accounts.values() {
            if let Some((asset_id, atype)) = account.address_hash_map().get(prefixed_hash) {
                return Ok((*asset_id, *atype));
            }
        }
        Err(WalletError::NoAsset)
    }

    pub fn get_asset_for_id(&self, id: &AssetId) -> Result<Asset, WalletError> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts.get(&id.account).ok_or(WalletError::UnknownAccount)?;
        let asset_account = account.asset_account(id.asset_account)?;
        Ok(asset_account.get_asset(id.index)?.clone())
    }

    /// Adds an ECDH salt to the outer chain of `account_id` within a write
    /// transaction; idempotent for known salts.
    pub fn add_ecdh_salt(
        &self,
        account_id: u32,
        salt: [u8; 32],
    ) -> Result<u32, WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts
            .get_mut(&account_id)
            .ok_or(WalletError::UnknownAccount)?;
        let tx = EncWriteTx::begin(&self.db);
        let index = account.outer_account_mut()?.add_salt(&tx, salt)?;
        tx.commit()?;
        Ok(index)
    }

    /// Re-types an already vended address of any account.
    pub fn update_address_entry_type(
        &self,
        asset_id: AssetId,
        atype: AddressType,
    ) -> Result<(), WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts
            .get_mut(&asset_id.account)
            .ok_or(WalletError::UnknownAccount)?;
        let tx = EncWriteTx::begin(&self.db);
        account.update_address_entry_type(&tx, asset_id, atype, &self.config)?;
        tx.commit()
    }

    /// Address string lookup across every account's hash map.
    pub fn has_addr_str(&self, address: &str) -> bool {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        for account in accounts.values() {
            for (asset_id, atype) in account.address_hash_map().values() {
                if let Ok(asset) = account
                    .asset_account(asset_id.asset_account)
                    .and_then(|asset_account| asset_account.get_asset(asset_id.index))
                {
                    if let Ok(entry) = AddressEntry::for_asset(asset, *atype) {
                        if let Ok(rendered) = entry.address_string(&self.config) {
                            if rendered == address {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Every instantiated (vended) address, as entries keyed by asset id.
    pub fn get_used_address_map(
        &self,
    ) -> Result<BTreeMap<AssetId, AddressEntry>, WalletError> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        let mut map = BTreeMap::new();
        for account in accounts.values() {
            for (asset_id, atype) in account.used_addresses() {
                let asset_account = account.asset_account(asset_id.asset_account)?;
                let asset = asset_account.get_asset(asset_id.index)?;
                map.insert(*asset_id, AddressEntry::for_asset(asset, *atype)?);
            }
        }
        Ok(map)
    }

    // ---- chains -------------------------------------------------------------

    /// Grows every chain so that at least `index + 1` assets exist.
    pub fn extend_public_chain_to_index(&self, index: u32) -> Result<(), WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let tx = EncWriteTx::begin(&self.db);
        for account in accounts.values_mut() {
            for asset_account_id in account.asset_account_ids() {
                let asset_account = account.asset_account_mut(asset_account_id)?;
                let current = asset_account.asset_count();
                if index >= current {
                    asset_account.extend_public_chain(&tx, index - current + 1)?;
                }
            }
        }
        tx.commit()?;
        for account in accounts.values_mut() {
            account.update_address_hash_map(&self.config);
        }
        Ok(())
    }

    /// Private-side mirror of [`Self::extend_public_chain_to_index`];
    /// requires the container lock.
    pub fn extend_private_chain_to_index(&self, index: u32) -> Result<(), WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let tx = EncWriteTx::begin(&self.db);
        for account in accounts.values_mut() {
            for asset_account_id in account.asset_account_ids() {
                let asset_account = account.asset_account_mut(asset_account_id)?;
                let current = asset_account.asset_count();
                let grow_by = if index >= current {
                    index - current + 1
                } else {
                    0
                };
                asset_account.extend_private_chain(&self.decrypted, &tx, grow_by)?;
            }
        }
        tx.commit()?;
        for account in accounts.values_mut() {
            account.update_address_hash_map(&self.config);
        }
        Ok(())
    }

    pub fn extend_public_chain(&self, count: u32) -> Result<(), WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let tx = EncWriteTx::begin(&self.db);
        for account in accounts.values_mut() {
            account.extend_public_chain(&tx, count)?;
        }
        tx.commit()?;
        for account in accounts.values_mut() {
            account.update_address_hash_map(&self.config);
        }
        Ok(())
    }

    /// Requires the container lock (and a prompt able to unlock the master
    /// key).
    pub fn extend_private_chain(&self, count: u32) -> Result<(), WalletError> {
        let mut accounts = self.accounts.lock().expect("accounts poisoned");
        let tx = EncWriteTx::begin(&self.db);
        for account in accounts.values_mut() {
            account.extend_private_chain(&self.decrypted, &tx, count)?;
        }
        tx.commit()?;
        for account in accounts.values_mut() {
            account.update_address_hash_map(&self.config);
        }
        Ok(())
    }

    // ---- private material ---------------------------------------------------

    /// Decrypted private key of `asset`; the container lock must be held.
    pub fn get_decrypted_private_key_for_asset(
        &self,
        asset: &Asset,
    ) -> Result<SecretBytes, WalletError> {
        let single = asset.as_single()?;
        let envelope = single
            .encrypted_privkey
            .as_ref()
            .ok_or(WalletError::EncryptedDataMissing)?;
        self.decrypted
            .get_clear_text_data(&single.id.db_key(), envelope)
    }

    /// Decrypted wallet root.
    pub fn get_decrypted_root(&self) -> Result<SecretBytes, WalletError> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| WalletError::wallet("wallet has no root"))?;
        let single = root.as_single()?;
        let envelope = single
            .encrypted_privkey
            .as_ref()
            .ok_or(WalletError::EncryptedDataMissing)?;
        self.decrypted
            .get_clear_text_data(&singleton_key(ROOTASSET_KEY), envelope)
    }

    /// Decrypted seed, for BIP32 wallets that keep one.
    pub fn get_decrypted_seed(&self) -> Result<SecretBytes, WalletError> {
        let seed = self
            .seed
            .as_ref()
            .ok_or(WalletError::EncryptedDataMissing)?;
        self.decrypted
            .get_clear_text_data(&singleton_key(WALLET_SEED_KEY), seed)
    }

    /// Derives a private key along an absolute path below the wallet root.
    /// Requires the container lock and a BIP32 root.
    pub fn derive_privkey_from_path(&self, path: &[u32]) -> Result<SecretBytes, WalletError> {
        let root = match &self.root {
            Some(Asset::Bip32Root(root)) => root,
            _ => return Err(WalletError::WrongAssetType),
        };
        let root_privkey = self.get_decrypted_root()?;
        let node = Bip32Node::from_private(
            root_privkey,
            root.chaincode,
            root.depth,
            root.parent_fingerprint,
            root.leaf_id,
        )?;
        let leaf = node.derive_path(path)?;
        leaf.private_key()
            .cloned()
            .ok_or(WalletError::EncryptedDataMissing)
    }

    /// Root chaincode for legacy wallets.
    pub fn armory135_chaincode(&self) -> Result<[u8; 32], WalletError> {
        match &self.root {
            Some(Asset::LegacyRoot(root)) => Ok(root.chaincode),
            _ => Err(WalletError::WrongAssetType),
        }
    }

    /// xpub of the asset account that owns `id`.
    pub fn get_xpub_for_asset_id(&self, id: &AssetId) -> Result<String, WalletError> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts.get(&id.account).ok_or(WalletError::UnknownAccount)?;
        let asset_account = account.asset_account(id.asset_account)?;
        match asset_account.root() {
            Asset::Bip32Root(root) => {
                let node = Bip32Node::from_public(
                    root.base.pubkey,
                    root.chaincode,
                    root.depth,
                    root.parent_fingerprint,
                    root.leaf_id,
                )?;
                Ok(node.to_base58(&self.config))
            }
            _ => Err(WalletError::WrongAssetType),
        }
    }

    /// Seed fingerprint recorded on the asset account owning `id`, falling
    /// back to the wallet root's.
    pub fn seed_fingerprint_for_asset(&self, id: &AssetId) -> Result<u32, WalletError> {
        let from_account = {
            let accounts = self.accounts.lock().expect("accounts poisoned");
            let account = accounts.get(&id.account).ok_or(WalletError::UnknownAccount)?;
            let asset_account = account.asset_account(id.asset_account)?;
            match asset_account.root() {
                Asset::Bip32Root(root) => Some(root.seed_fingerprint()),
                _ => None,
            }
        };
        match from_account {
            Some(fingerprint) => Ok(fingerprint),
            None => self.seed_fingerprint(),
        }
    }

    /// Derivation path (from the seed) of the asset account owning `id`,
    /// plus the asset's own step.
    pub fn derivation_path_for_asset(&self, id: &AssetId) -> Result<Vec<u32>, WalletError> {
        let accounts = self.accounts.lock().expect("accounts poisoned");
        let account = accounts.get(&id.account).ok_or(WalletError::UnknownAccount)?;
        let asset_account = account.asset_account(id.asset_account)?;
        match asset_account.root() {
            Asset::Bip32Root(root) => {
                let mut path = root.path.clone();
                path.push(id.index);
                Ok(path)
            }
            _ => Err(WalletError::WrongAssetType),
        }
    }

    // ---- derivation tree ----------------------------------------------------

    /// Builds the forkable path graph of every BIP32 chain this wallet holds
    /// and attaches the wallet root at the seed node. With the container
    /// lock held the private root is attached, so hardened leaves resolve;
    /// otherwise the public root is used.
    pub fn derivation_tree(&self) -> Result<crate::derivation::DerivationTree, WalletError> {
        let mut paths = Vec::new();
        {
            let accounts = self.accounts.lock().expect("accounts poisoned");
            for account in accounts.values() {
                for asset_account in account.asset_accounts() {
                    if let Asset::Bip32Root(root) = asset_account.root() {
                        paths.push(root.path.clone());
                    }
                }
            }
        }

        let fingerprint = self.seed_fingerprint().unwrap_or_default();
        let mut tree =
            crate::derivation::DerivationTree::from_derivation_paths(fingerprint, &paths)?;

        if let Some(Asset::Bip32Root(root)) = &self.root {
            let node = match (
                self.decrypted.is_locked_by_current_thread(),
                &root.base.encrypted_privkey,
            ) {
                (true, Some(_)) => {
                    let privkey = self.get_decrypted_root()?;
                    Bip32Node::from_private(
                        privkey,
                        root.chaincode,
                        root.depth,
                        root.parent_fingerprint,
                        root.leaf_id,
                    )?
                }
                _ => Bip32Node::from_public(
                    root.base.pubkey,
                    root.chaincode,
                    root.depth,
                    root.parent_fingerprint,
                    root.leaf_id,
                )?,
            };
            let seed_node = tree.seed_node();
            tree.add_b58_root(seed_node, node.to_base58(&self.config));
        }
        Ok(tree)
    }

    // ---- passphrase management ----------------------------------------------

    /// Replaces every private-key passphrase with `new_passphrase`. Public
    /// material and asset envelopes stay untouched, only the master-key
    /// record changes.
    pub fn change_private_key_passphrase(
        &self,
        new_passphrase: &SecretBytes,
    ) -> Result<(), WalletError> {
        let (kdf_id, master_key_id) = self.master_cipher_ids()?;
        let _guard = self.decrypted.lock()?;
        self.decrypted
            .encrypt_encryption_key(&master_key_id, &kdf_id, new_passphrase, true)
    }

    /// Adds a second (or later) passphrase next to the existing ones.
    pub fn add_private_key_passphrase(
        &self,
        new_passphrase: &SecretBytes,
    ) -> Result<(), WalletError> {
        let (kdf_id, master_key_id) = self.master_cipher_ids()?;
        let _guard = self.decrypted.lock()?;
        self.decrypted
            .encrypt_encryption_key(&master_key_id, &kdf_id, new_passphrase, false)
    }

    /// Drops every passphrase, re-wrapping the master key under the default
    /// key.
    pub fn erase_private_key_passphrase(&self) -> Result<(), WalletError> {
        let (kdf_id, master_key_id) = self.master_cipher_ids()?;
        let _guard = self.decrypted.lock()?;
        let master = self.decrypted.get_encryption_key(&master_key_id)?;
        let envelope_ids: Vec<_> = master.envelopes.keys().copied().collect();
        for envelope_id in envelope_ids {
            self.decrypted
                .erase_encryption_key(&master_key_id, &envelope_id, &kdf_id)?;
        }
        Ok(())
    }

    pub fn change_control_passphrase(
        &self,
        new_passphrase: &SecretBytes,
        prompt: PassphrasePrompt,
    ) -> Result<(), WalletError> {
        self.iface.change_control_passphrase(new_passphrase, prompt)
    }

    pub fn erase_control_passphrase(
        &self,
        prompt: PassphrasePrompt,
    ) -> Result<(), WalletError> {
        self.iface.erase_control_passphrase(prompt)
    }

    // ---- watching-only fork -------------------------------------------------

    /// Forks this wallet as a watching-only copy at `dst_dir`. The public
    /// tree is carried over byte-identically; no private-key envelope nor
    /// seed survives.
    pub fn fork_watching_only(
        &self,
        dst_dir: impl AsRef<Path>,
        control_passphrase: &SecretBytes,
    ) -> Result<PathBuf, WalletError> {
        // only the file name is decorated; the master id is shared with the
        // origin wallet
        let file_tag = format!("{}_WatchingOnly", self.master_id);
        let path = wallet_file_path(dst_dir.as_ref(), &file_tag);
        info!(wallet = %self.wallet_id, "forking watching-only copy");

        let control_pass = control_passphrase.clone();
        let control_prompt: PassphrasePrompt = Arc::new(move |_| control_pass.clone());
        let iface = WalletDbInterface::setup_env(&path, control_prompt.clone())?;
        iface.lock_control_container(control_prompt)?;
        let header = WalletHeader::new(HeaderType::Single, &self.db_name);
        let db = iface.add_header(header)?;
        iface.unlock_control_container();

        let tx = EncWriteTx::begin(&db);
        if let Some(root) = &self.root {
            tx.put(&singleton_key(ROOTASSET_KEY), &root.public_copy().serialize());
        }
        {
            let mut writer = Writer::new();
            writer.put_var_str(&self.master_id);
            tx.put(&singleton_key(MASTERID_KEY), writer.as_slice());
        }
        if let Some(main) = self.main_account_id() {
            let mut writer = Writer::new();
            writer.put_var_bytes(&main.to_be_bytes());
            tx.put(&singleton_key(MAIN_ACCOUNT_KEY), writer.as_slice());
        }

        // re-serialize every account with its private material stripped
        let accounts = self.accounts.lock().expect("accounts poisoned");
        for account in accounts.values() {
            account.commit_meta(&tx);
            for asset_account in account.asset_accounts() {
                asset_account.public_copy().persist_all(&tx);
            }
        }
        drop(accounts);
        tx.commit()?;
        iface.set_control_meta(MAINWALLET_KEY, self.db_name.as_bytes())?;
        iface.flush()?;
        Ok(path)
    }
}
