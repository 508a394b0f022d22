//! Account-type descriptors: what the factories consume to build address
//! accounts.

use std::collections::{BTreeMap, BTreeSet};

use hdwallet_crypto::SecretBytes;

use crate::accounts::DEFAULT_LOOKUP;
use crate::address::AddressType;
use crate::error::WalletError;

/// Legacy chained account. The chaincode comes from the wallet root (or is
/// supplied with it).
#[derive(Clone, Debug)]
pub struct AccountTypeArmory135 {
    pub lookup: u32,
    pub address_types: BTreeSet<AddressType>,
    pub default_address_type: AddressType,
    pub main: bool,
}

impl Default for AccountTypeArmory135 {
    fn default() -> Self {
        let mut address_types = BTreeSet::new();
        address_types.insert(AddressType::P2PKH.with(AddressType::MOD_UNCOMPRESSED));
        address_types.insert(AddressType::P2PKH);
        Self {
            lookup: DEFAULT_LOOKUP,
            address_types,
            default_address_type: AddressType::P2PKH.with(AddressType::MOD_UNCOMPRESSED),
            main: true,
        }
    }
}

/// BIP32 account rooted at `derivation_path` below the seed. `nodes` are the
/// chain steps under the account root (receive first, change second). An
/// optional xpub per node path seeds watching-only accounts; `salt` turns the
/// account into a salted one.
#[derive(Clone, Debug)]
pub struct AccountTypeBip32 {
    pub seed_fingerprint: u32,
    pub derivation_path: Vec<u32>,
    pub nodes: Vec<u32>,
    pub roots: BTreeMap<Vec<u32>, String>,
    pub lookup: u32,
    pub address_types: BTreeSet<AddressType>,
    pub default_address_type: AddressType,
    pub main: bool,
    pub salt: Option<[u8; 32]>,
}

impl AccountTypeBip32 {
    pub fn from_derivation_path(seed_fingerprint: u32, derivation_path: Vec<u32>) -> Self {
        let mut address_types = BTreeSet::new();
        address_types.insert(AddressType::P2WPKH);
        Self {
            seed_fingerprint,
            derivation_path,
            nodes: vec![crate::accounts::OUTER_NODE, crate::accounts::INNER_NODE],
            roots: BTreeMap::new(),
            lookup: DEFAULT_LOOKUP,
            address_types,
            default_address_type: AddressType::P2WPKH,
            main: false,
            salt: None,
        }
    }

    pub fn with_salt(mut self, salt: [u8; 32]) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<u32>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_lookup(mut self, lookup: u32) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_main(mut self, main: bool) -> Self {
        self.main = main;
        self
    }

    pub fn with_address_types(
        mut self,
        address_types: BTreeSet<AddressType>,
        default_address_type: AddressType,
    ) -> Self {
        self.address_types = address_types;
        self.default_address_type = default_address_type;
        self
    }

    pub fn with_root(mut self, path: Vec<u32>, b58_root: String) -> Self {
        self.roots.insert(path, b58_root);
        self
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.derivation_path.is_empty() {
            return Err(WalletError::EmptyDerivationPath);
        }
        if self.nodes.is_empty() {
            return Err(WalletError::AccountSetup("no chain nodes"));
        }
        Ok(())
    }
}

/// ECDH account over a fixed base key pair; assets appear as salts are
/// registered.
#[derive(Clone)]
pub struct AccountTypeEcdh {
    pub privkey: Option<SecretBytes>,
    pub pubkey: [u8; 33],
    pub address_types: BTreeSet<AddressType>,
    pub default_address_type: AddressType,
    pub main: bool,
}

impl AccountTypeEcdh {
    pub fn new(privkey: Option<SecretBytes>, pubkey: [u8; 33]) -> Self {
        let mut address_types = BTreeSet::new();
        address_types.insert(AddressType::P2WPKH);
        Self {
            privkey,
            pubkey,
            address_types,
            default_address_type: AddressType::P2WPKH,
            main: false,
        }
    }

    pub fn with_main(mut self, main: bool) -> Self {
        self.main = main;
        self
    }
}

pub enum AccountType {
    Armory135(AccountTypeArmory135),
    Bip32(AccountTypeBip32),
    Ecdh(AccountTypeEcdh),
}

impl AccountType {
    pub fn is_main(&self) -> bool {
        match self {
            AccountType::Armory135(descriptor) => descriptor.main,
            AccountType::Bip32(descriptor) => descriptor.main,
            AccountType::Ecdh(descriptor) => descriptor.main,
        }
    }
}
