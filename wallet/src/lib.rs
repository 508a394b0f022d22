//! Encrypted, on-disk HD wallet asset store.
//!
//! A wallet file is a key/value environment holding a control sub-database
//! (gated by the control passphrase) and one envelope-encrypted sub-database
//! per wallet header. Inside live the asset tree of roots, accounts and
//! derived keys, the meta accounts, and the encryption-key registry.
//! Cleartext key material only ever exists under the decrypted-data
//! container's lock.

pub mod accounts;
pub mod address;
pub mod assets;
pub mod backup;
pub mod dbkeys;
pub mod decrypted_data;
pub mod derivation;
pub mod encode;
pub mod encryption;
pub mod error;
pub mod io;
pub mod network;
pub mod resolver;
pub mod wallet;

pub use accounts::{
    AccountType, AccountTypeArmory135, AccountTypeBip32, AccountTypeEcdh, AddressAccount,
    AssetAccount, MetaAccount, MetaAccountType,
};
pub use address::{AddressEntry, AddressType};
pub use assets::{Asset, AssetId};
pub use backup::{
    get_wallet_backup, restore_from_backup, BackupEasy16, RestorePrompt, RestorePromptType,
    SecurePrint, WalletBackup,
};
pub use decrypted_data::{DecryptedDataContainer, PassphrasePrompt};
pub use derivation::{Bip32Node, DerivationScheme, DerivationTree};
pub use encryption::{CipherData, CipherSpec, EncryptionKey, EncryptionKeyId, KdfId};
pub use error::WalletError;
pub use io::{EncryptedDb, WalletDbInterface};
pub use network::{Network, NetworkConfig};
pub use resolver::{Bip32AssetPath, ResolverFeed};
pub use wallet::AssetWallet;
