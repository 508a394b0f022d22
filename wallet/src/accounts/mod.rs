pub mod address_account;
pub mod asset_account;
pub mod meta;
pub mod types;

pub use address_account::AddressAccount;
pub use asset_account::AssetAccount;
pub use meta::{MetaAccount, MetaAccountType};
pub use types::{AccountType, AccountTypeArmory135, AccountTypeBip32, AccountTypeEcdh};

/// Well-known account id of the legacy chained account.
pub const ARMORY135_ACCOUNT_ID: u32 = 0x0000_0000;

/// BIP32 accounts allocate upward from here.
pub const BIP32_ACCOUNT_BASE: u32 = 0x1000_0000;

/// Outer (receive) and inner (change) chain steps.
pub const OUTER_NODE: u32 = 0;
pub const INNER_NODE: u32 = 1;

pub const DEFAULT_LOOKUP: u32 = 100;
