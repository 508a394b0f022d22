use thiserror::Error;

use hdwallet_crypto::CryptoError;
use hdwallet_kv::KvError;

#[derive(Debug, Error)]
pub enum WalletError {
    // structural wallet failures
    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("unknown account")]
    UnknownAccount,

    #[error("illegal account setup: {0}")]
    AccountSetup(&'static str),

    // decrypted-data container
    #[error("container is locked by another thread")]
    AlreadyLocked,

    #[error("container lock is not held")]
    LockNotHeld,

    #[error("empty passphrase")]
    EmptyPassphrase,

    #[error("no passphrase matched after {0} attempts")]
    PassphraseMismatch(u32),

    #[error("missing encrypted data for asset")]
    EncryptedDataMissing,

    #[error("decryption failed: {0}")]
    DecryptionFailed(&'static str),

    #[error("unknown encryption key")]
    UnknownEncryptionKey,

    #[error("unknown kdf")]
    UnknownKdf,

    // encrypted database
    #[error("encrypted record malformed: {0}")]
    RecordShape(&'static str),

    #[error("mac mismatch on encrypted record")]
    MacMismatch,

    #[error("db key counter gap at {0}")]
    CounterGap(u32),

    #[error("missing key cycling marker")]
    MissingCycleFlag,

    #[error("duplicate {0} across encrypted records")]
    DuplicateEnvelopeMaterial(&'static str),

    // wallet db interface
    #[error("no free sub-database slot")]
    NoFreeDbSlot,

    #[error("db count may only grow")]
    DbCountShrink,

    #[error("transactions are live")]
    TxLive,

    #[error("control container is not locked")]
    ControlNotLocked,

    #[error("unknown sub-database header: {0}")]
    UnknownHeader(String),

    // derivation
    #[error("hardened derivation requires the private key")]
    HardenedFromPublic,

    #[error("derivation path is empty")]
    EmptyDerivationPath,

    #[error("seed fingerprint mismatch")]
    FingerprintMismatch,

    #[error("unknown derivation branch {0}")]
    UnknownBranch(u16),

    // resolver
    #[error("no asset for value")]
    NoAsset,

    #[error("unexpected asset type for operation")]
    WrongAssetType,

    // backup
    #[error("easy16 checksum failure on lines {0:?}")]
    ChecksumMismatch(Vec<usize>),

    #[error("easy16 repair is ambiguous")]
    RepairAmbiguous,

    #[error("easy16 line malformed")]
    MalformedBackupLine,

    #[error("invalid SecurePrint passphrase")]
    InvalidSecurePrintPassphrase,

    #[error("user rejected {0}")]
    RestoreUser(&'static str),

    #[error("unsupported backup type {0}")]
    UnsupportedBackupType(u8),

    // serialization
    #[error("deserialization failed: {0}")]
    Deser(&'static str),

    // lower layers
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("kv failure: {0}")]
    Kv(#[from] KvError),
}

impl WalletError {
    pub fn wallet(msg: impl Into<String>) -> Self {
        Self::Wallet(msg.into())
    }
}
