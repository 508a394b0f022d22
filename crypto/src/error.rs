use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid length: expected {expected} bytes, found {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("tweak out of range")]
    TweakOutOfRange,

    #[error("ciphertext is not block aligned")]
    BlockAlignment,

    #[error("bad padding")]
    BadPadding,

    #[error("kdf rejected: {0}")]
    Kdf(&'static str),
}
