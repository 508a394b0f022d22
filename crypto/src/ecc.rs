//! secp256k1 key arithmetic: plain keypair handling, ECDH for the record
//! envelopes, and the legacy chained derivation.

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::error::CryptoError;
use crate::hashes::{hash256, hmac_sha256};
use crate::secure::SecretBytes;

pub const PRIVKEY_LEN: usize = 32;
pub const COMPRESSED_PUBKEY_LEN: usize = 33;
pub const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

const CHAINCODE_DOMAIN: &[u8] = b"Derive Chaincode from Root Key";

static CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Process-wide curve context. Alive for the lifetime of the library; every
/// operation below borrows it.
pub fn context() -> &'static Secp256k1<All> {
    &CONTEXT
}

fn secret_from_slice(privkey: &[u8]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_slice(privkey).map_err(|_| CryptoError::InvalidPrivateKey)
}

fn public_from_slice(pubkey: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_slice(pubkey).map_err(|_| CryptoError::InvalidPublicKey)
}

fn scalar_from_slice(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidLength {
            expected: 32,
            found: bytes.len(),
        })?;
    Scalar::from_be_bytes(arr).map_err(|_| CryptoError::TweakOutOfRange)
}

pub fn generate_privkey() -> SecretBytes {
    let key = SecretKey::new(&mut OsRng);
    SecretBytes::from_slice(&key.secret_bytes())
}

pub fn compute_pubkey(privkey: &[u8]) -> Result<[u8; COMPRESSED_PUBKEY_LEN], CryptoError> {
    let secret = secret_from_slice(privkey)?;
    Ok(PublicKey::from_secret_key(context(), &secret).serialize())
}

pub fn compute_pubkey_uncompressed(
    privkey: &[u8],
) -> Result<[u8; UNCOMPRESSED_PUBKEY_LEN], CryptoError> {
    let secret = secret_from_slice(privkey)?;
    Ok(PublicKey::from_secret_key(context(), &secret).serialize_uncompressed())
}

pub fn compress_pubkey(pubkey: &[u8]) -> Result<[u8; COMPRESSED_PUBKEY_LEN], CryptoError> {
    Ok(public_from_slice(pubkey)?.serialize())
}

pub fn uncompress_pubkey(pubkey: &[u8]) -> Result<[u8; UNCOMPRESSED_PUBKEY_LEN], CryptoError> {
    Ok(public_from_slice(pubkey)?.serialize_uncompressed())
}

pub fn validate_pubkey(pubkey: &[u8]) -> Result<(), CryptoError> {
    public_from_slice(pubkey).map(|_| ())
}

/// `tweak * privkey mod n`.
pub fn privkey_mul(privkey: &[u8], tweak: &[u8]) -> Result<SecretBytes, CryptoError> {
    let secret = secret_from_slice(privkey)?;
    let scalar = scalar_from_slice(tweak)?;
    let product = secret
        .mul_tweak(&scalar)
        .map_err(|_| CryptoError::TweakOutOfRange)?;
    Ok(SecretBytes::from_slice(&product.secret_bytes()))
}

/// `privkey + tweak mod n`.
pub fn privkey_add(privkey: &[u8], tweak: &[u8]) -> Result<SecretBytes, CryptoError> {
    let secret = secret_from_slice(privkey)?;
    let scalar = scalar_from_slice(tweak)?;
    let sum = secret
        .add_tweak(&scalar)
        .map_err(|_| CryptoError::TweakOutOfRange)?;
    Ok(SecretBytes::from_slice(&sum.secret_bytes()))
}

/// `tweak * P`, returned compressed.
pub fn pubkey_mul(
    pubkey: &[u8],
    tweak: &[u8],
) -> Result<[u8; COMPRESSED_PUBKEY_LEN], CryptoError> {
    let point = public_from_slice(pubkey)?;
    let scalar = scalar_from_slice(tweak)?;
    let product = point
        .mul_tweak(context(), &scalar)
        .map_err(|_| CryptoError::TweakOutOfRange)?;
    Ok(product.serialize())
}

/// `P + tweak * G`, returned compressed.
pub fn pubkey_add(
    pubkey: &[u8],
    tweak: &[u8],
) -> Result<[u8; COMPRESSED_PUBKEY_LEN], CryptoError> {
    let point = public_from_slice(pubkey)?;
    let scalar = scalar_from_slice(tweak)?;
    let sum = point
        .add_exp_tweak(context(), &scalar)
        .map_err(|_| CryptoError::TweakOutOfRange)?;
    Ok(sum.serialize())
}

/// Compressed shared point `privkey * P`. Both sides of the record envelope
/// derive the same point from opposite key halves.
pub fn ecdh_point(
    pubkey: &[u8],
    privkey: &[u8],
) -> Result<[u8; COMPRESSED_PUBKEY_LEN], CryptoError> {
    pubkey_mul(pubkey, privkey)
}

/// Legacy chain step for private keys: multiply by the chaincode XOR'd with
/// the double-SHA of the uncompressed public key.
pub fn chained_privkey(privkey: &[u8], chaincode: &[u8]) -> Result<SecretBytes, CryptoError> {
    let pubkey = compute_pubkey_uncompressed(privkey)?;
    let chain_mod = chain_modifier(&pubkey, chaincode)?;
    privkey_mul(privkey, &chain_mod)
}

/// Legacy chain step for public keys, mirroring [`chained_privkey`] through
/// point multiplication. Accepts either key encoding, returns uncompressed.
pub fn chained_pubkey(
    pubkey: &[u8],
    chaincode: &[u8],
) -> Result<[u8; UNCOMPRESSED_PUBKEY_LEN], CryptoError> {
    let uncompressed = uncompress_pubkey(pubkey)?;
    let chain_mod = chain_modifier(&uncompressed, chaincode)?;
    let next = pubkey_mul(&uncompressed, &chain_mod)?;
    uncompress_pubkey(&next)
}

fn chain_modifier(uncompressed_pubkey: &[u8], chaincode: &[u8]) -> Result<[u8; 32], CryptoError> {
    if chaincode.len() != 32 {
        return Err(CryptoError::InvalidLength {
            expected: 32,
            found: chaincode.len(),
        });
    }
    let mut chain_mod = hash256(uncompressed_pubkey);
    for (slot, code_byte) in chain_mod.iter_mut().zip(chaincode.iter()) {
        *slot ^= code_byte;
    }
    Ok(chain_mod)
}

/// Chaincode for roots that never stored one, bound to the root through a
/// domain-separated hash chain.
pub fn chaincode_from_root(root: &[u8]) -> [u8; 32] {
    hmac_sha256(CHAINCODE_DOMAIN, &hash256(root))
}
