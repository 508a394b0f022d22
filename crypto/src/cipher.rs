//! AES-256-CBC, the record and asset envelope cipher.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;

use crate::error::CryptoError;
use crate::secure::SecretBytes;

pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;
pub const AES_BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn check_key_iv(key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if key.len() != AES_KEY_LEN {
        return Err(CryptoError::InvalidLength {
            expected: AES_KEY_LEN,
            found: key.len(),
        });
    }
    if iv.len() != AES_IV_LEN {
        return Err(CryptoError::InvalidLength {
            expected: AES_IV_LEN,
            found: iv.len(),
        });
    }
    Ok(())
}

/// PKCS7-padded encryption; output length is the padded block count.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_iv(key, iv)?;
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidLength {
            expected: AES_KEY_LEN,
            found: key.len(),
        })?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn aes_cbc_decrypt(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<SecretBytes, CryptoError> {
    check_key_iv(key, iv)?;
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::BlockAlignment);
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidLength {
            expected: AES_KEY_LEN,
            found: key.len(),
        })?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::BadPadding)?;
    Ok(SecretBytes::new(plain))
}

/// Unpadded variant for payloads that are already block aligned; length is
/// preserved exactly.
pub fn aes_cbc_encrypt_raw(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_key_iv(key, iv)?;
    if plaintext.is_empty() || plaintext.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::BlockAlignment);
    }
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidLength {
            expected: AES_KEY_LEN,
            found: key.len(),
        })?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(plaintext))
}

pub fn aes_cbc_decrypt_raw(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<SecretBytes, CryptoError> {
    check_key_iv(key, iv)?;
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::BlockAlignment);
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidLength {
            expected: AES_KEY_LEN,
            found: key.len(),
        })?;
    let plain = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| CryptoError::BadPadding)?;
    Ok(SecretBytes::new(plain))
}
