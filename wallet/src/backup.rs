//! Paper backups: the 16-symbol transcription codec with per-line checksums
//! and single-character repair, the SecurePrint second encryption layer, and
//! the restore flow that rebuilds a wallet from its lines.

use std::path::Path;
use std::sync::Arc;

use hdwallet_crypto::cipher::{aes_cbc_decrypt_raw, aes_cbc_encrypt_raw};
use hdwallet_crypto::ecc;
use hdwallet_crypto::hashes::{hash256, hmac_sha256};
use hdwallet_crypto::SecretBytes;

use crate::derivation::bip32::Bip32Node;
use crate::derivation::scheme::DerivationScheme;
use crate::error::WalletError;
use crate::network::NetworkConfig;
use crate::wallet::AssetWallet;

/// The transcription alphabet. Deliberately disjoint from hex so a reading
/// mistake produces an invalid character rather than a silent value.
pub const E16_CHARS: &[u8; 16] = b"asdfghjkwertuion";

pub const INVALID_CHECKSUM_INDEX: i32 = -1;

pub const BACKUP_TYPE_ARMORY135: u8 = 0;
pub const BACKUP_TYPE_BIP32_SEED: u8 = 1;
pub const BACKUP_TYPE_BIP32_VIRGIN: u8 = 15;

const CHECKSUM_DOMAIN: &[u8] = b"easy16-checksum";
const LINE_DATA_LEN: usize = 16;
const LINE_CHARS: usize = 34; // 16 data bytes + 1 checksum byte, 2 chars each

const SP_KEY_DOMAIN: &[u8] = b"secureprint-key";
const SP_IV_DOMAIN: &[u8] = b"secureprint-iv";
const SP_PASS_LEN: usize = 7;

fn char_to_value(c: u8) -> Option<u8> {
    E16_CHARS.iter().position(|known| *known == c).map(|v| v as u8)
}

fn checksum_byte(data: &[u8; LINE_DATA_LEN], index: u8) -> u8 {
    let mut key = Vec::with_capacity(CHECKSUM_DOMAIN.len() + 1);
    key.extend_from_slice(CHECKSUM_DOMAIN);
    key.push(index);
    hmac_sha256(&key, data)[0]
}

fn detect_index(data: &[u8; LINE_DATA_LEN], checksum: u8) -> i32 {
    for index in 0u8..16 {
        if checksum_byte(data, index) == checksum {
            return index as i32;
        }
    }
    INVALID_CHECKSUM_INDEX
}

fn render_line(bytes: &[u8; LINE_DATA_LEN + 1]) -> String {
    let mut chars = Vec::with_capacity(LINE_CHARS);
    for byte in bytes {
        chars.push(E16_CHARS[(byte >> 4) as usize]);
        chars.push(E16_CHARS[(byte & 0x0f) as usize]);
    }
    // groups of four characters, the checksum pair trailing
    let mut out = String::with_capacity(LINE_CHARS + 8);
    for (position, c) in chars.iter().enumerate() {
        if position > 0 && position % 4 == 0 {
            out.push(' ');
        }
        out.push(*c as char);
    }
    out
}

fn parse_line(line: &str) -> Result<[u8; LINE_DATA_LEN + 1], WalletError> {
    let mut values = Vec::with_capacity(LINE_CHARS);
    for c in line.bytes() {
        if c == b' ' {
            continue;
        }
        values.push(char_to_value(c).ok_or(WalletError::MalformedBackupLine)?);
    }
    if values.len() != LINE_CHARS {
        return Err(WalletError::MalformedBackupLine);
    }
    let mut bytes = [0u8; LINE_DATA_LEN + 1];
    for (slot, pair) in bytes.iter_mut().zip(values.chunks(2)) {
        *slot = (pair[0] << 4) | pair[1];
    }
    Ok(bytes)
}

/// Result of decoding a set of lines: the concatenated payload, the checksum
/// index detected per line (-1 on failure), and the per-line indices after a
/// repair pass.
pub struct Easy16Decoded {
    line_bytes: Vec<[u8; LINE_DATA_LEN + 1]>,
    pub data: SecretBytes,
    pub checksum_indexes: Vec<i32>,
    pub repaired_indexes: Vec<i32>,
}

pub struct BackupEasy16;

impl BackupEasy16 {
    /// Encodes `data` (a multiple of 16 bytes) under a backup-type index.
    pub fn encode(data: &[u8], index: u8) -> Result<Vec<String>, WalletError> {
        if data.is_empty() || data.len() % LINE_DATA_LEN != 0 {
            return Err(WalletError::MalformedBackupLine);
        }
        if index > 15 {
            return Err(WalletError::UnsupportedBackupType(index));
        }
        let mut lines = Vec::with_capacity(data.len() / LINE_DATA_LEN);
        for block in data.chunks(LINE_DATA_LEN) {
            let mut line_bytes = [0u8; LINE_DATA_LEN + 1];
            line_bytes[..LINE_DATA_LEN].copy_from_slice(block);
            let mut data_block = [0u8; LINE_DATA_LEN];
            data_block.copy_from_slice(block);
            line_bytes[LINE_DATA_LEN] = checksum_byte(&data_block, index);
            lines.push(render_line(&line_bytes));
        }
        Ok(lines)
    }

    pub fn decode<S: AsRef<str>>(lines: &[S]) -> Result<Easy16Decoded, WalletError> {
        let mut line_bytes = Vec::with_capacity(lines.len());
        let mut data = Vec::with_capacity(lines.len() * LINE_DATA_LEN);
        let mut checksum_indexes = Vec::with_capacity(lines.len());

        for line in lines {
            let bytes = parse_line(line.as_ref())?;
            let mut block = [0u8; LINE_DATA_LEN];
            block.copy_from_slice(&bytes[..LINE_DATA_LEN]);
            checksum_indexes.push(detect_index(&block, bytes[LINE_DATA_LEN]));
            data.extend_from_slice(&block);
            line_bytes.push(bytes);
        }

        Ok(Easy16Decoded {
            line_bytes,
            data: SecretBytes::new(data),
            checksum_indexes,
            repaired_indexes: Vec::new(),
        })
    }

    /// Attempts to fix one mis-transcribed character per failing line.
    /// Succeeds only when exactly one combination of candidates agrees on a
    /// single index across all lines; several viable candidates raise
    /// `RepairAmbiguous`.
    pub fn repair(decoded: &mut Easy16Decoded) -> Result<bool, WalletError> {
        // candidates per failing line: (repaired data block, index)
        let mut per_line: Vec<Vec<([u8; LINE_DATA_LEN], i32)>> = Vec::new();
        let mut known_index: Option<i32> = None;
        for (position, index) in decoded.checksum_indexes.iter().enumerate() {
            if *index != INVALID_CHECKSUM_INDEX {
                if let Some(known) = known_index {
                    if known != *index {
                        return Ok(false);
                    }
                }
                known_index = Some(*index);
                continue;
            }
            per_line.push(Vec::new());
            let slot = per_line.len() - 1;
            let bytes = decoded.line_bytes[position];
            for char_pos in 0..(LINE_CHARS) {
                let byte_pos = char_pos / 2;
                let high_nibble = char_pos % 2 == 0;
                let current = if high_nibble {
                    bytes[byte_pos] >> 4
                } else {
                    bytes[byte_pos] & 0x0f
                };
                for substitute in 0u8..16 {
                    if substitute == current {
                        continue;
                    }
                    let mut candidate = bytes;
                    candidate[byte_pos] = if high_nibble {
                        (substitute << 4) | (candidate[byte_pos] & 0x0f)
                    } else {
                        (candidate[byte_pos] & 0xf0) | substitute
                    };
                    let mut block = [0u8; LINE_DATA_LEN];
                    block.copy_from_slice(&candidate[..LINE_DATA_LEN]);
                    let index = detect_index(&block, candidate[LINE_DATA_LEN]);
                    if index != INVALID_CHECKSUM_INDEX {
                        let entry = (block, index);
                        if !per_line[slot].contains(&entry) {
                            per_line[slot].push(entry);
                        }
                    }
                }
            }
        }

        if per_line.is_empty() {
            return Ok(true);
        }

        // keep only assignments where every line agrees on one index
        let mut viable: Vec<Vec<([u8; LINE_DATA_LEN], i32)>> = vec![Vec::new()];
        for candidates in &per_line {
            let mut next = Vec::new();
            for assignment in &viable {
                for candidate in candidates {
                    if let Some(required) = known_index {
                        if candidate.1 != required {
                            continue;
                        }
                    }
                    if let Some(first) = assignment.first() {
                        if first.1 != candidate.1 {
                            continue;
                        }
                    }
                    let mut extended = assignment.clone();
                    extended.push(*candidate);
                    next.push(extended);
                }
            }
            viable = next;
        }

        match viable.len() {
            0 => Ok(false),
            1 => {
                let assignment = viable.remove(0);
                let mut fix = assignment.iter();
                decoded.repaired_indexes = decoded.checksum_indexes.clone();
                let mut data = Vec::with_capacity(decoded.line_bytes.len() * LINE_DATA_LEN);
                for (position, index) in decoded.checksum_indexes.iter().enumerate() {
                    if *index == INVALID_CHECKSUM_INDEX {
                        let (block, fixed_index) =
                            fix.next().expect("one candidate per failing line");
                        decoded.line_bytes[position][..LINE_DATA_LEN].copy_from_slice(block);
                        decoded.repaired_indexes[position] = *fixed_index;
                        data.extend_from_slice(block);
                    } else {
                        data.extend_from_slice(
                            &decoded.line_bytes[position][..LINE_DATA_LEN],
                        );
                        decoded.repaired_indexes[position] = *index;
                    }
                }
                decoded.data = SecretBytes::new(data);
                Ok(true)
            }
            _ => Err(WalletError::RepairAmbiguous),
        }
    }
}

/// SecurePrint: a 7-byte secret rendered base58 with a one-byte checksum,
/// driving an exact-size AES pass over the backed-up material.
pub struct SecurePrint {
    passphrase: [u8; SP_PASS_LEN],
}

impl Default for SecurePrint {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurePrint {
    pub fn new() -> Self {
        let secret = SecretBytes::random(SP_PASS_LEN);
        let mut passphrase = [0u8; SP_PASS_LEN];
        passphrase.copy_from_slice(&secret);
        Self { passphrase }
    }

    pub fn passphrase_b58(&self) -> String {
        let mut data = Vec::with_capacity(SP_PASS_LEN + 1);
        data.extend_from_slice(&self.passphrase);
        data.push(hash256(&self.passphrase)[0]);
        bs58::encode(data).into_string()
    }

    fn key_iv(passphrase: &[u8; SP_PASS_LEN]) -> ([u8; 32], [u8; 16]) {
        let mut key_material = Vec::with_capacity(SP_PASS_LEN + SP_KEY_DOMAIN.len());
        key_material.extend_from_slice(passphrase);
        key_material.extend_from_slice(SP_KEY_DOMAIN);
        let key = hash256(&key_material);

        let mut iv_material = Vec::with_capacity(SP_PASS_LEN + SP_IV_DOMAIN.len());
        iv_material.extend_from_slice(passphrase);
        iv_material.extend_from_slice(SP_IV_DOMAIN);
        let iv_full = hash256(&iv_material);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&iv_full[..16]);
        (key, iv)
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        let (key, iv) = Self::key_iv(&self.passphrase);
        Ok(aes_cbc_encrypt_raw(&key, &iv, data)?)
    }

    /// Verifies the passphrase checksum before any cipher work.
    pub fn decrypt(passphrase_b58: &str, data: &[u8]) -> Result<SecretBytes, WalletError> {
        let decoded = bs58::decode(passphrase_b58)
            .into_vec()
            .map_err(|_| WalletError::InvalidSecurePrintPassphrase)?;
        if decoded.len() != SP_PASS_LEN + 1 {
            return Err(WalletError::InvalidSecurePrintPassphrase);
        }
        let mut passphrase = [0u8; SP_PASS_LEN];
        passphrase.copy_from_slice(&decoded[..SP_PASS_LEN]);
        if hash256(&passphrase)[0] != decoded[SP_PASS_LEN] {
            return Err(WalletError::InvalidSecurePrintPassphrase);
        }

        let (key, iv) = Self::key_iv(&passphrase);
        Ok(aes_cbc_decrypt_raw(&key, &iv, data)?)
    }
}

/// Assembled backup of one wallet: clear and SecurePrint lines, plus the
/// chaincode pair for legacy wallets that carry a non-derived chaincode.
pub struct WalletBackup {
    pub wallet_id: String,
    pub backup_type: u8,
    pub root_clear: Vec<String>,
    pub root_encrypted: Vec<String>,
    pub chaincode_clear: Vec<String>,
    pub chaincode_encrypted: Vec<String>,
    pub sp_passphrase: String,
}

/// Builds the backup material. The wallet's passphrase prompt must be able
/// to unlock the master key.
pub fn get_wallet_backup(wallet: &AssetWallet) -> Result<WalletBackup, WalletError> {
    let guard = wallet.lock_decrypted_container()?;

    let (secret, backup_type, extra_chaincode) = match wallet.root() {
        Some(crate::assets::Asset::LegacyRoot(root)) => {
            let clear_root = wallet.get_decrypted_root()?;
            let derived = ecc::chaincode_from_root(&clear_root);
            let chaincode = (root.chaincode != derived).then_some(root.chaincode);
            (clear_root, BACKUP_TYPE_ARMORY135, chaincode)
        }
        Some(crate::assets::Asset::Bip32Root(_)) => {
            let seed = wallet.get_decrypted_seed()?;
            let backup_type = if wallet.account_ids().is_empty() {
                BACKUP_TYPE_BIP32_VIRGIN
            } else {
                BACKUP_TYPE_BIP32_SEED
            };
            (seed, backup_type, None)
        }
        _ => return Err(WalletError::WrongAssetType),
    };
    drop(guard);

    let sp = SecurePrint::new();
    let root_clear = BackupEasy16::encode(&secret, backup_type)?;
    let root_encrypted = BackupEasy16::encode(&sp.encrypt(&secret)?, backup_type)?;

    let (chaincode_clear, chaincode_encrypted) = match extra_chaincode {
        Some(chaincode) => (
            BackupEasy16::encode(&chaincode, backup_type)?,
            BackupEasy16::encode(&sp.encrypt(&chaincode)?, backup_type)?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    Ok(WalletBackup {
        wallet_id: wallet.wallet_id().to_string(),
        backup_type,
        root_clear,
        root_encrypted,
        chaincode_clear,
        chaincode_encrypted,
        sp_passphrase: sp.passphrase_b58(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestorePromptType {
    Id,
    ChecksumError,
    Passphrase,
    Control,
}

/// Restore seam: stage, per-line checksum indices, and an in/out payload
/// (the computed wallet id on `Id`, the chosen passphrases on `Passphrase` /
/// `Control`). Returning `false` rejects the stage.
pub type RestorePrompt =
    Arc<dyn Fn(RestorePromptType, &[i32], &mut Vec<u8>) -> bool + Send + Sync>;

/// Rebuilds a wallet from backup lines. Two lines restore a root or seed;
/// four lines restore a legacy root plus its chaincode.
pub fn restore_from_backup(
    lines: &[String],
    sp_passphrase: Option<&str>,
    dir: impl AsRef<Path>,
    prompt: RestorePrompt,
    config: NetworkConfig,
) -> Result<Arc<AssetWallet>, WalletError> {
    if lines.len() != 2 && lines.len() != 4 {
        return Err(WalletError::MalformedBackupLine);
    }

    let mut decoded = BackupEasy16::decode(&lines[..2])?;
    let mut chaincode_decoded = if lines.len() == 4 {
        Some(BackupEasy16::decode(&lines[2..])?)
    } else {
        None
    };

    // collect every line's status for the prompts
    let mut all_indexes = decoded.checksum_indexes.clone();
    if let Some(chaincode) = &chaincode_decoded {
        all_indexes.extend_from_slice(&chaincode.checksum_indexes);
    }

    if all_indexes.contains(&INVALID_CHECKSUM_INDEX) {
        let mut extra = Vec::new();
        if prompt(RestorePromptType::ChecksumError, &all_indexes, &mut extra) {
            return Err(WalletError::RestoreUser("checksum error"));
        }
        let repaired_root = BackupEasy16::repair(&mut decoded)?;
        let repaired_chaincode = match &mut chaincode_decoded {
            Some(chaincode) => BackupEasy16::repair(chaincode)?,
            None => true,
        };
        if !repaired_root || !repaired_chaincode {
            return Err(WalletError::ChecksumMismatch(
                all_indexes
                    .iter()
                    .enumerate()
                    .filter(|(_, index)| **index == INVALID_CHECKSUM_INDEX)
                    .map(|(position, _)| position)
                    .collect(),
            ));
        }
    }

    let line_indexes = |decoded: &Easy16Decoded| -> Vec<i32> {
        if decoded.repaired_indexes.is_empty() {
            decoded.checksum_indexes.clone()
        } else {
            decoded.repaired_indexes.clone()
        }
    };

    let root_indexes = line_indexes(&decoded);
    let backup_type = root_indexes[0];
    if root_indexes.iter().any(|index| *index != backup_type) {
        return Err(WalletError::ChecksumMismatch(vec![0, 1]));
    }
    if let Some(chaincode) = &chaincode_decoded {
        if line_indexes(chaincode)
            .iter()
            .any(|index| *index != backup_type)
        {
            return Err(WalletError::ChecksumMismatch(vec![2, 3]));
        }
    }
    let backup_type = u8::try_from(backup_type)
        .map_err(|_| WalletError::UnsupportedBackupType(0xff))?;

    // undo the SecurePrint layer when a passphrase came along
    let mut secret = decoded.data.clone();
    let mut chaincode_bytes: Option<SecretBytes> = chaincode_decoded
        .as_ref()
        .map(|chaincode| chaincode.data.clone());
    if let Some(sp_pass) = sp_passphrase.filter(|pass| !pass.is_empty()) {
        secret = SecurePrint::decrypt(sp_pass, &secret)?;
        if let Some(bytes) = chaincode_bytes.take() {
            chaincode_bytes = Some(SecurePrint::decrypt(sp_pass, &bytes)?);
        }
    }

    // compute the candidate wallet id for user confirmation
    let computed_id = match backup_type {
        BACKUP_TYPE_ARMORY135 => {
            let chaincode = match &chaincode_bytes {
                Some(bytes) => bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| WalletError::MalformedBackupLine)?,
                None => ecc::chaincode_from_root(&secret),
            };
            let scheme = DerivationScheme::ArmoryLegacy { chaincode };
            let root_pubkey = ecc::compute_pubkey(&secret)?;
            let first = scheme.compute_next_pubkey(&root_pubkey, None, 0)?;
            let uncompressed = ecc::uncompress_pubkey(&first)?;
            id_from_pubkey(&uncompressed, &config)
        }
        BACKUP_TYPE_BIP32_SEED | BACKUP_TYPE_BIP32_VIRGIN => {
            let node = Bip32Node::from_seed(&secret)?;
            let mut material = Vec::with_capacity(65);
            material.extend_from_slice(node.public_key());
            material.extend_from_slice(node.chaincode());
            id_from_pubkey(&hmac_sha256(b"MetaEntry", &material), &config)
        }
        other => return Err(WalletError::UnsupportedBackupType(other)),
    };

    let final_indexes = {
        let mut indexes = root_indexes;
        if let Some(chaincode) = &chaincode_decoded {
            indexes.extend(line_indexes(chaincode));
        }
        indexes
    };

    let mut id_bytes = computed_id.clone().into_bytes();
    if !prompt(RestorePromptType::Id, &final_indexes, &mut id_bytes) {
        return Err(WalletError::RestoreUser("id"));
    }

    let mut passphrase_bytes = Vec::new();
    if !prompt(RestorePromptType::Passphrase, &final_indexes, &mut passphrase_bytes) {
        return Err(WalletError::RestoreUser("passphrase"));
    }
    let passphrase = SecretBytes::new(passphrase_bytes);

    let mut control_bytes = Vec::new();
    if !prompt(RestorePromptType::Control, &final_indexes, &mut control_bytes) {
        return Err(WalletError::RestoreUser("control"));
    }
    let control_passphrase = SecretBytes::new(control_bytes);

    match backup_type {
        BACKUP_TYPE_ARMORY135 => {
            let chaincode = match chaincode_bytes {
                Some(bytes) => Some(
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| WalletError::MalformedBackupLine)?,
                ),
                None => None,
            };
            AssetWallet::create_from_private_root_armory135(
                dir,
                secret,
                chaincode,
                &passphrase,
                &control_passphrase,
                crate::accounts::DEFAULT_LOOKUP,
                config,
            )
        }
        BACKUP_TYPE_BIP32_SEED => AssetWallet::create_from_seed_bip32(
            dir,
            secret,
            &passphrase,
            &control_passphrase,
            crate::accounts::DEFAULT_LOOKUP,
            config,
        ),
        BACKUP_TYPE_BIP32_VIRGIN => AssetWallet::create_from_seed_bip32_blank(
            dir,
            secret,
            &passphrase,
            &control_passphrase,
            config,
        ),
        other => Err(WalletError::UnsupportedBackupType(other)),
    }
}

fn id_from_pubkey(material: &[u8], config: &NetworkConfig) -> String {
    let digest = hdwallet_crypto::hashes::hash160(material);
    let mut data = Vec::with_capacity(6);
    data.push(config.pubkey_hash_prefix);
    data.extend_from_slice(&digest[..5]);
    data.reverse();
    bs58::encode(data).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, RngCore, SeedableRng};

    #[test]
    fn easy16_round_trip_every_index() {
        let mut rng = StdRng::seed_from_u64(16);
        for index in [0u8, 1, 7, 15] {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);

            let lines = BackupEasy16::encode(&secret, index).unwrap();
            assert_eq!(lines.len(), 2);

            let decoded = BackupEasy16::decode(&lines).unwrap();
            assert_eq!(decoded.checksum_indexes, vec![index as i32, index as i32]);
            assert_eq!(decoded.data.as_slice(), &secret);
        }
    }

    fn corrupt_line(line: &mut String, rng: &mut StdRng) {
        let positions: Vec<usize> = line
            .char_indices()
            .filter(|(_, c)| *c != ' ')
            .map(|(position, _)| position)
            .take(32) // only data characters
            .collect();
        let target = positions[rng.gen_range(0..positions.len())];
        let current = line.as_bytes()[target];
        let replacement = loop {
            let candidate = E16_CHARS[rng.gen_range(0..16)];
            if candidate != current {
                break candidate;
            }
        };
        let mut bytes = line.clone().into_bytes();
        bytes[target] = replacement;
        *line = String::from_utf8(bytes).unwrap();
    }

    #[test]
    fn easy16_single_character_repair() {
        let mut rng = StdRng::seed_from_u64(61);
        let mut successes = 0;
        for _ in 0..64 {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            let mut lines = BackupEasy16::encode(&secret, 0).unwrap();

            let line_select = rng.gen_range(0..2);
            corrupt_line(&mut lines[line_select], &mut rng);

            let mut decoded = BackupEasy16::decode(&lines).unwrap();
            assert_eq!(
                decoded.checksum_indexes[line_select],
                INVALID_CHECKSUM_INDEX
            );
            assert_eq!(decoded.checksum_indexes[1 - line_select], 0);
            assert_ne!(decoded.data.as_slice(), &secret);

            match BackupEasy16::repair(&mut decoded) {
                Ok(true) => {
                    assert_eq!(decoded.repaired_indexes, vec![0, 0]);
                    // a successful unambiguous repair never yields a wrong value
                    assert_eq!(decoded.data.as_slice(), &secret);
                    successes += 1;
                }
                Ok(false) | Err(WalletError::RepairAmbiguous) => {}
                Err(other) => panic!("unexpected repair failure: {}", other),
            }
        }
        // at least ~30% of single flips must repair cleanly
        assert!(successes >= 20, "only {} repairs succeeded", successes);
    }

    #[test]
    fn secure_print_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);

        let sp = SecurePrint::new();
        let encrypted = sp.encrypt(&secret).unwrap();
        assert_eq!(encrypted.len(), 32);
        assert_ne!(encrypted.as_slice(), &secret);

        let decrypted = SecurePrint::decrypt(&sp.passphrase_b58(), &encrypted).unwrap();
        assert_eq!(decrypted.as_slice(), &secret);
    }

    #[test]
    fn secure_print_rejects_bad_checksum_before_decrypting() {
        let sp = SecurePrint::new();
        let encrypted = sp.encrypt(&[0x5au8; 32]).unwrap();

        // flip a character of the encoded passphrase
        let pass = sp.passphrase_b58();
        let decoded = bs58::decode(&pass).into_vec().unwrap();
        let mut mangled = decoded.clone();
        mangled[3] ^= 0xff;
        let mangled_b58 = bs58::encode(mangled).into_string();

        assert!(matches!(
            SecurePrint::decrypt(&mangled_b58, &encrypted),
            Err(WalletError::InvalidSecurePrintPassphrase)
        ));

        // a wrong but well-formed passphrase decrypts to wrong data instead
        let other = SecurePrint::new();
        let decrypted = SecurePrint::decrypt(&other.passphrase_b58(), &encrypted).unwrap();
        assert_ne!(decrypted.as_slice(), &[0x5au8; 32]);
    }
}
