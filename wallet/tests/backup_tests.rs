use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use hdwallet::backup::{
    get_wallet_backup, restore_from_backup, RestorePrompt, RestorePromptType, E16_CHARS,
};
use hdwallet::decrypted_data::PassphrasePrompt;
use hdwallet::wallet::AssetWallet;
use hdwallet::{NetworkConfig, WalletError};
use hdwallet_crypto::SecretBytes;

fn prompt_for(pass: &'static str) -> PassphrasePrompt {
    Arc::new(move |_ids| SecretBytes::from_slice(pass.as_bytes()))
}

fn config() -> NetworkConfig {
    NetworkConfig::mainnet()
}

/// Standard restore callback: accepts the expected id, supplies fresh
/// passphrases.
fn accepting_prompt(
    expected_id: String,
    new_pass: &'static str,
    new_control: &'static str,
) -> RestorePrompt {
    Arc::new(move |stage, _indexes, extra| match stage {
        RestorePromptType::Passphrase => {
            *extra = new_pass.as_bytes().to_vec();
            true
        }
        RestorePromptType::Control => {
            *extra = new_control.as_bytes().to_vec();
            true
        }
        RestorePromptType::Id => {
            String::from_utf8_lossy(extra) == expected_id.as_str()
        }
        RestorePromptType::ChecksumError => false,
    })
}

/// The restored wallet must carry the same id and derive the same chains,
/// unlockable under the new passphrases.
fn compare_wallet_with_backup(
    original: &AssetWallet,
    original_pass: &'static str,
    restored_path: &std::path::Path,
    new_pass: &'static str,
    new_control: &'static str,
) {
    let restored = AssetWallet::load_main_wallet_from_file(
        restored_path,
        prompt_for(new_control),
        config(),
    )
    .unwrap();
    assert_eq!(original.wallet_id(), restored.wallet_id());

    original.set_passphrase_prompt(prompt_for(original_pass));
    restored.set_passphrase_prompt(Arc::new(move |_| {
        SecretBytes::from_slice(new_pass.as_bytes())
    }));

    // stay within the original's private lookup window
    for _ in 0..4 {
        let original_addr = original.get_new_address(None, None).unwrap();
        let restored_addr = restored.get_new_address(None, None).unwrap();
        assert_eq!(
            original_addr.prefixed_hash(&config()),
            restored_addr.prefixed_hash(&config())
        );

        let original_asset = original
            .get_asset_for_id(&original_addr.asset_id())
            .unwrap();
        let restored_asset = restored
            .get_asset_for_id(&restored_addr.asset_id())
            .unwrap();

        let guard_a = original.lock_decrypted_container().unwrap();
        let original_priv = original
            .get_decrypted_private_key_for_asset(&original_asset)
            .unwrap();
        drop(guard_a);

        let guard_b = restored.lock_decrypted_container().unwrap();
        let restored_priv = restored
            .get_decrypted_private_key_for_asset(&restored_asset)
            .unwrap();
        drop(guard_b);

        assert_eq!(original_priv, restored_priv);
    }
}

#[test]
fn backup_strings_legacy() {
    let dir = tempdir().unwrap();
    let restore_dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_private_root_armory135(
        dir.path(),
        SecretBytes::random(32),
        None,
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();
    assert_eq!(backup.backup_type, 0);
    assert_eq!(backup.root_clear.len(), 2);
    assert!(backup.chaincode_clear.is_empty());

    let restored = restore_from_backup(
        &backup.root_clear,
        None,
        restore_dir.path(),
        accepting_prompt(backup.wallet_id.clone(), "newpass", "newctrl"),
        config(),
    )
    .unwrap();
    let restored_path = restored.db_filename();
    drop(restored);

    compare_wallet_with_backup(&wallet, "passphrase", &restored_path, "newpass", "newctrl");
}

#[test]
fn backup_strings_legacy_secure_print() {
    let dir = tempdir().unwrap();
    let restore_dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_private_root_armory135(
        dir.path(),
        SecretBytes::random(32),
        None,
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();

    // without the SecurePrint passphrase the computed id is wrong and the
    // user rejects it
    let result = restore_from_backup(
        &backup.root_encrypted,
        None,
        restore_dir.path(),
        accepting_prompt(backup.wallet_id.clone(), "newpass", "newctrl"),
        config(),
    );
    assert!(matches!(result, Err(WalletError::RestoreUser("id"))));

    let restored = restore_from_backup(
        &backup.root_encrypted,
        Some(&backup.sp_passphrase),
        restore_dir.path(),
        accepting_prompt(backup.wallet_id.clone(), "newpass", "newctrl"),
        config(),
    )
    .unwrap();
    let restored_path = restored.db_filename();
    drop(restored);

    compare_wallet_with_backup(&wallet, "passphrase", &restored_path, "newpass", "newctrl");
}

#[test]
fn backup_strings_legacy_with_chaincode_secure_print() {
    let dir = tempdir().unwrap();
    let restore_dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_private_root_armory135(
        dir.path(),
        SecretBytes::random(32),
        Some([0x5eu8; 32]),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();
    assert_eq!(backup.chaincode_encrypted.len(), 2);

    let mut lines = backup.root_encrypted.clone();
    lines.extend(backup.chaincode_encrypted.iter().cloned());

    let restored = restore_from_backup(
        &lines,
        Some(&backup.sp_passphrase),
        restore_dir.path(),
        accepting_prompt(backup.wallet_id.clone(), "newpass", "newctrl"),
        config(),
    )
    .unwrap();
    let restored_path = restored.db_filename();
    drop(restored);

    compare_wallet_with_backup(&wallet, "passphrase", &restored_path, "newpass", "newctrl");
}

#[test]
fn backup_strings_bip32() {
    let dir = tempdir().unwrap();
    let restore_dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        SecretBytes::random(32),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();
    assert_eq!(backup.backup_type, 1);

    let restored = restore_from_backup(
        &backup.root_clear,
        None,
        restore_dir.path(),
        accepting_prompt(backup.wallet_id.clone(), "newpass", "newctrl"),
        config(),
    )
    .unwrap();
    let restored_path = restored.db_filename();
    drop(restored);

    compare_wallet_with_backup(&wallet, "passphrase", &restored_path, "newpass", "newctrl");
}

#[test]
fn backup_virgin_bip32_restores_blank() {
    let dir = tempdir().unwrap();
    let restore_dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_seed_bip32_blank(
        dir.path(),
        SecretBytes::random(32),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();
    assert_eq!(backup.backup_type, 15);

    let restored = restore_from_backup(
        &backup.root_clear,
        None,
        restore_dir.path(),
        accepting_prompt(backup.wallet_id.clone(), "newpass", "newctrl"),
        config(),
    )
    .unwrap();
    assert_eq!(restored.wallet_id(), wallet.wallet_id());
    assert!(restored.account_ids().is_empty());
}

#[test]
fn restore_rejected_by_user() {
    let dir = tempdir().unwrap();
    let restore_dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_private_root_armory135(
        dir.path(),
        SecretBytes::random(32),
        None,
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();
    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();

    let reject_all: RestorePrompt = Arc::new(|_, _, _| false);
    let result = restore_from_backup(
        &backup.root_clear,
        None,
        restore_dir.path(),
        reject_all,
        config(),
    );
    assert!(matches!(result, Err(WalletError::RestoreUser("id"))));

    // nothing was left behind on disk
    assert_eq!(
        std::fs::read_dir(restore_dir.path()).unwrap().count(),
        0,
        "rejected restore must not leave a file"
    );
}

#[test]
fn restore_with_auto_repair_recovers_wallet_id() {
    let dir = tempdir().unwrap();

    let wallet = AssetWallet::create_from_private_root_armory135(
        dir.path(),
        SecretBytes::from_slice(&[0x6bu8; 32]),
        None,
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();
    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let backup = get_wallet_backup(&wallet).unwrap();
    let expected_id = backup.wallet_id.clone();

    // flip one data character at a time; every unambiguous repair must
    // produce the original wallet id, and at least one position must repair
    let mut recovered = 0;
    let mut attempts = 0;
    'outer: for line_select in 0..2usize {
        for char_select in [0usize, 9, 21, 33] {
            attempts += 1;
            let mut lines = backup.root_clear.clone();
            let data_positions: Vec<usize> = lines[line_select]
                .char_indices()
                .filter(|(_, c)| *c != ' ')
                .map(|(position, _)| position)
                .collect();
            let target = data_positions[char_select % 32];
            let current = lines[line_select].as_bytes()[target];
            let replacement = E16_CHARS
                .iter()
                .copied()
                .find(|candidate| *candidate != current)
                .unwrap();
            let mut bytes = lines[line_select].clone().into_bytes();
            bytes[target] = replacement;
            lines[line_select] = String::from_utf8(bytes).unwrap();

            let seen_id = Arc::new(Mutex::new(None::<String>));
            let seen_checksum_error = Arc::new(Mutex::new(false));
            let id_slot = seen_id.clone();
            let checksum_slot = seen_checksum_error.clone();
            let prompt: RestorePrompt = Arc::new(move |stage, indexes, extra| match stage {
                RestorePromptType::ChecksumError => {
                    assert!(indexes.contains(&-1));
                    *checksum_slot.lock().unwrap() = true;
                    false
                }
                RestorePromptType::Id => {
                    *id_slot.lock().unwrap() =
                        Some(String::from_utf8_lossy(extra).into_owned());
                    false // stop before building the wallet
                }
                _ => true,
            });

            let restore_dir = tempdir().unwrap();
            let result = restore_from_backup(
                &lines,
                None,
                restore_dir.path(),
                prompt,
                config(),
            );
            assert!(result.is_err());
            assert!(*seen_checksum_error.lock().unwrap());

            let seen_id_value = seen_id.lock().unwrap().clone();
            if let Some(id) = seen_id_value {
                assert_eq!(id, expected_id, "repair produced a wrong wallet id");
                recovered += 1;
                if recovered >= 2 {
                    break 'outer;
                }
            }
        }
    }
    assert!(recovered > 0, "no corruption of {} was repairable", attempts);
}
