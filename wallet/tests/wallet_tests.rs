use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use hdwallet::accounts::{AccountTypeBip32, AccountTypeEcdh};
use hdwallet::address::AddressType;
use hdwallet::decrypted_data::PassphrasePrompt;
use hdwallet::derivation::Bip32Node;
use hdwallet::io::header::{HeaderType, WalletHeader};
use hdwallet::io::interface::WalletDbInterface;
use hdwallet::wallet::AssetWallet;
use hdwallet::{NetworkConfig, WalletError};
use hdwallet_crypto::ecc;
use hdwallet_crypto::hashes::hash160;
use hdwallet_crypto::SecretBytes;

fn prompt_for(pass: &'static str) -> PassphrasePrompt {
    Arc::new(move |_ids| SecretBytes::from_slice(pass.as_bytes()))
}

fn config() -> NetworkConfig {
    NetworkConfig::mainnet()
}

/// Every byte of every file under `path`, concatenated.
fn read_all_file_bytes(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    let mut stack = vec![path.to_path_buf()];
    while let Some(current) = stack.pop() {
        if current.is_dir() {
            for entry in fs::read_dir(&current).unwrap() {
                stack.push(entry.unwrap().path());
            }
        } else if current.is_file() {
            out.extend_from_slice(&fs::read(&current).unwrap());
        }
    }
    out
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn custom_db_write_close_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wallet_file");

    let mut pairs = Vec::new();
    for i in 0u32..50 {
        let key = i.to_be_bytes().to_vec();
        let mut value = vec![0xb0; 8];
        value.extend_from_slice(&i.to_be_bytes());
        pairs.push((key, value));
    }

    {
        let iface = WalletDbInterface::setup_env(&path, prompt_for("control")).unwrap();
        iface.lock_control_container(prompt_for("control")).unwrap();
        iface
            .add_header(WalletHeader::new(HeaderType::Custom, "custom"))
            .unwrap();
        iface.unlock_control_container();

        let tx = iface.begin_write_transaction("custom").unwrap();
        for (key, value) in &pairs {
            tx.put(key, value);
        }
        tx.commit().unwrap();
        iface.shutdown().unwrap();
    }

    // reopen: same pairs, in order
    let iface = WalletDbInterface::setup_env(&path, prompt_for("control")).unwrap();
    let read = iface.begin_read_transaction("custom").unwrap();
    let loaded: Vec<(Vec<u8>, Vec<u8>)> = read
        .iter()
        .map(|(key, value)| (key.to_vec(), value.to_vec()))
        .collect();
    assert_eq!(loaded, pairs);
    iface.shutdown().unwrap();

    // the raw store never sees the cleartext
    let raw = read_all_file_bytes(dir.path());
    for (_, value) in &pairs {
        assert!(!contains_subslice(&raw, value));
    }
}

#[test]
fn legacy_wallet_chains_reference_vectors() {
    let dir = tempdir().unwrap();

    let root: Vec<u8> =
        hex::decode("0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a")
            .unwrap();
    let chaincode: [u8; 32] =
        hex::decode("3130292827262524232221201918171615141312111009080706050403020100")
            .unwrap()
            .try_into()
            .unwrap();

    let wallet = AssetWallet::create_from_private_root_armory135(
        dir.path(),
        SecretBytes::new(root),
        Some(chaincode),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        4,
        config(),
    )
    .unwrap();

    // the first chained asset matches the reference chain
    let account_id = wallet.account_ids()[0];
    let asset0 = wallet
        .get_asset_for_id(&hdwallet::AssetId::new(account_id, 0, 0))
        .unwrap();
    let pub0 = asset0.as_single().unwrap().pubkey_uncompressed().unwrap();
    assert!(hex::encode(pub0).starts_with(
        "045f22b6502501d833413073ace7ca34effcb455953559eb5d39914abcf2e8f645"
    ));

    // decrypted private key matches too
    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let guard = wallet.lock_decrypted_container().unwrap();
    let priv0 = wallet.get_decrypted_private_key_for_asset(&asset0).unwrap();
    assert_eq!(
        hex::encode(priv0.as_slice()),
        "e2ffa33627c47f042e93425ded75942accaaca09d0a82d9bcf24af4fc6b5bb85"
    );
    drop(guard);
}

#[test]
fn create_close_open_preserves_addresses() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x77u8; 32]);

    let (path, addresses) = {
        let wallet = AssetWallet::create_from_seed_bip32(
            dir.path(),
            seed,
            &SecretBytes::from_slice(b"passphrase"),
            &SecretBytes::from_slice(b"control"),
            10,
            config(),
        )
        .unwrap();

        let mut addresses = Vec::new();
        for _ in 0..5 {
            addresses.push(
                wallet
                    .get_new_address(None, None)
                    .unwrap()
                    .prefixed_hash(&config()),
            );
        }
        (wallet.db_filename(), addresses)
    };

    let loaded =
        AssetWallet::load_main_wallet_from_file(&path, prompt_for("control"), config()).unwrap();
    // used addresses survive the reload; fresh ones continue the chain
    let hash_set = loaded.get_addr_hash_set();
    for address in &addresses {
        assert!(hash_set.contains(address));
    }
    let next = loaded.get_new_address(None, None).unwrap();
    assert!(!addresses.contains(&next.prefixed_hash(&config())));
}

#[test]
fn bip32_outer_chain_matches_seed_derivation() {
    let dir = tempdir().unwrap();
    let seed_bytes = [0x4du8; 32];

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        SecretBytes::from_slice(&seed_bytes),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        10,
        config(),
    )
    .unwrap();

    let main_account = wallet.main_account_id().unwrap();
    // derive the same chain straight from the seed: m/44'/0'/0'/0/i
    let mut node = Bip32Node::from_seed(&seed_bytes).unwrap();
    for step in [0x8000_002cu32, 0x8000_0000, 0x8000_0000, 0] {
        node = node.derive_private(step).unwrap();
    }

    for index in 0..10u32 {
        let asset = wallet
            .get_asset_for_id(&hdwallet::AssetId::new(main_account, 0, index))
            .unwrap();
        let expected = node.derive_private(index).unwrap();
        assert_eq!(
            asset.as_single().unwrap().pubkey,
            *expected.public_key(),
            "index {}",
            index
        );
    }
}

#[test]
fn watching_only_fork_preserves_hash_set() {
    let dir = tempdir().unwrap();
    let wo_dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x21u8; 32]);

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        seed,
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        10,
        config(),
    )
    .unwrap();

    let wo_path = wallet
        .fork_watching_only(wo_dir.path(), &SecretBytes::from_slice(b"wo-control"))
        .unwrap();
    let wo_wallet =
        AssetWallet::load_main_wallet_from_file(&wo_path, prompt_for("wo-control"), config())
            .unwrap();

    // identical public tree, shared identity
    assert_eq!(wallet.wallet_id(), wo_wallet.wallet_id());
    assert_eq!(wallet.master_id(), wo_wallet.master_id());
    assert_eq!(wallet.get_addr_hash_set(), wo_wallet.get_addr_hash_set());

    // no private material anywhere in the fork
    let main_account = wo_wallet.main_account_id().unwrap();
    for index in 0..10u32 {
        let asset = wo_wallet
            .get_asset_for_id(&hdwallet::AssetId::new(main_account, 0, index))
            .unwrap();
        assert!(!asset.has_private_key());
    }
    assert!(!wo_wallet.root().unwrap().has_private_key());

    // both vend the same future addresses
    let mut full_set = BTreeSet::new();
    let mut wo_set = BTreeSet::new();
    for _ in 0..10 {
        full_set.insert(
            wallet
                .get_new_address(None, None)
                .unwrap()
                .prefixed_hash(&config()),
        );
        wo_set.insert(
            wo_wallet
                .get_new_address(None, None)
                .unwrap()
                .prefixed_hash(&config()),
        );
    }
    assert_eq!(full_set, wo_set);
}

#[test]
fn salted_account_addresses() {
    let dir = tempdir().unwrap();
    let seed_bytes = [0x62u8; 32];
    let salt = [0x9cu8; 32];
    let derivation_path = vec![0x8000_0050u32, 0x8000_05de, 0x8000_465a, 501];

    let wallet = AssetWallet::create_from_seed_bip32_blank(
        dir.path(),
        SecretBytes::from_slice(&seed_bytes),
        &SecretBytes::from_slice(b"password"),
        &SecretBytes::from_slice(b"control"),
        config(),
    )
    .unwrap();

    let seed_fingerprint = wallet.seed_fingerprint().unwrap();
    let mut types = BTreeSet::new();
    types.insert(AddressType::P2WPKH);
    let descriptor =
        AccountTypeBip32::from_derivation_path(seed_fingerprint, derivation_path.clone())
            .with_salt(salt)
            .with_lookup(10)
            .with_main(true)
            .with_address_types(types, AddressType::P2WPKH);

    let account_id = wallet
        .with_passphrase(SecretBytes::from_slice(b"password"), |w| {
            w.create_bip32_account(&descriptor)
        })
        .unwrap();

    // salted leaf = salt * bip32 leaf, straight from the seed
    let mut node = Bip32Node::from_seed(&seed_bytes).unwrap();
    for step in &derivation_path {
        node = node.derive_private(*step).unwrap();
    }
    // outer chain node
    let outer = node.derive_private(0).unwrap();

    for index in 0..10u32 {
        let entry = wallet.get_new_address(Some(account_id), None).unwrap();
        let leaf = outer.derive_private(index).unwrap();
        let salted = ecc::pubkey_mul(leaf.public_key(), &salt).unwrap();
        assert_eq!(entry.preimage(), salted.to_vec());
        assert_eq!(entry.hash(), hash160(&salted).to_vec());
    }
}

#[test]
fn ecdh_account_salts() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x11u8; 32]);

    let base_privkey: Vec<u8> =
        hex::decode("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
            .unwrap();
    let base_pubkey = ecc::compute_pubkey(&base_privkey).unwrap();

    let wallet = AssetWallet::create_from_seed_bip32_blank(
        dir.path(),
        seed,
        &SecretBytes::from_slice(b"password"),
        &SecretBytes::from_slice(b"control"),
        config(),
    )
    .unwrap();

    let descriptor = AccountTypeEcdh::new(
        Some(SecretBytes::new(base_privkey.clone())),
        base_pubkey,
    )
    .with_main(true);
    let account_id = wallet
        .with_passphrase(SecretBytes::from_slice(b"password"), |w| {
            w.create_ecdh_account(&descriptor)
        })
        .unwrap();

    let salt = [0xa1u8; 32];
    let index = wallet.add_ecdh_salt(account_id, salt).unwrap();
    assert_eq!(index, 0);

    // re-adding is idempotent
    assert_eq!(wallet.add_ecdh_salt(account_id, salt).unwrap(), 0);

    let entry = wallet.get_new_address(Some(account_id), None).unwrap();
    let expected = ecc::pubkey_mul(&base_pubkey, &salt).unwrap();
    assert_eq!(entry.hash(), hash160(&expected).to_vec());

    // a second salt takes the next index
    assert_eq!(wallet.add_ecdh_salt(account_id, [0xa2u8; 32]).unwrap(), 1);

    // reload and make sure the salts survived
    let path = wallet.db_filename();
    drop(wallet);
    let loaded =
        AssetWallet::load_main_wallet_from_file(&path, prompt_for("control"), config()).unwrap();
    assert_eq!(loaded.add_ecdh_salt(account_id, salt).unwrap(), 0);
    let hash_set = loaded.get_addr_hash_set();
    let mut prefixed = vec![hdwallet::address::WITNESS_SHORT_PREFIX];
    prefixed.extend_from_slice(&hash160(&expected));
    assert!(hash_set.contains(&prefixed));
}

#[test]
fn passphrase_rotation_preserves_public_material() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x35u8; 32]);

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        seed,
        &SecretBytes::from_slice(b"old pass"),
        &SecretBytes::from_slice(b"control"),
        5,
        config(),
    )
    .unwrap();

    let main_account = wallet.main_account_id().unwrap();
    let hash_set_before = wallet.get_addr_hash_set();
    let envelope_before = wallet
        .get_asset_for_id(&hdwallet::AssetId::new(main_account, 0, 0))
        .unwrap()
        .as_single()
        .unwrap()
        .encrypted_privkey
        .clone()
        .unwrap();

    wallet.set_passphrase_prompt(prompt_for("old pass"));
    wallet
        .change_private_key_passphrase(&SecretBytes::from_slice(b"new pass"))
        .unwrap();

    // public material and asset envelopes untouched
    assert_eq!(wallet.get_addr_hash_set(), hash_set_before);
    let envelope_after = wallet
        .get_asset_for_id(&hdwallet::AssetId::new(main_account, 0, 0))
        .unwrap()
        .as_single()
        .unwrap()
        .encrypted_privkey
        .clone()
        .unwrap();
    assert_eq!(envelope_before, envelope_after);

    // old passphrase no longer unlocks, the new one does
    wallet.set_passphrase_prompt(prompt_for("old pass"));
    {
        let _guard = wallet.lock_decrypted_container().unwrap();
        assert!(matches!(
            wallet.get_decrypted_root(),
            Err(WalletError::PassphraseMismatch(_))
        ));
    }

    wallet.set_passphrase_prompt(prompt_for("new pass"));
    let _guard = wallet.lock_decrypted_container().unwrap();
    assert!(wallet.get_decrypted_root().is_ok());
}

#[test]
fn multiple_passphrases_unlock_the_same_key() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x36u8; 32]);

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        seed,
        &SecretBytes::from_slice(b"first"),
        &SecretBytes::from_slice(b"control"),
        3,
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(prompt_for("first"));
    wallet
        .add_private_key_passphrase(&SecretBytes::from_slice(b"second"))
        .unwrap();

    for pass in ["first", "second"] {
        wallet.set_passphrase_prompt(prompt_for(match pass {
            "first" => "first",
            _ => "second",
        }));
        let _guard = wallet.lock_decrypted_container().unwrap();
        assert!(wallet.get_decrypted_root().is_ok(), "pass {}", pass);
    }

    // dropping all passphrases leaves the wallet openable with none
    wallet.set_passphrase_prompt(prompt_for("first"));
    wallet.erase_private_key_passphrase().unwrap();
    wallet.set_passphrase_prompt(Arc::new(|_| SecretBytes::empty()));
    let _guard = wallet.lock_decrypted_container().unwrap();
    assert!(wallet.get_decrypted_root().is_ok());
}

#[test]
fn empty_passphrase_aborts_cleanly() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x39u8; 32]);

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        seed,
        &SecretBytes::from_slice(b"secret"),
        &SecretBytes::from_slice(b"control"),
        3,
        config(),
    )
    .unwrap();

    wallet.set_passphrase_prompt(Arc::new(|_| SecretBytes::empty()));
    let _guard = wallet.lock_decrypted_container().unwrap();
    assert!(matches!(
        wallet.get_decrypted_root(),
        Err(WalletError::EmptyPassphrase)
    ));
}

#[test]
fn comments_and_labels_round_trip() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x3au8; 32]);

    let path = {
        let wallet = AssetWallet::create_from_seed_bip32(
            dir.path(),
            seed,
            &SecretBytes::empty(),
            &SecretBytes::from_slice(b"control"),
            3,
            config(),
        )
        .unwrap();

        wallet.set_label("savings").unwrap();
        wallet.set_description("long term storage").unwrap();
        wallet.set_comment(b"addr-1", "exchange deposit").unwrap();
        wallet.set_comment(b"addr-2", "mining payout").unwrap();
        wallet.delete_comment(b"addr-2").unwrap();
        wallet.db_filename()
    };

    let loaded =
        AssetWallet::load_main_wallet_from_file(&path, prompt_for("control"), config()).unwrap();
    assert_eq!(loaded.label(), "savings");
    assert_eq!(loaded.description(), "long term storage");
    assert_eq!(
        loaded.get_comment(b"addr-1"),
        Some("exchange deposit".to_string())
    );
    assert_eq!(loaded.get_comment(b"addr-2"), None);
    assert_eq!(loaded.comment_map().len(), 1);
}

#[test]
fn erase_from_disk_removes_the_file() {
    let dir = tempdir().unwrap();
    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        SecretBytes::from_slice(&[0x5fu8; 32]),
        &SecretBytes::empty(),
        &SecretBytes::from_slice(b"control"),
        3,
        config(),
    )
    .unwrap();

    let path = wallet.db_filename();
    assert!(path.exists());
    wallet.interface().erase_from_disk().unwrap();
    drop(wallet);

    // the store is gone, or at worst an empty husk the backend re-created
    if path.exists() {
        let env = hdwallet_kv::KvEnv::open(&path).unwrap();
        let control = env.open_subdb("control_db").unwrap();
        assert_eq!(control.entry_count(), 0);
    }
}

#[test]
fn derivation_tree_resolves_wallet_chains() {
    let dir = tempdir().unwrap();
    let seed_bytes = [0x71u8; 32];

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        SecretBytes::from_slice(&seed_bytes),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        3,
        config(),
    )
    .unwrap();

    // with the private root attached every leaf resolves
    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let guard = wallet.lock_decrypted_container().unwrap();
    let tree = wallet.derivation_tree().unwrap();
    drop(guard);

    let paths = tree.get_paths();
    assert_eq!(paths.len(), 2); // outer and inner chains

    let reference = Bip32Node::from_seed(&seed_bytes).unwrap();
    assert_eq!(tree.seed_fingerprint(), reference.fingerprint());

    let roots = tree.resolve_node_roots(&config());
    for node_root in &roots {
        let path32 = hdwallet::DerivationTree::to_path32(&node_root.path);
        let expected = reference.derive_path(&path32).unwrap();
        assert_eq!(
            node_root.b58_root.as_deref(),
            Some(expected.to_base58(&config()).as_str())
        );
    }

    // public root only: the hardened account path cannot resolve
    let tree = wallet.derivation_tree().unwrap();
    let roots = tree.resolve_node_roots(&config());
    assert!(roots.iter().all(|node_root| node_root.b58_root.is_none()));
}

#[test]
fn peek_change_address_is_non_consuming() {
    let dir = tempdir().unwrap();
    let seed = SecretBytes::from_slice(&[0x3bu8; 32]);

    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        seed,
        &SecretBytes::empty(),
        &SecretBytes::from_slice(b"control"),
        5,
        config(),
    )
    .unwrap();

    let peek1 = wallet.peek_next_change_address().unwrap();
    let peek2 = wallet.peek_next_change_address().unwrap();
    assert_eq!(peek1.hash(), peek2.hash());

    let vended = wallet.get_new_change_address(None).unwrap();
    assert_eq!(vended.hash(), peek1.hash());

    let after = wallet.peek_next_change_address().unwrap();
    assert_ne!(after.hash(), vended.hash());
}
