use std::collections::BTreeSet;
use std::sync::Arc;

use tempfile::tempdir;

use hdwallet::accounts::AccountTypeBip32;
use hdwallet::address::AddressType;
use hdwallet::decrypted_data::PassphrasePrompt;
use hdwallet::derivation::Bip32Node;
use hdwallet::resolver::ResolverFeed;
use hdwallet::wallet::AssetWallet;
use hdwallet::NetworkConfig;
use hdwallet_crypto::ecc;
use hdwallet_crypto::hashes::hash160;
use hdwallet_crypto::SecretBytes;

fn prompt_for(pass: &'static str) -> PassphrasePrompt {
    Arc::new(move |_ids| SecretBytes::from_slice(pass.as_bytes()))
}

fn config() -> NetworkConfig {
    NetworkConfig::mainnet()
}

#[test]
fn every_generated_address_resolves_to_its_preimage() {
    let dir = tempdir().unwrap();
    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        SecretBytes::from_slice(&[0x2eu8; 32]),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        8,
        config(),
    )
    .unwrap();

    let mut entries = Vec::new();
    for atype in [
        AddressType::P2PKH,
        AddressType::P2WPKH,
        AddressType::P2WPKH.with(AddressType::MOD_P2SH),
    ] {
        for _ in 0..2 {
            entries.push(wallet.get_new_address(None, Some(atype)).unwrap());
        }
    }

    let resolver = ResolverFeed::new(&wallet);
    for entry in &entries {
        let preimage = resolver.get_by_val(&entry.hash()).unwrap();
        assert_eq!(preimage, entry.preimage());
    }

    // nested entries seed their inner preimage into the cache
    let nested = wallet
        .get_new_address(None, Some(AddressType::P2WPKH.with(AddressType::MOD_P2SH)))
        .unwrap();
    let outer_preimage = resolver.get_by_val(&nested.hash()).unwrap();
    // the preimage of a nested address is the witness program script
    assert_eq!(outer_preimage, nested.preimage());
    let inner_hash = {
        // hash160 of the compressed pubkey inside the witness program
        let program = nested.preimage();
        program[2..22].to_vec()
    };
    let inner_preimage = resolver.get_by_val(&inner_hash).unwrap();
    assert_eq!(hash160(&inner_preimage).to_vec(), inner_hash);
}

#[test]
fn private_keys_resolve_from_pubkeys() {
    let dir = tempdir().unwrap();
    let wallet = AssetWallet::create_from_seed_bip32(
        dir.path(),
        SecretBytes::from_slice(&[0x2fu8; 32]),
        &SecretBytes::from_slice(b"passphrase"),
        &SecretBytes::from_slice(b"control"),
        6,
        config(),
    )
    .unwrap();

    let entry = wallet
        .get_new_address(None, Some(AddressType::P2WPKH))
        .unwrap();
    let asset = wallet.get_asset_for_id(&entry.asset_id()).unwrap();
    let pubkey = asset.as_single().unwrap().pubkey;

    wallet.set_passphrase_prompt(prompt_for("passphrase"));
    let resolver = ResolverFeed::new(&wallet);

    let guard = wallet.lock_decrypted_container().unwrap();
    let privkey = resolver.get_priv_key_for_pubkey(&pubkey).unwrap();
    drop(guard);
    assert_eq!(ecc::compute_pubkey(privkey.as_slice()).unwrap(), pubkey);

    // unknown pubkeys fail with NoAsset
    let foreign_privkey = [0xeeu8; 32];
    let foreign_pubkey = ecc::compute_pubkey(&foreign_privkey).unwrap();
    assert!(resolver.get_priv_key_for_pubkey(&foreign_pubkey).is_err());
}

#[test]
fn bip32_paths_resolve_through_accounts_and_forks() {
    let dir = tempdir().unwrap();
    let seed_bytes = [0x99u8; 32];
    let derivation_path = vec![0x8000_12abu32, 0x8000_ff13, 0x8005_0000];

    // reference chain straight from the seed
    let mut node = Bip32Node::from_seed(&seed_bytes).unwrap();
    let seed_fingerprint = node.fingerprint();
    for step in &derivation_path {
        node = node.derive_private(*step).unwrap();
    }
    let account_node = node.derive_private(0).unwrap();
    let leaf = account_node.derive_public(5).unwrap();
    let expected_xpub = account_node.public_copy().to_base58(&config());

    let check_wallet = |wallet: &AssetWallet| {
        let resolver = ResolverFeed::new(wallet);
        let asset_path = resolver
            .resolve_bip32_path_for_pubkey(leaf.public_key())
            .unwrap();

        let mut full_path = derivation_path.clone();
        full_path.push(0);
        full_path.push(5);
        assert_eq!(asset_path.path_from_seed, full_path);
        assert_eq!(asset_path.seed_fingerprint, seed_fingerprint);

        let (asset_id, _) = resolver
            .get_asset_pair_for_key(&hash160(leaf.public_key()))
            .unwrap();
        assert_eq!(
            wallet.get_xpub_for_asset_id(&asset_id).unwrap(),
            expected_xpub
        );
    };

    // full wallet with a custom account
    let wallet = AssetWallet::create_from_seed_bip32_blank(
        dir.path(),
        SecretBytes::from_slice(&seed_bytes),
        &SecretBytes::empty(),
        &SecretBytes::from_slice(b"control"),
        config(),
    )
    .unwrap();

    let mut types = BTreeSet::new();
    types.insert(AddressType::P2WPKH);
    let descriptor =
        AccountTypeBip32::from_derivation_path(seed_fingerprint, derivation_path.clone())
            .with_nodes(vec![0])
            .with_lookup(10)
            .with_main(true)
            .with_address_types(types.clone(), AddressType::P2WPKH);
    wallet.create_bip32_account(&descriptor).unwrap();
    check_wallet(&wallet);

    // watching-only fork sees the same paths
    let wo_dir = tempdir().unwrap();
    let wo_path = wallet
        .fork_watching_only(wo_dir.path(), &SecretBytes::from_slice(b"ctrl"))
        .unwrap();
    let wo_wallet =
        AssetWallet::load_main_wallet_from_file(&wo_path, prompt_for("ctrl"), config()).unwrap();
    check_wallet(&wo_wallet);

    // an empty watching-only wallet seeded from the account xpub
    let xpub_dir = tempdir().unwrap();
    let xpub_wallet = AssetWallet::create_from_public_root(
        xpub_dir.path(),
        &node.public_copy().to_base58(&config()),
        derivation_path.clone(),
        seed_fingerprint,
        &SecretBytes::from_slice(b"ctrl2"),
        10,
        config(),
    )
    .unwrap();
    check_wallet(&xpub_wallet);
}
