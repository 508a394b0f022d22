use proptest::prelude::*;

use hdwallet::backup::{BackupEasy16, SecurePrint};
use hdwallet::encode::{Reader, Writer};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn easy16_decodes_what_it_encodes(
        secret in prop::array::uniform32(any::<u8>()),
        index in 0u8..16,
    ) {
        let lines = BackupEasy16::encode(&secret, index).unwrap();
        prop_assert_eq!(lines.len(), 2);

        let decoded = BackupEasy16::decode(&lines).unwrap();
        prop_assert_eq!(&decoded.checksum_indexes, &vec![index as i32, index as i32]);
        prop_assert_eq!(decoded.data.as_slice(), &secret);
    }

    #[test]
    fn secure_print_never_fails_on_its_own_output(
        secret in prop::array::uniform32(any::<u8>()),
    ) {
        let sp = SecurePrint::new();
        let encrypted = sp.encrypt(&secret).unwrap();
        prop_assert_eq!(encrypted.len(), secret.len());

        let decrypted = SecurePrint::decrypt(&sp.passphrase_b58(), &encrypted).unwrap();
        prop_assert_eq!(decrypted.as_slice(), &secret);
    }

    #[test]
    fn var_int_survives_any_value(value in any::<u64>()) {
        let mut writer = Writer::new();
        writer.put_var_int(value);
        let bytes = writer.into_vec();
        let mut reader = Reader::new(&bytes);
        prop_assert_eq!(reader.get_var_int().unwrap(), value);
        prop_assert!(reader.is_done());
    }

    #[test]
    fn var_bytes_survive_arbitrary_payloads(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut writer = Writer::new();
        writer.put_var_bytes(&payload);
        let bytes = writer.into_vec();
        let mut reader = Reader::new(&bytes);
        prop_assert_eq!(reader.get_var_bytes().unwrap(), payload.as_slice());
    }
}
