//! Property-based tests for the client-side greeting cryptography.

use greet_crypto::{
    HashDigest, PrivateKey, SasCode, SecretKey,
    sas::{SAS_ALPHABET, SAS_LEN},
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Both sides of a key agreement derive the same key and therefore the
    /// same SAS codes.
    #[test]
    fn prop_key_agreement_yields_matching_sas(
        greeter_secret in any::<[u8; 32]>(),
        claimer_secret in any::<[u8; 32]>(),
        greeter_nonce in prop::collection::vec(any::<u8>(), 1..96),
        claimer_nonce in prop::collection::vec(any::<u8>(), 1..96),
    ) {
        let greeter = PrivateKey::from_bytes(greeter_secret);
        let claimer = PrivateKey::from_bytes(claimer_secret);

        let greeter_key = greeter.generate_shared_secret_key(&claimer.public_key());
        let claimer_key = claimer.generate_shared_secret_key(&greeter.public_key());

        let on_greeter = SasCode::generate_sas_codes(&claimer_nonce, &greeter_nonce, &greeter_key);
        let on_claimer = SasCode::generate_sas_codes(&claimer_nonce, &greeter_nonce, &claimer_key);

        // ORACLE: symmetric derivation
        prop_assert_eq!(&on_greeter, &on_claimer);
        for code in [&on_greeter.0, &on_greeter.1] {
            // ORACLE: four symbols of the SAS alphabet
            prop_assert_eq!(code.as_str().len(), SAS_LEN);
            prop_assert!(code.as_str().bytes().all(|b| SAS_ALPHABET.contains(&b)));
        }
    }

    /// Codes round-trip through their string form.
    #[test]
    fn prop_sas_parses_back(value in 0u32..(1 << 20)) {
        let code = SasCode::from_int(value).unwrap();
        let parsed: SasCode = code.as_str().parse().unwrap();
        prop_assert_eq!(parsed, code);
    }

    /// Candidates are distinct and contain the valid code.
    #[test]
    fn prop_candidates_contain_valid(value in 0u32..(1 << 20), size in 1usize..8, seed in any::<u64>()) {
        let valid = SasCode::from_int(value).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let candidates = SasCode::generate_sas_code_candidates(&valid, size, &mut rng);

        prop_assert_eq!(candidates.len(), size);
        prop_assert!(candidates.contains(&valid));
        for (i, a) in candidates.iter().enumerate() {
            // ORACLE: no duplicates
            prop_assert!(candidates[i + 1..].iter().all(|b| b != a));
        }
    }

    /// Sealed payloads open under the same key only.
    #[test]
    fn prop_sealed_payload_round_trip(
        key in any::<[u8; 32]>(),
        other in any::<[u8; 32]>(),
        nonce in any::<[u8; 24]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        prop_assume!(key != other);
        let sealed = SecretKey::from_bytes(key).encrypt(nonce, &plaintext).unwrap();

        prop_assert_eq!(SecretKey::from_bytes(key).decrypt(&sealed).unwrap(), plaintext);
        // ORACLE: AEAD rejects the wrong key
        prop_assert!(SecretKey::from_bytes(other).decrypt(&sealed).is_err());
    }

    /// Only the committed nonce matches its digest.
    #[test]
    fn prop_commitment_binds_nonce(
        nonce in prop::collection::vec(any::<u8>(), 1..96),
        flip in any::<prop::sample::Index>(),
    ) {
        let digest = HashDigest::from_data(&nonce);
        prop_assert!(digest.matches(&nonce));

        let mut forged = nonce.clone();
        let i = flip.index(forged.len());
        forged[i] ^= 0x01;
        prop_assert!(!digest.matches(&forged));
    }
}
