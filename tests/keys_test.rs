use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use secproc::{
    CipherAlgorithm, CipherMode, KeyContainer, KeyType, ObjectId, ProcessorConfig,
    RsaRawPrivateKey, SecError, SecureProcessor, StorageLocation, OBJECT_ID_INVALID,
};
use std::fs;

fn test_processor_in(dir: &tempfile::TempDir) -> SecureProcessor {
    let config = ProcessorConfig::new()
        .key_dir(dir.path().join("keys"))
        .cert_dir(dir.path().join("certs"))
        .bundle_dir(dir.path().join("bundles"));
    SecureProcessor::new(config).expect("processor boot")
}

fn encrypt_block(proc: &SecureProcessor, id: ObjectId, block: &[u8; 16]) -> Vec<u8> {
    let handle = proc.key(id).unwrap();
    let mut session = proc
        .cipher(CipherAlgorithm::AesEcbNoPadding, CipherMode::Encrypt, &handle, None)
        .unwrap();
    session.process(block, true).unwrap()
}

#[test]
fn aes128_single_block_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    let key: Vec<u8> = (0x00..0x10).collect();
    let plaintext: [u8; 16] = (0x10..0x20).collect::<Vec<u8>>().try_into().unwrap();
    let id = ObjectId(0x1000);

    proc.provision_key(id, StorageLocation::Ram, KeyContainer::RawAes128, &key)
        .unwrap();

    let ciphertext = encrypt_block(&proc, id, &plaintext);
    assert_eq!(ciphertext.len(), 16);
    assert_ne!(ciphertext.as_slice(), plaintext.as_slice());

    // The same key yields the same block, and decryption inverts it.
    assert_eq!(encrypt_block(&proc, id, &plaintext), ciphertext);

    let handle = proc.key(id).unwrap();
    let mut session = proc
        .cipher(CipherAlgorithm::AesEcbNoPadding, CipherMode::Decrypt, &handle, None)
        .unwrap();
    assert_eq!(session.process(&ciphertext, true).unwrap(), plaintext);
}

#[test]
fn provisioning_validates_id_and_lengths() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    assert!(matches!(
        proc.provision_key(
            OBJECT_ID_INVALID,
            StorageLocation::Ram,
            KeyContainer::RawAes128,
            &[0u8; 16],
        ),
        Err(SecError::InvalidParameters(_))
    ));

    assert!(matches!(
        proc.provision_key(
            ObjectId(1),
            StorageLocation::Ram,
            KeyContainer::RawAes128,
            &[0u8; 15],
        ),
        Err(SecError::InvalidParameters(_))
    ));

    assert!(matches!(
        proc.provision_key(
            ObjectId(1),
            StorageLocation::Ram,
            KeyContainer::RawHmac256,
            &[0u8; 4096],
        ),
        Err(SecError::InvalidInputSize(_))
    ));
}

#[test]
fn delete_is_exact_about_what_it_removed() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);
    let id = ObjectId(42);

    proc.provision_key(id, StorageLocation::File, KeyContainer::RawAes128, &[7u8; 16])
        .unwrap();
    proc.delete_key(id).unwrap();
    assert!(matches!(proc.delete_key(id), Err(SecError::NoSuchItem)));
    assert!(matches!(proc.key(id), Err(SecError::NoSuchItem)));
}

#[test]
fn generate_rejects_an_already_provisioned_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);
    let id = ObjectId(0x2000);

    proc.generate_key(id, KeyType::Aes256, StorageLocation::Ram)
        .unwrap();
    assert!(matches!(
        proc.generate_key(id, KeyType::Aes256, StorageLocation::Ram),
        Err(SecError::ItemAlreadyProvisioned)
    ));
}

#[test]
fn generated_rsa_keys_expose_their_public_half() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);
    let id = ObjectId(0x2001);

    proc.generate_key(id, KeyType::Rsa1024, StorageLocation::Ram)
        .unwrap();
    let handle = proc.key(id).unwrap();
    assert_eq!(handle.key_type(), KeyType::Rsa1024);

    let public = proc.extract_public_key(&handle).unwrap();
    assert_eq!(public.modulus.len(), 128);
}

#[test]
fn every_rsa_private_encoding_provisions_the_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    let rsa = Rsa::generate(1024).unwrap();
    let raw = RsaRawPrivateKey::from_rsa(&rsa).unwrap().to_bytes();
    let der = rsa.private_key_to_der().unwrap();
    let pem = rsa.private_key_to_pem().unwrap();
    let pkcs8 = PKey::from_rsa(rsa).unwrap().private_key_to_pkcs8().unwrap();

    let cases: [(&[u8], KeyContainer); 4] = [
        (&raw, KeyContainer::RawRsa1024),
        (&der, KeyContainer::DerRsa1024),
        (&pkcs8, KeyContainer::DerRsa1024),
        (&pem, KeyContainer::PemRsa1024),
    ];

    let mut moduli = Vec::new();
    for (i, (data, container)) in cases.iter().enumerate() {
        let id = ObjectId(0x3000 + i as u64);
        proc.provision_key(id, StorageLocation::Ram, *container, data)
            .unwrap();
        let handle = proc.key(id).unwrap();
        assert_eq!(handle.key_type(), KeyType::Rsa1024);
        moduli.push(proc.extract_public_key(&handle).unwrap().modulus);
    }
    assert!(moduli.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn both_rsa_public_der_shapes_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    let rsa = Rsa::generate(1024).unwrap();
    let spki = rsa.public_key_to_der().unwrap();
    let pkcs1 = rsa.public_key_to_der_pkcs1().unwrap();
    let pem = rsa.public_key_to_pem().unwrap();

    for (i, data) in [&spki, &pkcs1].into_iter().enumerate() {
        let id = ObjectId(0x3100 + i as u64);
        proc.provision_key(id, StorageLocation::Ram, KeyContainer::DerRsa1024Public, data)
            .unwrap();
        assert_eq!(proc.key(id).unwrap().key_type(), KeyType::Rsa1024Public);
    }

    proc.provision_key(
        ObjectId(0x3102),
        StorageLocation::Ram,
        KeyContainer::PemRsa1024Public,
        &pem,
    )
    .unwrap();
}

#[test]
fn a_mismatched_modulus_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    // A 2048-bit key in a 1024-bit container.
    let rsa = Rsa::generate(2048).unwrap();
    let der = rsa.private_key_to_der().unwrap();
    assert!(matches!(
        proc.provision_key(ObjectId(0x3200), StorageLocation::Ram, KeyContainer::DerRsa1024, &der),
        Err(SecError::InvalidParameters(_))
    ));
}

#[test]
fn a_prewrapped_store_blob_provisions_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    let original = ObjectId(0x4000);
    let adopted = ObjectId(0x4001);
    proc.provision_key(
        original,
        StorageLocation::File,
        KeyContainer::RawAes128,
        &[0x5a; 16],
    )
    .unwrap();

    let blob = fs::read(dir.path().join("keys").join("0000000000004000.key")).unwrap();
    proc.provision_key(adopted, StorageLocation::Ram, KeyContainer::Store, &blob)
        .unwrap();

    // Both identifiers now drive the same key.
    let block = [0x77u8; 16];
    assert_eq!(
        encrypt_block(&proc, original, &block),
        encrypt_block(&proc, adopted, &block)
    );
}

#[test]
fn a_truncated_store_blob_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    proc.provision_key(
        ObjectId(0x4100),
        StorageLocation::File,
        KeyContainer::RawAes128,
        &[0x5a; 16],
    )
    .unwrap();
    let mut blob = fs::read(dir.path().join("keys").join("0000000000004100.key")).unwrap();
    blob.pop();

    assert!(proc
        .provision_key(ObjectId(0x4101), StorageLocation::Ram, KeyContainer::Store, &blob)
        .is_err());
}

#[test]
fn a_tampered_key_file_fails_verification_at_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);
    let id = ObjectId(0x4200);

    proc.provision_key(id, StorageLocation::File, KeyContainer::RawAes128, &[9u8; 16])
        .unwrap();

    let path = dir.path().join("keys").join("0000000000004200.key");
    let mut blob = fs::read(&path).unwrap();
    let index = blob.len() / 2;
    blob[index] ^= 0x01;
    fs::write(&path, blob).unwrap();

    assert!(matches!(proc.key(id), Err(SecError::VerificationFailed)));
}

#[test]
fn soft_wrapped_locations_read_back_as_their_plain_tier() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    proc.provision_key(
        ObjectId(0x5000),
        StorageLocation::RamSoftWrapped,
        KeyContainer::RawAes128,
        &[1u8; 16],
    )
    .unwrap();
    assert_eq!(proc.key(ObjectId(0x5000)).unwrap().location(), StorageLocation::Ram);

    proc.provision_key(
        ObjectId(0x5001),
        StorageLocation::FileSoftWrapped,
        KeyContainer::RawAes128,
        &[2u8; 16],
    )
    .unwrap();
    assert_eq!(proc.key(ObjectId(0x5001)).unwrap().location(), StorageLocation::File);
}

#[test]
fn oem_writes_are_unimplemented() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    assert!(matches!(
        proc.provision_key(
            ObjectId(0x5002),
            StorageLocation::Oem,
            KeyContainer::RawAes128,
            &[1u8; 16],
        ),
        Err(SecError::UnimplementedFeature(_))
    ));
}

#[test]
fn raw_keys_never_touch_disk_unwrapped() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);
    let key = [0xc3u8; 16];

    proc.provision_key(ObjectId(0x6000), StorageLocation::File, KeyContainer::RawAes128, &key)
        .unwrap();

    let blob = fs::read(dir.path().join("keys").join("0000000000006000.key")).unwrap();
    assert!(
        !blob.windows(key.len()).any(|window| window == key),
        "clear key bytes leaked into the persisted envelope"
    );
}
