use secproc::{
    CipherAlgorithm, CipherMode, KeyContainer, KeyType, ObjectId, ProcessorConfig,
    SecError, SecureProcessor, StorageLocation, OBJECT_ID_CERT_MAC_KEY, OBJECT_ID_STORE_AES_KEY,
    OBJECT_ID_STORE_MAC_KEY,
};
use zeroize::Zeroizing;

fn test_processor_in(dir: &tempfile::TempDir) -> SecureProcessor {
    let config = ProcessorConfig::new()
        .key_dir(dir.path().join("keys"))
        .cert_dir(dir.path().join("certs"))
        .bundle_dir(dir.path().join("bundles"));
    SecureProcessor::new(config).expect("processor boot")
}

#[test]
fn device_id_matches_the_platform_value() {
    let dir = tempfile::tempdir().unwrap();
    let proc = test_processor_in(&dir);

    assert_eq!(
        hex::encode(proc.device_id()),
        "00010203040506070000000000000000"
    );
}

#[test]
fn boot_provisions_the_internal_keys() {
    let dir = tempfile::tempdir().unwrap();
    let proc = test_processor_in(&dir);

    let keys = proc.list_keys();
    assert!(keys.contains(&OBJECT_ID_STORE_AES_KEY));
    assert!(keys.contains(&OBJECT_ID_STORE_MAC_KEY));
    assert!(keys.contains(&OBJECT_ID_CERT_MAC_KEY));

    // The envelope keys are derived-inner AES records.
    assert_eq!(proc.key(OBJECT_ID_STORE_AES_KEY).unwrap().key_type(), KeyType::Aes128);
    assert_eq!(proc.key(OBJECT_ID_CERT_MAC_KEY).unwrap().key_type(), KeyType::Hmac256);
}

#[test]
fn info_names_the_device() {
    let dir = tempfile::tempdir().unwrap();
    let proc = test_processor_in(&dir);
    assert!(proc.info().contains("0001020304050607"));
}

#[test]
fn release_drops_ram_objects_and_keeps_file_objects() {
    let dir = tempfile::tempdir().unwrap();
    let ram_id = ObjectId(0x100);
    let file_id = ObjectId(0x200);

    {
        let mut proc = test_processor_in(&dir);
        proc.provision_key(ram_id, StorageLocation::Ram, KeyContainer::RawAes128, &[1u8; 16])
            .unwrap();
        proc.provision_key(
            file_id,
            StorageLocation::File,
            KeyContainer::RawAes128,
            &[2u8; 16],
        )
        .unwrap();
    }

    let proc = test_processor_in(&dir);
    assert!(matches!(proc.key(ram_id), Err(SecError::NoSuchItem)));
    let survivor = proc.key(file_id).expect("file-backed key survives release");
    assert_eq!(survivor.location(), StorageLocation::File);
}

#[test]
fn custom_container_handler_is_consulted_for_unknown_types() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProcessorConfig::new()
        .key_dir(dir.path().join("keys"))
        .cert_dir(dir.path().join("certs"))
        .bundle_dir(dir.path().join("bundles"))
        .custom_container(Box::new(|tag, data, _id| {
            assert_eq!(tag, 400);
            // The handler unwraps its own format: here, the key bytes
            // follow a one-byte version.
            Ok((KeyType::Aes128, Zeroizing::new(data[1..].to_vec())))
        }));
    let mut proc = SecureProcessor::new(config).unwrap();

    let mut blob = vec![1u8];
    blob.extend_from_slice(&[0x42; 16]);
    proc.provision_key(
        ObjectId(0x300),
        StorageLocation::Ram,
        KeyContainer::Other(400),
        &blob,
    )
    .unwrap();

    let handle = proc.key(ObjectId(0x300)).unwrap();
    assert_eq!(handle.key_type(), KeyType::Aes128);

    let mut session = proc
        .cipher(CipherAlgorithm::AesEcbNoPadding, CipherMode::Encrypt, &handle, None)
        .unwrap();
    assert_eq!(session.process(&[0u8; 16], true).unwrap().len(), 16);
}

#[test]
fn unknown_container_without_handler_is_unimplemented() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);

    assert!(matches!(
        proc.provision_key(
            ObjectId(0x301),
            StorageLocation::Ram,
            KeyContainer::Other(400),
            &[0u8; 16],
        ),
        Err(SecError::UnimplementedFeature(_))
    ));
}

#[test]
fn bundles_round_trip_and_respect_limits() {
    let dir = tempfile::tempdir().unwrap();
    let mut proc = test_processor_in(&dir);
    let id = ObjectId(0x900);

    proc.provision_bundle(id, StorageLocation::File, b"opaque bytes")
        .unwrap();
    let handle = proc.bundle(id).unwrap();
    assert_eq!(handle.data(), b"opaque bytes");

    // Export sizing convention.
    assert_eq!(handle.export(None).unwrap(), 12);
    let mut small = [0u8; 4];
    assert!(matches!(
        handle.export(Some(&mut small)),
        Err(SecError::BufferTooSmall { needed: 12, have: 4 })
    ));
    let mut buffer = [0u8; 32];
    assert_eq!(handle.export(Some(&mut buffer)).unwrap(), 12);
    assert_eq!(&buffer[..12], b"opaque bytes");

    assert!(matches!(
        proc.provision_bundle(ObjectId(0x901), StorageLocation::Ram, &[0u8; 5000]),
        Err(SecError::InvalidInputSize(_))
    ));

    proc.delete_bundle(id).unwrap();
    assert!(matches!(proc.delete_bundle(id), Err(SecError::NoSuchItem)));
}

#[test]
fn random_sessions_produce_output_for_both_generators() {
    let dir = tempfile::tempdir().unwrap();
    let proc = test_processor_in(&dir);

    for algorithm in [secproc::RandomAlgorithm::True, secproc::RandomAlgorithm::Prng] {
        let mut session = proc.random(algorithm);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        session.fill(&mut a).unwrap();
        session.fill(&mut b).unwrap();
        assert_ne!(a, b, "two 256-bit draws must not collide");
    }
}
