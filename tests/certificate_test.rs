use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use secproc::{
    CertificateContainer, KeyContainer, ObjectId, ProcessorConfig, RsaRawPrivateKey, SecError,
    SecureProcessor, StorageLocation,
};
use std::fs;

fn test_processor() -> (tempfile::TempDir, SecureProcessor) {
    let dir = tempfile::tempdir().unwrap();
    let config = ProcessorConfig::new()
        .key_dir(dir.path().join("keys"))
        .cert_dir(dir.path().join("certs"))
        .bundle_dir(dir.path().join("bundles"));
    let proc = SecureProcessor::new(config).expect("processor boot");
    (dir, proc)
}

fn self_signed(common_name: &str) -> (PKey<Private>, X509) {
    let rsa = Rsa::generate(1024).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();

    (pkey, builder.build())
}

#[test]
fn pem_input_normalizes_to_the_same_der() {
    let (_dir, mut proc) = test_processor();
    let (_pkey, cert) = self_signed("round trip");

    let pem_id = ObjectId(0x100);
    let der_id = ObjectId(0x101);
    proc.provision_certificate(
        pem_id,
        StorageLocation::Ram,
        CertificateContainer::X509Pem,
        &cert.to_pem().unwrap(),
    )
    .unwrap();

    let exported = proc.certificate(pem_id).unwrap().der().to_vec();
    proc.provision_certificate(
        der_id,
        StorageLocation::Ram,
        CertificateContainer::X509Der,
        &exported,
    )
    .unwrap();

    assert_eq!(proc.certificate(der_id).unwrap().der(), exported.as_slice());
}

#[test]
fn a_tampered_cert_file_fails_verification() {
    let (dir, mut proc) = test_processor();
    let (_pkey, cert) = self_signed("tamper target");
    let id = ObjectId(0x2a);

    proc.provision_certificate(
        id,
        StorageLocation::File,
        CertificateContainer::X509Der,
        &cert.to_der().unwrap(),
    )
    .unwrap();
    proc.certificate(id).expect("untampered certificate loads");

    let path = dir.path().join("certs").join("000000000000002a.cert");
    let mut der = fs::read(&path).unwrap();
    let index = der.len() / 2;
    der[index] ^= 0x01;
    fs::write(&path, der).unwrap();

    assert!(matches!(
        proc.certificate(id),
        Err(SecError::VerificationFailed)
    ));
}

#[test]
fn export_uses_the_caller_buffer_convention() {
    let (_dir, mut proc) = test_processor();
    let (_pkey, cert) = self_signed("export");
    let id = ObjectId(0x102);
    let der = cert.to_der().unwrap();

    proc.provision_certificate(id, StorageLocation::Ram, CertificateContainer::X509Der, &der)
        .unwrap();
    let handle = proc.certificate(id).unwrap();

    assert_eq!(handle.export(None).unwrap(), der.len());

    let mut small = vec![0u8; der.len() - 1];
    assert!(matches!(
        handle.export(Some(&mut small)),
        Err(SecError::BufferTooSmall { .. })
    ));

    let mut buffer = vec![0u8; der.len()];
    assert_eq!(handle.export(Some(&mut buffer)).unwrap(), der.len());
    assert_eq!(buffer, der);
}

#[test]
fn the_embedded_public_key_is_extractable() {
    let (_dir, mut proc) = test_processor();
    let (pkey, cert) = self_signed("extract");
    let id = ObjectId(0x103);

    proc.provision_certificate(
        id,
        StorageLocation::Ram,
        CertificateContainer::X509Der,
        &cert.to_der().unwrap(),
    )
    .unwrap();
    let handle = proc.certificate(id).unwrap();

    let public = proc.extract_certificate_public_key(&handle).unwrap();
    let expected = pkey.rsa().unwrap();
    assert_eq!(public.modulus, expected.n().to_vec());
}

#[test]
fn certificate_signature_verifies_against_the_signing_key() {
    let (_dir, mut proc) = test_processor();
    let (pkey, cert) = self_signed("verify");
    let cert_id = ObjectId(0x104);
    let key_id = ObjectId(0x105);
    let wrong_key_id = ObjectId(0x106);

    proc.provision_certificate(
        cert_id,
        StorageLocation::Ram,
        CertificateContainer::X509Der,
        &cert.to_der().unwrap(),
    )
    .unwrap();

    let raw = RsaRawPrivateKey::from_rsa(&pkey.rsa().unwrap()).unwrap();
    proc.provision_key(
        key_id,
        StorageLocation::Ram,
        KeyContainer::RawRsa1024,
        &raw.to_bytes(),
    )
    .unwrap();
    proc.generate_key(wrong_key_id, secproc::KeyType::Rsa1024, StorageLocation::Ram)
        .unwrap();

    let handle = proc.certificate(cert_id).unwrap();
    proc.verify_certificate(&handle, &proc.key(key_id).unwrap())
        .unwrap();

    assert!(matches!(
        proc.verify_certificate(&handle, &proc.key(wrong_key_id).unwrap()),
        Err(SecError::VerificationFailed)
    ));
}

#[test]
fn certificates_survive_release_on_the_file_tier() {
    let dir = tempfile::tempdir().unwrap();
    let (_pkey, cert) = self_signed("persistent");
    let id = ObjectId(0x107);

    let config = || {
        ProcessorConfig::new()
            .key_dir(dir.path().join("keys"))
            .cert_dir(dir.path().join("certs"))
            .bundle_dir(dir.path().join("bundles"))
    };

    {
        let mut proc = SecureProcessor::new(config()).unwrap();
        proc.provision_certificate(
            id,
            StorageLocation::File,
            CertificateContainer::X509Der,
            &cert.to_der().unwrap(),
        )
        .unwrap();
    }

    // A fresh processor re-derives the certificate-MAC key and still
    // accepts the sealed record.
    let proc = SecureProcessor::new(config()).unwrap();
    let handle = proc.certificate(id).unwrap();
    assert_eq!(handle.location(), StorageLocation::File);
    assert_eq!(handle.der(), cert.to_der().unwrap().as_slice());
}

#[test]
fn delete_semantics_match_the_other_stores() {
    let (_dir, mut proc) = test_processor();
    let (_pkey, cert) = self_signed("delete");
    let id = ObjectId(0x108);

    proc.provision_certificate(
        id,
        StorageLocation::File,
        CertificateContainer::X509Der,
        &cert.to_der().unwrap(),
    )
    .unwrap();
    assert_eq!(proc.list_certificates(), vec![id]);

    proc.delete_certificate(id).unwrap();
    assert!(matches!(
        proc.delete_certificate(id),
        Err(SecError::NoSuchItem)
    ));
    assert!(proc.list_certificates().is_empty());
}

#[test]
fn garbage_input_is_rejected() {
    let (_dir, mut proc) = test_processor();
    assert!(matches!(
        proc.provision_certificate(
            ObjectId(0x109),
            StorageLocation::Ram,
            CertificateContainer::X509Der,
            b"not a certificate",
        ),
        Err(SecError::InvalidParameters(_))
    ));
}
