//! Shared helpers for unit tests: throwaway keys and self-signed
//! certificates built with OpenSSL.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509NameBuilder, X509};

/// Self-signed certificate with just a CN, valid for a year.
pub fn self_signed_cert(pkey: &PKey<Private>, cn: &str) -> X509 {
    self_signed_cert_with_subject(pkey, &[(Nid::COMMONNAME, cn)])
}

/// Self-signed certificate with arbitrary subject attributes.
pub fn self_signed_cert_with_subject(pkey: &PKey<Private>, subject: &[(Nid, &str)]) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    for (nid, value) in subject {
        name.append_entry_by_nid(*nid, value).unwrap();
    }
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(rand::random::<u32>() | 1)
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Fresh RSA-2048 key.
pub fn rsa_key() -> PKey<Private> {
    let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
    PKey::from_rsa(rsa).unwrap()
}

/// Fresh P-256 key.
pub fn ec_key() -> PKey<Private> {
    let group = openssl::ec::EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let ec = openssl::ec::EcKey::generate(&group).unwrap();
    PKey::from_ec_key(ec).unwrap()
}
