//! Fuzz test for client certificate subject decoding
//!
//! Parses and decodes arbitrary distinguished names. Whatever decodes must
//! decode to the same identity after re-encoding.
//!
//! Run with: cargo +nightly fuzz run certificate_subject_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tenantry_api::{decode_subject, encode_subject, CertificateSubject};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(subject) = CertificateSubject::parse(input) else {
        return;
    };
    if let Ok(identity) = decode_subject(&subject) {
        let encoded = encode_subject(&identity.user, &identity.groups, identity.tenant.as_ref());
        let again = decode_subject(&encoded).expect("re-encoded subject must decode");
        assert_eq!(again, identity);
    }
});
