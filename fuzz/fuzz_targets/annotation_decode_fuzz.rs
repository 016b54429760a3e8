//! Fuzz test for reserved-annotation decoding
//!
//! Splits the input into lines of `key=value` and decodes them as object
//! annotations. Decoding must never panic, and a decoded identity must
//! survive a re-encode.
//!
//! Run with: cargo +nightly fuzz run annotation_decode_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tenantry_core::annotations::{self, Annotations};
use tenantry_core::TenantField;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let parsed: Annotations = input
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    match annotations::decode_optional(&parsed) {
        Ok(Some(identity)) => {
            let encoded = annotations::encode(&identity);
            assert_eq!(annotations::decode(&encoded).ok(), Some(identity));
        }
        Ok(None) => {
            for field in TenantField::ALL {
                let value = parsed.get(annotations::annotation_key(field));
                assert!(value.map_or(true, |v| v.is_empty()));
            }
        }
        Err(_) => {}
    }
});
