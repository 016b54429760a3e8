//! Fuzz test for the tenant joint-string parser
//!
//! Any input either fails to parse or parses to an identity whose joint
//! form is the input itself.
//!
//! Run with: cargo +nightly fuzz run joint_string_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tenantry_core::TenantIdentity;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(identity) = TenantIdentity::parse_joint(input) {
            assert_eq!(identity.to_joint_string(), input);
            let reparsed = TenantIdentity::parse_joint(&identity.to_joint_string())
                .expect("joint form of a valid identity must parse");
            assert_eq!(reparsed, identity);
        }
    }
});
