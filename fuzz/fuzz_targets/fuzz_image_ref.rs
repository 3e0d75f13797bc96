//! Fuzz target: image reference normalization.
//!
//! A normalized reference is fully qualified and normalizing it again is a no-op.

#![no_main]

use cutover_core::ImageRef;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(reference) = ImageRef::normalize(raw) else {
        return;
    };
    let full = reference.to_string();
    assert!(full.contains('/'), "normalized reference must carry a registry: {full:?}");
    let again = ImageRef::normalize(&full).expect("normalized reference must normalize");
    assert_eq!(again, reference, "normalization must be idempotent for {raw:?}");
});
