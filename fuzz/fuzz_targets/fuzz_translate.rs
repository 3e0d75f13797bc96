//! Fuzz target: container translation from arbitrary inspect documents.
//!
//! Translation must never panic, must be deterministic, and a translated
//! record must serialize.

#![no_main]

use cutover_core::translate_json;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(first) = translate_json(data) else {
        return;
    };
    let second = translate_json(data).expect("second translation of accepted input must succeed");
    assert_eq!(first, second, "translation must be deterministic");

    let _ = serde_json::to_vec(&first).expect("translated record must serialize");
});
