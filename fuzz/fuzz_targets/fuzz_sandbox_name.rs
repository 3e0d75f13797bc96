//! Fuzz target: sandbox container name parsing.
//!
//! Every name `PodSandboxMetadata::parse` accepts is detected as a sandbox.

#![no_main]

use cutover_core::{is_sandbox_name, PodSandboxMetadata};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(name) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(meta) = PodSandboxMetadata::parse(name) {
        assert!(is_sandbox_name(name), "parsed name must be detected: {name:?}");
        assert!(!meta.name.is_empty() && !meta.namespace.is_empty() && !meta.uid.is_empty());
    }
});
