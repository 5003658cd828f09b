// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0
#![no_main]

use epistula_protocol::canonical::canonical_json;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(first) = canonical_json(&value) else {
        return;
    };
    // Canonical form is a fixed point: decode and re-canonicalize.
    let reparsed: serde_json::Value =
        serde_json::from_slice(&first).expect("canonical output parses");
    let second = canonical_json(&reparsed).expect("canonical output re-canonicalizes");
    assert_eq!(first, second);
});
