// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0
#![no_main]

use arbitrary::Arbitrary;
use epistula_protocol::{verify_signed_request, Body, RequestEnvelope};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    signature: Option<&'a str>,
    timestamp: Option<&'a str>,
    nonce: Option<&'a str>,
    signed_by: Option<&'a str>,
    signed_for: Option<&'a str>,
    body: &'a [u8],
    now_ms: u64,
}

fuzz_target!(|input: Input<'_>| {
    let envelope = RequestEnvelope {
        signature: input.signature,
        timestamp: input.timestamp,
        nonce: input.nonce,
        signed_by: input.signed_by,
        signed_for: input.signed_for,
    };
    // Must reject or accept without panicking, whatever the headers hold.
    let _ = verify_signed_request(&envelope, Body::Raw(input.body), input.now_ms);
});
