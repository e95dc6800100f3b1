// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use frost::transport::ws::HttpParser;

fuzz_target!(|data: &[u8]| {
    // Fuzz the header block scanner
    let _ = HttpParser::is_complete_message(data);

    // Fuzz the parser in one call, then split in two
    let _ = HttpParser::new().parse(data);
    if data.len() > 1 {
        let (head, tail) = data.split_at(data.len() / 2);
        let mut parser = HttpParser::new();
        if parser.parse(head).is_ok() {
            let _ = parser.parse(tail);
        }
    }
});
