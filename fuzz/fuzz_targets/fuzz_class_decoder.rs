// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use frost::encoding::{InputStream, TypeRegistry, ENCODING_1_1};

fuzz_target!(|data: &[u8]| {
    // No factories: every instance goes through the slicing path
    let registry = TypeRegistry::new();

    // Fuzz a class parameter inside an encapsulation
    let mut input = InputStream::new(data, ENCODING_1_1, &registry).with_depth_max(16);
    let _ = input.read_encapsulation(|input| input.read_class(None));

    // Fuzz an exception reply body
    let mut input = InputStream::new(data, ENCODING_1_1, &registry);
    let _ = input.read_encapsulation(|input| input.read_exception());
});
