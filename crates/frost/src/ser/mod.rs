// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked byte cursors shared by the encoding engine and the socket layers.

pub mod cursor;

pub use cursor::{Cursor, CursorMut};
