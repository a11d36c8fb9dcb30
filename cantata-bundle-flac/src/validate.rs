// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Write;

use cantata_core::checksum::Md5;
use cantata_core::io::Monitor;

/// `Validator` computes the rolling MD5 checksum of a decoded audio stream.
///
/// FLAC defines the stream hash over the interleaved little-endian PCM at the stream's bits per
/// sample, which is exactly the byte sequence the decoder emits, so the validator consumes the
/// decoder output directly.
#[derive(Default)]
pub struct Validator {
    state: Md5,
}

impl Validator {
    /// Processes a frame of interleaved PCM and updates the state of the validator.
    pub fn update(&mut self, pcm: &[u8]) {
        self.state.process_buf_bytes(pcm);
    }

    /// Get the checksum.
    pub fn md5(&self) -> [u8; 16] {
        self.state.md5()
    }
}

/// Formats an MD5 hash as a lowercase hex string for logging.
pub fn md5_hex(hash: &[u8; 16]) -> String {
    let mut out = String::with_capacity(32);
    hash.iter().for_each(|b| write!(out, "{:02x}", b).unwrap());
    out
}
