// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A Free Lossless Audio Codec (FLAC) decoder.
//!
//! The decoder is pull-based: [`FlacDecoder::try_new`] consumes the stream marker and metadata
//! block chain, then each call to [`FlacDecoder::next_frame`] decodes exactly one FLAC frame and
//! yields its interleaved little-endian PCM.

mod decoder;
mod frame;
mod metadata;
mod validate;

pub use decoder::FlacDecoder;
pub use frame::{BlockSequence, ChannelAssignment, FrameHeader};
pub use metadata::{StreamInfo, VorbisComment};
