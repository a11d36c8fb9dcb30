// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::checksum::Crc8Ccitt;
use cantata_core::errors::{Error, Result};
use cantata_core::io::{Monitor, MonitorStream, ReadBytes};

/// `BlockSequence` numbers a frame within its stream.
#[derive(Debug, PartialEq, Eq)]
pub enum BlockSequence {
    /// Variable-blocksize streams sequence frames by the index of their first inter-channel
    /// sample.
    BySample(u64),
    /// Fixed-blocksize streams sequence frames by frame index.
    ByFrame(u32),
}

/// `ChannelAssignment` describes the mapping between the samples decoded from a subframe and the
/// channel those samples belong to. It is also through the `ChannelAssignment` that the decoder is
/// instructed on how to decorrelate stereo channels.
///
/// For LeftSide or RightSide channel assignments, one channel is stored independently while the
/// other stores a difference. The difference is always stored as Left - Right. For the MidSide
/// channel assignment, no channel is stored independently, rather, a Mid (average) channel and a
/// difference channel are stored.
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelAssignment {
    /// All channels are independently coded and no decorrelation step is required.
    Independent(u32),
    /// Channel 0 is the Left channel, and channel 1 is a difference channel. The Right channel
    /// is restored by subtracting the difference channel from the Left channel (R = L - D).
    LeftSide,
    /// Channel 0 is the Mid channel (L/2 + R/2 with the parity of L - R in its lowest bit), and
    /// channel 1 is the difference channel (L - R).
    MidSide,
    /// Channel 0 is the difference channel, and channel 1 is the Right channel. The Left channel
    /// is restored by adding the difference channel to the Right channel (L = R + D).
    RightSide,
}

impl ChannelAssignment {
    /// The number of channels the assignment codes.
    pub fn num_channels(&self) -> u32 {
        match *self {
            ChannelAssignment::Independent(channels) => channels,
            _ => 2,
        }
    }
}

/// A decoded FLAC frame header.
pub struct FrameHeader {
    /// The frame or starting sample number of the frame.
    pub block_sequence: BlockSequence,
    /// The number of inter-channel samples in the frame, 1 through 65536.
    pub block_num_samples: u32,
    /// The channel assignment of the frame's subframes.
    pub channel_assignment: ChannelAssignment,
    /// The sample size of the frame, if stated.
    pub bits_per_sample: Option<u32>,
    /// The sample rate of the frame, if stated. Informational only.
    pub sample_rate: Option<u32>,
}

/// Reads a frame header from the stream.
///
/// `sync` must contain the first two bytes of the frame, which the caller has already read and
/// fed to the frame CRC-16: the 14-bit synchronization code, the mandatory zero bit, and the
/// blocking strategy bit. The header CRC-8 covers those bytes too, and is verified here.
pub fn read_frame_header<B: ReadBytes>(reader: &mut B, sync: u16) -> Result<FrameHeader> {
    // A frame must start with the 14-bit synchronization code.
    if (sync >> 2) != 0x3ffe {
        return Err(Error::LostSync);
    }

    // The bit following the synchronization code is reserved and must be 0.
    if (sync & 0x2) != 0 {
        return Err(Error::BadFrameHeader);
    }

    // The header is checksummed with a CRC-8 hash that includes the synchronization code.
    let mut crc8 = Crc8Ccitt::new(0);
    crc8.process_buf_bytes(&sync.to_be_bytes());

    let mut reader_crc8 = MonitorStream::new(reader, crc8);

    // The last bit of the synchronization word selects the blocking strategy.
    let is_variable_blocking = (sync & 0x1) == 1;

    // Read all the standard frame description fields as one 16-bit value and extract the fields.
    let desc = reader_crc8.read_be_u16()?;

    let block_size_enc = u32::from((desc & 0xf000) >> 12);
    let sample_rate_enc = u32::from((desc & 0x0f00) >> 8);
    let channels_enc = u32::from((desc & 0x00f0) >> 4);
    let bits_per_sample_enc = u32::from((desc & 0x000e) >> 1);

    // The final descriptor bit is reserved and must be 0.
    if (desc & 0x0001) == 1 {
        return Err(Error::BadFrameHeader);
    }

    let block_sequence = if is_variable_blocking {
        // Variable-blocksize streams sequence frames by a sample number of up-to 36 bits. Since
        // the number is extended UTF8 coded, its width cannot be bounded by the coding itself.
        let sample = utf8_decode_be_u64(&mut reader_crc8)?;

        if sample > 0x000f_ffff_ffff {
            return Err(Error::BadVarInt);
        }

        BlockSequence::BySample(sample)
    }
    else {
        // Fixed-blocksize streams sequence frames by a frame number of up-to 31 bits.
        let frame = utf8_decode_be_u64(&mut reader_crc8)?;

        if frame > 0x7fff_ffff {
            return Err(Error::BadVarInt);
        }

        BlockSequence::ByFrame(frame as u32)
    };

    let block_num_samples = match block_size_enc {
        0x1 => 192,
        0x2..=0x5 => 576 * (1 << (block_size_enc - 2)),
        0x6 => u32::from(reader_crc8.read_u8()?) + 1,
        0x7 => u32::from(reader_crc8.read_be_u16()?) + 1,
        0x8..=0xf => 256 * (1 << (block_size_enc - 8)),
        _ => return Err(Error::BadBlockSize),
    };

    let sample_rate = match sample_rate_enc {
        0x0 => None, // Get from StreamInfo.
        0x1 => Some(88_200),
        0x2 => Some(176_400),
        0x3 => Some(192_000),
        0x4 => Some(8_000),
        0x5 => Some(16_000),
        0x6 => Some(22_050),
        0x7 => Some(24_000),
        0x8 => Some(32_000),
        0x9 => Some(44_100),
        0xa => Some(48_000),
        0xb => Some(96_000),
        0xc => Some(u32::from(reader_crc8.read_u8()?) * 1000),
        0xd => Some(u32::from(reader_crc8.read_be_u16()?)),
        0xe => Some(u32::from(reader_crc8.read_be_u16()?) * 10),
        _ => return Err(Error::BadSampleRate),
    };

    if let Some(rate) = sample_rate {
        if rate < 1 || rate > 655_350 {
            return Err(Error::BadSampleRate);
        }
    }

    let bits_per_sample = match bits_per_sample_enc {
        0x0 => None, // Get from StreamInfo.
        0x1 => Some(8),
        0x2 => Some(12),
        0x4 => Some(16),
        0x5 => Some(20),
        0x6 => Some(24),
        _ => return Err(Error::BadSampleSize),
    };

    let channel_assignment = match channels_enc {
        0x0..=0x7 => ChannelAssignment::Independent(channels_enc + 1),
        0x8 => ChannelAssignment::LeftSide,
        0x9 => ChannelAssignment::RightSide,
        0xa => ChannelAssignment::MidSide,
        _ => return Err(Error::BadChannelAssignment),
    };

    // End of frame header, pop off the computed CRC-8.
    let crc8_computed = reader_crc8.monitor().crc();

    // The stored CRC-8 is excluded from its own hash, so read it from the inner stream.
    let crc8_expected = reader_crc8.into_inner().read_u8()?;

    if crc8_expected != crc8_computed {
        return Err(Error::BadHeaderCrc);
    }

    Ok(FrameHeader {
        block_sequence,
        block_num_samples,
        channel_assignment,
        bits_per_sample,
        sample_rate,
    })
}

/// Decodes a big-endian unsigned integer encoded via extended UTF8. In this context, extended UTF8
/// simply means the encoded UTF8 value may be up to 7 bytes for a maximum integer bit width of
/// 36 bits.
fn utf8_decode_be_u64<B: ReadBytes>(src: &mut B) -> Result<u64> {
    // Read the first byte of the UTF8 encoded integer.
    let mut state = u64::from(src.read_u8()?);

    // UTF8 prefixes 1s followed by a 0 to indicate the total number of bytes within the multi-byte
    // sequence. Using ranges, determine the mask that will overlap the data bits within the first
    // byte of the sequence. For values 0-127, return the value immediately. A first byte in the
    // continuation range (10xx_xxxx), or one claiming more than 7 total bytes, is invalid.
    let mask: u8 = match state {
        0x00..=0x7f => return Ok(state),
        0xc0..=0xdf => 0x1f,
        0xe0..=0xef => 0x0f,
        0xf0..=0xf7 => 0x07,
        0xf8..=0xfb => 0x03,
        0xfc..=0xfd => 0x01,
        0xfe => 0x00,
        _ => return Err(Error::BadVarInt),
    };

    // Obtain the data bits from the first byte by using the data mask.
    state &= u64::from(mask);

    // Read the remaining bytes within the UTF8 sequence. Since the mask 0s out the UTF8 prefix
    // of 1s which indicate the length of the multi-byte sequence in bytes, plus an additional 0
    // bit, the number of remaining bytes to read is the number of zeros in the mask minus 2.
    // To avoid extra computation, simply loop from 2 to the number of zeros.
    for _ in 2..mask.leading_zeros() {
        let byte = src.read_u8()?;

        // Every byte after the first must be prefixed with 0b10.
        if byte & 0xc0 != 0x80 {
            return Err(Error::BadVarInt);
        }

        // Append the six data bits of the continuation byte to the result.
        state = (state << 6) | u64::from(byte & 0x3f);
    }

    Ok(state)
}
