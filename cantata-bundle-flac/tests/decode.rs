// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end decoder tests over streams authored in the test.

use std::io::Cursor;

use cantata_bundle_flac::{BlockSequence, FlacDecoder};
use cantata_core::checksum::{Crc16Ansi, Crc8Ccitt, Md5};
use cantata_core::errors::Error;
use cantata_core::io::Monitor;

/// An MSB-first bit writer used to author FLAC streams.
struct BitSink {
    bytes: Vec<u8>,
    cur: u8,
    n_bits: u32,
}

impl BitSink {
    fn new() -> Self {
        BitSink { bytes: Vec::new(), cur: 0, n_bits: 0 }
    }

    fn push_bits(&mut self, value: u64, width: u32) {
        for i in (0..width).rev() {
            self.cur = (self.cur << 1) | ((value >> i) & 1) as u8;
            self.n_bits += 1;

            if self.n_bits == 8 {
                self.bytes.push(self.cur);
                self.cur = 0;
                self.n_bits = 0;
            }
        }
    }

    /// Pad with zero bits to the next byte boundary.
    fn align(&mut self) {
        while self.n_bits != 0 {
            self.push_bits(0, 1);
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        assert!(self.n_bits == 0, "unaligned bit sink");
        self.bytes
    }
}

/// Builds a stream information metadata block, header included.
#[allow(clippy::too_many_arguments)]
fn stream_info_block(
    block_len_min: u16,
    block_len_max: u16,
    sample_rate: u32,
    channels: u32,
    bits_per_sample: u32,
    n_samples: u64,
    md5: [u8; 16],
    is_last: bool,
) -> Vec<u8> {
    let mut sink = BitSink::new();

    sink.push_bits(u64::from(is_last), 1);
    sink.push_bits(0, 7); // Stream information block type.
    sink.push_bits(34, 24); // Body length.

    sink.push_bits(u64::from(block_len_min), 16);
    sink.push_bits(u64::from(block_len_max), 16);
    sink.push_bits(0, 24); // Minimum frame byte length unknown.
    sink.push_bits(0, 24); // Maximum frame byte length unknown.
    sink.push_bits(u64::from(sample_rate), 20);
    sink.push_bits(u64::from(channels - 1), 3);
    sink.push_bits(u64::from(bits_per_sample - 1), 5);
    sink.push_bits(n_samples, 36);

    let mut bytes = sink.into_bytes();
    bytes.extend_from_slice(&md5);
    bytes
}

/// Computes the FLAC stream hash of the given interleaved PCM.
fn md5_of(pcm: &[u8]) -> [u8; 16] {
    let mut md5 = Md5::default();
    md5.process_buf_bytes(pcm);
    md5.md5()
}

/// Appends the header CRC-8, the frame body, and the frame CRC-16 to the given header bytes,
/// forming a complete frame.
fn assemble_frame(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut frame = header.to_vec();

    let mut crc8 = Crc8Ccitt::new(0);
    crc8.process_buf_bytes(&frame);
    frame.push(crc8.crc());

    frame.extend_from_slice(body);

    let mut crc16 = Crc16Ansi::new(0);
    crc16.process_buf_bytes(&frame);
    frame.extend_from_slice(&crc16.crc().to_be_bytes());

    frame
}

/// Builds a fixed-blocking frame header up-to (excluding) the CRC-8: the synchronization word,
/// the descriptor, the frame number, and the 8-bit block size trailer.
fn frame_header(block_len: u32, channels_enc: u32, bits_per_sample_enc: u32, number: u8) -> Vec<u8> {
    assert!(block_len >= 1 && block_len <= 256);

    let desc0 = 0x60; // Block size code 6 (8-bit trailer), sample rate from stream info.
    let desc1 = ((channels_enc << 4) | (bits_per_sample_enc << 1)) as u8;

    vec![0xff, 0xf8, desc0, desc1, number, (block_len - 1) as u8]
}

fn flac_stream(stream_info: Vec<u8>, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut stream = b"fLaC".to_vec();
    stream.extend_from_slice(&stream_info);
    for frame in frames {
        stream.extend_from_slice(frame);
    }
    stream
}

#[test]
fn decode_constant_frame() {
    // One channel, 16 bits per sample, a single one-sample frame holding the constant 0x1234.
    let pcm = [0x34, 0x12];

    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8); // Subframe header: constant, no wasted bits.
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.stream_info().sample_rate, 44_100);
    assert_eq!(decoder.stream_info().channels, 1);
    assert_eq!(decoder.stream_info().bits_per_sample, 16);

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
    // The decoder stays at end of stream.
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_stereo_verbatim() {
    // Two independent channels of 16-bit verbatim samples: left = [1, -1], right = [2, -2].
    let pcm = [0x01, 0x00, 0x02, 0x00, 0xff, 0xff, 0xfe, 0xff];

    let info = stream_info_block(2, 2, 44_100, 2, 16, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x02, 8); // Subframe header: verbatim.
    body.push_bits(0x0001, 16);
    body.push_bits(0xffff, 16);
    body.push_bits(0x02, 8);
    body.push_bits(0x0002, 16);
    body.push_bits(0xfffe, 16);
    body.align();

    let frame = assemble_frame(&frame_header(2, 1, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_left_side() {
    // Left = [100, 100] and side = [30, -10] reconstruct right = [70, 110]. The side channel is
    // coded with one extra bit.
    let pcm = [0x64, 0x00, 0x46, 0x00, 0x64, 0x00, 0x6e, 0x00];

    let info = stream_info_block(2, 2, 44_100, 2, 16, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x02, 8);
    body.push_bits(100, 16);
    body.push_bits(100, 16);
    body.push_bits(0x02, 8);
    body.push_bits(30, 17);
    body.push_bits((-10i64 as u64) & 0x1_ffff, 17);
    body.align();

    let frame = assemble_frame(&frame_header(2, 0x8, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_mid_side() {
    // Mid = [5, 0] and side = [3, 2] reconstruct left = [7, 1] and right = [4, -1].
    let pcm = [0x07, 0x00, 0x04, 0x00, 0x01, 0x00, 0xff, 0xff];

    let info = stream_info_block(2, 2, 44_100, 2, 16, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x02, 8);
    body.push_bits(5, 16);
    body.push_bits(0, 16);
    body.push_bits(0x02, 8);
    body.push_bits(3, 17);
    body.push_bits(2, 17);
    body.align();

    let frame = assemble_frame(&frame_header(2, 0xa, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_right_side() {
    // Side = [30, -10] and right = [70, 110] reconstruct left = [100, 100].
    let pcm = [0x64, 0x00, 0x46, 0x00, 0x64, 0x00, 0x6e, 0x00];

    let info = stream_info_block(2, 2, 44_100, 2, 16, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x02, 8);
    body.push_bits(30, 17);
    body.push_bits((-10i64 as u64) & 0x1_ffff, 17);
    body.push_bits(0x02, 8);
    body.push_bits(70, 16);
    body.push_bits(110, 16);
    body.align();

    let frame = assemble_frame(&frame_header(2, 0x9, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_fixed_order_2() {
    // A second order fixed predictor with warm-up [10, 20] and zero residuals extrapolates to
    // [10, 20, 30, 40, 50].
    let pcm = [0x0a, 0x00, 0x14, 0x00, 0x1e, 0x00, 0x28, 0x00, 0x32, 0x00];

    let info = stream_info_block(5, 5, 44_100, 1, 16, 5, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0b0_001010_0, 8); // Subframe header: fixed, order 2.
    body.push_bits(10, 16);
    body.push_bits(20, 16);
    body.push_bits(0b00, 2); // Residual method 0.
    body.push_bits(0x0, 4); // Partition order 0.
    body.push_bits(0x0, 4); // Rice parameter 0.
    body.push_bits(0b111, 3); // Three zero residuals, unary coded.
    body.align();

    let frame = assemble_frame(&frame_header(5, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_fixed_order_0() {
    // A 0th order fixed predictor passes the residuals through unchanged: [5, -3].
    let pcm = [0x05, 0x00, 0xfd, 0xff];

    let info = stream_info_block(2, 2, 44_100, 1, 16, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0b0_001000_0, 8); // Subframe header: fixed, order 0.
    body.push_bits(0b00, 2); // Residual method 0.
    body.push_bits(0x0, 4); // Partition order 0.
    body.push_bits(0x1, 4); // Rice parameter 1.
    body.push_bits(0b000001_0, 7); // Folded value 10 (residual 5).
    body.push_bits(0b001_1, 4); // Folded value 5 (residual -3).
    body.align();

    let frame = assemble_frame(&frame_header(2, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_8_bit_frame() {
    // An 8-bit stream emits one byte per sample.
    let pcm = [0x80, 0x7f];

    let info = stream_info_block(2, 2, 8_000, 1, 8, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x02, 8); // Subframe header: verbatim.
    body.push_bits(0x80, 8); // -128.
    body.push_bits(0x7f, 8); // 127.
    body.align();

    let frame = assemble_frame(&frame_header(2, 0, 1, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_lpc_frame() {
    // A first order LPC subframe with coefficient 2 and shift 1 predicts the previous sample.
    // Warm-up [9] and zero residuals hold the signal at 9.
    let pcm = [0x09, 0x00, 0x09, 0x00, 0x09, 0x00];

    let info = stream_info_block(3, 3, 44_100, 1, 16, 3, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0b0_100000_0, 8); // Subframe header: lpc, order 1.
    body.push_bits(9, 16); // Warm-up.
    body.push_bits(0x2, 4); // Coefficient precision 3.
    body.push_bits(1, 5); // Shift 1.
    body.push_bits(0b010, 3); // Coefficient +2 at precision 3.
    body.push_bits(0b00, 2); // Residual method 0.
    body.push_bits(0x0, 4); // Partition order 0.
    body.push_bits(0x0, 4); // Rice parameter 0.
    body.push_bits(0b11, 2); // Two zero residuals, unary coded.
    body.align();

    let frame = assemble_frame(&frame_header(3, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_24_bit_frame() {
    // A 24-bit constant emits three little-endian bytes per sample.
    let pcm = [0x56, 0x34, 0x12];

    let info = stream_info_block(1, 1, 96_000, 1, 24, 1, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x123456, 24);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 6, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_multiple_frames() {
    // Two constant frames; the stream hash covers both in order.
    let pcm = [0x34, 0x12, 0xcc, 0xff];

    let info = stream_info_block(1, 1, 44_100, 1, 16, 2, md5_of(&pcm), true);

    let mut body0 = BitSink::new();
    body0.push_bits(0x00, 8);
    body0.push_bits(0x1234, 16);
    body0.align();

    let mut body1 = BitSink::new();
    body1.push_bits(0x00, 8);
    body1.push_bits(0xffcc, 16);
    body1.align();

    let frames = [
        assemble_frame(&frame_header(1, 0, 4, 0), &body0.into_bytes()),
        assemble_frame(&frame_header(1, 0, 4, 1), &body1.into_bytes()),
    ];

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &frames))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm[0..2]);
    assert_eq!(
        decoder.last_frame_header().unwrap().block_sequence,
        BlockSequence::ByFrame(0)
    );

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm[2..4]);
    assert_eq!(
        decoder.last_frame_header().unwrap().block_sequence,
        BlockSequence::ByFrame(1)
    );

    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn decode_with_vorbis_comment() {
    let pcm = [0x34, 0x12];

    // The stream information block is followed by a Vorbis comment block, which is marked last.
    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, md5_of(&pcm), false);

    let mut comment_body = Vec::new();
    comment_body.extend_from_slice(&4u32.to_le_bytes());
    comment_body.extend_from_slice(b"test");
    comment_body.extend_from_slice(&1u32.to_le_bytes());
    comment_body.extend_from_slice(&9u32.to_le_bytes());
    comment_body.extend_from_slice(b"TITLE=abc");

    let mut metadata = info;
    metadata.extend_from_slice(&[0x84, 0x00, 0x00, comment_body.len() as u8]);
    metadata.extend_from_slice(&comment_body);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(metadata, &[frame]))).unwrap();

    let comment = decoder.vorbis_comment().unwrap();
    assert_eq!(comment.vendor, "test");
    assert_eq!(comment.comments, vec!["TITLE=abc".to_string()]);

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn verify_md5_mismatch() {
    // A stated stream hash that does not match the decoded audio is an error at end of stream.
    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, [0xaa; 16], true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert!(decoder.next_frame().unwrap().is_some());
    assert!(matches!(decoder.next_frame(), Err(Error::BadMd5)));
}

#[test]
fn verify_unknown_md5_is_not_checked() {
    // An all-zero stream hash means unknown, and skips verification.
    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, [0x00; 16], true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert!(decoder.next_frame().unwrap().is_some());
    assert!(decoder.next_frame().unwrap().is_none());
}

#[test]
fn verify_open_failures() {
    // A wrong stream marker.
    let result = FlacDecoder::try_new(Cursor::new(b"OggS".to_vec()));
    assert!(matches!(result, Err(Error::BadMagic)));

    // Truncation after the marker but before a complete stream information block.
    let mut stream = b"fLaC".to_vec();
    stream.extend_from_slice(&[0x80, 0x00, 0x00, 0x22, 0x00, 0x04, 0x00, 0x04]);

    let result = FlacDecoder::try_new(Cursor::new(stream));
    assert!(matches!(result, Err(Error::UnexpectedEnd)));

    // An empty source.
    let result = FlacDecoder::try_new(Cursor::new(Vec::new()));
    assert!(matches!(result, Err(Error::UnexpectedEnd)));
}

#[test]
fn verify_frame_error_detection() {
    let pcm = [0x34, 0x12];
    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 4, 0), &body.into_bytes());

    // Garbage where a frame must start.
    let mut stream = flac_stream(info.clone(), &[frame.clone()]);
    stream[4 + info.len()] = 0x00;

    let mut decoder = FlacDecoder::try_new(Cursor::new(stream)).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::LostSync)));

    // A corrupted header CRC-8. The header spans 6 bytes, then its CRC.
    let mut stream = flac_stream(info.clone(), &[frame.clone()]);
    stream[4 + info.len() + 6] ^= 0xff;

    let mut decoder = FlacDecoder::try_new(Cursor::new(stream)).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::BadHeaderCrc)));

    // A corrupted frame CRC-16.
    let mut stream = flac_stream(info.clone(), &[frame.clone()]);
    let last = stream.len() - 1;
    stream[last] ^= 0xff;

    let mut decoder = FlacDecoder::try_new(Cursor::new(stream)).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::BadFrameCrc)));

    // Truncation in the middle of a frame.
    let mut stream = flac_stream(info, &[frame]);
    stream.truncate(stream.len() - 3);

    let mut decoder = FlacDecoder::try_new(Cursor::new(stream)).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::UnexpectedEnd)));
}

#[test]
fn verify_block_size_bounds() {
    // The stream information bounds the block size to exactly 1 sample, but the frame codes 2.
    let info = stream_info_block(1, 1, 44_100, 1, 16, 2, [0x00; 16], true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(2, 0, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::BadBlockSize)));
}

#[test]
fn verify_channel_count_must_match() {
    // The stream information declares mono, but the frame codes two independent channels.
    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, [0x00; 16], true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x1234, 16);
    body.align();

    let frame = assemble_frame(&frame_header(1, 1, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::BadChannelAssignment)));
}

#[test]
fn verify_sample_size_must_match() {
    // The stream information declares 16 bits per sample, but the frame codes 8.
    let info = stream_info_block(1, 1, 44_100, 1, 16, 1, [0x00; 16], true);

    let mut body = BitSink::new();
    body.push_bits(0x00, 8);
    body.push_bits(0x12, 8);
    body.align();

    let frame = assemble_frame(&frame_header(1, 0, 1, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();
    assert!(matches!(decoder.next_frame(), Err(Error::BadSampleSize)));
}

#[test]
fn verify_nonzero_frame_padding_is_tolerated() {
    // The padding bits between the last subframe and the frame CRC-16 should be zero, but
    // nonzero padding must not be rejected. A left/side frame body spans 82 bits, leaving 6
    // padding bits, which are set to ones here.
    let pcm = [0x64, 0x00, 0x46, 0x00, 0x64, 0x00, 0x6e, 0x00];

    let info = stream_info_block(2, 2, 44_100, 2, 16, 2, md5_of(&pcm), true);

    let mut body = BitSink::new();
    body.push_bits(0x02, 8);
    body.push_bits(100, 16);
    body.push_bits(100, 16);
    body.push_bits(0x02, 8);
    body.push_bits(30, 17);
    body.push_bits((-10i64 as u64) & 0x1_ffff, 17);
    body.push_bits(0b11_1111, 6);

    let frame = assemble_frame(&frame_header(2, 0x8, 4, 0), &body.into_bytes());

    let mut decoder = FlacDecoder::try_new(Cursor::new(flac_stream(info, &[frame]))).unwrap();

    assert_eq!(decoder.next_frame().unwrap().unwrap(), &pcm);
    assert!(decoder.next_frame().unwrap().is_none());
}
