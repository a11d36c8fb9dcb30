// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::Read;

use cantata_core::checksum::Crc16Ansi;
use cantata_core::errors::{Error, Result};
use cantata_core::io::{BitStreamLtr, MediaSourceStream, Monitor, MonitorStream};
use cantata_core::io::{ReadBitsLtr, ReadBytes};
use cantata_core::util::bits::sign_extend_leq32_to_i32;

use log::{debug, log_enabled};

use crate::frame::{read_frame_header, ChannelAssignment, FrameHeader};
use crate::metadata::{read_metadata, read_stream_marker, StreamInfo, VorbisComment};
use crate::validate::{md5_hex, Validator};

fn decorrelate_left_side(left: &[i32], side: &mut [i32]) {
    for (s, l) in side.iter_mut().zip(left) {
        *s = *l - *s;
    }
}

fn decorrelate_mid_side(mid: &mut [i32], side: &mut [i32]) {
    for (m, s) in mid.iter_mut().zip(side) {
        // Mid (M) is stored as (L + R) >> 1 and Side (S) as L - R. Since L + R and L - R always
        // share parity, the bit shifted off the sum is the parity of S. Restoring it gives the
        // exact L + R, from which both channels follow:
        //      - L = ((L + R) + (L - R)) / 2
        //      - R = ((L + R) - (L - R)) / 2
        let sum = (*m << 1) | (*s & 1);
        let diff = *s;
        *m = (sum + diff) >> 1;
        *s = (sum - diff) >> 1;
    }
}

fn decorrelate_right_side(right: &[i32], side: &mut [i32]) {
    for (s, r) in side.iter_mut().zip(right) {
        *s += *r;
    }
}

/// Splits the first two channel buffers out of the channel set.
fn stereo_pair(channels: &mut [Vec<i32>]) -> (&mut [i32], &mut [i32]) {
    let (first, rest) = channels.split_at_mut(1);
    (&mut first[0], &mut rest[0])
}

/// Free Lossless Audio Codec (FLAC) decoder.
///
/// `FlacDecoder` pulls frames off a sequential byte source. Construction consumes the stream
/// marker and the metadata block chain; thereafter, each call to [`FlacDecoder::next_frame`]
/// decodes exactly one frame and yields its interleaved little-endian PCM, or `None` once the
/// source is cleanly exhausted at a frame boundary. The decoder maintains a rolling MD5 over all
/// emitted PCM and verifies it against the stream information at the end of the stream.
///
/// A decoder that has returned an error must be considered unusable: the byte source is left at
/// an indeterminate offset.
pub struct FlacDecoder<R: Read> {
    reader: MediaSourceStream<R>,
    stream_info: StreamInfo,
    vorbis_comment: Option<VorbisComment>,
    /// Per-channel sample buffers, recycled between frames.
    channels: Vec<Vec<i32>>,
    /// The interleaved PCM of the last decoded frame.
    pcm: Vec<u8>,
    /// The header of the last decoded frame.
    last_header: Option<FrameHeader>,
    validator: Validator,
    finished: bool,
}

impl<R: Read> FlacDecoder<R> {
    /// Attempts to instantiate a `FlacDecoder` from the given byte source by reading the stream
    /// marker and all metadata blocks.
    pub fn try_new(source: R) -> Result<FlacDecoder<R>> {
        let mut reader = MediaSourceStream::new(source);

        read_stream_marker(&mut reader)?;

        let (stream_info, vorbis_comment) = read_metadata(&mut reader)?;

        let n_channels = stream_info.channels as usize;

        Ok(FlacDecoder {
            reader,
            stream_info,
            vorbis_comment,
            channels: vec![Vec::new(); n_channels],
            pcm: Vec::new(),
            last_header: None,
            validator: Default::default(),
            finished: false,
        })
    }

    /// Gets the stream information.
    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    /// Gets the Vorbis comment block, if the stream carried one.
    pub fn vorbis_comment(&self) -> Option<&VorbisComment> {
        self.vorbis_comment.as_ref()
    }

    /// Gets the header of the most recently decoded frame, for callers that track the frame or
    /// sample sequence.
    pub fn last_frame_header(&self) -> Option<&FrameHeader> {
        self.last_header.as_ref()
    }

    /// Decodes the next frame and returns its interleaved little-endian PCM, or `None` once the
    /// byte source is cleanly exhausted at a frame boundary.
    ///
    /// On the first clean end of stream, the rolling MD5 of all emitted PCM is compared against
    /// the stream information. A stated hash that does not match is reported as
    /// [`Error::BadMd5`]; an all-zero (unknown) stated hash skips the comparison.
    pub fn next_frame(&mut self) -> Result<Option<&[u8]>> {
        if self.finished {
            return Ok(None);
        }

        if self.decode_frame()? {
            Ok(Some(&self.pcm))
        }
        else {
            Ok(None)
        }
    }

    fn decode_frame(&mut self) -> Result<bool> {
        // Only an end of input on the very first byte of a frame is a clean end of stream. Any
        // later end of input is a truncation.
        let sync0 = match self.reader.read_u8() {
            Ok(byte) => byte,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                self.finish()?;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        if sync0 != 0xff {
            return Err(Error::LostSync);
        }

        // The entire frame, synchronization code included, is checksummed with a CRC-16. Wrap the
        // source in a CRC-16 error detection stream for the duration of the frame.
        let mut crc16 = Crc16Ansi::new(0);
        crc16.process_byte(sync0);

        let mut reader_crc16 = MonitorStream::new(&mut self.reader, crc16);

        let sync = u16::from_be_bytes([sync0, reader_crc16.read_u8()?]);

        let header = read_frame_header(&mut reader_crc16, sync)?;

        // The frame must agree with the stream information: the sample size may restate the
        // stream-wide value but not contradict it, the channel assignment must code the
        // stream-wide channel count, and the block size must honour stated bounds.
        let bits_per_sample = match header.bits_per_sample {
            Some(bps) if bps != self.stream_info.bits_per_sample => {
                return Err(Error::BadSampleSize);
            }
            _ => self.stream_info.bits_per_sample,
        };

        if header.channel_assignment.num_channels() != self.stream_info.channels {
            return Err(Error::BadChannelAssignment);
        }

        let block_len_bounded =
            self.stream_info.block_len_min > 0 && self.stream_info.block_len_max > 0;

        if block_len_bounded
            && (header.block_num_samples < u32::from(self.stream_info.block_len_min)
                || header.block_num_samples > u32::from(self.stream_info.block_len_max))
        {
            return Err(Error::BadBlockSize);
        }

        let block_len = header.block_num_samples as usize;

        for chan in self.channels.iter_mut() {
            chan.resize(block_len, 0);
        }

        // Sub-frames have no byte-aligned content, so decode them through a bit reader. The bit
        // reader fetches bytes on demand, keeping the CRC-16 accumulator byte-exact.
        {
            let mut bs = BitStreamLtr::new(&mut reader_crc16);

            // Read each subframe based on the channel assignment. For the LeftSide, MidSide, and
            // RightSide channel configurations, the Side (difference) channel requires one extra
            // bit per sample.
            match header.channel_assignment {
                ChannelAssignment::Independent(_) => {
                    for chan in self.channels.iter_mut() {
                        read_subframe(&mut bs, bits_per_sample, chan)?;
                    }
                }
                ChannelAssignment::LeftSide => {
                    let (left, side) = stereo_pair(&mut self.channels);

                    read_subframe(&mut bs, bits_per_sample, left)?;
                    read_subframe(&mut bs, bits_per_sample + 1, side)?;

                    decorrelate_left_side(left, side);
                }
                ChannelAssignment::MidSide => {
                    let (mid, side) = stereo_pair(&mut self.channels);

                    read_subframe(&mut bs, bits_per_sample, mid)?;
                    read_subframe(&mut bs, bits_per_sample + 1, side)?;

                    decorrelate_mid_side(mid, side);
                }
                ChannelAssignment::RightSide => {
                    let (side, right) = stereo_pair(&mut self.channels);

                    read_subframe(&mut bs, bits_per_sample + 1, side)?;
                    read_subframe(&mut bs, bits_per_sample, right)?;

                    decorrelate_right_side(right, side);
                }
            }

            // The frame trailer is padded with up-to 7 bits to the next byte boundary. The
            // padding should be zero, but nonzero padding is tolerated.
            bs.realign();
        }

        // End of frame, pop off the computed CRC-16.
        let crc16_computed = reader_crc16.monitor().crc();

        // The stored CRC-16 is excluded from its own hash, so read it from the inner stream.
        let crc16_expected = reader_crc16.into_inner().read_be_u16()?;

        if crc16_expected != crc16_computed {
            return Err(Error::BadFrameCrc);
        }

        interleave(&self.channels, bits_per_sample, &mut self.pcm);

        self.validator.update(&self.pcm);

        self.last_header = Some(header);

        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;

        // Compare the rolling MD5 against the stream information. A stream that does not state a
        // hash is not verifiable.
        if let Some(expected) = self.stream_info.md5 {
            let decoded = self.validator.md5();

            if log_enabled!(log::Level::Debug) {
                debug!("verification: expected md5 = {}", md5_hex(&expected));
                debug!("verification: decoded md5  = {}", md5_hex(&decoded));
            }

            if decoded != expected {
                return Err(Error::BadMd5);
            }
        }

        Ok(())
    }
}

/// Interleaves the channel buffers by sample index then channel into little-endian bytes of the
/// given sample width.
fn interleave(channels: &[Vec<i32>], bits_per_sample: u32, out: &mut Vec<u8>) {
    let bytes_per_sample = bits_per_sample as usize / 8;
    let block_len = channels[0].len();

    out.clear();
    out.reserve(block_len * channels.len() * bytes_per_sample);

    for i in 0..block_len {
        for chan in channels {
            out.extend_from_slice(&chan[i].to_le_bytes()[..bytes_per_sample]);
        }
    }
}

// Subframe decoding.

#[derive(Debug)]
enum SubFrameType {
    Constant,
    Verbatim,
    FixedLinear(u32),
    Linear(u32),
}

fn read_subframe<B: ReadBitsLtr>(bs: &mut B, frame_bps: u32, buf: &mut [i32]) -> Result<()> {
    // The first sub-frame header bit is padding. Its value is ignored.
    bs.read_bit()?;

    // The next 6 bits designate the sub-frame type.
    let subframe_type_enc = bs.read_bits_leq32(6)?;

    let subframe_type = match subframe_type_enc {
        0x00 => SubFrameType::Constant,
        0x01 => SubFrameType::Verbatim,
        0x08..=0x0f => {
            let order = subframe_type_enc & 0x07;
            // The fixed predictor only supports orders between 0 and 4.
            if order > 4 {
                return Err(Error::BadSubframeType);
            }
            SubFrameType::FixedLinear(order)
        }
        0x20..=0x3f => SubFrameType::Linear((subframe_type_enc & 0x1f) + 1),
        _ => return Err(Error::BadSubframeType),
    };

    // The next bit flags wasted (dropped in the sub-block) bits per sample. If set, unary decode
    // the wasted bit count.
    let wasted_bps = if bs.read_bit()? { bs.read_unary_zeros()? + 1 } else { 0 };

    if wasted_bps >= frame_bps {
        return Err(Error::BadSubframeType);
    }

    // The encoder truncates `wasted_bps` low-order zero bits off every sample in the sub-block.
    // Decode at the narrowed width, then shift the samples back up.
    let bps = frame_bps - wasted_bps;

    match subframe_type {
        SubFrameType::Constant => decode_constant(bs, bps, buf)?,
        SubFrameType::Verbatim => decode_verbatim(bs, bps, buf)?,
        SubFrameType::FixedLinear(order) => decode_fixed_linear(bs, bps, order, buf)?,
        SubFrameType::Linear(order) => decode_linear(bs, bps, order, buf)?,
    }

    samples_shl(wasted_bps, buf);

    Ok(())
}

#[inline(always)]
fn samples_shl(shift: u32, buf: &mut [i32]) {
    if shift > 0 {
        for sample in buf.iter_mut() {
            *sample = sample.wrapping_shl(shift);
        }
    }
}

fn decode_constant<B: ReadBitsLtr>(bs: &mut B, bps: u32, buf: &mut [i32]) -> Result<()> {
    let const_sample = sign_extend_leq32_to_i32(bs.read_bits_leq32(bps)?, bps);

    for sample in buf.iter_mut() {
        *sample = const_sample;
    }

    Ok(())
}

fn decode_verbatim<B: ReadBitsLtr>(bs: &mut B, bps: u32, buf: &mut [i32]) -> Result<()> {
    for sample in buf.iter_mut() {
        *sample = sign_extend_leq32_to_i32(bs.read_bits_leq32(bps)?, bps);
    }

    Ok(())
}

fn decode_fixed_linear<B: ReadBitsLtr>(
    bs: &mut B,
    bps: u32,
    order: u32,
    buf: &mut [i32],
) -> Result<()> {
    if order as usize > buf.len() {
        return Err(Error::BadResidualCoding);
    }

    // The first `order` samples are encoded verbatim to warm-up the predictor.
    decode_verbatim(bs, bps, &mut buf[..order as usize])?;

    // Decode the residuals for the predicted samples.
    decode_residual(bs, order, buf)?;

    fixed_predict(order, buf);

    Ok(())
}

fn decode_linear<B: ReadBitsLtr>(bs: &mut B, bps: u32, order: u32, buf: &mut [i32]) -> Result<()> {
    // The order of the linear predictor is between 1 and 32.
    debug_assert!(order > 0 && order <= 32);

    if order as usize > buf.len() {
        return Err(Error::BadResidualCoding);
    }

    // The first `order` samples are encoded verbatim to warm-up the predictor.
    decode_verbatim(bs, bps, &mut buf[..order as usize])?;

    // Quantized linear predictor (QLP) coefficient precision in bits. The all-ones value is
    // reserved.
    let qlp_precision_enc = bs.read_bits_leq32(4)?;

    if qlp_precision_enc == 0xf {
        return Err(Error::BadLpcPrecision);
    }

    let qlp_precision = qlp_precision_enc + 1;

    // QLP coefficient shift [-16, 15]. The format technically permits a negative shift, but no
    // known encoder produces one.
    let qlp_coeff_shift = sign_extend_leq32_to_i32(bs.read_bits_leq32(5)?, 5);

    if qlp_coeff_shift < 0 {
        return Err(Error::UnsupportedLpcShift);
    }

    // Read the coefficients into the tail of a statically sized array, in reverse, so that the
    // predictor can zip a coefficient window directly against a sample window.
    let mut qlp_coeffs = [0i32; 32];

    for coeff in qlp_coeffs[32 - order as usize..].iter_mut().rev() {
        *coeff = sign_extend_leq32_to_i32(bs.read_bits_leq32(qlp_precision)?, qlp_precision);
    }

    decode_residual(bs, order, buf)?;

    lpc_predict(order as usize, &qlp_coeffs, qlp_coeff_shift as u32, buf);

    Ok(())
}

fn decode_residual<B: ReadBitsLtr>(
    bs: &mut B,
    n_prelude_samples: u32,
    buf: &mut [i32],
) -> Result<()> {
    let method_enc = bs.read_bits_leq32(2)?;

    // Two residual coding methods are defined: Rice and Rice2. The only difference between the
    // two is the bit width of the Rice parameter.
    let param_bit_width = match method_enc {
        0x0 => 4,
        0x1 => 5,
        _ => return Err(Error::BadResidualCoding),
    };

    // Read the partition order. The number of partitions is 2^order.
    let order = bs.read_bits_leq32(4)?;

    let n_partitions = 1usize << order;

    // In general, all partitions cover the same number of samples such that they sum to the
    // block length. Since the warm-up samples are stored verbatim, the first partition covers
    // `n_prelude_samples` fewer samples.
    let n_partition_samples = buf.len() >> order;

    if n_prelude_samples as usize > n_partition_samples {
        return Err(Error::BadResidualCoding);
    }

    // The partitions must exactly tile the block.
    if n_partitions * n_partition_samples != buf.len() {
        return Err(Error::BadResidualCoding);
    }

    // Decode the first partition, which may cover less than n_partition_samples samples.
    decode_rice_partition(
        bs,
        param_bit_width,
        &mut buf[n_prelude_samples as usize..n_partition_samples],
    )?;

    // Decode the remaining partitions.
    for chunk in buf[n_partition_samples..].chunks_mut(n_partition_samples) {
        decode_rice_partition(bs, param_bit_width, chunk)?;
    }

    Ok(())
}

fn decode_rice_partition<B: ReadBitsLtr>(
    bs: &mut B,
    param_bit_width: u32,
    buf: &mut [i32],
) -> Result<()> {
    // Read the encoding parameter, generally the Rice parameter.
    let rice_param = bs.read_bits_leq32(param_bit_width)?;

    // An all-ones parameter (0xf for a 4-bit parameter, 0x1f for a 5-bit parameter) escapes to
    // binary coded residuals, which this decoder does not support.
    if rice_param == (1 << param_bit_width) - 1 {
        return Err(Error::UnsupportedEscape);
    }

    // Each residual is a unary coded quotient followed by rice_param remainder bits.
    for sample in buf.iter_mut() {
        let q = bs.read_unary_zeros()?;
        let r = bs.read_bits_leq32(rice_param)?;
        *sample = rice_signed_to_i32((q << rice_param) | r);
    }

    Ok(())
}

/// Unfolds an unsigned rice coded value into a signed residual.
#[inline(always)]
fn rice_signed_to_i32(word: u32) -> i32 {
    // Input  => 0  1  2  3  4  5 ...
    // Output => 0 -1  1 -2  2 -3 ...
    //
    // Half the input, then XOR with the sign word built from the folded-in sign bit: all zeros
    // for even inputs (a no-op), all ones for odd inputs (-n - 1).
    ((word >> 1) as i32) ^ -((word & 0x1) as i32)
}

fn fixed_predict(order: u32, buf: &mut [i32]) {
    debug_assert!(order <= 4);

    // The fixed predictor is a hard-coded linear predictor with polynomial coefficients up-to
    // order 4. All coefficient terms are summed in 64-bit before the single store; the store
    // narrows with two's complement wrap.
    match order {
        // A 0th order predictor always predicts 0, and therefore adds nothing to any sample.
        0 => (),
        // A 1st order predictor repeats the previous sample: s(i) = s(i-1).
        1 => {
            for i in 1..buf.len() {
                buf[i] = buf[i].wrapping_add(buf[i - 1]);
            }
        }
        // A 2nd order predictor uses the polynomial: s(i) = 2*s(i-1) - s(i-2).
        2 => {
            for i in 2..buf.len() {
                let predicted = 2 * i64::from(buf[i - 1]) - i64::from(buf[i - 2]);
                buf[i] = buf[i].wrapping_add(predicted as i32);
            }
        }
        // A 3rd order predictor uses the polynomial: s(i) = 3*s(i-1) - 3*s(i-2) + s(i-3).
        3 => {
            for i in 3..buf.len() {
                let predicted = 3 * i64::from(buf[i - 1]) - 3 * i64::from(buf[i - 2])
                    + i64::from(buf[i - 3]);
                buf[i] = buf[i].wrapping_add(predicted as i32);
            }
        }
        // A 4th order predictor uses the polynomial:
        // s(i) = 4*s(i-1) - 6*s(i-2) + 4*s(i-3) - s(i-4).
        4 => {
            for i in 4..buf.len() {
                let predicted = 4 * i64::from(buf[i - 1]) - 6 * i64::from(buf[i - 2])
                    + 4 * i64::from(buf[i - 3])
                    - i64::from(buf[i - 4]);
                buf[i] = buf[i].wrapping_add(predicted as i32);
            }
        }
        _ => unreachable!(),
    }
}

/// Generalized linear predictive coding (LPC) decoder accepting up to 32 coefficients. The exact
/// number of coefficients is specified by `order`. Coefficients must be stored in reverse order
/// in `coeffs` with the first coefficient at index 31; indices below 32 - `order` must be 0. The
/// first `order` samples in `buf` are warm-up samples.
fn lpc_predict(order: usize, coeffs: &[i32; 32], coeff_shift: u32, buf: &mut [i32]) {
    debug_assert!(order <= buf.len());

    // Until 32 samples exist, predict with a window of exactly `order` samples.
    let n_prefill = cmp::min(32, buf.len()) - order;

    for i in order..order + n_prefill {
        let predicted = coeffs[32 - order..]
            .iter()
            .zip(&buf[i - order..i])
            .map(|(&coeff, &sample)| i64::from(coeff) * i64::from(sample))
            .sum::<i64>();

        buf[i] = buf[i].wrapping_add((predicted >> coeff_shift) as i32);
    }

    // From then on the full 32-wide window may be used; the zero coefficients at the front
    // contribute nothing.
    for i in 32..buf.len() {
        let predicted = coeffs
            .iter()
            .zip(&buf[i - 32..i])
            .map(|(&coeff, &sample)| i64::from(coeff) * i64::from(sample))
            .sum::<i64>();

        buf[i] = buf[i].wrapping_add((predicted >> coeff_shift) as i32);
    }
}
