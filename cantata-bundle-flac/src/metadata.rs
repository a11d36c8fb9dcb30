// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::errors::{Error, Result};
use cantata_core::io::{BitStreamLtr, ReadBitsLtr, ReadBytes};

use log::info;

/// The FLAC start of stream marker: "fLaC" in ASCII.
const FLAC_STREAM_MARKER: [u8; 4] = *b"fLaC";

#[derive(Debug, PartialEq, Eq)]
enum MetadataBlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    Cuesheet,
    Picture,
    Invalid,
    Unknown(u8),
}

struct MetadataBlockHeader {
    is_last: bool,
    block_type: MetadataBlockType,
    block_len: u32,
}

impl MetadataBlockHeader {
    /// Read a metadata block header.
    fn read<B: ReadBytes>(reader: &mut B) -> Result<MetadataBlockHeader> {
        let header_enc = reader.read_u8()?;

        // First bit of the header indicates if this is the last metadata block.
        let is_last = (header_enc & 0x80) == 0x80;

        // The remaining 7 bits of the header indicate the block type.
        let block_type_id = header_enc & 0x7f;

        let block_type = match block_type_id {
            0 => MetadataBlockType::StreamInfo,
            1 => MetadataBlockType::Padding,
            2 => MetadataBlockType::Application,
            3 => MetadataBlockType::SeekTable,
            4 => MetadataBlockType::VorbisComment,
            5 => MetadataBlockType::Cuesheet,
            6 => MetadataBlockType::Picture,
            127 => MetadataBlockType::Invalid,
            _ => MetadataBlockType::Unknown(block_type_id),
        };

        let block_len = reader.read_be_u24()?;

        Ok(MetadataBlockHeader { is_last, block_type, block_len })
    }
}

/// `StreamInfo` is the mandatory stream information metadata block.
///
/// Once parsed, the stream information is immutable for the remainder of the stream, and every
/// decoded frame is validated against it.
#[derive(Debug)]
pub struct StreamInfo {
    /// The minimum and maximum number of decoded samples per block of audio.
    pub block_len_min: u16,
    pub block_len_max: u16,
    /// The minimum and maximum byte length of an encoded block (frame) of audio. Either value may
    /// be 0 if unknown.
    pub frame_byte_len_min: u32,
    pub frame_byte_len_max: u32,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of channels, 1 through 8.
    pub channels: u32,
    /// The number of bits per sample of the stream.
    pub bits_per_sample: u32,
    /// The total number of inter-channel samples in the stream, if known.
    pub n_samples: Option<u64>,
    /// The MD5 hash of the decoded interleaved audio, if stated.
    pub md5: Option<[u8; 16]>,
}

impl StreamInfo {
    /// The fixed byte length of a stream information block body.
    const STREAM_INFO_BLOCK_SIZE: u32 = 34;

    /// Read a stream information block body.
    fn read<B: ReadBytes>(reader: &mut B) -> Result<StreamInfo> {
        // Read the block length bounds in number of samples.
        let block_len_min = reader.read_be_u16()?;
        let block_len_max = reader.read_be_u16()?;

        if block_len_max < block_len_min {
            return Err(Error::BadMetadataBlock);
        }

        // Read the frame byte length bounds. A value of 0 for either indicates the respective
        // length is unknown.
        let frame_byte_len_min = reader.read_be_u24()?;
        let frame_byte_len_max = reader.read_be_u24()?;

        if frame_byte_len_min > 0 && frame_byte_len_max > 0 && frame_byte_len_max < frame_byte_len_min
        {
            return Err(Error::BadMetadataBlock);
        }

        let mut bs = BitStreamLtr::new(reader);

        let [sample_rate, channels_enc, bits_per_sample_enc] = bs.read_fields([20, 3, 5])?;

        // Valid sample rates are [1, 655350] Hz.
        if sample_rate < 1 || sample_rate > 655_350 {
            return Err(Error::BadMetadataBlock);
        }

        // The coded field stores the channel count minus 1.
        let channels = channels_enc + 1;

        // The coded field stores the bits per sample minus 1. Valid widths are 4 through 32, of
        // which this decoder supports the whole-byte widths up to 24 bits.
        let bits_per_sample = bits_per_sample_enc + 1;

        if bits_per_sample < 4 {
            return Err(Error::BadMetadataBlock);
        }

        if bits_per_sample != 8 && bits_per_sample != 16 && bits_per_sample != 24 {
            return Err(Error::UnsupportedBitsPerSample);
        }

        // The total number of inter-channel samples. A value of 0 indicates a stream of unknown
        // length.
        let n_samples = match bs.read_bits_leq64(36)? {
            0 => None,
            samples => Some(samples),
        };

        // Read the decoded audio MD5. An all-zero hash means no checksum is present.
        let mut md5 = [0; 16];
        reader.read_buf_exact(&mut md5)?;

        Ok(StreamInfo {
            block_len_min,
            block_len_max,
            frame_byte_len_min,
            frame_byte_len_max,
            sample_rate,
            channels,
            bits_per_sample,
            n_samples,
            md5: if md5 != [0; 16] { Some(md5) } else { None },
        })
    }
}

/// `VorbisComment` is the Vorbis COMMENT metadata block: a vendor string and an ordered list of
/// comment strings, built once during the metadata parse and never mutated.
#[derive(Debug)]
pub struct VorbisComment {
    /// The encoder vendor string.
    pub vendor: String,
    /// The comments, in stream order. Each is conventionally a `KEY=value` pair.
    pub comments: Vec<String>,
}

impl VorbisComment {
    /// Read a Vorbis comment block body.
    fn read<B: ReadBytes>(reader: &mut B) -> Result<VorbisComment> {
        // Read the vendor string length in bytes, then the vendor string.
        let vendor_len = reader.read_u32()?;

        let vendor_buf = reader.read_boxed_slice_exact(vendor_len as usize)?;
        let vendor = String::from_utf8_lossy(&vendor_buf).into_owned();

        // Read the number of comments.
        let n_comments = reader.read_u32()? as usize;

        let mut comments = Vec::with_capacity(n_comments.min(1024));

        for _ in 0..n_comments {
            // Read the comment string length in bytes, then the comment string.
            let comment_len = reader.read_u32()?;

            let comment_buf = reader.read_boxed_slice_exact(comment_len as usize)?;
            comments.push(String::from_utf8_lossy(&comment_buf).into_owned());
        }

        Ok(VorbisComment { vendor, comments })
    }
}

/// Read the FLAC start of stream marker.
pub(crate) fn read_stream_marker<B: ReadBytes>(reader: &mut B) -> Result<()> {
    if reader.read_quad_bytes()? != FLAC_STREAM_MARKER {
        return Err(Error::BadMagic);
    }
    Ok(())
}

/// Read the metadata block chain following the stream marker.
///
/// The stream information block is mandatory and unique. A Vorbis comment block is retained if
/// present. All other block types are skipped over by their stated length.
pub(crate) fn read_metadata<B: ReadBytes>(
    reader: &mut B,
) -> Result<(StreamInfo, Option<VorbisComment>)> {
    let mut stream_info = None;
    let mut vorbis_comment = None;

    loop {
        let header = MetadataBlockHeader::read(reader)?;

        let block_start = reader.pos();

        match header.block_type {
            MetadataBlockType::StreamInfo => {
                // Only a single stream information block is allowed, and its body has a fixed
                // length.
                if stream_info.is_some() || header.block_len != StreamInfo::STREAM_INFO_BLOCK_SIZE
                {
                    return Err(Error::BadMetadataBlock);
                }

                stream_info = Some(StreamInfo::read(reader)?);
            }
            MetadataBlockType::VorbisComment => {
                vorbis_comment = Some(VorbisComment::read(reader)?);
            }
            MetadataBlockType::Invalid => {
                return Err(Error::BadMetadataBlock);
            }
            MetadataBlockType::Unknown(id) => {
                reader.ignore_bytes(u64::from(header.block_len))?;
                info!("ignoring {} bytes of block with id={}", header.block_len, id);
            }
            // All other recognized blocks carry no information this decoder uses. Skip them.
            _ => {
                reader.ignore_bytes(u64::from(header.block_len))?;
            }
        }

        // A block body must consume exactly its stated length. Overruns are an error, while any
        // unread trailing bytes are discarded.
        let consumed = reader.pos() - block_start;

        if consumed > u64::from(header.block_len) {
            return Err(Error::BadMetadataBlock);
        }

        let unread = u64::from(header.block_len) - consumed;

        if unread > 0 {
            info!("under read block by {} bytes", unread);
            reader.ignore_bytes(unread)?;
        }

        // Exit when the last block is read.
        if header.is_last {
            break;
        }
    }

    match stream_info {
        Some(info) => Ok((info, vorbis_comment)),
        None => Err(Error::MissingStreamInfo),
    }
}
