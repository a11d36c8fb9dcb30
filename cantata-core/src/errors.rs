// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Cantata.
///
/// Every malformation the decoder can detect has its own variant so that callers and tests can
/// match on the exact failure kind rather than parse a message.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred while reading the stream.
    IoError(io::Error),
    /// The stream ended in the middle of a syntactic element.
    UnexpectedEnd,
    /// The stream does not begin with the `fLaC` stream marker.
    BadMagic,
    /// The metadata block chain ended without a stream information block.
    MissingStreamInfo,
    /// A metadata block is structurally invalid.
    BadMetadataBlock,
    /// The stream's bits per sample is not one of the supported widths.
    UnsupportedBitsPerSample,
    /// The frame synchronization code was not found where a frame must start.
    LostSync,
    /// A reserved frame header bit is set.
    BadFrameHeader,
    /// The frame channel assignment is set to a reserved value.
    BadChannelAssignment,
    /// The frame sample size is set to a reserved value or contradicts the stream information.
    BadSampleSize,
    /// The frame block size is set to a reserved value or violates the stream information bounds.
    BadBlockSize,
    /// The frame sample rate is set to a reserved value or is out of bounds.
    BadSampleRate,
    /// A frame or sample number is not a valid extended UTF8 coded integer.
    BadVarInt,
    /// The computed frame header CRC-8 does not match the stored CRC-8.
    BadHeaderCrc,
    /// The computed frame CRC-16 does not match the stored CRC-16.
    BadFrameCrc,
    /// A subframe type is set to a reserved value.
    BadSubframeType,
    /// An LPC subframe's coefficient precision is set to the reserved value.
    BadLpcPrecision,
    /// An LPC subframe uses a negative quantization shift.
    UnsupportedLpcShift,
    /// A residual coding method is set to a reserved value or its partitioning is inconsistent.
    BadResidualCoding,
    /// A residual partition uses the unencoded escape, which this decoder does not support.
    UnsupportedEscape,
    /// The decoded audio does not hash to the MD5 checksum stated in the stream information.
    BadMd5,
}

impl Error {
    fn as_str(&self) -> &'static str {
        match *self {
            Error::IoError(_) => "io error",
            Error::UnexpectedEnd => "unexpected end of stream",
            Error::BadMagic => "missing flac stream marker",
            Error::MissingStreamInfo => "missing stream information block",
            Error::BadMetadataBlock => "malformed metadata block",
            Error::UnsupportedBitsPerSample => "unsupported bits per sample",
            Error::LostSync => "lost frame synchronization",
            Error::BadFrameHeader => "frame header reserved bit is not 0",
            Error::BadChannelAssignment => "channel assignment set to reserved value",
            Error::BadSampleSize => "invalid sample size",
            Error::BadBlockSize => "invalid block size",
            Error::BadSampleRate => "invalid sample rate",
            Error::BadVarInt => "malformed extended utf8 coded number",
            Error::BadHeaderCrc => "frame header crc mismatch",
            Error::BadFrameCrc => "frame crc mismatch",
            Error::BadSubframeType => "subframe type set to reserved value",
            Error::BadLpcPrecision => "lpc coefficient precision set to reserved value",
            Error::UnsupportedLpcShift => "negative lpc shifts are not supported",
            Error::BadResidualCoding => "malformed residual coding",
            Error::UnsupportedEscape => "unencoded residuals are not supported",
            Error::BadMd5 => "decoded audio md5 mismatch",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => write!(f, "io error: {}", err),
            _ => write!(f, "malformed stream: {}", self.as_str()),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        // An unexpected end-of-file at the byte-source level means the stream was cut in the
        // middle of a syntactic element.
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEnd,
            _ => Error::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
