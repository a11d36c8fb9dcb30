// Cantata
// Copyright (c) 2026 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::Read;

use super::ReadBytes;

#[inline(always)]
fn end_of_stream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
}

/// A `MediaSourceStream` adapts any byte source implementing [`std::io::Read`] into a buffered,
/// forward-only [`ReadBytes`] stream.
///
/// To minimize system call overhead on the inner reader, and to amortize that overhead over many
/// bytes, `MediaSourceStream` implements an exponentially growing read-ahead buffer. The
/// read-ahead length starts at 1kB, and doubles in length as more sequential reads are performed
/// until it reaches 32kB.
pub struct MediaSourceStream<R: Read> {
    /// The source reader.
    inner: R,
    /// The read-ahead buffer.
    buf: Box<[u8]>,
    /// The read position within the buffer.
    read_pos: usize,
    /// The number of valid bytes within the buffer.
    write_pos: usize,
    /// The current block length for a new read.
    read_block_len: usize,
    /// Absolute position of the stream, in bytes consumed.
    abs_pos: u64,
}

impl<R: Read> MediaSourceStream<R> {
    const MIN_BLOCK_LEN: usize = 1024;
    const MAX_BLOCK_LEN: usize = 32 * 1024;

    /// Instantiate a new `MediaSourceStream` wrapping the given byte source.
    pub fn new(inner: R) -> Self {
        MediaSourceStream {
            inner,
            buf: vec![0u8; Self::MAX_BLOCK_LEN].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            read_block_len: Self::MIN_BLOCK_LEN,
            abs_pos: 0,
        }
    }

    /// Unwraps this `MediaSourceStream`, returning the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// The number of bytes buffered but not yet consumed.
    #[inline(always)]
    fn unread_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Refill the buffer from the inner reader. Returns an end-of-stream error if the inner
    /// reader is exhausted.
    fn fetch(&mut self) -> io::Result<()> {
        debug_assert!(self.read_pos == self.write_pos);

        self.read_pos = 0;
        self.write_pos = 0;

        loop {
            match self.inner.read(&mut self.buf[..self.read_block_len]) {
                Ok(0) => return end_of_stream_error(),
                Ok(count) => {
                    self.write_pos = count;

                    // Grow the read-ahead length if the last read was fully serviced.
                    if count == self.read_block_len {
                        self.read_block_len =
                            cmp::min(self.read_block_len * 2, Self::MAX_BLOCK_LEN);
                    }

                    return Ok(());
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err),
            }
        }
    }
}

impl<R: Read> ReadBytes for MediaSourceStream<R> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.read_pos == self.write_pos {
            self.fetch()?;
        }

        let byte = self.buf[self.read_pos];
        self.read_pos += 1;
        self.abs_pos += 1;

        Ok(byte)
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        let mut bytes = [0u8; 2];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    #[inline(always)]
    fn read_triple_bytes(&mut self) -> io::Result<[u8; 3]> {
        let mut bytes = [0u8; 3];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        let mut bytes = [0u8; 4];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut rem = buf;

        while !rem.is_empty() {
            if self.read_pos == self.write_pos {
                self.fetch()?;
            }

            let len = cmp::min(rem.len(), self.unread_len());

            let tmp = rem;
            let (chunk, tail) = tmp.split_at_mut(len);

            chunk.copy_from_slice(&self.buf[self.read_pos..self.read_pos + len]);

            self.read_pos += len;
            self.abs_pos += len as u64;

            rem = tail;
        }

        Ok(())
    }

    fn ignore_bytes(&mut self, mut count: u64) -> io::Result<()> {
        while count > 0 {
            if self.read_pos == self.write_pos {
                self.fetch()?;
            }

            let len = cmp::min(count, self.unread_len() as u64);

            self.read_pos += len as usize;
            self.abs_pos += len;

            count -= len;
        }

        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.abs_pos
    }
}
