/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{Error, ErrorKind, Read, Result};

use super::bit_writer::{BitWriter, CompressedBits};

pub trait ReadBits {
    fn get(&mut self, cbit: u32, reader: &mut impl Read) -> Result<u32>;

    /// the next 8 bits without consuming them, only valid if bits_left() >= 8
    fn peek_byte(&self) -> u8;

    fn bits_left(&self) -> u32;

    /// tries to make at least 8 bits available for peek_byte without failing at the end of the input
    fn prefetch(&mut self, reader: &mut impl Read) -> Result<()>;

    fn consume(&mut self, cbit: u32);
}

/// the bits consumed since capture started
#[derive(Default, Debug)]
struct BitCapture {
    writer: BitWriter,
    bits: CompressedBits,
}

/// BitReader reads a variable number of bits from a byte stream. Bytes are
/// pulled from the reader only when needed, so the reader is never advanced
/// more than one byte past the last bit that was peeked.
///
/// While capturing, every bit that is consumed is also recorded so that the exact
/// compressed representation of a block can be copied into another stream.
#[derive(Default, Debug)]
pub struct BitReader {
    bits_read: u64,
    bit_count: u32,
    capture: Option<BitCapture>,
}

impl ReadBits for BitReader {
    fn get(&mut self, cbit: u32, reader: &mut impl Read) -> Result<u32> {
        BitReader::get(self, cbit, reader)
    }

    fn peek_byte(&self) -> u8 {
        self.bits_read as u8
    }

    fn bits_left(&self) -> u32 {
        self.bit_count
    }

    fn prefetch(&mut self, reader: &mut impl Read) -> Result<()> {
        self.fill(8, reader)?;
        Ok(())
    }

    fn consume(&mut self, cbit: u32) {
        debug_assert!(cbit <= self.bit_count);

        let wret = (self.bits_read & ((1 << cbit) - 1)) as u32;
        self.bits_read >>= cbit;
        self.bit_count -= cbit;

        if let Some(c) = self.capture.as_mut() {
            c.bits.push(&mut c.writer, wret, cbit);
        }
    }
}

impl BitReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// starts recording all consumed bits
    pub fn start_capture(&mut self) {
        self.capture = Some(BitCapture::default());
    }

    /// stops recording and returns the bits consumed since start_capture
    pub fn finish_capture(&mut self) -> CompressedBits {
        match self.capture.take() {
            Some(c) => c.bits.finish(c.writer),
            None => CompressedBits::new(),
        }
    }

    /// reads bytes until at least `cbit` bits are available. Returns false
    /// if the input ended first.
    fn fill(&mut self, cbit: u32, reader: &mut impl Read) -> Result<bool> {
        debug_assert!(cbit <= 32);

        while self.bit_count < cbit {
            let mut b = [0u8; 1];
            loop {
                match reader.read(&mut b) {
                    Ok(0) => return Ok(false),
                    Ok(_) => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            self.bits_read |= u64::from(b[0]) << self.bit_count;
            self.bit_count += 8;
        }

        Ok(true)
    }

    /// reads the bits until the next byte boundary
    pub fn read_padding_bits(&mut self) -> u8 {
        let cbit = self.bit_count & 7;

        let wret = (self.bits_read & ((1 << cbit) - 1)) as u8;
        self.consume(cbit);

        wret
    }

    /// reads a whole byte, only valid at a byte boundary. Bytes that were
    /// already prefetched into the bit buffer are returned first.
    pub fn read_byte(&mut self, reader: &mut impl Read) -> Result<u8> {
        assert!(
            self.bit_count & 7 == 0,
            "BitReader Error: Attempt to read bytes without first calling read_padding_bits"
        );

        Ok(self.get(8, reader)? as u8)
    }

    /// Read cbit bits from the input stream return
    /// Only supports read of 0 to 32 bits.
    pub fn get(&mut self, cbit: u32, reader: &mut impl Read) -> Result<u32> {
        if cbit == 0 {
            return Ok(0);
        }

        if cbit > 32 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "BitReader Error: Attempt to read more than 32 bits",
            ));
        }

        if !self.fill(cbit, reader)? {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "BitReader Error: input ended in the middle of a DEFLATE stream",
            ));
        }

        let wret = (self.bits_read & ((1u64 << cbit) - 1)) as u32;
        self.consume(cbit);

        Ok(wret)
    }
}

#[test]
fn capture_records_consumed_bits() {
    let data = [0b1010_1101u8, 0xff, 0x12];
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut reader = BitReader::new();

    assert_eq!(reader.get(3, &mut cursor).unwrap(), 0b101);
    reader.start_capture();
    assert_eq!(reader.get(5, &mut cursor).unwrap(), 0b10101);
    assert_eq!(reader.get(4, &mut cursor).unwrap(), 0xf);
    let captured = reader.finish_capture();

    assert_eq!(captured.bit_len(), 9);

    let mut w = BitWriter::default();
    let mut out = Vec::new();
    captured.write_to(&mut w, &mut out);
    w.pad(&mut out);
    assert_eq!(out, [0b1111_0101, 0b0000_0001]);

    // remaining bits are still available after the capture
    assert_eq!(reader.get(4, &mut cursor).unwrap(), 0xf);
    assert_eq!(reader.read_byte(&mut cursor).unwrap(), 0x12);
}

#[test]
fn short_read_is_unexpected_eof() {
    let data = [0x01u8];
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut reader = BitReader::new();

    assert_eq!(reader.get(4, &mut cursor).unwrap(), 1);
    let e = reader.get(8, &mut cursor).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnexpectedEof);
}
