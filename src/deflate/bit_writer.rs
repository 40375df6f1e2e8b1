/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

/// Used to write a variable number of bits to a byte buffer.
#[derive(Default, Debug, Clone)]
pub struct BitWriter {
    pub bit_buffer: u64,
    pub bits_in: u32,
}

// use to write varying sized bits
impl BitWriter {
    #[inline(always)]
    pub fn write(&mut self, bits: u32, len: u32, data_buffer: &mut Vec<u8>) {
        debug_assert!(len <= 32 && (len == 32 || bits <= ((1u32 << len) - 1u32)));
        self.bit_buffer |= u64::from(bits) << self.bits_in;
        self.bits_in += len;

        if self.bits_in > 32 {
            self.flush_whole_bytes(data_buffer);
        }
    }

    /// pads with zero bits up to the next byte boundary
    pub fn pad(&mut self, data_buffer: &mut Vec<u8>) {
        let partial = self.partial_bits();
        if partial != 0 {
            self.write(0, 8 - partial, data_buffer);
        }

        self.flush_whole_bytes(data_buffer);
    }

    /// number of bits written since the last byte boundary
    pub fn partial_bits(&self) -> u32 {
        self.bits_in & 7
    }

    #[cold]
    pub fn flush_whole_bytes(&mut self, data_buffer: &mut Vec<u8>) {
        while self.bits_in >= 8 {
            data_buffer.push(self.bit_buffer as u8);
            self.bit_buffer >>= 8;
            self.bits_in -= 8;
        }
    }
}

/// A bit exact copy of part of a DEFLATE stream. The bits are packed
/// least significant bit first, the same way they appear in the stream, but
/// always start at bit zero of the first byte regardless of where they started
/// in the original stream.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CompressedBits {
    data: Vec<u8>,
    bit_len: u64,
}

impl CompressedBits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, writer: &mut BitWriter, bits: u32, len: u32) {
        writer.write(bits, len, &mut self.data);
        self.bit_len += u64::from(len);
    }

    /// flushes the remaining bits out of the writer that was used to build this
    pub fn finish(mut self, mut writer: BitWriter) -> Self {
        writer.pad(&mut self.data);
        self
    }

    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// replays the bits into another writer, which may be at any bit alignment
    pub fn write_to(&self, writer: &mut BitWriter, data_buffer: &mut Vec<u8>) {
        let whole_bytes = (self.bit_len / 8) as usize;

        writer.flush_whole_bytes(data_buffer);
        if writer.bits_in == 0 {
            data_buffer.extend_from_slice(&self.data[..whole_bytes]);
        } else {
            for &b in &self.data[..whole_bytes] {
                writer.write(b.into(), 8, data_buffer);
            }
        }

        let tail_bits = (self.bit_len % 8) as u32;
        if tail_bits > 0 {
            let tail = u32::from(self.data[whole_bytes]) & ((1 << tail_bits) - 1);
            writer.write(tail, tail_bits, data_buffer);
        }
    }
}

// write a fixed pattern and see if it matches the expected fixed output
#[test]
fn write_simple() {
    let mut b = BitWriter::default();
    let mut data_buffer = Vec::new();

    b.write(1, 4, &mut data_buffer);
    b.write(2, 4, &mut data_buffer);
    b.write(3, 4, &mut data_buffer);
    b.write(4, 4, &mut data_buffer);
    b.write(4, 4, &mut data_buffer);
    b.write(0x56, 8, &mut data_buffer);
    b.write(0x78, 8, &mut data_buffer);
    b.write(0x9f, 8, &mut data_buffer);
    b.write(0xfe, 8, &mut data_buffer);
    b.write(0xe, 4, &mut data_buffer);

    b.flush_whole_bytes(&mut data_buffer);

    assert_eq!(data_buffer[..], [0x21, 0x43, 0x64, 0x85, 0xf7, 0xe9, 0xef]);
}

/// write various bit patterns and see if the result matches the input
#[test]
fn write_roundtrip() {
    use super::bit_reader::BitReader;

    let mut b = BitWriter::default();
    let mut data_buffer = Vec::new();

    let pattern = [
        (0, 1),
        (1, 1),
        (1, 2),
        (2, 3),
        (3, 4),
        (4, 5),
        (4, 6),
        (0x156, 9),
        (0x78, 8),
        (0x9f, 8),
        (0xfe, 8),
        (0x7fff, 15),
        (0xffff, 16),
        (0xe, 4),
    ];

    for &(bits, len) in pattern.iter() {
        b.write(bits, len, &mut data_buffer);
    }

    b.pad(&mut data_buffer);

    let mut cursor = std::io::Cursor::new(data_buffer);
    let mut reader = BitReader::new();

    for &(bits, len) in pattern.iter() {
        assert_eq!(reader.get(len, &mut cursor).unwrap(), bits);
    }
}

/// captured bits must come out identical no matter the alignment of the destination
#[test]
fn replay_at_every_alignment() {
    let mut capture_writer = BitWriter::default();
    let mut captured = CompressedBits::new();
    let pattern = [(0x5, 3), (0x1ff, 9), (0x0, 2), (0x3abc, 14), (0x1, 1)];
    for &(bits, len) in pattern.iter() {
        captured.push(&mut capture_writer, bits, len);
    }
    let captured = captured.finish(capture_writer);
    assert_eq!(captured.bit_len(), 29);
    assert_eq!(captured.byte_len(), 4);

    for shift in 0..8 {
        let mut w = BitWriter::default();
        let mut out = Vec::new();
        w.write(0, shift, &mut out);
        captured.write_to(&mut w, &mut out);
        w.write(0x2a, 6, &mut out);
        w.pad(&mut out);

        let mut cursor = std::io::Cursor::new(out);
        let mut reader = super::bit_reader::BitReader::new();
        reader.get(shift, &mut cursor).unwrap();
        for &(bits, len) in pattern.iter() {
            assert_eq!(reader.get(len, &mut cursor).unwrap(), bits, "shift {}", shift);
        }
        assert_eq!(reader.get(6, &mut cursor).unwrap(), 0x2a);
    }
}
