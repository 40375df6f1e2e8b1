/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::rezip_error::Result;

use super::{
    bit_writer::BitWriter,
    deflate_constants::{
        quantize_distance, quantize_length, DIST_BASE_TABLE, DIST_EXTRA_TABLE, END_OF_BLOCK,
        LENGTH_BASE_TABLE, LENGTH_EXTRA_TABLE, MAX_STORED_BLOCK, MIN_MATCH, NONLEN_CODE_COUNT,
    },
    deflate_reader::{DeflateBlockType, ReferenceBlock},
    deflate_token::{DeflateToken, TokenFrequency},
    huffman_calc::calc_bit_lengths,
    huffman_encoding::{ensure_two_symbols, HuffmanOriginalEncoding, HuffmanWriter, MAX_CODE_LENGTH},
};

/// Writes DEFLATE blocks to an in-memory buffer. Whole bytes accumulate in the
/// buffer until they are detached, the partial byte stays in the bit writer so
/// that the next block can continue at any bit position.
pub struct DeflateWriter {
    /// bit writer to write partial bits to output
    bitwriter: BitWriter,

    /// compressed output
    output: Vec<u8>,
}

impl Default for DeflateWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeflateWriter {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            bitwriter: BitWriter::default(),
        }
    }

    /// returns all the complete bytes written so far
    pub fn detach_output(&mut self) -> Vec<u8> {
        self.bitwriter.flush_whole_bytes(&mut self.output);
        std::mem::take(&mut self.output)
    }

    /// number of bits pending after the last complete byte
    pub fn partial_bits(&self) -> u32 {
        self.bitwriter.partial_bits()
    }

    fn write_block_header(&mut self, last: bool, btype: u32) {
        self.bitwriter.write(last as u32, 1, &mut self.output);
        self.bitwriter.write(btype, 2, &mut self.output);
    }

    /// Writes the data as uncompressed blocks, splitting it where it exceeds
    /// the maximum stored block length. `last` only applies to the final piece.
    pub fn write_stored_block(&mut self, data: &[u8], last: bool) {
        let mut chunks = data.chunks(MAX_STORED_BLOCK).peekable();
        if chunks.peek().is_none() {
            self.write_stored_piece(&[], last);
        }

        while let Some(chunk) = chunks.next() {
            let is_last = last && chunks.peek().is_none();
            self.write_stored_piece(chunk, is_last);
        }
    }

    fn write_stored_piece(&mut self, data: &[u8], last: bool) {
        self.write_block_header(last, 0);
        self.bitwriter.pad(&mut self.output);

        let len = data.len() as u16;
        self.output.extend_from_slice(&len.to_le_bytes());
        self.output.extend_from_slice(&(!len).to_le_bytes());
        self.output.extend_from_slice(data);
    }

    pub fn write_fixed_block(&mut self, tokens: &[DeflateToken], last: bool) -> Result<()> {
        self.write_block_header(last, 1);
        let huffman_writer = HuffmanWriter::start_fixed_huffman_table()?;
        self.encode_huffman(tokens, &huffman_writer);
        Ok(())
    }

    /// writes a dynamic block with a huffman table built from the token statistics
    pub fn write_dynamic_block(&mut self, tokens: &[DeflateToken], last: bool) -> Result<()> {
        let encoding = dynamic_encoding(&TokenFrequency::from_tokens(tokens));
        self.write_dynamic_block_with(tokens, &encoding, last)
    }

    pub fn write_dynamic_block_with(
        &mut self,
        tokens: &[DeflateToken],
        huffman_encoding: &HuffmanOriginalEncoding,
        last: bool,
    ) -> Result<()> {
        self.write_block_header(last, 2);
        let huffman_writer = HuffmanWriter::start_dynamic_huffman_table(
            &mut self.bitwriter,
            huffman_encoding,
            &mut self.output,
        )?;
        self.encode_huffman(tokens, &huffman_writer);
        Ok(())
    }

    /// Copies a block from the reference. Huffman blocks are replayed bit for bit
    /// after a fresh header, stored blocks are reframed since their padding depends
    /// on where they land. The copy is never marked as the final block.
    pub fn copy_block(&mut self, block: &ReferenceBlock) {
        match block.block_type {
            DeflateBlockType::Stored => self.write_stored_block(&block.uncompressed, false),
            DeflateBlockType::FixedHuffman | DeflateBlockType::DynamicHuffman { .. } => {
                self.write_block_header(false, block.block_type.btype());
                block
                    .compressed
                    .write_to(&mut self.bitwriter, &mut self.output);
            }
        }
    }

    /// Terminates the stream with an empty final fixed block and pads to a byte boundary.
    pub fn write_final_marker(&mut self) {
        self.write_block_header(true, 1);
        // end of block is the all zero 7 bit code in the fixed table
        self.bitwriter.write(0, 7, &mut self.output);
        self.bitwriter.pad(&mut self.output);
    }

    fn encode_huffman(&mut self, tokens: &[DeflateToken], huffman_writer: &HuffmanWriter) {
        for token in tokens {
            match token {
                DeflateToken::Literal(lit) => {
                    huffman_writer.write_literal(
                        &mut self.bitwriter,
                        &mut self.output,
                        u16::from(*lit),
                    );
                }
                DeflateToken::Reference(reference) => {
                    let lencode = quantize_length(reference.len());
                    huffman_writer.write_literal(
                        &mut self.bitwriter,
                        &mut self.output,
                        NONLEN_CODE_COUNT as u16 + lencode as u16,
                    );

                    let lenextra = LENGTH_EXTRA_TABLE[lencode];
                    if lenextra > 0 {
                        self.bitwriter.write(
                            reference.len() - MIN_MATCH - LENGTH_BASE_TABLE[lencode] as u32,
                            lenextra.into(),
                            &mut self.output,
                        );
                    }

                    let distcode = quantize_distance(reference.dist());
                    huffman_writer.write_distance(
                        &mut self.bitwriter,
                        &mut self.output,
                        distcode as u16,
                    );

                    let distextra = DIST_EXTRA_TABLE[distcode];
                    if distextra > 0 {
                        self.bitwriter.write(
                            reference.dist() - 1 - DIST_BASE_TABLE[distcode] as u32,
                            distextra.into(),
                            &mut self.output,
                        );
                    }
                }
            }
        }

        huffman_writer.write_literal(&mut self.bitwriter, &mut self.output, END_OF_BLOCK);
    }
}

/// Builds a dynamic huffman table for the given token statistics. Both alphabets
/// always get at least two codes so that every decoder accepts the table.
pub fn dynamic_encoding(freq: &TokenFrequency) -> HuffmanOriginalEncoding {
    let mut lit = freq.literal_codes;
    ensure_two_symbols(&mut lit);
    let mut dist = freq.distance_codes;
    ensure_two_symbols(&mut dist);

    let lit_lengths = calc_bit_lengths(&lit, MAX_CODE_LENGTH);
    let dist_lengths = calc_bit_lengths(&dist, MAX_CODE_LENGTH);

    HuffmanOriginalEncoding::from_bit_lengths(&lit_lengths, &dist_lengths)
}

/// Exact number of bits needed to store `len` bytes as uncompressed blocks when the
/// writer currently has `partial_bits` bits after the last byte boundary.
pub fn stored_block_bits(partial_bits: u32, len: usize) -> u64 {
    let pieces = len.div_ceil(MAX_STORED_BLOCK).max(1) as u64;

    // header plus padding, which only depends on the alignment for the first piece
    let first_header = 3 + u64::from((8 - (partial_bits + 3) % 8) % 8);
    let other_headers = (pieces - 1) * 8;

    first_header + other_headers + pieces * 32 + len as u64 * 8
}

#[cfg(test)]
fn inflate(data: &[u8]) -> Vec<u8> {
    miniz_oxide::inflate::decompress_to_vec(data).unwrap()
}

#[test]
fn write_each_block_type() {
    use super::match_finder::MatchFinder;

    let text = b"It was the best of times, it was the worst of times, it was the age of wisdom";
    let tokens = MatchFinder::new(32).tokenize(&[], text);

    let mut w = DeflateWriter::new();
    w.write_fixed_block(&tokens, false).unwrap();
    w.write_stored_block(b"0123456789", false);
    let mut history = text.to_vec();
    history.extend_from_slice(b"0123456789");
    let tokens2 = MatchFinder::new(32).tokenize(&history, text);
    w.write_dynamic_block(&tokens2, false).unwrap();
    w.write_final_marker();
    assert_eq!(w.partial_bits(), 0);

    let output = w.detach_output();
    let mut expected = history;
    expected.extend_from_slice(text);
    assert_eq!(inflate(&output), expected);
}

#[test]
fn large_stored_blocks_are_split() {
    let data: Vec<u8> = (0..200000u32).map(|i| (i % 253) as u8).collect();

    for shift in [0, 1, 5] {
        let mut w = DeflateWriter::new();
        let mut prefix = Vec::new();
        if shift > 0 {
            // an empty fixed block is 10 bits long
            for _ in 0..shift {
                w.write_fixed_block(&[], false).unwrap();
            }
        }
        let before = w.detach_output();
        let before_bits = before.len() as u64 * 8 + u64::from(w.partial_bits());
        prefix.extend_from_slice(&before);

        let expected_bits = stored_block_bits(w.partial_bits(), data.len());
        w.write_stored_block(&data, false);
        let after = w.detach_output();
        let after_bits = (prefix.len() + after.len()) as u64 * 8 + u64::from(w.partial_bits());
        assert_eq!(after_bits - before_bits, expected_bits, "shift {}", shift);

        w.write_final_marker();
        prefix.extend_from_slice(&after);
        prefix.extend_from_slice(&w.detach_output());
        assert_eq!(inflate(&prefix), data);
    }
}

#[test]
fn empty_stream_is_valid() {
    let mut w = DeflateWriter::new();
    w.write_final_marker();
    let output = w.detach_output();
    // 10 bits padded to two bytes
    assert_eq!(output, [0x03, 0x00]);
    assert!(inflate(&output).is_empty());
}

#[test]
fn dynamic_table_with_single_literal() {
    let mut w = DeflateWriter::new();
    w.write_dynamic_block(&[DeflateToken::Literal(b'z')], false)
        .unwrap();
    w.write_dynamic_block(&[], false).unwrap();
    w.write_final_marker();
    assert_eq!(inflate(&w.detach_output()), b"z");
}

#[test]
fn copied_blocks_decode_at_any_alignment() {
    use super::deflate_reader::ReferenceBlockDecoder;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let mut content = Vec::new();
    for i in 0..3000u32 {
        content.extend_from_slice(format!("{} bottles of beer on the wall\n", i * 7 % 99).as_bytes());
    }

    for level in [1, 9] {
        let mut e = GzEncoder::new(Vec::new(), Compression::new(level));
        e.write_all(&content).unwrap();
        let gz = e.finish().unwrap();

        for shift in 0..3 {
            let mut w = DeflateWriter::new();
            for _ in 0..shift {
                w.write_fixed_block(&[], false).unwrap();
            }

            let mut d = ReferenceBlockDecoder::new(std::io::Cursor::new(&gz), 1 << 24);
            while let Some(b) = d.next_block().unwrap() {
                w.copy_block(&b);
            }
            w.write_final_marker();

            assert_eq!(inflate(&w.detach_output()), content, "level {} shift {}", level, shift);
        }
    }
}
