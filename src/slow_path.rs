/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Compression of the bytes that could not be copied from the reference.

use crate::{
    deflate::{
        deflate_constants::WINDOW_SIZE,
        deflate_token::{DeflateToken, TokenFrequency},
        deflate_writer::{dynamic_encoding, stored_block_bits, DeflateWriter},
        huffman_encoding::HuffmanOriginalEncoding,
        match_finder::MatchFinder,
    },
    rezip_error::Result,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodedBlockType {
    Stored,
    Fixed,
    Dynamic,
}

pub struct SlowPathEncoder {
    finder: MatchFinder,
    block_size: usize,
}

impl SlowPathEncoder {
    pub fn new(max_chain: u32, block_size: usize) -> Self {
        Self {
            finder: MatchFinder::new(max_chain),
            block_size: block_size.max(1),
        }
    }

    /// Compresses `data` into one block per `block_size` bytes, each using whichever
    /// of stored, fixed or dynamic huffman encoding comes out smallest. `history` is
    /// the output that precedes `data` and may be referenced by the new blocks.
    pub fn encode(
        &mut self,
        writer: &mut DeflateWriter,
        history: &[u8],
        data: &[u8],
    ) -> Result<Vec<EncodedBlockType>> {
        let history = &history[history.len().saturating_sub(WINDOW_SIZE)..];

        let mut combined = Vec::with_capacity(history.len() + data.len());
        combined.extend_from_slice(history);
        combined.extend_from_slice(data);

        let mut written = Vec::new();
        let mut offset = history.len();
        while offset < combined.len() {
            let end = (offset + self.block_size).min(combined.len());
            let segment = &combined[offset..end];

            let tokens = self.finder.tokenize(&combined[..offset], segment);
            written.push(write_cheapest(writer, &tokens, segment)?);

            offset = end;
        }

        Ok(written)
    }
}

/// bits the block needs with the given literal/length and distance code lengths, excluding the header
fn huffman_bits(freq: &TokenFrequency, lit_lengths: &[u8], dist_lengths: &[u8]) -> u64 {
    freq.symbol_bits(lit_lengths, dist_lengths) + freq.extra_bits()
}

fn write_cheapest(
    writer: &mut DeflateWriter,
    tokens: &[DeflateToken],
    segment: &[u8],
) -> Result<EncodedBlockType> {
    let freq = TokenFrequency::from_tokens(tokens);

    let (fixed_lit, fixed_dist) = HuffmanOriginalEncoding::get_fixed_distance_lengths();
    let fixed = 3 + huffman_bits(&freq, &fixed_lit, &fixed_dist);

    let encoding = dynamic_encoding(&freq);
    let (dyn_lit, dyn_dist) = encoding.get_literal_distance_lengths();
    let dynamic = 3 + encoding.header_bits() + huffman_bits(&freq, &dyn_lit, &dyn_dist);

    let stored = stored_block_bits(writer.partial_bits(), segment.len());

    log::trace!(
        "slow path segment len={} stored={} fixed={} dynamic={}",
        segment.len(),
        stored,
        fixed,
        dynamic
    );

    if stored <= fixed && stored <= dynamic {
        writer.write_stored_block(segment, false);
        Ok(EncodedBlockType::Stored)
    } else if fixed <= dynamic {
        writer.write_fixed_block(tokens, false)?;
        Ok(EncodedBlockType::Fixed)
    } else {
        writer.write_dynamic_block_with(tokens, &encoding, false)?;
        Ok(EncodedBlockType::Dynamic)
    }
}

#[cfg(test)]
fn encode_all(chunks: &[&[u8]], block_size: usize) -> (Vec<u8>, Vec<EncodedBlockType>) {
    let mut writer = DeflateWriter::new();
    let mut encoder = SlowPathEncoder::new(128, block_size);
    let mut history = Vec::new();
    let mut types = Vec::new();
    for c in chunks {
        types.extend(encoder.encode(&mut writer, &history, c).unwrap());
        history.extend_from_slice(c);
    }
    writer.write_final_marker();
    (writer.detach_output(), types)
}

#[test]
fn picks_block_type_by_size() {
    // incompressible data ends up stored
    let mut random = Vec::new();
    let mut x = 0x12345678u32;
    for _ in 0..4000 {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        random.push(x as u8);
    }

    // a few bytes are cheapest with the fixed table
    let short = b"hi".as_slice();

    // a small alphabet pays for its own table
    let mut text = Vec::new();
    for _ in 0..4000 {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        text.push(b"acgt"[(x >> 7) as usize & 3]);
    }

    let (output, types) = encode_all(&[random.as_slice(), short, text.as_slice()], 1 << 16);
    assert_eq!(
        types,
        [
            EncodedBlockType::Stored,
            EncodedBlockType::Fixed,
            EncodedBlockType::Dynamic
        ]
    );

    let mut expected = random.clone();
    expected.extend_from_slice(short);
    expected.extend_from_slice(&text);
    assert_eq!(
        miniz_oxide::inflate::decompress_to_vec(&output).unwrap(),
        expected
    );
}

#[test]
fn segments_respect_block_size() {
    let data: Vec<u8> = (0..10000u32).map(|i| (i % 7) as u8 + b'a').collect();
    let (output, types) = encode_all(&[data.as_slice()], 1000);
    assert_eq!(types.len(), 10);
    assert_eq!(miniz_oxide::inflate::decompress_to_vec(&output).unwrap(), data);
}

#[test]
fn references_reach_previous_chunks() {
    let sentence = b"the same sentence appears in both chunks, so the second one is tiny";
    let mut writer = DeflateWriter::new();
    let mut encoder = SlowPathEncoder::new(128, 1 << 16);
    encoder.encode(&mut writer, &[], sentence).unwrap();
    let first = writer.detach_output().len();
    encoder.encode(&mut writer, sentence, sentence).unwrap();
    let second = writer.detach_output().len();
    assert!(second < first / 4, "{} vs {}", second, first);
}
