/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use super::deflate_constants::{
    quantize_distance, quantize_length, DIST_CODE_COUNT, DIST_EXTRA_TABLE, END_OF_BLOCK,
    LENGTH_EXTRA_TABLE, LITLEN_CODE_COUNT, MIN_MATCH, NONLEN_CODE_COUNT,
};

/// In a DEFLATE stream, tokens are either literals (bytes) or references to previous bytes
/// with a distance and length.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeflateToken {
    Literal(u8),
    Reference(DeflateTokenReference),
}

impl DeflateToken {
    pub fn new_ref(len: u32, dist: u32) -> DeflateToken {
        DeflateToken::Reference(DeflateTokenReference::new(len, dist))
    }

    /// number of uncompressed bytes this token expands to
    pub fn len(&self) -> u32 {
        match self {
            DeflateToken::Literal(_) => 1,
            DeflateToken::Reference(r) => r.len(),
        }
    }
}

/// In the case of a distance and length, the length is the number of bytes to copy from the
/// previous bytes, and the distance is the number of bytes back to start copying from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeflateTokenReference {
    len: u8,
    dist: u16,
}

impl DeflateTokenReference {
    pub fn new(len: u32, dist: u32) -> DeflateTokenReference {
        debug_assert!(len >= MIN_MATCH && dist >= 1);
        DeflateTokenReference {
            len: (len - MIN_MATCH) as u8,
            dist: (dist - 1) as u16,
        }
    }

    pub fn len(&self) -> u32 {
        (self.len as u32) + MIN_MATCH
    }

    pub fn dist(&self) -> u32 {
        (self.dist as u32) + 1
    }
}

/// Used to track the frequence of tokens in the DEFLATE stream
/// which are later used to build the huffman encoding.
#[derive(Debug, Clone)]
pub struct TokenFrequency {
    pub literal_codes: [u32; LITLEN_CODE_COUNT],
    pub distance_codes: [u32; DIST_CODE_COUNT],
}

impl Default for TokenFrequency {
    fn default() -> Self {
        let mut t = TokenFrequency {
            literal_codes: [0; LITLEN_CODE_COUNT],
            distance_codes: [0; DIST_CODE_COUNT],
        };

        // include the end of block code
        t.literal_codes[END_OF_BLOCK as usize] = 1;

        t
    }
}

impl TokenFrequency {
    pub fn commit_token(&mut self, token: &DeflateToken) {
        match token {
            DeflateToken::Literal(lit) => {
                self.literal_codes[*lit as usize] += 1;
            }
            DeflateToken::Reference(t) => {
                self.literal_codes[NONLEN_CODE_COUNT + quantize_length(t.len())] += 1;
                self.distance_codes[quantize_distance(t.dist())] += 1;
            }
        }
    }

    pub fn from_tokens(tokens: &[DeflateToken]) -> Self {
        let mut f = Self::default();
        tokens.iter().for_each(|t| f.commit_token(t));
        f
    }

    /// number of extra bits that follow the huffman codes, these are
    /// the same regardless of which huffman table is used
    pub fn extra_bits(&self) -> u64 {
        let len_extra: u64 = LENGTH_EXTRA_TABLE
            .iter()
            .enumerate()
            .map(|(i, &e)| u64::from(e) * u64::from(self.literal_codes[NONLEN_CODE_COUNT + i]))
            .sum();

        let dist_extra: u64 = DIST_EXTRA_TABLE
            .iter()
            .zip(self.distance_codes.iter())
            .map(|(&e, &c)| u64::from(e) * u64::from(c))
            .sum();

        len_extra + dist_extra
    }

    /// total bits required to encode the symbols with the given code lengths, excluding extra bits
    pub fn symbol_bits(&self, lit_lengths: &[u8], dist_lengths: &[u8]) -> u64 {
        let lit: u64 = self
            .literal_codes
            .iter()
            .enumerate()
            .map(|(i, &c)| u64::from(c) * u64::from(lit_lengths.get(i).copied().unwrap_or(0)))
            .sum();

        let dist: u64 = self
            .distance_codes
            .iter()
            .enumerate()
            .map(|(i, &c)| u64::from(c) * u64::from(dist_lengths.get(i).copied().unwrap_or(0)))
            .sum();

        lit + dist
    }
}

#[test]
fn frequency_counts_lengths_and_distances() {
    let tokens = [
        DeflateToken::Literal(b'a'),
        DeflateToken::Literal(b'a'),
        DeflateToken::new_ref(3, 1),
        DeflateToken::new_ref(258, 32768),
        DeflateToken::new_ref(11, 5),
    ];

    let f = TokenFrequency::from_tokens(&tokens);
    assert_eq!(f.literal_codes[b'a' as usize], 2);
    assert_eq!(f.literal_codes[256], 1);
    assert_eq!(f.literal_codes[257], 1);
    assert_eq!(f.literal_codes[285], 1);
    assert_eq!(f.literal_codes[265], 1);
    assert_eq!(f.distance_codes[0], 1);
    assert_eq!(f.distance_codes[29], 1);
    assert_eq!(f.distance_codes[4], 1);

    // length 11 has 1 extra bit, distance 5 has 1, distance 32768 has 13
    assert_eq!(f.extra_bits(), 15);

    assert_eq!(tokens.iter().map(|t| t.len()).sum::<u32>(), 2 + 3 + 258 + 11);
}
