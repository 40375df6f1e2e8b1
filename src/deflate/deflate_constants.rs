/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Constants from RFC 1951 used by both the reader and the writer.

/// literals 0-255 plus the end of block code
pub const NONLEN_CODE_COUNT: usize = 257;
pub const LEN_CODE_COUNT: usize = 29;
pub const LITLEN_CODE_COUNT: usize = NONLEN_CODE_COUNT + LEN_CODE_COUNT;

/// the fixed huffman table defines 288 literal/length codes even though only 286 are valid
pub const FIXED_LITLEN_CODE_COUNT: usize = 288;

pub const DIST_CODE_COUNT: usize = 30;
pub const FIXED_DIST_CODE_COUNT: usize = 32;

pub const CODETREE_CODE_COUNT: usize = 19;

pub const END_OF_BLOCK: u16 = 256;

pub const MIN_MATCH: u32 = 3;
pub const MAX_MATCH: u32 = 258;

/// largest distance a back reference can reach
pub const WINDOW_SIZE: usize = 32768;

/// largest number of bytes a stored block can hold
pub const MAX_STORED_BLOCK: usize = 65535;

/// length = MIN_MATCH + base + extra bits
pub const LENGTH_BASE_TABLE: [u8; LEN_CODE_COUNT] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 32, 40, 48, 56, 64, 80, 96, 112, 128,
    160, 192, 224, 255,
];

pub const LENGTH_EXTRA_TABLE: [u8; LEN_CODE_COUNT] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// distance = 1 + base + extra bits
pub const DIST_BASE_TABLE: [u16; DIST_CODE_COUNT] = [
    0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536,
    2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576,
];

pub const DIST_EXTRA_TABLE: [u8; DIST_CODE_COUNT] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// order in which the code length alphabet lengths are stored in a dynamic block header
pub const TREE_CODE_ORDER_TABLE: [usize; CODETREE_CODE_COUNT] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// returns the length code index (0-28) for a match length of 3-258
pub fn quantize_length(len: u32) -> usize {
    debug_assert!((MIN_MATCH..=MAX_MATCH).contains(&len));
    LENGTH_BASE_TABLE.partition_point(|&b| u32::from(b) <= len - MIN_MATCH) - 1
}

/// returns the distance code index (0-29) for a distance of 1-32768
pub fn quantize_distance(dist: u32) -> usize {
    debug_assert!((1..=WINDOW_SIZE as u32).contains(&dist));
    DIST_BASE_TABLE.partition_point(|&b| u32::from(b) <= dist - 1) - 1
}

#[test]
fn quantize_edges() {
    assert_eq!(quantize_length(3), 0);
    assert_eq!(quantize_length(10), 7);
    assert_eq!(quantize_length(11), 8);
    assert_eq!(quantize_length(257), 27);
    assert_eq!(quantize_length(258), 28);

    assert_eq!(quantize_distance(1), 0);
    assert_eq!(quantize_distance(4), 3);
    assert_eq!(quantize_distance(5), 4);
    assert_eq!(quantize_distance(6), 4);
    assert_eq!(quantize_distance(7), 5);
    assert_eq!(quantize_distance(24577), 29);
    assert_eq!(quantize_distance(32768), 29);

    // every length must be representable by its code plus extra bits
    for len in MIN_MATCH..=MAX_MATCH {
        let code = quantize_length(len);
        let extra = len - MIN_MATCH - u32::from(LENGTH_BASE_TABLE[code]);
        assert!(extra < (1 << LENGTH_EXTRA_TABLE[code]) || (extra == 0));
    }
}
