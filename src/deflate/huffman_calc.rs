/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Length limited Huffman code length calculation, using the same in-place
//! minimum redundancy algorithm as miniz.

use std::mem;

const MAX_SUPPORTED_HUFF_CODESIZE: usize = 32;

/// calculates the bit lengths for a given distribution of symbols.
/// Trailing zeros are removed and the maximum code size is enforced.
///
/// A single used symbol gets a length of 1, which is a valid
/// (incomplete) code as far as DEFLATE decoders are concerned.
pub fn calc_bit_lengths(sym_count: &[u32], code_size_limit: usize) -> Vec<u8> {
    let mut symbols0 = Vec::new();
    let mut max_used = 0;

    for (i, &count) in sym_count.iter().enumerate() {
        if count != 0 {
            symbols0.push(SymFreq {
                key: count,
                sym_index: i as u16,
            });
            max_used = i + 1;
        }
    }

    let num_used_symbols = symbols0.len();

    let mut symbols1 = vec![
        SymFreq {
            key: 0,
            sym_index: 0
        };
        num_used_symbols
    ];

    let symbols = radix_sort_symbols(&mut symbols0[..], &mut symbols1[..]);
    calculate_minimum_redundancy(symbols);

    let mut num_codes = [0i32; MAX_SUPPORTED_HUFF_CODESIZE + 1];
    for symbol in symbols.iter() {
        num_codes[(symbol.key as usize).min(MAX_SUPPORTED_HUFF_CODESIZE)] += 1;
    }

    enforce_max_code_size(&mut num_codes, num_used_symbols, code_size_limit);

    let mut code_sizes = vec![0; max_used];

    let mut last = num_used_symbols;
    for (i, &num_item) in num_codes
        .iter()
        .enumerate()
        .take(code_size_limit + 1)
        .skip(1)
    {
        let first = last - num_item as usize;
        for symbol in &symbols[first..last] {
            code_sizes[symbol.sym_index as usize] = i as u8;
        }
        last = first;
    }

    code_sizes
}

#[derive(Copy, Clone)]
struct SymFreq {
    key: u32,
    sym_index: u16,
}

fn radix_sort_symbols<'a>(
    symbols0: &'a mut [SymFreq],
    symbols1: &'a mut [SymFreq],
) -> &'a mut [SymFreq] {
    let mut hist = [[0; 256]; 4];

    for freq in symbols0.iter() {
        for (pass, h) in hist.iter_mut().enumerate() {
            h[((freq.key >> (pass * 8)) & 0xFF) as usize] += 1;
        }
    }

    let mut current_symbols = symbols0;
    let mut new_symbols = symbols1;

    for (pass, hist_item) in hist.iter().enumerate() {
        // skip passes where every key has the same byte
        if hist_item.iter().any(|&h| h == current_symbols.len()) {
            continue;
        }

        let mut offsets = [0; 256];
        let mut offset = 0;
        for i in 0..256 {
            offsets[i] = offset;
            offset += hist_item[i];
        }

        for sym in current_symbols.iter() {
            let j = ((sym.key >> (pass * 8)) & 0xFF) as usize;
            new_symbols[offsets[j]] = *sym;
            offsets[j] += 1;
        }

        mem::swap(&mut current_symbols, &mut new_symbols);
    }

    current_symbols
}

fn calculate_minimum_redundancy(symbols: &mut [SymFreq]) {
    match symbols.len() {
        0 => (),
        1 => symbols[0].key = 1,
        n => {
            symbols[0].key += symbols[1].key;
            let mut root = 0;
            let mut leaf = 2;
            for next in 1..n - 1 {
                if (leaf >= n) || (symbols[root].key < symbols[leaf].key) {
                    symbols[next].key = symbols[root].key;
                    symbols[root].key = next as u32;
                    root += 1;
                } else {
                    symbols[next].key = symbols[leaf].key;
                    leaf += 1;
                }

                if (leaf >= n) || (root < next && symbols[root].key < symbols[leaf].key) {
                    symbols[next].key = symbols[next].key.wrapping_add(symbols[root].key);
                    symbols[root].key = next as u32;
                    root += 1;
                } else {
                    symbols[next].key = symbols[next].key.wrapping_add(symbols[leaf].key);
                    leaf += 1;
                }
            }

            symbols[n - 2].key = 0;
            for next in (0..n - 2).rev() {
                symbols[next].key = symbols[symbols[next].key as usize].key + 1;
            }

            let mut avbl = 1;
            let mut used = 0;
            let mut dpth = 0;
            let mut root = (n - 2) as i32;
            let mut next = (n - 1) as i32;
            while avbl > 0 {
                while (root >= 0) && (symbols[root as usize].key == dpth) {
                    used += 1;
                    root -= 1;
                }
                while avbl > used {
                    symbols[next as usize].key = dpth;
                    next -= 1;
                    avbl -= 1;
                }
                avbl = 2 * used;
                dpth += 1;
                used = 0;
            }
        }
    }
}

fn enforce_max_code_size(num_codes: &mut [i32], code_list_len: usize, max_code_size: usize) {
    if code_list_len <= 1 {
        return;
    }

    num_codes[max_code_size] += num_codes[max_code_size + 1..].iter().sum::<i32>();
    let total = num_codes[1..=max_code_size]
        .iter()
        .rev()
        .enumerate()
        .fold(0u32, |total, (i, &x)| total + ((x as u32) << i));

    for _ in (1 << max_code_size)..total {
        num_codes[max_code_size] -= 1;
        for i in (1..max_code_size).rev() {
            if num_codes[i] != 0 {
                num_codes[i] -= 1;
                num_codes[i + 1] += 2;
                break;
            }
        }
    }
}

#[cfg(test)]
fn kraft_sum(lengths: &[u8]) -> f64 {
    lengths
        .iter()
        .filter(|&&l| l != 0)
        .map(|&l| 1.0 / f64::from(1u32 << l))
        .sum()
}

#[test]
fn complete_codes() {
    let lengths = calc_bit_lengths(&[1, 0, 2, 3, 5, 8, 13, 0], 15);
    assert_eq!(lengths.len(), 7, "trailing zeros are trimmed");
    assert_eq!(lengths[1], 0);
    assert!((kraft_sum(&lengths) - 1.0).abs() < 1e-9);

    // most frequent symbol gets the shortest code
    assert!(lengths[6] <= lengths[0]);
}

#[test]
fn limit_is_enforced() {
    // fibonacci frequencies produce a maximally skewed tree
    let mut freq = vec![1u32, 1];
    while freq.len() < 30 {
        let n = freq[freq.len() - 1] + freq[freq.len() - 2];
        freq.push(n);
    }

    let lengths = calc_bit_lengths(&freq, 7);
    assert!(lengths.iter().all(|&l| l <= 7 && l > 0));
    assert!(kraft_sum(&lengths) <= 1.0);
}

#[test]
fn large_frequencies() {
    // counts larger than 16 bits need all four radix passes
    let lengths = calc_bit_lengths(&[70000, 1, 300000, 5, 0, 65536], 15);
    assert_eq!(lengths[4], 0);
    assert!(lengths[2] <= lengths[0]);
    assert!(lengths[0] <= lengths[1]);
    assert!((kraft_sum(&lengths) - 1.0).abs() < 1e-9);
}

#[test]
fn single_symbol() {
    let lengths = calc_bit_lengths(&[0, 0, 9], 15);
    assert_eq!(lengths, [0, 0, 1]);
}
