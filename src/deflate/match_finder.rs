/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use super::{
    deflate_constants::{MAX_MATCH, MIN_MATCH, WINDOW_SIZE},
    deflate_token::DeflateToken,
};

const HASH_BITS: u32 = 15;
const HASH_MASK: u32 = (1 << HASH_BITS) - 1;

/// end of a hash chain
const NO_POS: u32 = u32::MAX;

/// a 3 byte match this far away costs more than the literals it replaces
const TOO_FAR: u32 = 4096;

/// matches at least this long are taken without checking the next position
const LAZY_THRESHOLD: u32 = 32;

/// Greedy hash chain matcher with one step of lazy evaluation, the same
/// strategy zlib uses for its middle compression levels.
pub struct MatchFinder {
    max_chain: u32,

    /// most recent position for each hash value
    head: Vec<u32>,

    /// previous position with the same hash, indexed by position
    prev: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Match {
    len: u32,
    dist: u32,
}

#[inline(always)]
fn hash(b: &[u8], pos: usize) -> usize {
    let h = (u32::from(b[pos]) << 10) ^ (u32::from(b[pos + 1]) << 5) ^ u32::from(b[pos + 2]);
    (h.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS) & HASH_MASK) as usize
}

impl MatchFinder {
    pub fn new(max_chain: u32) -> Self {
        MatchFinder {
            max_chain: max_chain.max(1),
            head: Vec::new(),
            prev: Vec::new(),
        }
    }

    /// Splits `data` into literals and back references. Back references may reach into
    /// the last 32KB of `history`, which must be the bytes that immediately precede
    /// `data` in the uncompressed stream.
    pub fn tokenize(&mut self, history: &[u8], data: &[u8]) -> Vec<DeflateToken> {
        let history = &history[history.len().saturating_sub(WINDOW_SIZE)..];

        let mut buf = Vec::with_capacity(history.len() + data.len());
        buf.extend_from_slice(history);
        buf.extend_from_slice(data);

        self.head.clear();
        self.head.resize(1 << HASH_BITS, NO_POS);
        self.prev.clear();
        self.prev.resize(buf.len(), NO_POS);

        let mut inserted = 0;
        let mut tokens = Vec::with_capacity(data.len() / 2);
        let mut pos = history.len();

        while pos < buf.len() {
            self.insert_upto(&buf, &mut inserted, pos);
            let m = self.longest_match(&buf, pos);

            if m.len < MIN_MATCH {
                tokens.push(DeflateToken::Literal(buf[pos]));
                pos += 1;
                continue;
            }

            if m.len < LAZY_THRESHOLD && pos + 1 < buf.len() {
                self.insert_upto(&buf, &mut inserted, pos + 1);
                let next = self.longest_match(&buf, pos + 1);
                if next.len > m.len {
                    tokens.push(DeflateToken::Literal(buf[pos]));
                    pos += 1;
                    continue;
                }
            }

            tokens.push(DeflateToken::new_ref(m.len, m.dist));
            pos += m.len as usize;
        }

        tokens
    }

    /// adds every position before `end` that hasn't been added yet to the hash chains
    fn insert_upto(&mut self, buf: &[u8], inserted: &mut usize, end: usize) {
        let last_hashable = buf.len().saturating_sub(MIN_MATCH as usize - 1);
        while *inserted < end.min(last_hashable) {
            let p = *inserted;
            let h = hash(buf, p);
            self.prev[p] = self.head[h];
            self.head[h] = p as u32;
            *inserted += 1;
        }
        *inserted = (*inserted).max(end);
    }

    fn longest_match(&self, buf: &[u8], pos: usize) -> Match {
        let max_len = (buf.len() - pos).min(MAX_MATCH as usize);
        if max_len < MIN_MATCH as usize {
            return Match::default();
        }

        let mut best = Match::default();
        let mut candidate = self.head[hash(buf, pos)];
        let mut chain = 0;

        while candidate != NO_POS && chain < self.max_chain {
            let c = candidate as usize;
            let dist = (pos - c) as u32;
            if dist as usize > WINDOW_SIZE {
                break;
            }

            // quick reject on the byte that would extend the best match
            if buf[c + best.len as usize] == buf[pos + best.len as usize] || best.len == 0 {
                let len = buf[c..c + max_len]
                    .iter()
                    .zip(&buf[pos..pos + max_len])
                    .take_while(|(a, b)| a == b)
                    .count() as u32;

                if len > best.len {
                    best = Match { len, dist };
                    if len as usize == max_len {
                        break;
                    }
                }
            }

            candidate = self.prev[c];
            chain += 1;
        }

        if best.len == MIN_MATCH && best.dist > TOO_FAR {
            return Match::default();
        }

        best
    }
}

#[cfg(test)]
fn expand(history: &[u8], tokens: &[DeflateToken]) -> Vec<u8> {
    let mut out = history.to_vec();
    for t in tokens {
        match t {
            DeflateToken::Literal(l) => out.push(*l),
            DeflateToken::Reference(r) => {
                let start = out.len() - r.dist() as usize;
                for i in 0..r.len() as usize {
                    out.push(out[start + i]);
                }
            }
        }
    }
    out.split_off(history.len())
}

#[test]
fn tokens_expand_to_input() {
    let mut f = MatchFinder::new(64);

    let data = b"abcabcabcabc hello hello hello world world abcabc".repeat(20);
    let tokens = f.tokenize(&[], &data);
    assert_eq!(expand(&[], &tokens), data);
    assert!(tokens.len() < data.len() / 4, "repetitive data should compress");

    let runs = vec![0u8; 1000];
    let tokens = f.tokenize(&[], &runs);
    assert_eq!(expand(&[], &tokens), runs);
    assert!(tokens.iter().all(|t| t.len() <= MAX_MATCH));
}

#[test]
fn references_reach_into_history() {
    let mut f = MatchFinder::new(64);

    let history = b"the quick brown fox jumps over the lazy dog".to_vec();
    let data = b"the lazy dog jumps over the quick brown fox".to_vec();
    let tokens = f.tokenize(&history, &data);

    assert_eq!(expand(&history, &tokens), data);
    assert!(tokens
        .iter()
        .any(|t| matches!(t, DeflateToken::Reference(r) if r.dist() as usize > data.len() / 2)));
}

#[test]
fn no_references_beyond_window() {
    let mut f = MatchFinder::new(8);

    let mut history = vec![0u8; 70000];
    for (i, b) in history.iter_mut().enumerate() {
        *b = (i * 7 % 251) as u8;
    }
    let data = history[..1000].to_vec();
    let tokens = f.tokenize(&history, &data);
    assert_eq!(expand(&history[history.len() - WINDOW_SIZE..], &tokens), data);
    for t in tokens {
        if let DeflateToken::Reference(r) = t {
            assert!(r.dist() as usize <= WINDOW_SIZE);
        }
    }
}
