/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    deflate::deflate_constants::WINDOW_SIZE,
    rezip_error::{err_exit_code, ExitCode, Result},
};

/// Uncompressed bytes split into the dictionary (the bytes that came before
/// the current block, of which only the last 32KB are addressable by back
/// references) and the current block that is still being appended to.
pub struct SlidingWindow {
    /// the retained data, dictionary followed by the current block
    data: Vec<u8>,

    /// how long the dictionary is, after this the current block starts
    prefix_length: usize,

    /// number of bytes dropped from the front of data over the lifetime of the window
    pos_offset: u64,
}

impl std::fmt::Debug for SlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SlidingWindow {{ prefix_length: {}, pos_offset:{} data: len={} }}",
            self.prefix_length,
            self.pos_offset,
            self.data.len()
        )
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            prefix_length: 0,
            pos_offset: 0,
        }
    }

    /// moves the current block into the dictionary. Data that can no longer be reached
    /// by a back reference is dropped once enough of it has accumulated.
    pub fn shrink_to_dictionary(&mut self) {
        if self.data.len() > 2 * WINDOW_SIZE {
            let amount_to_drop = self.data.len() - WINDOW_SIZE;
            self.data.drain(..amount_to_drop);
            self.pos_offset += amount_to_drop as u64;
        }

        self.prefix_length = self.data.len();
    }

    /// the last 32KB before the current block
    pub fn dictionary(&self) -> &[u8] {
        &self.data[self.prefix_length.saturating_sub(WINDOW_SIZE)..self.prefix_length]
    }

    /// the data appended since the last shrink_to_dictionary
    pub fn current(&self) -> &[u8] {
        &self.data[self.prefix_length..]
    }

    /// the last 32KB of everything appended, including the current block
    pub fn history(&self) -> &[u8] {
        &self.data[self.data.len().saturating_sub(WINDOW_SIZE)..]
    }

    /// the total length of the data from the beginning
    pub fn total_length(&self) -> u64 {
        self.pos_offset + self.data.len() as u64
    }

    /// offset of the current block from the beginning
    pub fn current_start(&self) -> u64 {
        self.pos_offset + self.prefix_length as u64
    }

    pub fn push(&mut self, c: u8) {
        self.data.push(c);
    }

    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// true if the bytes before the current block of `other` are the same bytes
    /// that come right before the current block of this window, meaning every back
    /// reference that is valid in `other` resolves to the same bytes here.
    pub fn dictionary_matches(&self, other: &SlidingWindow) -> bool {
        let mine = &self.data[..self.prefix_length];
        mine.ends_with(other.dictionary())
    }

    /// writes a reference to the buffer, which copies the text from a previous location
    /// to the current location. In most cases this is non-overlapping, but there are some
    /// cases where there is overlap between the source and destination.
    #[inline(always)]
    pub fn append_reference(&mut self, dist: u32, len: u32) -> Result<()> {
        if dist as usize > self.data.len() || dist as usize > WINDOW_SIZE {
            return err_exit_code(ExitCode::InvalidDeflate, "Invalid distance in reference");
        }

        if dist == 1 {
            // special case for distance 1, just repeat the last byte n times
            let byte = self.data[self.data.len() - 1];
            self.data.resize(self.data.len() + len as usize, byte);
        } else if dist >= len {
            // no overlap
            self.data.extend_from_within(
                self.data.len() - dist as usize..self.data.len() - dist as usize + len as usize,
            );
        } else {
            // general case, rarely called, copy one character at a time
            let start = self.data.len() - dist as usize;

            self.data.reserve(len as usize);

            for i in 0..len {
                let byte = self.data[start + i as usize];
                self.data.push(byte);
            }
        }
        Ok(())
    }
}

#[test]
fn test_length_behavior() {
    let mut w = SlidingWindow::new();
    w.append(&[0; 10000]);
    assert_eq!(w.total_length(), 10000);
    assert_eq!(w.current().len(), 10000);
    assert_eq!(w.dictionary().len(), 0);

    w.shrink_to_dictionary();
    w.append(&[1; 50000]);
    assert_eq!(w.dictionary().len(), 10000);
    assert_eq!(w.current_start(), 10000);
    assert_eq!(w.history().len(), WINDOW_SIZE);
    assert!(w.history().iter().all(|&b| b == 1));

    w.shrink_to_dictionary();
    w.append(&[2; 10]);
    assert_eq!(w.total_length(), 60010);
    assert_eq!(w.current_start(), 60000);
    assert_eq!(w.dictionary().len(), WINDOW_SIZE);
    assert!(w.dictionary().iter().all(|&b| b == 1));
    assert_eq!(w.current(), [2; 10]);
}

#[test]
fn test_references() {
    let mut w = SlidingWindow::new();
    w.append(b"abc");
    w.append_reference(3, 7).unwrap();
    w.append_reference(1, 2).unwrap();
    assert_eq!(w.current(), b"abcabcabcaaa");

    // distance beyond the start of the data
    assert_eq!(
        w.append_reference(100, 3).unwrap_err().exit_code(),
        ExitCode::InvalidDeflate
    );
}

#[test]
fn test_dictionary_matches() {
    let mut output = SlidingWindow::new();
    let mut reference = SlidingWindow::new();

    // reference only has part of the history the output has
    output.append(b"xxxxhello ");
    output.shrink_to_dictionary();
    reference.append(b"hello ");
    reference.shrink_to_dictionary();
    assert!(output.dictionary_matches(&reference));

    // output has less history than the reference could point to
    assert!(!reference.dictionary_matches(&output));

    output.append(b"world");
    output.shrink_to_dictionary();
    reference.append(b"w0rld");
    reference.shrink_to_dictionary();
    assert!(!output.dictionary_matches(&reference));
}
