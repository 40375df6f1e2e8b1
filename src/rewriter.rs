/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{Read, Write};

use crate::{
    deflate::{
        deflate_constants::WINDOW_SIZE,
        deflate_reader::{DeflateBlockType, ReferenceBlock, ReferenceBlockDecoder},
        deflate_writer::DeflateWriter,
    },
    gzip::{ContentChecksum, GzipHeader},
    rezip_error::{err_exit_code, ExitCode, RezipError, Result},
    slow_path::{EncodedBlockType, SlowPathEncoder},
    sliding_window::SlidingWindow,
};

/// What to do with dynamic huffman blocks of the reference whose content and
/// window match the output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DynamicBlockPolicy {
    /// always compress the content again
    #[default]
    Recompress,

    /// copy the block like a fixed huffman block. The block carries its own table, so
    /// matching content and window are enough for the copy to decode correctly.
    Copy,
}

#[derive(Debug, Clone)]
pub struct RezipConfig {
    pub dynamic_blocks: DynamicBlockPolicy,

    /// The largest block we accept from the reference, measured in uncompressed
    /// bytes. A larger block disables the reference for the rest of the session
    /// since we would have to hold all of it in memory.
    pub max_reference_block_size: usize,

    /// The maximum number of reference blocks that are decoded to catch up with
    /// the output in a single step. Exceeding it disables the reference.
    pub max_resync_blocks: u64,

    /// maximum uncompressed bytes per block written by the slow path
    pub slow_block_size: usize,

    /// Maximum number of lookups in the hash chain when compressing
    pub max_chain: u32,

    /// header written at the start of the output
    pub header: GzipHeader,
}

impl Default for RezipConfig {
    fn default() -> Self {
        RezipConfig {
            dynamic_blocks: DynamicBlockPolicy::Recompress,
            max_reference_block_size: 16 * 1024 * 1024,
            max_resync_blocks: 1 << 20,
            slow_block_size: 64 * 1024,
            max_chain: 128,
            header: GzipHeader::default(),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RezipStats {
    /// reference blocks copied to the output as is
    pub blocks_copied: u64,
    pub bytes_copied: u64,

    /// blocks written by compressing the content again
    pub blocks_recompressed: u64,
    pub bytes_recompressed: u64,

    pub reference_blocks_decoded: u64,
    pub bytes_discarded: u64,

    /// total bytes passed in by the caller
    pub uncompressed_size: u64,

    /// bytes written to the sink, including header and trailer
    pub compressed_size: u64,

    /// the reference can no longer be used and everything is compressed again
    pub fallback: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
    Failed,
}

/// What to do with the pending bytes given the block they line up with.
enum Step {
    /// the pending bytes match the start of the block, but don't cover all of it yet
    Wait,

    /// compress this many pending bytes again
    Recompress(usize),

    /// the block can be copied, consuming this many pending bytes
    Copy(usize),
}

/// Writes a gzip stream of the bytes passed in, copying compressed blocks from a
/// reference gzip stream wherever the content lines up with the reference.
///
/// The reference cursor is the offset into the decoded reference content that
/// corresponds to the next byte the caller writes. Bytes that start a reference
/// block are queued until they cover the whole block, then the block is either
/// copied or the bytes are handed to the slow path. Bytes written while the cursor
/// is in the middle of a block go to the slow path up to the end of that block,
/// after which the cursor is back on a block boundary.
///
/// The slow path collects its bytes and compresses them in blocks of up to
/// `slow_block_size`, so a stream of small writes still compresses well.
pub struct RezipWriter<W: Write, R: Read> {
    sink: W,
    config: RezipConfig,
    state: SessionState,
    paused: bool,

    /// None once the reference has been given up on
    reference: Option<ReferenceBlockDecoder<R>>,

    /// the most recently decoded reference block, if the cursor hasn't moved past it
    lookahead: Option<ReferenceBlock>,

    ref_cursor: u64,

    /// bytes from the caller, those from pending_start on line up with the
    /// start of the lookahead block
    pending: Vec<u8>,
    pending_start: usize,

    /// bytes headed for the slow path that haven't been compressed yet. The
    /// reference cursor has already moved past them.
    deferred: Vec<u8>,

    /// Huffman blocks that start before this offset in the reference are never
    /// copied. After a reset the output has history that the new reference
    /// doesn't, so a full window of new reference content has to be seen first.
    window_established_at: u64,

    writer: DeflateWriter,
    slow_path: SlowPathEncoder,
    output_window: SlidingWindow,
    checksum: ContentChecksum,
    stats: RezipStats,
}

impl<W: Write, R: Read> RezipWriter<W, R> {
    /// Creates a session with the default configuration and writes the gzip header to the sink.
    pub fn new(sink: W, reference: R) -> Result<Self> {
        Self::with_config(sink, reference, RezipConfig::default())
    }

    pub fn with_config(sink: W, reference: R, config: RezipConfig) -> Result<Self> {
        let mut header = Vec::new();
        config
            .header
            .write(&mut header)
            .map_err(|e| RezipError::wrap(ExitCode::InvalidConfig, &e))?;

        let mut r = RezipWriter {
            sink,
            reference: Some(ReferenceBlockDecoder::new(
                reference,
                config.max_reference_block_size,
            )),
            slow_path: SlowPathEncoder::new(config.max_chain, config.slow_block_size),
            config,
            state: SessionState::Open,
            paused: false,
            lookahead: None,
            ref_cursor: 0,
            pending: Vec::new(),
            pending_start: 0,
            deferred: Vec::new(),
            window_established_at: 0,
            writer: DeflateWriter::new(),
            output_window: SlidingWindow::new(),
            checksum: ContentChecksum::new(),
            stats: RezipStats::default(),
        };

        r.write_sink(&header)?;
        Ok(r)
    }

    pub fn stats(&self) -> RezipStats {
        self.stats
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Compresses the chunk, copying from the reference where possible. Bytes that
    /// might still be copied as part of a reference block are held back until the
    /// rest of the block arrives, and bytes for the slow path until a full block
    /// of them is available.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<usize> {
        self.run(|s| {
            if chunk.is_empty() {
                return Ok(0);
            }

            s.checksum.update(chunk);
            s.stats.uncompressed_size = s.checksum.total();

            if s.paused || s.reference.is_none() {
                s.defer(chunk)?;
            } else {
                s.pending.extend_from_slice(chunk);
                s.process_pending()?;
            }

            s.flush_writer()?;
            Ok(chunk.len())
        })
    }

    /// Writes after this are always compressed again, without looking at the reference.
    pub fn pause(&mut self) -> Result<()> {
        self.run(|s| {
            s.flush_pending()?;
            s.paused = true;
            s.flush_writer()
        })
    }

    pub fn resume(&mut self) -> Result<()> {
        self.run(|s| {
            s.paused = false;
            Ok(())
        })
    }

    /// Skips `n` bytes of the reference content without writing anything, for
    /// when the caller knows the reference has content the output won't.
    pub fn discard(&mut self, n: u64) -> Result<()> {
        self.run(|s| {
            s.flush_pending()?;

            s.ref_cursor = s.ref_cursor.saturating_add(n);
            s.stats.bytes_discarded = s.stats.bytes_discarded.saturating_add(n);

            if s.reference.is_some() {
                s.advance_lookahead()?;
                if let Some(r) = &s.reference {
                    log::debug!(
                        "discarded {} bytes, reference decoded up to {}",
                        n,
                        r.total_decoded()
                    );
                }
            }

            s.flush_writer()
        })
    }

    /// Replaces the reference with a new stream whose content lines up with the next
    /// byte written. Huffman blocks of the new reference are only copied once it has
    /// built up a full window of its own.
    pub fn reset(&mut self, reference: R) -> Result<()> {
        self.run(|s| {
            s.flush_pending()?;

            s.reference = Some(ReferenceBlockDecoder::new(
                reference,
                s.config.max_reference_block_size,
            ));
            s.lookahead = None;
            s.ref_cursor = 0;
            s.window_established_at = WINDOW_SIZE as u64;
            s.stats.fallback = false;

            log::debug!(
                "reference reset after {} bytes of output content",
                s.stats.uncompressed_size
            );

            s.flush_writer()
        })
    }

    /// Terminates the stream and writes the gzip trailer. Nothing can be written afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.run(|s| {
            s.flush_pending()?;

            s.writer.write_final_marker();
            s.flush_writer()?;
            let trailer = s.checksum.trailer().to_bytes();
            s.write_sink(&trailer)?;
            s.sink
                .flush()
                .map_err(|e| RezipError::wrap(ExitCode::SinkWrite, &e))?;

            s.state = SessionState::Closed;
            s.reference = None;
            s.lookahead = None;

            log::debug!("closed session {:?}", s.stats);
            Ok(())
        })
    }

    /// closes the session if that hasn't happened yet and returns the sink
    pub fn finish(mut self) -> Result<W> {
        match self.state {
            SessionState::Open => self.close()?,
            SessionState::Closed => {}
            SessionState::Failed => {
                return err_exit_code(ExitCode::SessionFailed, "session failed previously")
            }
        }

        Ok(self.sink)
    }

    /// Runs an operation on an open session. Any error that makes it out of an
    /// operation is fatal, problems with the reference are handled internally.
    fn run<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match self.state {
            SessionState::Open => {}
            SessionState::Closed => {
                return err_exit_code(ExitCode::UseAfterClose, "session already closed")
            }
            SessionState::Failed => {
                return err_exit_code(ExitCode::SessionFailed, "session failed previously")
            }
        }

        let r = f(self);
        if let Err(e) = &r {
            log::warn!("session failed: {}", e);
            self.state = SessionState::Failed;
        }
        r
    }

    fn process_pending(&mut self) -> Result<()> {
        while self.pending_start < self.pending.len() {
            if !self.advance_lookahead()? {
                self.defer_pending(self.pending.len() - self.pending_start)?;
                break;
            }

            let Some(block) = self.lookahead.take() else {
                break;
            };

            match self.next_step(&block)? {
                Step::Wait => {
                    self.lookahead = Some(block);
                    break;
                }
                Step::Recompress(n) => {
                    self.defer_pending(n)?;
                    self.lookahead = Some(block);
                }
                Step::Copy(n) => {
                    self.pending_start += n;
                    self.copy(&block);
                }
            }
        }

        self.compact_pending();
        Ok(())
    }

    /// drops the consumed part of the queue once it is larger than what is left
    fn compact_pending(&mut self) {
        let remaining = self.pending.len() - self.pending_start;
        if remaining == 0 {
            self.pending.clear();
            self.pending_start = 0;
        } else if self.pending_start > remaining {
            self.pending.drain(..self.pending_start);
            self.pending_start = 0;
        }
    }

    fn next_step(&mut self, block: &ReferenceBlock) -> Result<Step> {
        let block_len = block.uncompressed.len();
        let pending = &self.pending[self.pending_start..];

        if block.start < self.ref_cursor {
            // the output diverged somewhere inside this block, so the rest of it can't be copied
            let remaining = (block.end() - self.ref_cursor) as usize;
            return Ok(Step::Recompress(pending.len().min(remaining)));
        }

        let available = pending.len().min(block_len);
        if pending[..available] != block.uncompressed[..available] {
            log::trace!("content differs from reference block at {}", block.start);
            return Ok(Step::Recompress(available));
        }

        if available < block_len {
            return Ok(Step::Wait);
        }

        if !self.copy_allowed(block) {
            return Ok(Step::Recompress(block_len));
        }

        // the window has to contain everything written before the block
        self.flush_deferred()?;

        if self.window_matches(block) {
            Ok(Step::Copy(block_len))
        } else {
            Ok(Step::Recompress(block_len))
        }
    }

    /// The content matches, check whether the block type and the reference allow a copy
    /// before looking at the window.
    fn copy_allowed(&self, block: &ReferenceBlock) -> bool {
        let huffman_copy_allowed = match block.block_type {
            // no back references, so the window is irrelevant
            DeflateBlockType::Stored => return true,
            DeflateBlockType::FixedHuffman => true,
            DeflateBlockType::DynamicHuffman { .. } => {
                self.config.dynamic_blocks == DynamicBlockPolicy::Copy
            }
        };

        if !huffman_copy_allowed {
            log::trace!("dynamic block at {} is compressed again", block.start);
            return false;
        }

        if block.start < self.window_established_at {
            log::trace!(
                "block at {} precedes a full window of the new reference",
                block.start
            );
            return false;
        }

        true
    }

    /// whether the compressed bits of the block decode to the same content in the output
    fn window_matches(&mut self, block: &ReferenceBlock) -> bool {
        if block.block_type == DeflateBlockType::Stored {
            return true;
        }

        let Some(reference) = &self.reference else {
            return false;
        };

        // the lookahead block is always the last one decoded, so the dictionary of the
        // reference window is what this block's back references can reach
        self.output_window.shrink_to_dictionary();
        if !self.output_window.dictionary_matches(reference.window()) {
            log::trace!("window differs before reference block at {}", block.start);
            return false;
        }

        true
    }

    /// Makes sure the lookahead block contains the reference cursor, decoding further
    /// blocks as necessary. Returns false if the reference is unusable, in which case
    /// everything from now on is compressed again.
    fn advance_lookahead(&mut self) -> Result<bool> {
        let mut decoded = 0;

        loop {
            let Some(reference) = self.reference.as_mut() else {
                return Ok(false);
            };

            if let Some(b) = &self.lookahead {
                if b.end() > self.ref_cursor {
                    return Ok(true);
                }
            }
            self.lookahead = None;

            if decoded >= self.config.max_resync_blocks {
                self.fall_back(RezipError::new(
                    ExitCode::ResyncFailure,
                    "too many reference blocks decoded to catch up with the output",
                ));
                return Ok(false);
            }

            match reference.next_block() {
                Ok(Some(b)) => {
                    decoded += 1;
                    self.stats.reference_blocks_decoded += 1;
                    if reference.blocks_decoded() == 1 {
                        log::debug!("reference header {:?}", reference.header());
                    }
                    self.lookahead = Some(b);
                }
                Ok(None) => {
                    log::debug!(
                        "reference exhausted at {}, output continues at {}",
                        reference.total_decoded(),
                        self.ref_cursor
                    );
                    self.fall_back_quietly();
                    return Ok(false);
                }
                Err(e) if e.exit_code().is_reference_error() => {
                    self.fall_back(e);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fall_back(&mut self, e: RezipError) {
        log::warn!(
            "reference disabled after {} blocks, compressing the rest: {}",
            self.stats.reference_blocks_decoded,
            e
        );
        self.fall_back_quietly();
    }

    fn fall_back_quietly(&mut self) {
        self.reference = None;
        self.lookahead = None;
        self.stats.fallback = true;
    }

    fn copy(&mut self, block: &ReferenceBlock) {
        debug_assert!(self.deferred.is_empty());

        log::trace!(
            "copying reference block type={} start={} len={}",
            block.block_type.btype(),
            block.start,
            block.uncompressed.len()
        );

        self.writer.copy_block(block);
        self.output_window.shrink_to_dictionary();
        self.output_window.append(&block.uncompressed);
        self.ref_cursor = block.end();

        self.stats.blocks_copied += 1;
        self.stats.bytes_copied += block.uncompressed.len() as u64;
    }

    /// Queues bytes for the slow path. The reference cursor moves along with the
    /// output so that the reference stays lined up by position.
    fn defer(&mut self, data: &[u8]) -> Result<()> {
        self.deferred.extend_from_slice(data);
        self.ref_cursor = self.ref_cursor.saturating_add(data.len() as u64);
        self.compress_full_blocks()
    }

    /// moves the next `n` pending bytes to the slow path
    fn defer_pending(&mut self, n: usize) -> Result<()> {
        let start = self.pending_start;
        self.pending_start += n;
        self.deferred
            .extend_from_slice(&self.pending[start..start + n]);
        self.ref_cursor = self.ref_cursor.saturating_add(n as u64);
        self.compress_full_blocks()
    }

    /// compresses as many full slow path blocks as are queued
    fn compress_full_blocks(&mut self) -> Result<()> {
        let block_size = self.config.slow_block_size.max(1);
        let full = self.deferred.len() / block_size * block_size;
        if full == 0 {
            return Ok(());
        }

        let rest = self.deferred.split_off(full);
        let data = std::mem::replace(&mut self.deferred, rest);
        self.recompress(&data)
    }

    fn flush_deferred(&mut self) -> Result<()> {
        let data = std::mem::take(&mut self.deferred);
        self.recompress(&data)
    }

    fn recompress(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.output_window.shrink_to_dictionary();
        let blocks = self
            .slow_path
            .encode(&mut self.writer, self.output_window.history(), data)?;
        self.output_window.append(data);

        self.stats.blocks_recompressed += blocks.len() as u64;
        self.stats.bytes_recompressed += data.len() as u64;

        if log::log_enabled!(log::Level::Trace) {
            let stored = blocks
                .iter()
                .filter(|&&b| b == EncodedBlockType::Stored)
                .count();
            log::trace!(
                "recompressed {} bytes into {} blocks ({} stored)",
                data.len(),
                blocks.len(),
                stored
            );
        }

        Ok(())
    }

    /// compresses everything that is queued, since it can't wait for the rest of its block
    fn flush_pending(&mut self) -> Result<()> {
        self.defer_pending(self.pending.len() - self.pending_start)?;
        self.pending.clear();
        self.pending_start = 0;
        self.flush_deferred()
    }

    fn flush_writer(&mut self) -> Result<()> {
        let output = self.writer.detach_output();
        self.write_sink(&output)
    }

    fn write_sink(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.sink
            .write_all(data)
            .map_err(|e| RezipError::wrap(ExitCode::SinkWrite, &e))?;
        self.stats.compressed_size += data.len() as u64;
        Ok(())
    }
}

impl<W: Write, R: Read> Write for RezipWriter<W, R> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.write_chunk(buf)?)
    }

    /// Flushes the sink. Only complete bytes of finished blocks have been passed to it:
    /// bytes waiting for the rest of a reference block or for a full slow path block
    /// are held back until they can be compressed or the session is closed.
    fn flush(&mut self) -> std::io::Result<()> {
        match self.state {
            SessionState::Open => self.sink.flush(),
            SessionState::Closed => Ok(()),
            SessionState::Failed => Err(RezipError::new(
                ExitCode::SessionFailed,
                "session failed previously",
            )
            .into()),
        }
    }
}

/// compresses with a sync flush every `block_len` bytes so the block boundaries are known
#[cfg(test)]
fn reference_gzip(content: &[u8], level: u32, block_len: usize) -> Vec<u8> {
    use flate2::{write::GzEncoder, Compression};

    let mut e = GzEncoder::new(Vec::new(), Compression::new(level));
    for c in content.chunks(block_len) {
        e.write_all(c).unwrap();
        e.flush().unwrap();
    }
    e.finish().unwrap()
}

#[cfg(test)]
fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut d = flate2::read::GzDecoder::new(data);
    let mut r = Vec::new();
    d.read_to_end(&mut r).unwrap();
    r
}

#[cfg(test)]
fn sample_content(len: usize) -> Vec<u8> {
    let mut r = Vec::with_capacity(len);
    let mut i = 0u32;
    while r.len() < len {
        r.extend_from_slice(format!("entry {} value {}\n", i, i.wrapping_mul(2654435761) % 1000).as_bytes());
        i += 1;
    }
    r.truncate(len);
    r
}

#[test]
fn identical_content_is_copied() {
    crate::init_logging();

    let content = sample_content(200000);
    let reference = reference_gzip(&content, 6, 10000);

    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(&reference)).unwrap();
    for c in content.chunks(1000) {
        assert_eq!(w.write_chunk(c).unwrap(), c.len());
    }
    w.close().unwrap();
    let stats = w.stats();
    let output = w.finish().unwrap();

    assert_eq!(gunzip(&output), content);
    assert_eq!(
        stats.bytes_copied + stats.bytes_recompressed,
        content.len() as u64
    );
    // blocks of this size are dynamic, which are compressed again by default
    assert!(stats.bytes_recompressed >= content.len() as u64 / 2);

    let config = RezipConfig {
        dynamic_blocks: DynamicBlockPolicy::Copy,
        ..RezipConfig::default()
    };
    let mut w =
        RezipWriter::with_config(Vec::new(), std::io::Cursor::new(&reference), config).unwrap();
    w.write_chunk(&content).unwrap();
    w.close().unwrap();
    let stats = w.stats();
    let output = w.finish().unwrap();

    assert_eq!(gunzip(&output), content);
    assert_eq!(stats.bytes_copied, content.len() as u64);
    assert_eq!(stats.bytes_recompressed, 0);
    assert!(!stats.fallback);
    assert_eq!(stats.compressed_size, output.len() as u64);
}

#[test]
fn divergent_content_is_recompressed() {
    let content = sample_content(100000);
    let reference = reference_gzip(&content, 1, 4096);

    let mut changed = content.clone();
    changed[50000..50010].copy_from_slice(b"0123456789");

    let config = RezipConfig {
        dynamic_blocks: DynamicBlockPolicy::Copy,
        ..RezipConfig::default()
    };
    let mut w =
        RezipWriter::with_config(Vec::new(), std::io::Cursor::new(&reference), config).unwrap();
    for c in changed.chunks(777) {
        w.write_chunk(c).unwrap();
    }
    w.close().unwrap();
    let stats = w.stats();

    assert_eq!(gunzip(w.get_ref()), changed);
    assert!(stats.bytes_recompressed > 0);
    assert!(stats.bytes_copied > 0);
    assert_eq!(
        stats.bytes_copied + stats.bytes_recompressed,
        changed.len() as u64
    );
}

#[test]
fn broken_reference_falls_back() {
    let content = sample_content(50000);
    let mut reference = reference_gzip(&content, 6, 8192);
    reference.truncate(reference.len() / 2);

    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(reference)).unwrap();
    w.write_chunk(&content).unwrap();
    let output = w.finish().unwrap();
    assert_eq!(gunzip(&output), content);

    // garbage instead of a gzip header
    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(vec![0u8; 100])).unwrap();
    w.write_chunk(b"hello").unwrap();
    assert!(w.stats().fallback);
    let output = w.finish().unwrap();
    assert_eq!(gunzip(&output), b"hello");
}

#[test]
fn use_after_close_fails() {
    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(Vec::new())).unwrap();
    w.write_chunk(b"abc").unwrap();
    w.close().unwrap();

    assert_eq!(
        w.write_chunk(b"more").unwrap_err().exit_code(),
        ExitCode::UseAfterClose
    );
    assert_eq!(w.close().unwrap_err().exit_code(), ExitCode::UseAfterClose);
    assert_eq!(w.pause().unwrap_err().exit_code(), ExitCode::UseAfterClose);
    assert_eq!(w.discard(1).unwrap_err().exit_code(), ExitCode::UseAfterClose);

    // a closed session still hands back its output
    let output = w.finish().unwrap();
    assert_eq!(gunzip(&output), b"abc");
}

#[test]
fn sink_errors_are_fatal() {
    struct FailingSink {
        allowed: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.len() > self.allowed {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "sink full"));
            }
            self.allowed -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    // not even room for the header
    let e = RezipWriter::new(FailingSink { allowed: 0 }, std::io::Cursor::new(Vec::new()))
        .err()
        .unwrap();
    assert_eq!(e.exit_code(), ExitCode::SinkWrite);

    let mut w =
        RezipWriter::new(FailingSink { allowed: 10 }, std::io::Cursor::new(Vec::new())).unwrap();
    // the slow path holds on to less than a block, so nothing reaches the sink until close
    w.write_chunk(&sample_content(10000)).unwrap();
    let e = w.close().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::SinkWrite);

    assert_eq!(
        w.write_chunk(b"x").unwrap_err().exit_code(),
        ExitCode::SessionFailed
    );
    assert_eq!(w.close().unwrap_err().exit_code(), ExitCode::SessionFailed);
    assert!(w.flush().is_err());
}

#[test]
fn pause_flushes_partial_block() {
    let content = sample_content(20000);
    let reference = reference_gzip(&content, 0, 10000);

    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(&reference)).unwrap();

    // a prefix of the first stored block is held back
    w.write_chunk(&content[..100]).unwrap();
    assert_eq!(w.stats().bytes_recompressed, 0);

    w.pause().unwrap();
    assert!(w.is_paused());
    assert_eq!(w.stats().bytes_recompressed, 100);

    w.write_chunk(&content[100..]).unwrap();
    w.resume().unwrap();
    assert!(!w.is_paused());

    let stats = w.stats();
    assert_eq!(stats.bytes_copied, 0);
    assert_eq!(gunzip(&w.finish().unwrap()), content);
}

#[test]
fn large_write_against_small_blocks() {
    let content = sample_content(4 << 20);
    let reference = reference_gzip(&content, 0, 4096);
    let split = content.len() - 100;

    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(&reference)).unwrap();
    w.write_chunk(&content[..split]).unwrap();

    // all complete blocks were consumed, only the prefix of the last one is still queued
    assert_eq!(w.stats().bytes_copied, (content.len() - 4096) as u64);
    assert_eq!(w.pending_start, 0);
    assert_eq!(w.pending.len(), 4096 - 100);

    w.write_chunk(&content[split..]).unwrap();
    assert!(w.pending.is_empty());
    assert_eq!(w.stats().bytes_copied, content.len() as u64);

    assert_eq!(gunzip(&w.finish().unwrap()), content);
}

#[test]
fn slow_path_collects_small_writes() {
    let content = sample_content(100000);
    let config = RezipConfig {
        slow_block_size: 30000,
        ..RezipConfig::default()
    };

    // empty reference, so everything goes to the slow path
    let mut w =
        RezipWriter::with_config(Vec::new(), std::io::Cursor::new(Vec::new()), config).unwrap();
    for b in content.iter() {
        w.write_chunk(std::slice::from_ref(b)).unwrap();
    }
    assert!(w.stats().fallback);
    assert_eq!(w.stats().bytes_recompressed, 90000);
    assert_eq!(w.deferred.len(), 10000);

    w.close().unwrap();
    let stats = w.stats();
    assert_eq!(stats.bytes_recompressed, 100000);
    assert_eq!(stats.blocks_recompressed, 4);
    assert_eq!(gunzip(&w.finish().unwrap()), content);
}

#[test]
fn huge_discard_falls_back() {
    let content = sample_content(20000);
    let reference = reference_gzip(&content, 6, 5000);

    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(&reference)).unwrap();
    w.discard(u64::MAX).unwrap();
    w.discard(10).unwrap();
    assert_eq!(w.stats().bytes_discarded, u64::MAX);
    assert!(w.stats().fallback);

    w.write_chunk(&content).unwrap();
    assert_eq!(gunzip(&w.finish().unwrap()), content);
}

#[test]
fn flush_keeps_held_back_bytes() {
    let content = sample_content(20000);
    let reference = reference_gzip(&content, 0, 10000);

    let mut w = RezipWriter::new(Vec::new(), std::io::Cursor::new(&reference)).unwrap();
    w.write_all(&content[..5000]).unwrap();
    w.flush().unwrap();

    // only the header, the prefix still waits for the rest of its block
    assert_eq!(w.get_ref().len(), 10);

    w.write_all(&content[5000..]).unwrap();
    w.flush().unwrap();
    assert!(w.get_ref().len() > 20000);
    assert_eq!(w.stats().bytes_copied, 20000);
    assert_eq!(gunzip(&w.finish().unwrap()), content);
}
