/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{BufReader, Read};

use crate::{
    gzip::{ContentChecksum, GzipHeader, GzipTrailer},
    rezip_error::{err_exit_code, AddContext, ExitCode, RezipError, Result},
    sliding_window::SlidingWindow,
};

use super::{
    bit_reader::BitReader,
    bit_writer::CompressedBits,
    deflate_constants,
    huffman_encoding::{HuffmanOriginalEncoding, HuffmanReader},
};

/// The three kinds of DEFLATE blocks. Only the dynamic block carries its own huffman table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeflateBlockType {
    Stored,
    FixedHuffman,
    DynamicHuffman {
        huffman_encoding: HuffmanOriginalEncoding,
    },
}

impl DeflateBlockType {
    /// the BTYPE field as written in the block header
    pub fn btype(&self) -> u32 {
        match self {
            DeflateBlockType::Stored => 0,
            DeflateBlockType::FixedHuffman => 1,
            DeflateBlockType::DynamicHuffman { .. } => 2,
        }
    }
}

/// One block decoded from the reference stream.
#[derive(Debug)]
pub struct ReferenceBlock {
    pub block_type: DeflateBlockType,

    /// The bits that followed the 3 bit block header in the reference, up to and
    /// including the end of block code. Empty for stored blocks since they are
    /// reframed when copied.
    pub compressed: CompressedBits,

    /// what the block decompresses to
    pub uncompressed: Vec<u8>,

    /// offset of the first uncompressed byte from the start of the reference content
    pub start: u64,
}

impl ReferenceBlock {
    pub fn end(&self) -> u64 {
        self.start + self.uncompressed.len() as u64
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ReferenceState {
    Header,
    StartBlock,
    Done,
    Failed,
}

/// Parses a gzip compressed reference stream one block at a time, keeping the
/// last 32KB of decoded content so that back references can be resolved and
/// compared against the output.
pub struct ReferenceBlockDecoder<R: Read> {
    reader: BufReader<R>,
    bit_reader: BitReader,
    window: SlidingWindow,
    state: ReferenceState,
    checksum: ContentChecksum,
    header: Option<GzipHeader>,
    max_block_size: usize,
    blocks_decoded: u64,
}

impl<R: Read> ReferenceBlockDecoder<R> {
    pub fn new(reference: R, max_block_size: usize) -> Self {
        Self {
            reader: BufReader::new(reference),
            bit_reader: BitReader::new(),
            window: SlidingWindow::new(),
            state: ReferenceState::Header,
            checksum: ContentChecksum::new(),
            header: None,
            max_block_size,
            blocks_decoded: 0,
        }
    }

    /// the gzip header of the reference, once the first block has been requested
    pub fn header(&self) -> Option<&GzipHeader> {
        self.header.as_ref()
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// number of uncompressed bytes decoded so far
    pub fn total_decoded(&self) -> u64 {
        self.window.total_length()
    }

    pub fn blocks_decoded(&self) -> u64 {
        self.blocks_decoded
    }

    /// Decodes the next block. Returns None once the final block and the gzip trailer
    /// have been read. Any error leaves the decoder failed, errors reading the
    /// underlying source are reported as SourceRead, everything else means the
    /// reference itself is broken.
    pub fn next_block(&mut self) -> Result<Option<ReferenceBlock>> {
        match self.state {
            ReferenceState::Done => return Ok(None),
            ReferenceState::Failed => {
                return err_exit_code(
                    ExitCode::InvalidDeflate,
                    "reference decoder failed previously",
                )
            }
            ReferenceState::Header | ReferenceState::StartBlock => {}
        }

        match self.read_block() {
            Ok(b) => Ok(Some(b)),
            Err(e) => {
                self.state = ReferenceState::Failed;
                Err(source_error(e))
            }
        }
    }

    fn read_block(&mut self) -> Result<ReferenceBlock> {
        if self.state == ReferenceState::Header {
            self.header = Some(GzipHeader::read(&mut self.reader).context()?);
            self.state = ReferenceState::StartBlock;
        }

        self.window.shrink_to_dictionary();
        let start = self.window.current_start();

        let last = self.bit_reader.get(1, &mut self.reader)? != 0;
        let mode = self.bit_reader.get(2, &mut self.reader)?;

        let (block_type, compressed) = match mode {
            0 => {
                let padding_bits = self.bit_reader.read_padding_bits();
                if padding_bits != 0 {
                    log::debug!("nonzero padding found before uncompressed block");
                }

                let len = self.bit_reader.get(16, &mut self.reader)?;
                let ilen = self.bit_reader.get(16, &mut self.reader)?;
                if (len ^ ilen) != 0xffff {
                    return err_exit_code(ExitCode::InvalidDeflate, "Block length mismatch");
                }

                self.check_size(len as usize)?;

                for _i in 0..len {
                    let b = self.bit_reader.read_byte(&mut self.reader)?;
                    self.window.push(b);
                }

                (DeflateBlockType::Stored, CompressedBits::new())
            }
            1 => {
                self.bit_reader.start_capture();

                let decoder = HuffmanReader::create_fixed()?;
                self.decode_tokens(&decoder).context()?;

                (
                    DeflateBlockType::FixedHuffman,
                    self.bit_reader.finish_capture(),
                )
            }
            2 => {
                self.bit_reader.start_capture();

                let huffman_encoding =
                    HuffmanOriginalEncoding::read(&mut self.bit_reader, &mut self.reader)
                        .context()?;
                let decoder = HuffmanReader::create_from_original_encoding(&huffman_encoding)?;
                self.decode_tokens(&decoder).context()?;

                (
                    DeflateBlockType::DynamicHuffman { huffman_encoding },
                    self.bit_reader.finish_capture(),
                )
            }
            _ => return err_exit_code(ExitCode::InvalidDeflate, "Invalid block type"),
        };

        let uncompressed = self.window.current().to_vec();
        self.checksum.update(&uncompressed);
        self.blocks_decoded += 1;

        if last {
            self.read_trailer()?;
            self.state = ReferenceState::Done;
        }

        log::trace!(
            "reference block {} type={} last={} start={} len={} bits={}",
            self.blocks_decoded,
            block_type.btype(),
            last,
            start,
            uncompressed.len(),
            compressed.bit_len()
        );

        Ok(ReferenceBlock {
            block_type,
            compressed,
            uncompressed,
            start,
        })
    }

    fn check_size(&self, additional: usize) -> Result<()> {
        if self.window.current().len() + additional > self.max_block_size {
            return err_exit_code(
                ExitCode::BlockTooLarge,
                "reference block decodes to more than the configured maximum",
            );
        }
        Ok(())
    }

    fn decode_tokens(&mut self, decoder: &HuffmanReader) -> Result<()> {
        loop {
            let lit_len: u32 = decoder
                .fetch_next_literal_code(&mut self.bit_reader, &mut self.reader)?
                .into();
            if lit_len < 256 {
                self.check_size(1)?;
                self.window.push(lit_len as u8);
            } else if lit_len == 256 {
                return Ok(());
            } else {
                let lcode: u32 = lit_len - deflate_constants::NONLEN_CODE_COUNT as u32;
                if lcode >= deflate_constants::LEN_CODE_COUNT as u32 {
                    return err_exit_code(ExitCode::InvalidDeflate, "Invalid length code");
                }
                let len: u32 = deflate_constants::MIN_MATCH
                    + deflate_constants::LENGTH_BASE_TABLE[lcode as usize] as u32
                    + self.bit_reader.get(
                        deflate_constants::LENGTH_EXTRA_TABLE[lcode as usize].into(),
                        &mut self.reader,
                    )?;

                let dcode = decoder
                    .fetch_next_distance_char(&mut self.bit_reader, &mut self.reader)?
                    as u32;
                if dcode >= deflate_constants::DIST_CODE_COUNT as u32 {
                    return err_exit_code(ExitCode::InvalidDeflate, "Invalid distance code");
                }

                let dist = 1
                    + deflate_constants::DIST_BASE_TABLE[dcode as usize] as u32
                    + self.bit_reader.get(
                        deflate_constants::DIST_EXTRA_TABLE[dcode as usize].into(),
                        &mut self.reader,
                    )?;

                self.check_size(len as usize)?;
                self.window.append_reference(dist, len)?;
            }
        }
    }

    /// reads the gzip trailer after the final block and checks it against what was decoded
    fn read_trailer(&mut self) -> Result<()> {
        self.bit_reader.read_padding_bits();

        let mut b = [0u8; 8];
        for x in b.iter_mut() {
            *x = self.bit_reader.read_byte(&mut self.reader)?;
        }

        let trailer = GzipTrailer::from_bytes(b);
        let expected = self.checksum.trailer();
        if trailer != expected {
            log::warn!(
                "reference trailer {:?} does not match decoded content {:?}",
                trailer,
                expected
            );
            return err_exit_code(
                ExitCode::InvalidDeflate,
                "reference trailer does not match content",
            );
        }

        Ok(())
    }
}

/// failures of the underlying reader are fatal, unlike problems with the data itself
fn source_error(e: RezipError) -> RezipError {
    if e.exit_code() == ExitCode::OsError {
        RezipError::wrap(ExitCode::SourceRead, &e)
    } else {
        e
    }
}

#[cfg(test)]
fn gzip_with_blocks(segments: &[(&[u8], u8)]) -> (Vec<u8>, Vec<u8>) {
    use crate::deflate::deflate_writer::DeflateWriter;
    use crate::deflate::match_finder::MatchFinder;
    use crate::deflate::deflate_token::DeflateToken;

    // btype 0 = stored, 1 = fixed with matches, 2 = dynamic with matches
    let mut w = DeflateWriter::new();
    let mut content = Vec::new();
    let mut finder = MatchFinder::new(32);
    for &(data, btype) in segments {
        match btype {
            0 => w.write_stored_block(data, false),
            _ => {
                let tokens: Vec<DeflateToken> = finder.tokenize(&content, data);
                if btype == 1 {
                    w.write_fixed_block(&tokens, false).unwrap();
                } else {
                    w.write_dynamic_block(&tokens, false).unwrap();
                }
            }
        }
        content.extend_from_slice(data);
    }
    w.write_final_marker();

    let mut gz = Vec::new();
    GzipHeader::default().write(&mut gz).unwrap();
    gz.extend_from_slice(&w.detach_output());
    let mut c = ContentChecksum::new();
    c.update(&content);
    gz.extend_from_slice(&c.trailer().to_bytes());
    (gz, content)
}

#[test]
fn decode_flate2_stream() {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let mut content = Vec::new();
    for i in 0..20000u32 {
        content.extend_from_slice(format!("line {} of the reference\n", i % 1000).as_bytes());
    }

    for level in [0, 1, 6, 9] {
        let mut e = GzEncoder::new(Vec::new(), Compression::new(level));
        e.write_all(&content).unwrap();
        let gz = e.finish().unwrap();

        let mut d = ReferenceBlockDecoder::new(std::io::Cursor::new(gz), 1 << 24);
        let mut decoded = Vec::new();
        let mut expected_start = 0;
        while let Some(b) = d.next_block().unwrap() {
            assert_eq!(b.start, expected_start);
            expected_start = b.end();
            decoded.extend_from_slice(&b.uncompressed);
        }

        assert!(d.next_block().unwrap().is_none());
        assert_eq!(decoded, content, "level {}", level);
        assert!(d.blocks_decoded() >= 1);
    }
}

#[test]
fn decode_all_block_types() {
    let (gz, content) = gzip_with_blocks(&[
        (b"stored block content", 0),
        (b"fixed fixed fixed fixed block", 1),
        (b"dynamic dynamic dynamic dynamic block with fixed fixed", 2),
    ]);

    let mut d = ReferenceBlockDecoder::new(std::io::Cursor::new(gz), 1 << 24);
    let mut types = Vec::new();
    let mut decoded = Vec::new();
    while let Some(b) = d.next_block().unwrap() {
        types.push(b.block_type.btype());
        decoded.extend_from_slice(&b.uncompressed);
    }

    // the writer always terminates with an empty final block
    assert_eq!(types, [0, 1, 2, 1]);
    assert_eq!(decoded, content);
}

#[test]
fn truncated_reference_fails() {
    let (gz, _) = gzip_with_blocks(&[(b"fixed fixed fixed fixed block", 1)]);

    let mut d = ReferenceBlockDecoder::new(std::io::Cursor::new(&gz[..14]), 1 << 24);
    let e = d.next_block().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ShortRead);
    assert!(e.exit_code().is_reference_error());

    // stays failed
    assert!(d.next_block().is_err());
}

#[test]
fn corrupt_trailer_fails() {
    let (mut gz, _) = gzip_with_blocks(&[(b"some data", 1)]);
    let l = gz.len();
    gz[l - 8] ^= 1;

    let mut d = ReferenceBlockDecoder::new(std::io::Cursor::new(gz), 1 << 24);
    // first block is fine, the empty final block fails when the trailer is checked
    assert!(d.next_block().unwrap().is_some());
    let e = d.next_block().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidDeflate);
}

#[test]
fn oversized_block_fails() {
    let data = vec![7u8; 100000];
    let (gz, _) = gzip_with_blocks(&[(&data, 1)]);

    let mut d = ReferenceBlockDecoder::new(std::io::Cursor::new(gz), 50000);
    let e = d.next_block().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::BlockTooLarge);
}

#[test]
fn source_errors_are_fatal() {
    struct FailingReader;
    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"))
        }
    }

    let mut d = ReferenceBlockDecoder::new(FailingReader, 1 << 24);
    let e = d.next_block().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::SourceRead);
    assert!(!e.exit_code().is_reference_error());
}
