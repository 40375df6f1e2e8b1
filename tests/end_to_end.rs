/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{Cursor, Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use proptest::prelude::*;

use rezip_rs::{
    DynamicBlockPolicy, ExitCode, GzipHeader, RezipConfig, RezipError, RezipStats, RezipWriter,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// gzips the segments with a sync flush after each one, so every segment
/// starts a new block in the reference
fn gzip_segments(segments: &[&[u8]], level: u32) -> Vec<u8> {
    let mut e = GzEncoder::new(Vec::new(), Compression::new(level));
    for s in segments {
        e.write_all(s).unwrap();
        e.flush().unwrap();
    }
    e.finish().unwrap()
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut d = GzDecoder::new(data);
    let mut r = Vec::new();
    d.read_to_end(&mut r).unwrap();
    r
}

fn copy_config() -> RezipConfig {
    RezipConfig {
        dynamic_blocks: DynamicBlockPolicy::Copy,
        ..RezipConfig::default()
    }
}

/// text with plenty of repetition so that huffman blocks contain back references
fn text(seed: u32, len: usize) -> Vec<u8> {
    const WORDS: [&str; 12] = [
        "alpha ", "beta ", "gamma ", "delta ", "epsilon ", "zeta ", "eta ", "theta ", "iota ",
        "kappa ", "lambda ", "mu\n",
    ];

    let mut r = Vec::with_capacity(len);
    let mut x = seed.wrapping_mul(2654435761).wrapping_add(1);
    while r.len() < len {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        r.extend_from_slice(WORDS[(x % 12) as usize].as_bytes());
    }
    r.truncate(len);
    r
}

fn rezip<'a>(
    reference: &'a [u8],
    config: RezipConfig,
    f: impl FnOnce(&mut RezipWriter<Vec<u8>, Cursor<&'a [u8]>>),
) -> (Vec<u8>, RezipStats) {
    let mut w = RezipWriter::with_config(Vec::new(), Cursor::new(reference), config).unwrap();
    f(&mut w);
    w.close().unwrap();
    let stats = w.stats();
    (w.finish().unwrap(), stats)
}

#[test]
fn roundtrip_identical_content() {
    init_logging();

    let content = text(1, 20000);
    let segments: Vec<&[u8]> = content.chunks(4000).collect();

    for level in [0, 1, 6, 9] {
        let reference = gzip_segments(&segments, level);

        for chunk_size in [7, 1000, 4000, 20000] {
            let (output, stats) = rezip(&reference, copy_config(), |w| {
                for c in content.chunks(chunk_size) {
                    w.write_chunk(c).unwrap();
                }
            });

            assert_eq!(gunzip(&output), content, "level {} chunk {}", level, chunk_size);
            assert_eq!(
                stats.bytes_copied,
                content.len() as u64,
                "level {} chunk {}",
                level,
                chunk_size
            );
            assert!(!stats.fallback);
        }
    }
}

#[test]
fn single_byte_writes() {
    let content = text(2, 5000);
    let reference = gzip_segments(&[&content[..2500], &content[2500..]], 6);

    let (output, stats) = rezip(&reference, copy_config(), |w| {
        for b in content.iter() {
            w.write_all(std::slice::from_ref(b)).unwrap();
        }
    });

    assert_eq!(gunzip(&output), content);
    assert_eq!(stats.bytes_copied, content.len() as u64);
}

#[test]
fn conservative_default_recompresses_dynamic_blocks() {
    let content = text(3, 30000);
    let segments: Vec<&[u8]> = content.chunks(10000).collect();
    let reference = gzip_segments(&segments, 9);

    let (output, stats) = rezip(&reference, RezipConfig::default(), |w| {
        w.write_chunk(&content).unwrap();
    });

    assert_eq!(gunzip(&output), content);
    assert_eq!(
        stats.bytes_copied + stats.bytes_recompressed,
        content.len() as u64
    );
    assert!(stats.bytes_recompressed > 0);
}

#[test]
fn window_gates_huffman_blocks() {
    let first = text(4, 4096);
    // the second block repeats the first, so it is made mostly of back references into it
    let second = [first.as_slice(), first.as_slice()].concat();
    let reference = gzip_segments(&[first.as_slice(), second.as_slice()], 6);

    let mut diverged = first.clone();
    diverged[100..110].copy_from_slice(b"##########");

    let (output, stats) = rezip(&reference, copy_config(), |w| {
        w.write_chunk(&diverged).unwrap();
        w.write_chunk(&second).unwrap();
    });

    let mut expected = diverged.clone();
    expected.extend_from_slice(&second);
    assert_eq!(gunzip(&output), expected);

    // the second block matches byte for byte, but its references would resolve to the changed bytes
    assert_eq!(stats.bytes_copied, 0);

    // with the same history the same block is copied
    let (output, stats) = rezip(&reference, copy_config(), |w| {
        w.write_chunk(&first).unwrap();
        w.write_chunk(&second).unwrap();
    });
    assert_eq!(gunzip(&output), [first.as_slice(), second.as_slice()].concat());
    assert_eq!(stats.bytes_copied, (first.len() + second.len()) as u64);
}

#[test]
fn stored_blocks_ignore_window() {
    let first = text(5, 4096);
    let second = text(6, 8000);
    let reference = gzip_segments(&[first.as_slice(), second.as_slice()], 0);

    let mut diverged = first.clone();
    diverged[0] ^= 0xff;

    let (output, stats) = rezip(&reference, RezipConfig::default(), |w| {
        w.write_chunk(&diverged).unwrap();
        w.write_chunk(&second).unwrap();
    });

    assert_eq!(gunzip(&output), [diverged.as_slice(), second.as_slice()].concat());
    assert_eq!(stats.bytes_copied, second.len() as u64);
    assert_eq!(stats.bytes_recompressed, diverged.len() as u64);
}

#[test]
fn paused_writes_are_recompressed() {
    let segments = [text(7, 3000), text(8, 3000), text(9, 3000)];
    let refs: Vec<&[u8]> = segments.iter().map(|s| s.as_slice()).collect();
    let reference = gzip_segments(&refs, 0);

    let (output, stats) = rezip(&reference, RezipConfig::default(), |w| {
        w.pause().unwrap();
        assert!(w.is_paused());
        w.write_chunk(&segments[0]).unwrap();
        w.resume().unwrap();
        w.write_chunk(&segments[1]).unwrap();
        w.write_chunk(&segments[2]).unwrap();
    });

    assert_eq!(gunzip(&output), segments.concat());
    assert_eq!(stats.bytes_recompressed, 3000);
    assert_eq!(stats.bytes_copied, 6000);
}

#[test]
fn discard_skips_reference_content() {
    let segments = [text(10, 2000), text(11, 2500), text(12, 3000)];
    let refs: Vec<&[u8]> = segments.iter().map(|s| s.as_slice()).collect();
    let reference = gzip_segments(&refs, 0);

    // skip the first segment entirely
    let (output, stats) = rezip(&reference, RezipConfig::default(), |w| {
        w.discard(2000).unwrap();
        w.write_chunk(&segments[1]).unwrap();
        w.write_chunk(&segments[2]).unwrap();
    });
    assert_eq!(gunzip(&output), [segments[1].as_slice(), segments[2].as_slice()].concat());
    assert_eq!(stats.bytes_copied, 5500);
    assert_eq!(stats.bytes_discarded, 2000);

    // skipping into the middle of a block means the rest of it has to be compressed again
    let (output, stats) = rezip(&reference, RezipConfig::default(), |w| {
        w.discard(500).unwrap();
        w.write_chunk(&segments[0][500..]).unwrap();
        w.write_chunk(&segments[1]).unwrap();
    });
    assert_eq!(gunzip(&output), [&segments[0][500..], segments[1].as_slice()].concat());
    assert_eq!(stats.bytes_recompressed, 1500);
    assert_eq!(stats.bytes_copied, 2500);
}

#[test]
fn reset_waits_for_a_full_window() {
    let old_content = text(13, 40000);
    let old_reference = gzip_segments(&[old_content.as_slice()], 6);

    let new_content = text(14, 65536);
    let segments: Vec<&[u8]> = new_content.chunks(8192).collect();
    let new_reference = gzip_segments(&segments, 6);

    let mut w =
        RezipWriter::with_config(Vec::new(), Cursor::new(old_reference.as_slice()), copy_config())
            .unwrap();
    w.write_chunk(&old_content).unwrap();
    let before = w.stats();

    w.reset(Cursor::new(new_reference.as_slice())).unwrap();
    w.write_chunk(&new_content).unwrap();
    w.close().unwrap();
    let after = w.stats();
    let output = w.finish().unwrap();

    assert_eq!(gunzip(&output), [old_content.as_slice(), new_content.as_slice()].concat());

    // only the blocks that start after the first 32KB of the new reference are copied
    assert_eq!(after.bytes_copied - before.bytes_copied, 32768);
    assert_eq!(after.bytes_recompressed - before.bytes_recompressed, 32768);
}

#[test]
fn trailer_matches_standard_encoder() {
    let reference = gzip_segments(&[b"ABCDEF".as_slice()], 6);

    let (output, _) = rezip(&reference, copy_config(), |w| {
        w.write_chunk(b"AB").unwrap();
        w.pause().unwrap();
        w.write_chunk(b"CD").unwrap();
        w.resume().unwrap();
        w.write_chunk(b"EF").unwrap();
    });

    let mut e = GzEncoder::new(Vec::new(), Compression::default());
    e.write_all(b"ABCDEF").unwrap();
    let standard = e.finish().unwrap();

    assert_eq!(gunzip(&output), b"ABCDEF");
    assert_eq!(output[output.len() - 8..], standard[standard.len() - 8..]);
}

#[test]
fn header_is_written_from_config() {
    let config = RezipConfig {
        header: GzipHeader {
            mtime: 1234,
            filename: Some(b"content.txt".to_vec()),
            ..GzipHeader::default()
        },
        ..RezipConfig::default()
    };

    let (output, _) = rezip(&[], config, |w| {
        w.write_chunk(b"some content").unwrap();
    });

    let mut d = GzDecoder::new(output.as_slice());
    let mut r = Vec::new();
    d.read_to_end(&mut r).unwrap();
    assert_eq!(r, b"some content");

    let header = d.header().unwrap();
    assert_eq!(header.filename(), Some(b"content.txt".as_slice()));
    assert_eq!(header.mtime(), 1234);
}

#[test]
fn small_writes_compress_like_large_ones() {
    let content = text(15, 200000);
    let segments: Vec<&[u8]> = content.chunks(20000).collect();
    let reference = gzip_segments(&segments, 6);

    let mut e = GzEncoder::new(Vec::new(), Compression::new(6));
    e.write_all(&content).unwrap();
    let standard = e.finish().unwrap().len();

    // diverges right away, so the rest of the first block goes to the slow path one byte at a time
    let mut changed = content.clone();
    changed[10] = b'#';
    let (output, _) = rezip(&reference, RezipConfig::default(), |w| {
        for b in changed.iter() {
            w.write_all(std::slice::from_ref(b)).unwrap();
        }
    });
    assert_eq!(gunzip(&output), changed);
    assert!(output.len() < standard * 3 / 2, "{} vs {}", output.len(), standard);

    // paused writes are collected the same way
    let (output, _) = rezip(&reference, copy_config(), |w| {
        w.pause().unwrap();
        for line in changed.split_inclusive(|&b| b == b'\n') {
            w.write_all(line).unwrap();
        }
    });
    assert_eq!(gunzip(&output), changed);
    assert!(output.len() < standard * 3 / 2, "{} vs {}", output.len(), standard);
}

#[test]
fn unrepresentable_header_is_rejected() {
    let config = RezipConfig {
        header: GzipHeader {
            filename: Some(b"bad\0name".to_vec()),
            ..GzipHeader::default()
        },
        ..RezipConfig::default()
    };

    let e = RezipWriter::with_config(Vec::new(), Cursor::new(Vec::new()), config)
        .err()
        .unwrap();
    assert_eq!(e.exit_code(), ExitCode::InvalidConfig);

    let config = RezipConfig {
        header: GzipHeader {
            extra: Some(vec![1; 70000]),
            ..GzipHeader::default()
        },
        ..RezipConfig::default()
    };
    assert!(RezipWriter::with_config(Vec::new(), Cursor::new(Vec::new()), config).is_err());
}

#[test]
fn empty_session() {
    let (output, stats) = rezip(&[], RezipConfig::default(), |_| {});
    assert!(gunzip(&output).is_empty());
    assert_eq!(stats.compressed_size, output.len() as u64);
}

#[test]
fn io_write_after_close_fails() {
    let mut w = RezipWriter::new(Vec::new(), Cursor::new(Vec::new())).unwrap();
    w.write_all(b"data").unwrap();
    w.close().unwrap();

    let e: RezipError = w.write(b"more").unwrap_err().into();
    assert_eq!(e.exit_code(), ExitCode::UseAfterClose);
}

#[derive(Debug, Clone)]
enum Edit {
    Keep,
    Change(usize),
    Drop,
    Insert(Vec<u8>),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => Just(Edit::Keep),
        1 => any::<usize>().prop_map(Edit::Change),
        1 => Just(Edit::Drop),
        1 => proptest::collection::vec(any::<u8>(), 1..200).prop_map(Edit::Insert),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// whatever is copied or compressed again, the output always decodes to exactly what was written
    #[test]
    fn output_always_decodes_to_input(
        seeds in proptest::collection::vec((any::<u32>(), 1usize..6000), 1..6),
        edits in proptest::collection::vec(edit_strategy(), 6),
        level in 0u32..10,
        chunk_size in 1usize..9000,
        copy_dynamic in any::<bool>(),
    ) {
        let segments: Vec<Vec<u8>> = seeds.iter().map(|&(s, l)| text(s, l)).collect();
        let refs: Vec<&[u8]> = segments.iter().map(|s| s.as_slice()).collect();
        let reference = gzip_segments(&refs, level);

        let mut content = Vec::new();
        for (segment, edit) in segments.iter().zip(edits.iter()) {
            match edit {
                Edit::Keep => content.extend_from_slice(segment),
                Edit::Change(i) => {
                    let mut s = segment.clone();
                    let i = i % s.len();
                    s[i] = s[i].wrapping_add(1);
                    content.extend_from_slice(&s);
                }
                Edit::Drop => {}
                Edit::Insert(extra) => {
                    content.extend_from_slice(extra);
                    content.extend_from_slice(segment);
                }
            }
        }

        let config = RezipConfig {
            dynamic_blocks: if copy_dynamic { DynamicBlockPolicy::Copy } else { DynamicBlockPolicy::Recompress },
            ..RezipConfig::default()
        };

        let (output, stats) = rezip(&reference, config, |w| {
            for c in content.chunks(chunk_size) {
                w.write_chunk(c).unwrap();
            }
        });

        prop_assert_eq!(gunzip(&output), content.clone());
        prop_assert_eq!(stats.bytes_copied + stats.bytes_recompressed, content.len() as u64);
    }

    /// discarding and pausing at arbitrary points never corrupts the output
    #[test]
    fn discard_and_pause_keep_output_valid(
        seed in any::<u32>(),
        len in 1usize..20000,
        skip in 0u64..30000,
        pause_at in 0usize..20000,
        level in 0u32..10,
    ) {
        let content = text(seed, len);
        let refs: Vec<&[u8]> = content.chunks(3000).collect();
        let reference = gzip_segments(&refs, level);

        let pause_at = pause_at.min(content.len());
        let (output, _) = rezip(&reference, copy_config(), |w| {
            w.discard(skip).unwrap();
            w.write_chunk(&content[..pause_at]).unwrap();
            w.pause().unwrap();
            w.write_chunk(&content[pause_at..]).unwrap();
            w.resume().unwrap();
            w.write_chunk(&content).unwrap();
        });

        prop_assert_eq!(gunzip(&output), [content.as_slice(), content.as_slice()].concat());
    }
}
