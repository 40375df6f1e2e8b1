/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! gzip member header and trailer (RFC 1952)

use std::io::{ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::rezip_error::{err_exit_code, ExitCode, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;

const FLAG_HCRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;
const FLAG_RESERVED: u8 = 0xe0;

/// operating system byte used when nothing better is known
pub const OS_UNKNOWN: u8 = 255;

/// The fields of a gzip member header that are preserved. The header CRC is
/// checked on read but never written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    pub extra: Option<Vec<u8>>,
    pub filename: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
}

impl Default for GzipHeader {
    fn default() -> Self {
        GzipHeader {
            mtime: 0,
            xfl: 0,
            os: OS_UNKNOWN,
            extra: None,
            filename: None,
            comment: None,
        }
    }
}

impl GzipHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<GzipHeader> {
        let mut fixed = [0; 10];
        reader.read_exact(&mut fixed)?; // Read past the fixed 10-byte GZIP header

        if fixed[0..2] != GZIP_MAGIC {
            return err_exit_code(ExitCode::InvalidGzipHeader, "Missing gzip signature");
        }

        if fixed[2] != METHOD_DEFLATE {
            return err_exit_code(
                ExitCode::InvalidGzipHeader,
                "Unsupported compression method",
            );
        }

        let flags = fixed[3];
        if flags & FLAG_RESERVED != 0 {
            return err_exit_code(ExitCode::InvalidGzipHeader, "Reserved gzip flags set");
        }

        let mut crc = crc32fast::Hasher::new();
        crc.update(&fixed);

        let mut header = GzipHeader {
            mtime: u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
            xfl: fixed[8],
            os: fixed[9],
            ..Default::default()
        };

        if flags & FLAG_EXTRA != 0 {
            let extra_len = reader.read_u16::<LittleEndian>()?;
            let mut extra = vec![0; extra_len as usize];
            reader.read_exact(&mut extra)?;

            crc.update(&extra_len.to_le_bytes());
            crc.update(&extra);
            header.extra = Some(extra);
        }

        if flags & FLAG_NAME != 0 {
            let name = read_zero_terminated(reader)?;
            crc.update(&name);
            crc.update(&[0]);
            header.filename = Some(name);
        }

        if flags & FLAG_COMMENT != 0 {
            let comment = read_zero_terminated(reader)?;
            crc.update(&comment);
            crc.update(&[0]);
            header.comment = Some(comment);
        }

        if flags & FLAG_HCRC != 0 {
            let crc16 = reader.read_u16::<LittleEndian>()?;
            if crc16 != crc.finalize() as u16 {
                return err_exit_code(ExitCode::InvalidGzipHeader, "Header CRC mismatch");
            }
        }

        Ok(header)
    }

    /// Writes the header. Fails with `InvalidInput` if a field can't be represented,
    /// an extra field longer than 65535 bytes or a name or comment containing a NUL.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let extra_len = match &self.extra {
            Some(extra) => Some(u16::try_from(extra.len()).map_err(|_| {
                std::io::Error::new(ErrorKind::InvalidInput, "gzip extra field too long")
            })?),
            None => None,
        };
        if zero_terminated_invalid(&self.filename) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "gzip file name contains a NUL byte",
            ));
        }
        if zero_terminated_invalid(&self.comment) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "gzip comment contains a NUL byte",
            ));
        }

        let mut flags = 0;
        if self.extra.is_some() {
            flags |= FLAG_EXTRA;
        }
        if self.filename.is_some() {
            flags |= FLAG_NAME;
        }
        if self.comment.is_some() {
            flags |= FLAG_COMMENT;
        }

        writer.write_all(&GZIP_MAGIC)?;
        writer.write_u8(METHOD_DEFLATE)?;
        writer.write_u8(flags)?;
        writer.write_u32::<LittleEndian>(self.mtime)?;
        writer.write_u8(self.xfl)?;
        writer.write_u8(self.os)?;

        if let (Some(extra), Some(len)) = (&self.extra, extra_len) {
            writer.write_u16::<LittleEndian>(len)?;
            writer.write_all(extra)?;
        }
        if let Some(name) = &self.filename {
            writer.write_all(name)?;
            writer.write_u8(0)?;
        }
        if let Some(comment) = &self.comment {
            writer.write_all(comment)?;
            writer.write_u8(0)?;
        }

        Ok(())
    }
}

fn zero_terminated_invalid(field: &Option<Vec<u8>>) -> bool {
    field.as_ref().is_some_and(|f| f.contains(&0))
}

fn read_zero_terminated<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    loop {
        let b = reader.read_u8()?;
        if b == 0 {
            return Ok(v);
        }
        v.push(b);
    }
}

/// CRC-32 of the uncompressed content and its length modulo 2^32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GzipTrailer {
    pub crc32: u32,
    pub isize: u32,
}

impl GzipTrailer {
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut r = [0; 8];
        r[0..4].copy_from_slice(&self.crc32.to_le_bytes());
        r[4..8].copy_from_slice(&self.isize.to_le_bytes());
        r
    }

    pub fn from_bytes(b: [u8; 8]) -> Self {
        GzipTrailer {
            crc32: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            isize: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        }
    }
}

/// running checksum and size of everything written to a gzip member
#[derive(Default, Clone)]
pub struct ContentChecksum {
    crc: crc32fast::Hasher,
    total: u64,
}

impl ContentChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.total += data.len() as u64;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn trailer(&self) -> GzipTrailer {
        GzipTrailer {
            crc32: self.crc.clone().finalize(),
            isize: self.total as u32,
        }
    }
}

#[test]
fn header_roundtrip() {
    let h = GzipHeader {
        mtime: 0x12345678,
        xfl: 2,
        os: 3,
        extra: Some(vec![1, 2, 3]),
        filename: Some(b"file.txt".to_vec()),
        comment: Some(b"hello".to_vec()),
    };

    let mut out = Vec::new();
    h.write(&mut out).unwrap();
    out.push(0xaa); // first byte of the deflate stream

    let mut cursor = std::io::Cursor::new(&out);
    let h2 = GzipHeader::read(&mut cursor).unwrap();
    assert_eq!(h, h2);
    assert_eq!(cursor.read_u8().unwrap(), 0xaa);
}

#[test]
fn header_from_flate2() {
    use flate2::{write::GzEncoder, Compression, GzBuilder};

    let mut e: GzEncoder<Vec<u8>> = GzBuilder::new()
        .filename("name.bin")
        .comment("a comment")
        .mtime(99)
        .write(Vec::new(), Compression::default());
    e.write_all(b"some content").unwrap();
    let gz = e.finish().unwrap();

    let h = GzipHeader::read(&mut std::io::Cursor::new(&gz)).unwrap();
    assert_eq!(h.mtime, 99);
    assert_eq!(h.filename.as_deref(), Some(&b"name.bin"[..]));
    assert_eq!(h.comment.as_deref(), Some(&b"a comment"[..]));
}

#[test]
fn bad_headers_rejected() {
    let e = GzipHeader::read(&mut std::io::Cursor::new([0x1f, 0x8c, 8, 0, 0, 0, 0, 0, 0, 0]))
        .unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidGzipHeader);

    let e = GzipHeader::read(&mut std::io::Cursor::new([0x1f, 0x8b, 8])).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ShortRead);
}

#[test]
fn unrepresentable_headers_rejected() {
    let mut out = Vec::new();

    let h = GzipHeader {
        extra: Some(vec![0; 65536]),
        ..Default::default()
    };
    let e = h.write(&mut out).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidInput);

    // the longest extra field that fits is still fine
    let h = GzipHeader {
        extra: Some(vec![0; 65535]),
        ..Default::default()
    };
    h.write(&mut out).unwrap();
    assert_eq!(out.len(), 10 + 2 + 65535);

    let h = GzipHeader {
        filename: Some(b"a\0b".to_vec()),
        ..Default::default()
    };
    assert_eq!(
        h.write(&mut Vec::new()).unwrap_err().kind(),
        ErrorKind::InvalidInput
    );

    let h = GzipHeader {
        comment: Some(vec![b'x', 0]),
        ..Default::default()
    };
    assert_eq!(
        h.write(&mut Vec::new()).unwrap_err().kind(),
        ErrorKind::InvalidInput
    );
}

#[test]
fn checksum_matches_crc32fast() {
    let mut c = ContentChecksum::new();
    c.update(b"AB");
    c.update(b"CD");
    c.update(b"EF");

    let t = c.trailer();
    assert_eq!(t.crc32, crc32fast::hash(b"ABCDEF"));
    assert_eq!(t.isize, 6);
    assert_eq!(GzipTrailer::from_bytes(t.to_bytes()), t);
}
