/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use clap::{Parser, ValueEnum};
use env_logger::Builder;
use log::LevelFilter;

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read},
    path::PathBuf,
    time::Instant,
};

use rezip_rs::{DynamicBlockPolicy, RezipConfig, RezipWriter};

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DynamicBlocks {
    Recompress,
    Copy,
}

#[derive(Parser)]
#[command(name = "rezip_util")]
#[command(about = "Compresses a file to gzip, copying blocks from a previous gzip of similar content", long_about = None)]
struct Cli {
    /// previously compressed gzip file used as the reference
    reference: PathBuf,

    /// uncompressed file to compress
    input: PathBuf,

    /// gzip file to write
    output: PathBuf,

    /// whether dynamic huffman blocks of the reference may be copied
    #[arg(long, default_value = "recompress")]
    #[arg(value_enum)]
    dynamic_blocks: DynamicBlocks,

    /// Maximum chain length used when compressing content that can't be copied
    #[arg(long, default_value = "128")]
    max_chain: u32,

    /// size of the chunks the input is passed in as
    #[arg(long, default_value = "65536")]
    chunk_size: usize,

    /// level of logging to use
    #[arg(long, default_value = "Error")]
    loglevel: LevelFilter,
}

fn main() {
    let cli = Cli::parse();

    Builder::new().filter_level(cli.loglevel).init();

    if let Err(e) = run(&cli) {
        eprintln!("rezip failed: {}", e);
        std::process::exit(e.exit_code().as_integer_error_code());
    }
}

fn run(cli: &Cli) -> rezip_rs::Result<()> {
    let config = RezipConfig {
        dynamic_blocks: match cli.dynamic_blocks {
            DynamicBlocks::Recompress => DynamicBlockPolicy::Recompress,
            DynamicBlocks::Copy => DynamicBlockPolicy::Copy,
        },
        max_chain: cli.max_chain,
        ..RezipConfig::default()
    };

    let reference = BufReader::new(File::open(&cli.reference)?);
    let mut input = BufReader::new(File::open(&cli.input)?);
    let output = BufWriter::new(File::create(&cli.output)?);

    let start = Instant::now();

    let mut w = RezipWriter::with_config(output, reference, config)?;
    let mut buffer = vec![0; cli.chunk_size.max(1)];
    loop {
        let n = input.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        w.write_chunk(&buffer[..n])?;
    }
    w.close()?;
    let stats = w.stats();
    w.finish()?;

    println!(
        "{} bytes -> {} bytes in {:?}",
        stats.uncompressed_size,
        stats.compressed_size,
        start.elapsed()
    );
    println!(
        "copied {} blocks ({} bytes), recompressed {} blocks ({} bytes), {} reference blocks decoded{}",
        stats.blocks_copied,
        stats.bytes_copied,
        stats.blocks_recompressed,
        stats.bytes_recompressed,
        stats.reference_blocks_decoded,
        if stats.fallback {
            ", reference abandoned"
        } else {
            ""
        }
    );

    Ok(())
}
