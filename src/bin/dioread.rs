//! CLI tool for reading a byte range of a file through direct I/O.
//!
//! Opens the file with `O_DIRECT` via the `dioread` cache reader and
//! writes the requested range to stdout or a file, so the transfer never
//! goes through the kernel page cache.

use clap::Parser;
use dioread::CacheReader;
use std::error::Error;
use std::fs::File;
use std::io::{self, SeekFrom, Write};
use std::path::PathBuf;

/// Read a byte range of a file through direct I/O.
///
/// The file is opened with `O_DIRECT` and read through an aligned cache,
/// so arbitrary offsets and lengths work even though the device only
/// accepts aligned transfers.
#[derive(Parser, Debug)]
#[command(name = "dioread")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the file to read
    path: PathBuf,

    /// Byte offset to start reading from
    #[arg(short, long, default_value = "0")]
    offset: u64,

    /// Number of bytes to read (default: entire file from offset)
    #[arg(short, long)]
    length: Option<u64>,

    /// Copy chunk size in bytes
    #[arg(short, long, default_value = "1048576")]
    chunk: usize,

    /// Show alignment and transfer diagnostics on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Output file path (default: stdout)
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut reader = CacheReader::new();
    reader.open(&args.path)?;

    if args.verbose {
        eprintln!("File: {}", args.path.display());
        eprintln!("Alignment: {} bytes", reader.alignment());
        eprintln!("Cache size: {} bytes", reader.cache_size());
    }

    if args.offset > 0 {
        reader.seek(SeekFrom::Start(args.offset))?;
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };

    let chunk = args.chunk.max(1);
    let mut buf = vec![0u8; chunk];
    let mut remaining = args.length;
    let mut total: u64 = 0;

    loop {
        let want = match remaining {
            Some(0) => break,
            Some(n) => chunk.min(n as usize),
            None => chunk,
        };
        let got = reader.read_bin(&mut buf[..want])?;
        if got == 0 {
            break;
        }
        out.write_all(&buf[..got])?;
        total += got as u64;
        if let Some(n) = remaining.as_mut() {
            *n -= got as u64;
        }
    }
    out.flush()?;

    if args.verbose {
        eprintln!("Read {total} bytes");
        if let Some(path) = &args.output {
            eprintln!("Output written to: {}", path.display());
        }
    }

    reader.close();
    Ok(())
}
