//! Binary entry point for the `dzip` command-line tool.
//!
//! Validates arguments, resolves the default `FILE.dz` output name,
//! runs the parallel compression pipeline, and reports a summary.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;

use dzip::display::set_display_level;
use dzip::displaylevel;
use dzip::pipeline::{compress_file, Config, DEFAULT_LEVEL};
use dzip::util::get_file_size;

/// DZ compression utility. Output stays gunzip-compatible while
/// supporting random-access reads through the embedded chunk index.
#[derive(Debug, Parser)]
#[command(name = "dzip", version, about)]
struct Args {
    /// Increase verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of parallel compression jobs (0 = one per CPU).
    #[arg(short = 'j', long = "jobs", default_value_t = 0)]
    jobs: usize,

    /// Compression level.
    #[arg(short = 'l', long = "level", default_value_t = DEFAULT_LEVEL,
          value_parser = clap::value_parser!(u32).range(1..=9))]
    level: u32,

    /// Output path (default: FILE.dz).
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Overwrite the output file if it exists.
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// File to compress.
    file: PathBuf,
}

fn run(args: Args) -> anyhow::Result<()> {
    let output = match args.output {
        Some(path) => path,
        None => {
            let mut name = args.file.clone().into_os_string();
            name.push(".dz");
            PathBuf::from(name)
        }
    };
    if output == args.file {
        bail!("output would overwrite the input: {}", output.display());
    }

    let mut cfg = Config::new(args.file.clone(), output.clone());
    if args.jobs > 0 {
        cfg.compressors_count = args.jobs;
    }
    cfg.level = args.level;
    cfg.force = args.force;

    let stat = compress_file(&cfg).map_err(|e| {
        // A failed run leaves an unpatched, unusable output behind.
        if !matches!(e, dzip::DzError::Io(ref io) if io.kind() == std::io::ErrorKind::AlreadyExists)
        {
            let _ = std::fs::remove_file(&output);
        }
        e
    })
    .with_context(|| format!("compressing {}", args.file.display()))?;

    displaylevel!(
        2,
        "dzip: {} -> {}: {} bytes, {} chunks, {} member(s), {} bytes compressed",
        args.file.display(),
        output.display(),
        stat.bytes,
        stat.chunks,
        stat.members,
        get_file_size(&output)
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    set_display_level(1 + args.verbose as i32);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dzip: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
