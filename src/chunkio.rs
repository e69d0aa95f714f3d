//! Per-chunk deflate primitives.
//!
//! Every chunk is compressed as an independent raw-deflate fragment:
//! one `None`-flush pass over the whole input followed by a `Full` flush
//! with empty input. The full flush ends the fragment on a byte-aligned
//! sync boundary, so a reader can inflate any chunk without history from
//! its neighbours, while the concatenation of all fragments (plus the
//! final empty FINISH block) is still one valid deflate stream for stock
//! gunzip.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{DzError, Result};
use crate::format::CHUNK_SIZE;

/// Output capacity that always holds one compressed chunk: stored-block
/// worst case for [`CHUNK_SIZE`] input plus the sync-flush trailer.
pub const CHUNK_DEFLATE_BOUND: usize = 0x10000;

/// Build a raw-deflate context for chunk compression.
///
/// `level` is the usual zlib 1..=9 range.
pub fn new_deflate_ctx(level: u32) -> Compress {
    Compress::new(Compression::new(level), false)
}

/// Compress one chunk into `out`, returning the compressed length.
///
/// The context is reset first, so fragments never share history. All
/// input must be consumed by the `None`-flush pass; the trailing `Full`
/// flush emits the sync boundary.
pub fn deflate_chunk(ctx: &mut Compress, input: &[u8], out: &mut [u8]) -> Result<usize> {
    if input.len() > CHUNK_SIZE {
        return Err(DzError::Invariant("chunk larger than the fixed chunk size"));
    }
    ctx.reset();
    let mut in_pos = 0usize;
    let mut out_pos = 0usize;
    while in_pos < input.len() {
        let before_in = ctx.total_in();
        let before_out = ctx.total_out();
        let status = ctx
            .compress(&input[in_pos..], &mut out[out_pos..], FlushCompress::None)
            .map_err(|_| DzError::Malformed("deflate error"))?;
        in_pos += (ctx.total_in() - before_in) as usize;
        out_pos += (ctx.total_out() - before_out) as usize;
        if status != Status::Ok {
            return Err(DzError::Malformed("deflate did not accept chunk data"));
        }
        if out_pos == out.len() && in_pos < input.len() {
            return Err(DzError::Invariant("compressed chunk exceeds output bound"));
        }
    }
    loop {
        let before_out = ctx.total_out();
        let status = ctx
            .compress(&[], &mut out[out_pos..], FlushCompress::Full)
            .map_err(|_| DzError::Malformed("deflate error"))?;
        out_pos += (ctx.total_out() - before_out) as usize;
        if status != Status::Ok {
            return Err(DzError::Malformed("deflate flush failed"));
        }
        // A completed flush leaves spare output room; a full buffer means
        // pending bits remain.
        if out_pos < out.len() {
            break;
        }
        return Err(DzError::Invariant("compressed chunk exceeds output bound"));
    }
    Ok(out_pos)
}

/// Inflate one compressed chunk into `out` in a single pass, returning
/// the decoded length.
///
/// Accepts both a sync-terminated fragment (`Ok`) and a fragment running
/// into the stream's FINISH block (`StreamEnd`); the latter happens for
/// the last chunk of a member, where the caller's slice extends to the
/// next known file offset.
pub fn inflate_chunk(input: &[u8], out: &mut [u8]) -> Result<usize> {
    let mut ctx = Decompress::new(false);
    let status = ctx
        .decompress(input, out, FlushDecompress::Sync)
        .map_err(|_| DzError::Malformed("inflate error"))?;
    match status {
        Status::Ok | Status::StreamEnd => Ok(ctx.total_out() as usize),
        Status::BufError => Err(DzError::Malformed("inflate stalled on chunk data")),
    }
}
