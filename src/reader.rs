//! Random-access reader over DZ files.
//!
//! [`DzFile`] behaves like a seekable stdio stream over the *uncompressed*
//! content of a DZ file. Opening scans every member once to build a
//! per-chunk offset index; afterwards any logical position is served by
//! inflating at most one chunk. Plain (non-gzip) files pass straight
//! through, so callers can point the same handle at either kind.
//!
//! gzip files without the random-access subfield are rejected at open:
//! without per-chunk lengths there is nothing to seek by.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::chunkio::inflate_chunk;
use crate::error::{DzError, Result};
use crate::format::{read_member_header, CHUNK_SIZE, GZIP_DEFLATE_ID};

// ─────────────────────────────────────────────────────────────────────────────
// Detection
// ─────────────────────────────────────────────────────────────────────────────

/// How the underlying file stores its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Raw bytes; reads and seeks pass through.
    Plain,
    /// gzip members carrying the RA chunk index.
    DictZip,
}

/// Peek the first bytes of `file` and classify it, restoring the stream
/// position. Anything shorter than the magic is plain data.
fn detect_gzip(file: &mut File) -> Result<bool> {
    let pos = file.stream_position()?;
    let mut magic = [0u8; 3];
    let mut got = 0usize;
    while got < 3 {
        match file.read(&mut magic[got..])? {
            0 => break,
            n => got += n,
        }
    }
    file.seek(SeekFrom::Start(pos))?;
    Ok(got == 3 && magic == GZIP_DEFLATE_ID)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle state
// ─────────────────────────────────────────────────────────────────────────────

struct DictZipState {
    /// Uncompressed chunk length shared by every member.
    chlen: u64,
    /// File offset of each chunk, globally ordered, terminated by the
    /// end-of-file offset.
    index: Vec<u64>,
    /// Decoded bytes of the most recently inflated chunk.
    buf: Vec<u8>,
    /// Logical offset of `buf[0]`; `buf.is_empty()` means no chunk is
    /// loaded yet.
    bufoff: u64,
    /// Scratch space for one compressed chunk.
    zbuf: Vec<u8>,
}

enum Backend {
    Plain,
    DictZip(DictZipState),
}

struct Inner {
    file: File,
    backend: Backend,
    /// Total uncompressed size.
    size: u64,
    /// Logical position of the next read.
    pos: u64,
    eof: bool,
    /// Sticky failure flag; once set, reads yield nothing until close.
    error: bool,
}

/// Seekable handle over the uncompressed content of a DZ or plain file.
pub struct DzFile {
    inner: Option<Inner>,
}

impl DzFile {
    /// Open `path` and build the chunk index if it is a DZ file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DzFile> {
        DzFile::from_file(File::open(path)?)
    }

    /// Wrap an already opened file. The whole stream is considered: the
    /// handle rewinds to the beginning before detection.
    pub fn from_file(mut file: File) -> Result<DzFile> {
        file.seek(SeekFrom::Start(0))?;
        if !detect_gzip(&mut file)? {
            let size = file.seek(SeekFrom::End(0))?;
            return Ok(DzFile {
                inner: Some(Inner {
                    file,
                    backend: Backend::Plain,
                    size,
                    pos: 0,
                    eof: false,
                    error: false,
                }),
            });
        }

        let (state, size) = build_index(&mut file)?;
        Ok(DzFile {
            inner: Some(Inner {
                file,
                backend: Backend::DictZip(state),
                size,
                pos: 0,
                eof: false,
                error: false,
            }),
        })
    }

    /// Storage format behind the handle, or `None` once closed.
    pub fn format(&self) -> Option<Format> {
        self.inner.as_ref().map(|i| match i.backend {
            Backend::Plain => Format::Plain,
            Backend::DictZip(_) => Format::DictZip,
        })
    }

    /// Total uncompressed size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.as_ref().map_or(0, |i| i.size)
    }

    /// Logical position of the next read.
    pub fn tell(&self) -> u64 {
        self.inner.as_ref().map_or(0, |i| i.pos)
    }

    /// `true` iff the next read would return no bytes.
    pub fn eof(&self) -> bool {
        match &self.inner {
            None => true,
            Some(i) => i.error || i.eof,
        }
    }

    /// `true` when the handle is unusable: closed, or a previous
    /// operation broke it. The flag is sticky until [`close`].
    ///
    /// [`close`]: DzFile::close
    pub fn error(&self) -> bool {
        match &self.inner {
            None => true,
            Some(i) => i.error,
        }
    }

    /// Release the underlying file. Safe to call repeatedly; every
    /// operation afterwards behaves as end-of-file.
    pub fn close(&mut self) {
        self.inner = None;
    }

    /// Move the logical position. `End` positions are clamped to the
    /// file size; a position past the end is allowed and surfaces as
    /// end-of-file on the next read. Clears the EOF flag.
    pub fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        let inner = match self.inner.as_mut() {
            Some(i) if !i.error => i,
            _ => return Err(DzError::InvalidArgument("seek on a broken handle")),
        };
        let new_pos = match target {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::Current(delta) => inner.pos.checked_add_signed(delta),
            // Positive offsets from the end clamp back to the size.
            SeekFrom::End(delta) => inner
                .size
                .checked_add_signed(delta)
                .map(|p| p.min(inner.size)),
        };
        match new_pos {
            Some(p) => {
                inner.pos = p;
                inner.eof = false;
                Ok(p)
            }
            None => Err(DzError::InvalidArgument("seek before start of stream")),
        }
    }

    /// Copy up to `dst.len()` bytes from the current position, returning
    /// the number copied. 0 means end-of-file (or a broken handle; see
    /// [`error`]).
    ///
    /// [`error`]: DzFile::error
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let inner = match self.inner.as_mut() {
            Some(i) if !i.error => i,
            _ => return 0,
        };
        if dst.is_empty() {
            return 0;
        }
        if inner.pos >= inner.size {
            inner.eof = true;
            return 0;
        }
        let copied = match inner.read_at_pos(dst) {
            Ok(n) => n,
            Err(_) => {
                inner.error = true;
                return 0;
            }
        };
        if inner.pos >= inner.size {
            inner.eof = true;
        }
        copied
    }

    /// Read one byte; `None` at end-of-file.
    pub fn getc(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte) {
            1 => Some(byte[0]),
            _ => None,
        }
    }
}

impl Drop for DzFile {
    fn drop(&mut self) {
        self.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// std trait seams
// ─────────────────────────────────────────────────────────────────────────────

impl Read for DzFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "handle closed"));
        }
        let n = DzFile::read(self, buf);
        if n == 0 && self.error() {
            return Err(io::Error::other("dz handle in error state"));
        }
        Ok(n)
    }
}

impl Seek for DzFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        DzFile::seek(self, pos).map_err(io::Error::other)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Index construction
// ─────────────────────────────────────────────────────────────────────────────

/// Walk every member, record each chunk's file offset, and total the
/// uncompressed size. The final entry is the end-of-file offset, so
/// `index[k + 1]` bounds chunk `k` even at the very end.
fn build_index(file: &mut File) -> Result<(DictZipState, u64)> {
    file.seek(SeekFrom::Start(0))?;
    let mut index: Vec<u64> = Vec::new();
    let mut size = 0u64;
    let mut chlen: Option<u16> = None;
    let mut first = true;
    loop {
        let hdr = match read_member_header(file) {
            Ok(Some(h)) => h,
            Ok(None) => break,
            // The stream started with the gzip magic, so a magic
            // mismatch further in means corruption, not "plain file".
            Err(DzError::NotGzip) if !first => {
                return Err(DzError::Malformed("bad magic between members"))
            }
            Err(e) => return Err(e),
        };
        first = false;
        size += u64::from(hdr.isize);
        if hdr.chunks_count() == 0 {
            continue;
        }
        match chlen {
            None => chlen = Some(hdr.chlen),
            Some(c) if c != hdr.chlen => {
                return Err(DzError::Unsupported("chunk length differs across members"))
            }
            Some(_) => {}
        }
        let mut off = hdr.data_offset;
        index.push(off);
        for &len in &hdr.chunk_sizes[..hdr.chunks_count() - 1] {
            off += u64::from(len);
            index.push(off);
        }
    }
    let end = file.seek(SeekFrom::End(0))?;
    index.push(end);

    let chlen = u64::from(chlen.unwrap_or(CHUNK_SIZE as u16));
    Ok((
        DictZipState {
            chlen,
            index,
            buf: Vec::new(),
            bufoff: 0,
            zbuf: Vec::new(),
        },
        size,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Positioned reads
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    /// Copy from `self.pos` into `dst`, advancing the position. The
    /// caller has already handled the EOF and zero-length cases.
    fn read_at_pos(&mut self, dst: &mut [u8]) -> Result<usize> {
        match &mut self.backend {
            Backend::Plain => {
                self.file.seek(SeekFrom::Start(self.pos))?;
                let n = self.file.read(dst)?;
                self.pos += n as u64;
                Ok(n)
            }
            Backend::DictZip(state) => {
                let end = (self.pos + dst.len() as u64).min(self.size);
                let mut copied = 0usize;
                while self.pos < end {
                    state.fill_buf(&mut self.file, self.pos)?;
                    let bufend = state.bufoff + state.buf.len() as u64;
                    if self.pos < state.bufoff || self.pos >= bufend {
                        return Err(DzError::Invariant("decoded chunk misses position"));
                    }
                    let copyend = end.min(bufend);
                    let src_lo = (self.pos - state.bufoff) as usize;
                    let src_hi = (copyend - state.bufoff) as usize;
                    dst[copied..copied + (src_hi - src_lo)]
                        .copy_from_slice(&state.buf[src_lo..src_hi]);
                    copied += src_hi - src_lo;
                    self.pos = copyend;
                }
                Ok(copied)
            }
        }
    }
}

impl DictZipState {
    /// Ensure the decoded-chunk buffer covers logical position `pos`.
    fn fill_buf(&mut self, file: &mut File, pos: u64) -> Result<()> {
        if !self.buf.is_empty()
            && pos >= self.bufoff
            && pos - self.bufoff < self.buf.len() as u64
        {
            return Ok(());
        }
        let chunk_no = (pos / self.chlen) as usize;
        if chunk_no + 1 >= self.index.len() {
            return Err(DzError::InvalidArgument("position beyond the chunk index"));
        }
        let off_begin = self.index[chunk_no];
        let off_end = self.index[chunk_no + 1];
        if off_end <= off_begin {
            return Err(DzError::Malformed("non-increasing chunk offsets"));
        }
        let zlen = off_end - off_begin;
        if zlen > 0xFFFF {
            return Err(DzError::Malformed("compressed chunk too long"));
        }

        self.zbuf.resize(zlen as usize, 0);
        file.seek(SeekFrom::Start(off_begin))?;
        file.read_exact(&mut self.zbuf)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => DzError::Malformed("truncated chunk data"),
                _ => DzError::Io(e),
            })?;

        self.buf.resize(self.chlen as usize, 0);
        let n = inflate_chunk(&self.zbuf, &mut self.buf)?;
        self.buf.truncate(n);
        self.bufoff = chunk_no as u64 * self.chlen;
        if self.buf.is_empty() {
            return Err(DzError::Malformed("chunk inflated to nothing"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests (plain backend; DZ-backed tests live in tests/)
// ─────────────────────────────────────────────────────────────────────────────
