//! DZ container codec: RFC 1952 member headers carrying the "RA"
//! (random access) extra subfield, member trailers, and the member walk
//! used to size the chunk index.
//!
//! Wire layout of one member:
//!
//! ```text
//! 1F 8B 08 FLG MTIME(4 LE) XFL OS XLEN(2 LE)
//! 'R' 'A' EXLEN(2 LE) VER(2 LE) CHLEN(2 LE) CHCNT(2 LE) [LEN_i(2 LE) × CHCNT]
//! [FNAME … 00]                      ; iff FLG & FNAME
//! body                              ; CHCNT sync-flushed raw-deflate chunks
//! 03 00                             ; empty raw-deflate FINISH block
//! CRC32(4 LE) ISIZE(4 LE)
//! ```
//!
//! All multi-byte integers are little-endian.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{DzError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Wire constants
// ─────────────────────────────────────────────────────────────────────────────

/// gzip magic plus the deflate compression-method byte.
pub const GZIP_DEFLATE_ID: [u8; 3] = [0x1f, 0x8b, 0x08];

pub const FTEXT: u8 = 1;
pub const FHCRC: u8 = 1 << 1;
pub const FEXTRA: u8 = 1 << 2;
pub const FNAME: u8 = 1 << 3;
pub const FCOMMENT: u8 = 1 << 4;

/// OS byte: Unix.
pub const OS_CODE_UNIX: u8 = 3;

/// Uncompressed length of every chunk except possibly the final one.
pub const CHUNK_SIZE: usize = 58315;

/// Fixed part of a member header: ID(3) FLG(1) MTIME(4) XFL(1) OS(1) XLEN(2).
pub const GZIP_HEADER_SIZE: usize = 12;

/// Fixed part of the RA subfield: 'R' 'A' EXLEN VER CHLEN CHCNT.
pub const RA_EXT_HEADER_SIZE: usize = 10;

/// Offset from the first byte of a member to its chunk-length vector.
/// This is where the writer patches lengths in after the body is known.
pub const CHUNKS_LENGTHS_OFFSET: u64 = (GZIP_HEADER_SIZE + RA_EXT_HEADER_SIZE) as u64;

/// Most chunks one member can describe: XLEN is 16-bit, the RA subfield
/// costs 4 bytes of identification plus 6 of fixed payload, and each
/// chunk costs a 2-byte length entry.
pub const CHUNKS_PER_MEMBER: usize = (0xFFFF - 4 - 6) / 2;

/// Empty raw-deflate block with the FINISH bit set; terminates a member
/// body so that stock gunzip sees a complete deflate stream.
pub const EMPTY_FINISH_BLOCK: [u8; 2] = [0x03, 0x00];

/// CRC32 + ISIZE.
pub const MEMBER_TRAILER_SIZE: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Little-endian slice helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Read a little-endian `u16` from `src` at byte `offset`.
#[inline]
pub fn read_le16(src: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([src[offset], src[offset + 1]])
}

/// Read a little-endian `u32` from `src` at byte `offset`.
#[inline]
pub fn read_le32(src: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        src[offset],
        src[offset + 1],
        src[offset + 2],
        src[offset + 3],
    ])
}

/// Write a little-endian `u16` into `dst` at byte `offset`.
#[inline]
pub fn write_le16(dst: &mut [u8], offset: usize, value: u16) {
    dst[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian `u32` into `dst` at byte `offset`.
#[inline]
pub fn write_le32(dst: &mut [u8], offset: usize, value: u32) {
    dst[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ─────────────────────────────────────────────────────────────────────────────
// Member header encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Total on-wire size of a member header describing `chunks_count` chunks.
pub fn member_header_len(chunks_count: usize, fname: Option<&str>) -> usize {
    GZIP_HEADER_SIZE
        + RA_EXT_HEADER_SIZE
        + chunks_count * 2
        + fname.map_or(0, |n| n.len() + 1)
}

/// Build one member header with a zeroed chunk-length vector.
///
/// The length vector cannot be known until the member body has been
/// compressed, so it is emitted as `chunks_count` zero entries and patched
/// in place later (see [`CHUNKS_LENGTHS_OFFSET`]).
///
/// `fname` and a nonzero `mtime` belong on the first member of a file
/// only; pass `None` / `0` for continuation members. `XFL` advertises
/// maximum compression iff `level` is 9.
pub fn encode_member_header(
    chunks_count: usize,
    level: u32,
    fname: Option<&str>,
    mtime: u32,
) -> Vec<u8> {
    debug_assert!(chunks_count <= CHUNKS_PER_MEMBER);
    let mut flg = FEXTRA;
    if fname.is_some() {
        flg |= FNAME;
    }
    let xfl: u8 = if level == 9 { 2 } else { 0 };
    let xlen = (RA_EXT_HEADER_SIZE + chunks_count * 2) as u16;
    let exlen = xlen - 4;

    let mut out = Vec::with_capacity(member_header_len(chunks_count, fname));
    out.extend_from_slice(&GZIP_DEFLATE_ID);
    out.push(flg);
    out.extend_from_slice(&mtime.to_le_bytes());
    out.push(xfl);
    out.push(OS_CODE_UNIX);
    out.extend_from_slice(&xlen.to_le_bytes());

    out.extend_from_slice(b"RA");
    out.extend_from_slice(&exlen.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // VER
    out.extend_from_slice(&(CHUNK_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(chunks_count as u16).to_le_bytes());
    out.resize(out.len() + chunks_count * 2, 0);

    if let Some(name) = fname {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

/// Build the bytes the writer appends when a member is closed: the empty
/// FINISH block followed by the member trailer.
pub fn encode_member_close(crc32: u32, isize: u32) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[..2].copy_from_slice(&EMPTY_FINISH_BLOCK);
    out[2..6].copy_from_slice(&crc32.to_le_bytes());
    out[6..10].copy_from_slice(&isize.to_le_bytes());
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Member header decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Everything learned from one member: header fields, the compressed
/// chunk lengths, where the body starts, and the trailer values.
#[derive(Debug, Clone)]
pub struct MemberHeader {
    pub flg: u8,
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    /// Uncompressed chunk length declared by the RA subfield.
    pub chlen: u16,
    /// Compressed length of each chunk, in member order.
    pub chunk_sizes: Vec<u16>,
    /// Absolute file offset of the first body byte.
    pub data_offset: u64,
    /// CRC-32 of the member's uncompressed bytes.
    pub crc32: u32,
    /// Count of uncompressed bytes in the member.
    pub isize: u32,
}

impl MemberHeader {
    /// Number of chunks in this member.
    pub fn chunks_count(&self) -> usize {
        self.chunk_sizes.len()
    }

    /// Sum of the compressed chunk lengths (body size excluding the
    /// FINISH block).
    pub fn body_len(&self) -> u64 {
        self.chunk_sizes.iter().map(|&l| u64::from(l)).sum()
    }
}

fn read_exact_or<R: Read>(r: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => DzError::Malformed(what),
        _ => DzError::Io(e),
    })
}

/// Skip a NUL-terminated latin-1 field (FNAME or FCOMMENT).
fn skip_cstr<R: Read>(r: &mut R) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        read_exact_or(r, &mut byte, "truncated name field")?;
        if byte[0] == 0 {
            return Ok(());
        }
    }
}

/// Parse one complete member starting at the current position, leaving
/// the stream positioned just past the member trailer.
///
/// Returns `Ok(None)` on clean end-of-file at a member boundary.
///
/// Foreign FEXTRA subfields, FNAME, FCOMMENT, and FHCRC are tolerated and
/// skipped; only the RA subfield is interpreted. Missing RA data is
/// reported as [`DzError::Unsupported`] because the body cannot be walked
/// without the chunk lengths.
pub fn read_member_header<R: Read + Seek>(r: &mut R) -> Result<Option<MemberHeader>> {
    let mut fixed = [0u8; GZIP_HEADER_SIZE - 2];
    if r.read(&mut fixed[..1])? == 0 {
        return Ok(None);
    }
    read_exact_or(r, &mut fixed[1..], "truncated member header")?;
    if fixed[..3] != GZIP_DEFLATE_ID {
        return Err(DzError::NotGzip);
    }
    let flg = fixed[3];
    let mtime = read_le32(&fixed, 4);
    let xfl = fixed[8];
    let os = fixed[9];

    let mut chlen: u16 = 0;
    let mut chunk_sizes: Vec<u16> = Vec::new();
    let mut ra_seen = false;

    if flg & FEXTRA != 0 {
        let mut xlen_buf = [0u8; 2];
        read_exact_or(r, &mut xlen_buf, "truncated XLEN")?;
        let xlen = u16::from_le_bytes(xlen_buf) as usize;
        if xlen < 4 {
            return Err(DzError::Malformed("XLEN too small for any subfield"));
        }
        let mut consumed = 0usize;
        while consumed < xlen {
            if xlen - consumed < 4 {
                return Err(DzError::Malformed("dangling FEXTRA subfield bytes"));
            }
            let mut sub = [0u8; 4];
            read_exact_or(r, &mut sub, "truncated subfield header")?;
            let sublen = read_le16(&sub, 2) as usize;
            consumed += 4;
            if sublen > xlen - consumed {
                return Err(DzError::Malformed("subfield length exceeds XLEN"));
            }
            if &sub[..2] == b"RA" {
                if sublen < 6 {
                    return Err(DzError::Malformed("RA subfield shorter than its fixed part"));
                }
                let mut ra_fixed = [0u8; 6];
                read_exact_or(r, &mut ra_fixed, "truncated RA subfield")?;
                if read_le16(&ra_fixed, 0) != 1 {
                    return Err(DzError::Malformed("unknown RA version"));
                }
                chlen = read_le16(&ra_fixed, 2);
                if chlen == 0 {
                    return Err(DzError::Malformed("zero chunk length"));
                }
                let chcnt = read_le16(&ra_fixed, 4) as usize;
                if chcnt * 2 > sublen - 6 {
                    return Err(DzError::Malformed("chunk count exceeds RA subfield"));
                }
                let mut lens = vec![0u8; chcnt * 2];
                read_exact_or(r, &mut lens, "truncated chunk-length vector")?;
                chunk_sizes = (0..chcnt).map(|i| read_le16(&lens, i * 2)).collect();
                // Anything after the length vector inside this subfield
                // belongs to a future RA revision; skip it.
                let tail = sublen - 6 - chcnt * 2;
                if tail > 0 {
                    r.seek(SeekFrom::Current(tail as i64))?;
                }
                ra_seen = true;
            } else {
                r.seek(SeekFrom::Current(sublen as i64))?;
            }
            consumed += sublen;
        }
    }

    if flg & FNAME != 0 {
        skip_cstr(r)?;
    }
    if flg & FCOMMENT != 0 {
        skip_cstr(r)?;
    }
    if flg & FHCRC != 0 {
        r.seek(SeekFrom::Current(2))?;
    }

    if !ra_seen {
        return Err(DzError::Unsupported("gzip member without RA subfield"));
    }

    let data_offset = r.stream_position()?;
    let body: u64 = chunk_sizes.iter().map(|&l| u64::from(l)).sum();
    r.seek(SeekFrom::Current(body as i64 + EMPTY_FINISH_BLOCK.len() as i64))?;

    let mut trailer = [0u8; MEMBER_TRAILER_SIZE];
    read_exact_or(r, &mut trailer, "truncated member trailer")?;
    let crc32 = read_le32(&trailer, 0);
    let isize = read_le32(&trailer, 4);

    Ok(Some(MemberHeader {
        flg,
        mtime,
        xfl,
        os,
        chlen,
        chunk_sizes,
        data_offset,
        crc32,
        isize,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Whole-stream walk
// ─────────────────────────────────────────────────────────────────────────────

/// Totals gathered by walking every member of a DZ stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DzStat {
    pub members: u64,
    pub chunks: u64,
    /// Total uncompressed size (Σ ISIZE).
    pub bytes: u64,
}

/// Walk all members from the current position and accumulate totals.
/// The stream is left positioned at end-of-file on success.
pub fn scan_members<R: Read + Seek>(r: &mut R) -> Result<DzStat> {
    let mut stat = DzStat::default();
    while let Some(hdr) = read_member_header(r)? {
        stat.members += 1;
        stat.chunks += hdr.chunks_count() as u64;
        stat.bytes += u64::from(hdr.isize);
    }
    Ok(stat)
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Assemble a full in-memory member: header, body, trailer.
    fn fake_member(chunk_sizes: &[u16], fname: Option<&str>, isize: u32) -> Vec<u8> {
        let mut bytes = encode_member_header(chunk_sizes.len(), 6, fname, 0);
        for (i, &len) in chunk_sizes.iter().enumerate() {
            write_le16(&mut bytes, CHUNKS_LENGTHS_OFFSET as usize + i * 2, len);
        }
        for &len in chunk_sizes {
            bytes.extend(std::iter::repeat(0xAA).take(len as usize));
        }
        bytes.extend_from_slice(&encode_member_close(0xDEAD_BEEF, isize));
        bytes
    }

    #[test]
    fn chunks_per_member_fits_sixteen_bit_xlen() {
        assert_eq!(CHUNKS_PER_MEMBER, 32762);
        let xlen = RA_EXT_HEADER_SIZE + CHUNKS_PER_MEMBER * 2;
        assert!(xlen <= 0xFFFF);
        // One more chunk would overflow the XLEN field.
        assert!(RA_EXT_HEADER_SIZE + (CHUNKS_PER_MEMBER + 1) * 2 > 0xFFFF);
    }

    #[test]
    fn header_layout_first_member() {
        let hdr = encode_member_header(3, 9, Some("data.bin"), 0x1234_5678);
        assert_eq!(hdr.len(), member_header_len(3, Some("data.bin")));
        assert_eq!(&hdr[..3], &GZIP_DEFLATE_ID);
        assert_eq!(hdr[3], FEXTRA | FNAME);
        assert_eq!(read_le32(&hdr, 4), 0x1234_5678);
        assert_eq!(hdr[8], 2, "XFL advertises max compression at level 9");
        assert_eq!(hdr[9], OS_CODE_UNIX);
        assert_eq!(read_le16(&hdr, 10) as usize, RA_EXT_HEADER_SIZE + 6);
        assert_eq!(&hdr[12..14], b"RA");
        assert_eq!(read_le16(&hdr, 14) as usize, RA_EXT_HEADER_SIZE - 4 + 6);
        assert_eq!(read_le16(&hdr, 16), 1, "RA version");
        assert_eq!(read_le16(&hdr, 18) as usize, CHUNK_SIZE);
        assert_eq!(read_le16(&hdr, 20), 3, "CHCNT");
        assert_eq!(&hdr[22..28], &[0; 6], "length vector starts zeroed");
        assert_eq!(&hdr[28..36], b"data.bin");
        assert_eq!(hdr[36], 0, "FNAME terminator");
    }

    #[test]
    fn header_layout_continuation_member() {
        let hdr = encode_member_header(1, 6, None, 0);
        assert_eq!(hdr[3], FEXTRA);
        assert_eq!(read_le32(&hdr, 4), 0, "continuation members carry MTIME 0");
        assert_eq!(hdr[8], 0, "XFL 0 below level 9");
        assert_eq!(hdr.len(), GZIP_HEADER_SIZE + RA_EXT_HEADER_SIZE + 2);
    }

    #[test]
    fn chunks_lengths_offset_points_at_vector() {
        // The patch offset constant must match the encoded layout.
        let mut hdr = encode_member_header(2, 6, None, 0);
        write_le16(&mut hdr, CHUNKS_LENGTHS_OFFSET as usize, 0x0102);
        write_le16(&mut hdr, CHUNKS_LENGTHS_OFFSET as usize + 2, 0x0304);
        let mut cur = Cursor::new({
            let mut m = hdr;
            m.extend(std::iter::repeat(0u8).take(0x0102 + 0x0304));
            m.extend_from_slice(&encode_member_close(0, 0));
            m
        });
        let parsed = read_member_header(&mut cur).unwrap().unwrap();
        assert_eq!(parsed.chunk_sizes, vec![0x0102, 0x0304]);
    }

    #[test]
    fn decode_recovers_encode() {
        let member = fake_member(&[100, 258, 7], Some("x.txt"), 3 * CHUNK_SIZE as u32);
        let mut cur = Cursor::new(member);
        let hdr = read_member_header(&mut cur).unwrap().unwrap();
        assert_eq!(hdr.flg, FEXTRA | FNAME);
        assert_eq!(hdr.chlen as usize, CHUNK_SIZE);
        assert_eq!(hdr.chunk_sizes, vec![100, 258, 7]);
        assert_eq!(hdr.body_len(), 365);
        assert_eq!(hdr.crc32, 0xDEAD_BEEF);
        assert_eq!(hdr.isize, 3 * CHUNK_SIZE as u32);
        assert_eq!(
            hdr.data_offset,
            member_header_len(3, Some("x.txt")) as u64
        );
        // Fully consumed: next read sees a clean member boundary.
        assert!(read_member_header(&mut cur).unwrap().is_none());
    }

    #[test]
    fn decode_empty_member() {
        let member = fake_member(&[], None, 0);
        let mut cur = Cursor::new(member);
        let hdr = read_member_header(&mut cur).unwrap().unwrap();
        assert_eq!(hdr.chunks_count(), 0);
        assert_eq!(hdr.isize, 0);
    }

    #[test]
    fn bad_magic_is_not_gzip() {
        let mut cur = Cursor::new(vec![0x50, 0x4b, 0x03, 0x04, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            read_member_header(&mut cur),
            Err(DzError::NotGzip)
        ));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let mut cur = Cursor::new(vec![0x1f, 0x8b, 0x08, FEXTRA]);
        assert!(matches!(
            read_member_header(&mut cur),
            Err(DzError::Malformed(_))
        ));
    }

    #[test]
    fn wrong_ra_version_is_malformed() {
        let mut member = fake_member(&[5], None, 5);
        write_le16(&mut member, 16, 2); // VER
        let mut cur = Cursor::new(member);
        assert!(matches!(
            read_member_header(&mut cur),
            Err(DzError::Malformed("unknown RA version"))
        ));
    }

    #[test]
    fn chunk_count_overrunning_subfield_is_malformed() {
        let mut member = fake_member(&[5], None, 5);
        write_le16(&mut member, 20, 9); // CHCNT claims more entries than EXLEN holds
        let mut cur = Cursor::new(member);
        assert!(matches!(
            read_member_header(&mut cur),
            Err(DzError::Malformed("chunk count exceeds RA subfield"))
        ));
    }

    #[test]
    fn gzip_without_ra_is_unsupported() {
        // Plain gzip header (no FEXTRA) followed by nothing interesting.
        let mut bytes = vec![0x1f, 0x8b, 0x08, 0x00];
        bytes.extend_from_slice(&[0; 6]); // mtime, xfl, os
        let mut cur = Cursor::new(bytes);
        assert!(matches!(
            read_member_header(&mut cur),
            Err(DzError::Unsupported(_))
        ));
    }

    #[test]
    fn foreign_subfield_is_skipped() {
        // FEXTRA carrying an "XX" subfield before the RA one.
        let inner = fake_member(&[4], None, 4);
        let mut bytes = inner[..10].to_vec();
        let ra_region = &inner[12..12 + RA_EXT_HEADER_SIZE + 2];
        let xlen = (4 + 3 + ra_region.len()) as u16;
        bytes.extend_from_slice(&xlen.to_le_bytes());
        bytes.extend_from_slice(b"XX");
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(ra_region);
        bytes.extend(std::iter::repeat(0xAA).take(4));
        bytes.extend_from_slice(&encode_member_close(0xDEAD_BEEF, 4));
        let mut cur = Cursor::new(bytes);
        let hdr = read_member_header(&mut cur).unwrap().unwrap();
        assert_eq!(hdr.chunk_sizes, vec![4]);
    }

    #[test]
    fn member_close_bytes() {
        let close = encode_member_close(0x0403_0201, 13);
        assert_eq!(&close[..2], &EMPTY_FINISH_BLOCK);
        assert_eq!(&close[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&close[6..], &[13, 0, 0, 0]);
    }

    #[test]
    fn scan_totals_across_members() {
        let mut stream = fake_member(&[10, 20], Some("a"), 2 * CHUNK_SIZE as u32);
        stream.extend(fake_member(&[30], None, 555));
        let mut cur = Cursor::new(stream);
        let stat = scan_members(&mut cur).unwrap();
        assert_eq!(
            stat,
            DzStat {
                members: 2,
                chunks: 3,
                bytes: 2 * CHUNK_SIZE as u64 + 555,
            }
        );
    }

    #[test]
    fn scan_empty_stream() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert_eq!(scan_members(&mut cur).unwrap(), DzStat::default());
    }
}
