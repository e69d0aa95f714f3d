//! Output writer: appends member headers and chunk data, then patches
//! each member's chunk-length vector once the member is closed.
//!
//! The writer is the only role holding the output file, and the
//! `MemberClose` seek-write-seek is the only place the file offset ever
//! moves backwards. It keeps no payload semantics: CRCs and sizes arrive
//! precomputed from the manager.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use crossbeam_channel::{Receiver, Sender};

use crate::displaylevel;
use crate::format::{encode_member_close, CHUNKS_LENGTHS_OFFSET, CHUNKS_PER_MEMBER};
use crate::pipeline::messages::{Info, Message};

/// Writer receive loop.
///
/// Accepts exactly three payload messages — `MemberHeader`, `Chunk`, and
/// `MemberClose` — plus `Info::Stop`. Any failure is reported once on
/// `feedback` before the loop exits; the output file is left as-is and
/// must be considered invalid (its current member still claims zeroed
/// chunk lengths).
pub fn run(mut out: File, inbox: Receiver<Message>, feedback: Sender<Message>) {
    if feedback.send(Message::Info(Info::Ready)).is_err() {
        return;
    }

    // Offset of the current member's length vector, and the little-endian
    // u16 lengths accumulated for it so far.
    let mut chunks_lengths_off: u64 = CHUNKS_LENGTHS_OFFSET;
    let mut lbuf: Vec<u8> = Vec::new();

    let fail = |feedback: &Sender<Message>, what: String| {
        displaylevel!(1, "writer: {}", what);
        let _ = feedback.send(Message::Info(Info::Error(what)));
    };

    loop {
        let msg = match inbox.recv() {
            Ok(m) => m,
            Err(_) => break,
        };
        match msg {
            Message::Info(Info::Stop) => {
                displaylevel!(4, "writer: stop received");
                break;
            }
            Message::MemberHeader(bytes) => {
                let pos = match out.stream_position() {
                    Ok(p) => p,
                    Err(e) => return fail(&feedback, format!("tell failed: {}", e)),
                };
                chunks_lengths_off = pos + CHUNKS_LENGTHS_OFFSET;
                lbuf.clear();
                if let Err(e) = out.write_all(&bytes) {
                    return fail(&feedback, format!("header write failed: {}", e));
                }
                displaylevel!(3, "writer: member header, {} bytes", bytes.len());
            }
            Message::Chunk { seq, data } => {
                if data.is_empty() {
                    return fail(&feedback, format!("empty chunk {}", seq));
                }
                if data.len() > 0xFFFF {
                    return fail(&feedback, format!("chunk {} exceeds 16-bit length", seq));
                }
                if lbuf.len() > (CHUNKS_PER_MEMBER - 1) * 2 {
                    return fail(&feedback, "chunk-length buffer overflow".to_owned());
                }
                lbuf.extend_from_slice(&(data.len() as u16).to_le_bytes());
                if let Err(e) = out.write_all(&data) {
                    return fail(&feedback, format!("chunk {} write failed: {}", seq, e));
                }
                displaylevel!(4, "writer: chunk {}, {} bytes", seq, data.len());
            }
            Message::MemberClose { crc32, isize } => {
                let result = (|| -> std::io::Result<()> {
                    let end = out.stream_position()?;
                    out.seek(SeekFrom::Start(chunks_lengths_off))?;
                    out.write_all(&lbuf)?;
                    out.seek(SeekFrom::Start(end))?;
                    out.write_all(&encode_member_close(crc32, isize))?;
                    Ok(())
                })();
                if let Err(e) = result {
                    return fail(&feedback, format!("member close failed: {}", e));
                }
                displaylevel!(
                    3,
                    "writer: member closed, {} chunks, isize {}",
                    lbuf.len() / 2,
                    isize
                );
            }
            Message::Info(other) => {
                return fail(&feedback, format!("unexpected control message {:?}", other));
            }
        }
    }
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_member_header, read_member_header, read_le32};
    use crossbeam_channel::bounded;
    use std::io::Read;
    use std::thread;

    struct Rig {
        inbox: Sender<Message>,
        feedback: Receiver<Message>,
        handle: thread::JoinHandle<()>,
        path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn spawn_writer() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dz");
        let out = File::create(&path).unwrap();
        let (inbox_tx, inbox_rx) = bounded(16);
        let (feedback_tx, feedback_rx) = bounded(16);
        let handle = thread::spawn(move || run(out, inbox_rx, feedback_tx));
        let rig = Rig {
            inbox: inbox_tx,
            feedback: feedback_rx,
            handle,
            path,
            _dir: dir,
        };
        assert_eq!(rig.feedback.recv().unwrap(), Message::Info(Info::Ready));
        rig
    }

    #[test]
    fn writes_member_and_patches_lengths() {
        let rig = spawn_writer();
        let header = encode_member_header(2, 6, Some("f.bin"), 77);
        rig.inbox.send(Message::MemberHeader(header)).unwrap();
        rig.inbox
            .send(Message::Chunk { seq: 1, data: vec![0xAB; 11] })
            .unwrap();
        rig.inbox
            .send(Message::Chunk { seq: 2, data: vec![0xCD; 22] })
            .unwrap();
        rig.inbox
            .send(Message::MemberClose { crc32: 0xFEED_F00D, isize: 33 })
            .unwrap();
        rig.inbox.send(Message::Info(Info::Stop)).unwrap();
        rig.handle.join().unwrap();

        let mut file = File::open(&rig.path).unwrap();
        let hdr = read_member_header(&mut file).unwrap().unwrap();
        assert_eq!(hdr.chunk_sizes, vec![11, 22], "length vector was patched");
        assert_eq!(hdr.crc32, 0xFEED_F00D);
        assert_eq!(hdr.isize, 33);

        // Body bytes land between header and trailer, in order.
        let mut bytes = Vec::new();
        File::open(&rig.path).unwrap().read_to_end(&mut bytes).unwrap();
        let body = &bytes[hdr.data_offset as usize..hdr.data_offset as usize + 33];
        assert_eq!(&body[..11], &[0xAB; 11]);
        assert_eq!(&body[11..], &[0xCD; 22]);
        // Explicit finish block right after the body.
        assert_eq!(&bytes[hdr.data_offset as usize + 33..][..2], &[0x03, 0x00]);
    }

    #[test]
    fn two_members_patch_their_own_headers() {
        let rig = spawn_writer();
        let first = encode_member_header(1, 6, Some("f"), 1);
        let second = encode_member_header(1, 6, None, 0);
        for msg in [
            Message::MemberHeader(first),
            Message::Chunk { seq: 1, data: vec![1; 5] },
            Message::MemberClose { crc32: 10, isize: 100 },
            Message::MemberHeader(second),
            Message::Chunk { seq: 1, data: vec![2; 9] },
            Message::MemberClose { crc32: 20, isize: 200 },
            Message::Info(Info::Stop),
        ] {
            rig.inbox.send(msg).unwrap();
        }
        rig.handle.join().unwrap();

        let mut file = File::open(&rig.path).unwrap();
        let m1 = read_member_header(&mut file).unwrap().unwrap();
        let m2 = read_member_header(&mut file).unwrap().unwrap();
        assert!(read_member_header(&mut file).unwrap().is_none());
        assert_eq!(m1.chunk_sizes, vec![5]);
        assert_eq!((m1.crc32, m1.isize), (10, 100));
        assert_eq!(m2.chunk_sizes, vec![9]);
        assert_eq!((m2.crc32, m2.isize), (20, 200));
    }

    #[test]
    fn empty_chunk_is_fatal() {
        let rig = spawn_writer();
        rig.inbox
            .send(Message::MemberHeader(encode_member_header(1, 6, None, 0)))
            .unwrap();
        rig.inbox
            .send(Message::Chunk { seq: 1, data: Vec::new() })
            .unwrap();
        assert!(matches!(
            rig.feedback.recv().unwrap(),
            Message::Info(Info::Error(_))
        ));
        rig.handle.join().unwrap();
    }

    #[test]
    fn trailer_encodes_little_endian() {
        let rig = spawn_writer();
        rig.inbox
            .send(Message::MemberHeader(encode_member_header(1, 6, None, 0)))
            .unwrap();
        rig.inbox
            .send(Message::Chunk { seq: 1, data: vec![0; 4] })
            .unwrap();
        rig.inbox
            .send(Message::MemberClose { crc32: 0x0102_0304, isize: 0x0A0B_0C0D })
            .unwrap();
        rig.inbox.send(Message::Info(Info::Stop)).unwrap();
        rig.handle.join().unwrap();

        let mut bytes = Vec::new();
        File::open(&rig.path).unwrap().read_to_end(&mut bytes).unwrap();
        let trailer = &bytes[bytes.len() - 8..];
        assert_eq!(read_le32(trailer, 0), 0x0102_0304);
        assert_eq!(read_le32(trailer, 4), 0x0A0B_0C0D);
    }
}
