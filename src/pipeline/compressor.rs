//! Compressor worker: stateless per chunk.
//!
//! Each worker owns one reusable raw-deflate context and loops over the
//! shared job queue. A job is a single uncompressed chunk; the result is
//! the compressed fragment under the same sequence number. Workers never
//! see member boundaries.

use crossbeam_channel::{Receiver, Sender};

use crate::chunkio::{deflate_chunk, new_deflate_ctx, CHUNK_DEFLATE_BOUND};
use crate::displaylevel;
use crate::pipeline::messages::{Info, Message};

/// Worker receive loop. Runs until a `Stop` arrives, the job queue
/// disconnects, or an error is reported.
///
/// Every failure is surfaced as one `Info::Error` on `results` before
/// the worker terminates; the manager owns the reaction.
pub fn run(id: usize, jobs: Receiver<Message>, results: Sender<Message>, level: u32) {
    let mut ctx = new_deflate_ctx(level);
    let mut out = vec![0u8; CHUNK_DEFLATE_BOUND];

    if results.send(Message::Info(Info::Ready)).is_err() {
        return;
    }
    displaylevel!(4, "compressor {}: ready", id);

    loop {
        let msg = match jobs.recv() {
            Ok(m) => m,
            // Manager hung up; nothing left to do.
            Err(_) => break,
        };
        let (seq, data) = match msg {
            Message::Info(Info::Stop) => {
                displaylevel!(4, "compressor {}: stop received", id);
                break;
            }
            Message::Chunk { seq, data } => (seq, data),
            other => {
                let _ = results.send(Message::Info(Info::Error(format!(
                    "compressor {}: unexpected message {:?}",
                    id, other
                ))));
                return;
            }
        };
        if data.is_empty() {
            let _ = results.send(Message::Info(Info::Error(format!(
                "compressor {}: empty chunk {}",
                id, seq
            ))));
            return;
        }
        let compressed = match deflate_chunk(&mut ctx, &data, &mut out) {
            Ok(n) => out[..n].to_vec(),
            Err(e) => {
                let _ = results.send(Message::Info(Info::Error(format!(
                    "compressor {}: chunk {}: {}",
                    id, seq, e
                ))));
                return;
            }
        };
        if results
            .send(Message::Chunk { seq, data: compressed })
            .is_err()
        {
            break;
        }
    }
}
