//! Compression manager: drives a whole run.
//!
//! The manager is the only role that reads the input, the only owner of
//! per-run counters, and the sole authority for shutdown. It dispatches
//! fixed-size chunks to the worker pool, reorders results by sequence
//! number, forwards them to the writer, and emits member boundaries.
//!
//! Back-pressure rests on two caps:
//!
//! - at most `compressors_count` chunks are ever in flight to workers;
//! - at most [`Config::ordering_set_hwm`] completed chunks wait for
//!   their turn in the ordering set.
//!
//! The second cap is strictly greater than the first, so some worker can
//! always deliver a result and wake the event loop; the initial push
//! fills every worker before the loop starts, so there is never an
//! "all idle, no events" state.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::mem;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::displaylevel;
use crate::error::{DzError, Result};
use crate::format::{encode_member_header, CHUNKS_PER_MEMBER, CHUNK_SIZE};
use crate::pipeline::compressor;
use crate::pipeline::config::Config;
use crate::pipeline::messages::{Info, Message, OrderingSet};
use crate::pipeline::writer;
use crate::util::{basename, get_file_size, is_reg_file, unix_mtime};

/// How long the manager waits for every thread's READY.
const READY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Poll granularity while waiting on the READY deadline.
const TICK: Duration = Duration::from_millis(10);

/// Totals reported after a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressStat {
    /// Uncompressed bytes read from the input.
    pub bytes: u64,
    /// Chunks dispatched and written.
    pub chunks: u64,
    /// Members emitted.
    pub members: u64,
}

/// Compress `cfg.input` into `cfg.output`.
///
/// On error the destination file is left behind in an undefined,
/// unpatched state and must be considered invalid.
pub fn compress_file(cfg: &Config) -> Result<CompressStat> {
    CompressManager::new(cfg.clone()).run()
}

pub struct CompressManager {
    cfg: Config,
}

impl CompressManager {
    pub fn new(cfg: Config) -> CompressManager {
        CompressManager { cfg }
    }

    /// Run the whole pipeline to completion, joining every thread before
    /// returning.
    pub fn run(self) -> Result<CompressStat> {
        self.cfg.validate()?;
        if !is_reg_file(&self.cfg.input) {
            return Err(DzError::InvalidArgument("input is not a regular file"));
        }
        let bytes_total = get_file_size(&self.cfg.input);
        let mtime = unix_mtime(&self.cfg.input);
        let fname = basename(&self.cfg.input);
        let input = File::open(&self.cfg.input)?;

        let mut open_opts = OpenOptions::new();
        open_opts.write(true);
        if self.cfg.force {
            open_opts.create(true).truncate(true);
        } else {
            open_opts.create_new(true);
        }
        let output = open_opts.open(&self.cfg.output)?;

        displaylevel!(
            2,
            "dzip: compressing {} ({} bytes) with {} workers, level {}",
            self.cfg.input.display(),
            bytes_total,
            self.cfg.compressors_count,
            self.cfg.level
        );

        let mut pool = Pool::spawn(&self.cfg, output);
        let mut driver = Driver::new(&self.cfg, input, bytes_total, mtime, fname);
        let result = driver.drive(&mut pool);
        pool.shutdown();
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Thread pool and transport
// ─────────────────────────────────────────────────────────────────────────────

/// All spawned threads plus the manager's channel endpoints.
struct Pool {
    jobs_tx: Option<Sender<Message>>,
    results_rx: Receiver<Message>,
    writer_tx: Option<Sender<Message>>,
    wfeed_rx: Receiver<Message>,
    workers: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    compressors_count: usize,
}

impl Pool {
    fn spawn(cfg: &Config, output: File) -> Pool {
        let hwm = cfg.msg_queue_hwm();
        let (jobs_tx, jobs_rx) = bounded::<Message>(hwm);
        let (results_tx, results_rx) = bounded::<Message>(hwm);
        let (writer_tx, writer_rx) = bounded::<Message>(hwm);
        let (wfeed_tx, wfeed_rx) = bounded::<Message>(hwm);

        let workers = (0..cfg.compressors_count)
            .map(|id| {
                let jobs = jobs_rx.clone();
                let results = results_tx.clone();
                let level = cfg.level;
                thread::spawn(move || compressor::run(id, jobs, results, level))
            })
            .collect();
        let writer = thread::spawn(move || writer::run(output, writer_rx, wfeed_tx));

        Pool {
            jobs_tx: Some(jobs_tx),
            results_rx,
            writer_tx: Some(writer_tx),
            wfeed_rx,
            workers,
            writer: Some(writer),
            compressors_count: cfg.compressors_count,
        }
    }

    /// Blocking dispatch to the worker pool.
    fn send_job(&self, msg: Message) -> Result<()> {
        match &self.jobs_tx {
            Some(tx) => tx.send(msg).map_err(|_| DzError::Cancelled),
            None => Err(DzError::Cancelled),
        }
    }

    /// Blocking send to the writer; member boundaries must never be
    /// dropped, so there is no non-blocking variant.
    fn send_writer(&self, msg: Message) -> Result<()> {
        let tx = match &self.writer_tx {
            Some(tx) => tx,
            None => return Err(DzError::Cancelled),
        };
        if tx.send(msg).is_ok() {
            return Ok(());
        }
        // The writer hung up; surface its parting error if it left one.
        match self.wfeed_rx.try_recv() {
            Ok(Message::Info(Info::Error(e))) => Err(DzError::Io(io::Error::other(e))),
            _ => Err(DzError::Cancelled),
        }
    }

    /// Broadcast Stop, hang up the channels, and join every thread.
    /// Safe to call after a partial failure; joins are unconditional so
    /// no thread outlives the run.
    fn shutdown(&mut self) {
        if let Some(tx) = self.jobs_tx.take() {
            for _ in 0..self.compressors_count {
                let _ = tx.try_send(Message::Info(Info::Stop));
            }
            // Dropping the sender wakes any worker the try_send missed.
        }
        if let Some(tx) = self.writer_tx.take() {
            let _ = tx.send(Message::Info(Info::Stop));
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event loop
// ─────────────────────────────────────────────────────────────────────────────

struct Driver {
    input: File,
    level: u32,
    fname: String,
    mtime: u32,
    compressors_count: usize,
    ordering_hwm: usize,
    /// Member capacity; [`CHUNKS_PER_MEMBER`] outside of tests.
    chunks_per_member: usize,

    bytes_total: u64,
    chunks_total: u64,
    members_total: u64,

    // Cross-member progress.
    bytes_rx: u64,
    chunks_rx_total: u64,
    members_tx: u64,
    /// Chunks dispatched to workers and not yet returned.
    msg_pushed: usize,
    ordering: OrderingSet,

    // Current-member progress.
    cur_chunks_rx: usize,
    cur_chunks_tx: usize,
    cur_chunks_mx: usize,
    cur_bytes_rx: u32,
    cur_crc32: crc32fast::Hasher,
}

impl Driver {
    fn new(cfg: &Config, input: File, bytes_total: u64, mtime: u32, fname: String) -> Driver {
        let chunks_total = bytes_total.div_ceil(CHUNK_SIZE as u64);
        let members_total = if chunks_total == 0 {
            1
        } else {
            chunks_total.div_ceil(CHUNKS_PER_MEMBER as u64)
        };
        Driver {
            input,
            level: cfg.level,
            fname,
            mtime,
            compressors_count: cfg.compressors_count,
            ordering_hwm: cfg.ordering_set_hwm(),
            chunks_per_member: CHUNKS_PER_MEMBER,
            bytes_total,
            chunks_total,
            members_total,
            bytes_rx: 0,
            chunks_rx_total: 0,
            members_tx: 0,
            msg_pushed: 0,
            ordering: OrderingSet::new(),
            cur_chunks_rx: 0,
            cur_chunks_tx: 0,
            cur_chunks_mx: chunks_total.min(CHUNKS_PER_MEMBER as u64) as usize,
            cur_bytes_rx: 0,
            cur_crc32: crc32fast::Hasher::new(),
        }
    }

    fn drive(&mut self, pool: &mut Pool) -> Result<CompressStat> {
        self.wait_all_ready(pool)?;
        displaylevel!(3, "dzip: {} member(s) planned", self.members_total);

        // First member carries the original name and mtime.
        pool.send_writer(Message::MemberHeader(encode_member_header(
            self.cur_chunks_mx,
            self.level,
            Some(&self.fname),
            self.mtime,
        )))?;

        // Initial push: fill every worker before waiting on anything.
        self.push_chunks(pool)?;

        loop {
            // Forward results that are next in line.
            while let Some(chunk) = self.ordering.pop_if(self.cur_chunks_tx as u16 + 1) {
                pool.send_writer(Message::Chunk { seq: chunk.seq, data: chunk.data })?;
                self.cur_chunks_tx += 1;
            }

            if self.member_complete() {
                let crc = mem::take(&mut self.cur_crc32).finalize();
                pool.send_writer(Message::MemberClose {
                    crc32: crc,
                    isize: self.cur_bytes_rx,
                })?;
                self.members_tx += 1;
                displaylevel!(
                    3,
                    "dzip: member {}/{} closed ({} chunks)",
                    self.members_tx,
                    self.members_total,
                    self.cur_chunks_rx
                );
                if self.members_tx == self.members_total {
                    break;
                }
                self.open_next_member(pool)?;
                self.push_chunks(pool)?;
                continue;
            }

            self.push_chunks(pool)?;
            if self.msg_pushed == 0 {
                // Nothing in flight and the member cannot close: a
                // sequence gap or a diverged counter.
                return Err(DzError::Invariant("pipeline stalled with no work in flight"));
            }
            self.wait_event(pool)?;
        }

        Ok(CompressStat {
            bytes: self.bytes_rx,
            chunks: self.chunks_rx_total,
            members: self.members_tx,
        })
    }

    /// Collect READY from the writer and every worker, bounded by
    /// [`READY_TIMEOUT`].
    fn wait_all_ready(&self, pool: &Pool) -> Result<()> {
        let deadline = Instant::now() + READY_TIMEOUT;
        let mut workers_ready = 0usize;
        let mut writer_ready = false;
        while workers_ready < self.compressors_count || !writer_ready {
            if Instant::now() >= deadline {
                return Err(DzError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "pipeline threads were not ready in time",
                )));
            }
            select! {
                recv(pool.results_rx) -> msg => match msg {
                    Ok(Message::Info(Info::Ready)) => workers_ready += 1,
                    Ok(Message::Info(Info::Error(e))) => {
                        return Err(DzError::Io(io::Error::other(e)))
                    }
                    Ok(_) => return Err(DzError::Invariant("payload before READY")),
                    Err(_) => return Err(DzError::Cancelled),
                },
                recv(pool.wfeed_rx) -> msg => match msg {
                    Ok(Message::Info(Info::Ready)) => writer_ready = true,
                    Ok(Message::Info(Info::Error(e))) => {
                        return Err(DzError::Io(io::Error::other(e)))
                    }
                    Ok(_) => return Err(DzError::Invariant("payload before READY")),
                    Err(_) => return Err(DzError::Cancelled),
                },
                default(TICK) => {}
            }
        }
        Ok(())
    }

    fn member_complete(&self) -> bool {
        self.cur_chunks_rx == self.cur_chunks_mx
            && self.cur_chunks_tx == self.cur_chunks_mx
            && self.msg_pushed == 0
            && self.ordering.is_empty()
    }

    /// Shrink the member capacity so tests can exercise member rollover
    /// without multi-gigabyte inputs.
    #[cfg(test)]
    fn with_member_cap(mut self, cap: usize) -> Driver {
        self.chunks_per_member = cap;
        self.members_total = if self.chunks_total == 0 {
            1
        } else {
            self.chunks_total.div_ceil(cap as u64)
        };
        self.cur_chunks_mx = self.chunks_total.min(cap as u64) as usize;
        self
    }

    fn open_next_member(&mut self, pool: &Pool) -> Result<()> {
        let remaining = self.chunks_total - self.chunks_rx_total;
        self.cur_chunks_mx = remaining.min(self.chunks_per_member as u64) as usize;
        self.cur_chunks_rx = 0;
        self.cur_chunks_tx = 0;
        self.cur_bytes_rx = 0;
        // Continuation members carry neither name nor mtime.
        pool.send_writer(Message::MemberHeader(encode_member_header(
            self.cur_chunks_mx,
            self.level,
            None,
            0,
        )))
    }

    /// Read and dispatch chunks while worker slots are free, the member
    /// has capacity, and the ordering set is below its high-water mark.
    fn push_chunks(&mut self, pool: &Pool) -> Result<()> {
        while self.msg_pushed < self.compressors_count
            && self.cur_chunks_rx < self.cur_chunks_mx
            && self.ordering.len() < self.ordering_hwm
        {
            let remaining = self.bytes_total - self.bytes_rx;
            let len = remaining.min(CHUNK_SIZE as u64) as usize;
            let mut data = vec![0u8; len];
            self.input.read_exact(&mut data).map_err(|e| {
                // The input shrank after it was measured.
                DzError::Io(io::Error::new(e.kind(), "input file changed while reading"))
            })?;
            self.cur_crc32.update(&data);
            self.cur_chunks_rx += 1;
            self.chunks_rx_total += 1;
            self.bytes_rx += len as u64;
            self.cur_bytes_rx += len as u32;
            let seq = self.cur_chunks_rx as u16;
            pool.send_job(Message::Chunk { seq, data })?;
            self.msg_pushed += 1;
        }
        Ok(())
    }

    /// Block until one event arrives from a worker or the writer.
    fn wait_event(&mut self, pool: &Pool) -> Result<()> {
        select! {
            recv(pool.results_rx) -> msg => match msg {
                Ok(Message::Chunk { seq, data }) => {
                    if self.msg_pushed == 0 {
                        return Err(DzError::Invariant("result without an outstanding job"));
                    }
                    self.msg_pushed -= 1;
                    self.ordering.insert(seq, data);
                    Ok(())
                }
                Ok(Message::Info(Info::Error(e))) => Err(DzError::Io(io::Error::other(e))),
                Ok(_) => Err(DzError::Invariant("unexpected message from a compressor")),
                Err(_) => Err(DzError::Cancelled),
            },
            recv(pool.wfeed_rx) -> msg => match msg {
                Ok(Message::Info(Info::Error(e))) => Err(DzError::Io(io::Error::other(e))),
                Ok(_) => Err(DzError::Invariant("unexpected message from the writer")),
                Err(_) => Err(DzError::Cancelled),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests — small end-to-end runs; wire-level checks live in tests/
// ─────────────────────────────────────────────────────────────────────────────
