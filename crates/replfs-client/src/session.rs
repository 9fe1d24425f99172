//! Client coordinator: roll-call, open-file fan-out, write staging, and
//! the two-phase commit/abort protocol (`spec.md` §4.4). Grounded on
//! `examples/original_source/client.cpp`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use replfs_transport::{Event, EventSource, MulticastChannel};
use replfs_wire::{
    encode_filename, AbortBody, CommitBody, CommitRequestBody, FileId, OpenFileBody, Record,
    ServerId, WriteBlockBody, MAX_WRITE_SIZE,
};

use crate::error::ReplFsError;

const MAX_TIMEOUTS_PER_ROLLCALL: u32 = 3;
const MAX_ROLLCALL_ROUNDS: u32 = 3;
const MAX_TIMEOUTS_PER_OPEN: u32 = 10;
const MAX_COMMIT_LATENCY: Duration = Duration::from_secs(2);
const MAX_TIMEOUTS_PER_COMMIT: u32 = 10;
const MAX_WRITE_NUM: u8 = 127;
const MAX_BLOCK_SIZE: u32 = 512;
const MAX_FILE_SIZE: u64 = 1 << 20;

#[derive(Debug)]
struct StagedWrite {
    write_num: u8,
    byte_offset: u32,
    data: Vec<u8>,
}

#[derive(Debug)]
struct OpenFile {
    commit_num: u32,
    write_num: u8,
    staged_writes: Vec<StagedWrite>,
}

/// The client side of one ReplFS session: one pinned server set, one
/// FileId allocator, one table of files open against that set.
pub struct ClientSession {
    events: EventSource,
    server_ids: HashSet<ServerId>,
    next_file_id: u32,
    open_files: HashMap<FileId, OpenFile>,
}

impl ClientSession {
    /// `InitReplFs`: stands up the transport and runs roll-call to pin
    /// the `numServers`-member quorum used for the rest of the session.
    pub fn new(port: u16, drop_percent: u8, num_servers: usize) -> Result<Self, ReplFsError> {
        let channel = MulticastChannel::new(port, drop_percent)?;
        let mut session = Self {
            events: EventSource::new(channel),
            server_ids: HashSet::new(),
            next_file_id: 1,
            open_files: HashMap::new(),
        };
        if session.roll_call(num_servers) {
            Ok(session)
        } else {
            Err(ReplFsError::Initialization)
        }
    }

    /// Collects distinct `proposedId`s until the set reaches `expected`
    /// members or the per-round heartbeat budget is spent; retries up to
    /// `MAX_ROLLCALL_ROUNDS` rounds, clearing the set before each resend.
    fn roll_call(&mut self, expected: usize) -> bool {
        for round in 0..MAX_ROLLCALL_ROUNDS {
            self.server_ids.clear();
            if let Err(e) = self.events.channel().send(&Record::RollCall) {
                log::warn!("failed to send ROLL_CALL (round {round}): {e}");
            }
            let mut heartbeats = 0;
            while self.server_ids.len() != expected && heartbeats < MAX_TIMEOUTS_PER_ROLLCALL {
                match self.events.next_event() {
                    Event::Packet {
                        record: Record::RollCallAck(body),
                        ..
                    } => {
                        self.server_ids.insert(ServerId(body.proposed_id));
                    }
                    Event::Packet { .. } => {}
                    Event::Heartbeat => heartbeats += 1,
                }
            }
            if self.server_ids.len() == expected {
                log::info!("roll call converged on {expected} servers after round {round}");
                return true;
            }
        }
        log::warn!(
            "roll call failed to converge: have {} of {expected} servers",
            self.server_ids.len()
        );
        false
    }

    /// `OpenFile`: allocates a fresh FileId, fans OPEN_FILE out to the
    /// pinned quorum, and waits for every member to ack it.
    pub fn open_file(&mut self, name: &str) -> Result<FileId, ReplFsError> {
        let file_id = FileId(self.next_file_id);
        self.next_file_id += 1;
        let record = Record::OpenFile(OpenFileBody {
            file_id: file_id.0,
            file_name: encode_filename(name),
        });
        if let Err(e) = self.events.channel().send(&record) {
            log::warn!("failed to send OPEN_FILE: {e}");
        }

        let mut remaining = self.server_ids.clone();
        let mut heartbeats = 0;
        while !remaining.is_empty() && heartbeats < MAX_TIMEOUTS_PER_OPEN {
            match self.events.next_event() {
                Event::Packet {
                    record: Record::OpenFileAck(body),
                    ..
                } if body.file_id == file_id.0 => {
                    remaining.remove(&ServerId(body.server_id));
                    log::debug!("OpenFileAck from {}, {} remaining", body.server_id, remaining.len());
                }
                Event::Packet { .. } => {}
                Event::Heartbeat => {
                    heartbeats += 1;
                    log::debug!("resending OPEN_FILE for file {file_id}");
                    if let Err(e) = self.events.channel().send(&record) {
                        log::warn!("failed to resend OPEN_FILE: {e}");
                    }
                }
            }
        }

        if remaining.is_empty() {
            self.open_files.insert(
                file_id,
                OpenFile {
                    commit_num: 1,
                    write_num: 0,
                    staged_writes: Vec::new(),
                },
            );
            Ok(file_id)
        } else {
            log::warn!("{} servers did not acknowledge OpenFile for {file_id}", remaining.len());
            Err(ReplFsError::Open)
        }
    }

    /// `WriteBlock`: validates limits, multicasts WRITE_BLOCK
    /// fire-and-forget, and stages a copy for phase-1 retransmission.
    /// An empty buffer is a silent no-op.
    pub fn write_block(
        &mut self,
        file_id: FileId,
        buffer: &[u8],
        byte_offset: u32,
    ) -> Result<u32, ReplFsError> {
        if !self.open_files.contains_key(&file_id) {
            return Err(ReplFsError::InvalidArgument("file is not open"));
        }
        let block_size = buffer.len() as u32;
        if block_size > MAX_BLOCK_SIZE {
            return Err(ReplFsError::InvalidArgument("block size exceeds 512 bytes"));
        }
        if byte_offset as u64 + block_size as u64 > MAX_FILE_SIZE {
            return Err(ReplFsError::InvalidArgument("offset plus block size exceeds the 1 MiB cap"));
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        let open_file = self.open_files.get_mut(&file_id).expect("checked above");
        if open_file.write_num >= MAX_WRITE_NUM {
            log::warn!("exceeded max writes for file {file_id} commit {}", open_file.commit_num);
            return Err(ReplFsError::InvalidArgument("write budget exhausted for this commit window"));
        }
        open_file.write_num += 1;
        let write_num = open_file.write_num;
        let commit_num = open_file.commit_num;

        let record = Record::WriteBlock(build_write_block(file_id, commit_num, write_num, byte_offset, buffer));
        if let Err(e) = self.events.channel().send(&record) {
            log::warn!("failed to send WRITE_BLOCK {write_num}: {e}");
        }
        open_file.staged_writes.push(StagedWrite {
            write_num,
            byte_offset,
            data: buffer.to_vec(),
        });
        Ok(block_size)
    }

    /// `Commit`: runs phase 1 (readiness) then phase 2 (finalization).
    pub fn commit(&mut self, file_id: FileId) -> Result<(), ReplFsError> {
        self.commit_with_close(file_id, false)
    }

    /// `Abort`: burns the current commit window locally, then best-effort
    /// collects ABORT_ACKs. Always reports success to the caller.
    pub fn abort(&mut self, file_id: FileId) -> Result<(), ReplFsError> {
        self.abort_with_close(file_id, false)
    }

    /// `CloseFile`: commits if writes are staged, else aborts; either way
    /// carries a close signal to every server.
    pub fn close_file(&mut self, file_id: FileId) -> Result<(), ReplFsError> {
        let open_file = self
            .open_files
            .get(&file_id)
            .ok_or(ReplFsError::InvalidArgument("file is not open"))?;
        if open_file.staged_writes.is_empty() {
            self.abort_with_close(file_id, true)
        } else {
            self.commit_with_close(file_id, true)
        }
    }

    fn commit_with_close(&mut self, file_id: FileId, close: bool) -> Result<(), ReplFsError> {
        if !self.open_files.contains_key(&file_id) {
            return Err(ReplFsError::InvalidArgument("file is not open"));
        }
        self.commit_phase1(file_id)?;
        self.commit_phase2(file_id, close)
    }

    /// Readiness gathering with selective retransmission and a 2-second
    /// per-server liveness bound (`spec.md` §4.4.4).
    fn commit_phase1(&mut self, file_id: FileId) -> Result<(), ReplFsError> {
        let open_file = self.open_files.get(&file_id).expect("checked by caller");
        let commit_num = open_file.commit_num;
        let final_write_num = open_file.write_num;
        let record = Record::CommitRequest(CommitRequestBody {
            file_id: file_id.0,
            commit_num,
            final_write_num,
        });
        if let Err(e) = self.events.channel().send(&record) {
            log::warn!("failed to send COMMIT_REQUEST: {e}");
        }

        let mut remaining = self.server_ids.clone();
        let start = Instant::now();
        let mut last_contact: HashMap<ServerId, Instant> =
            remaining.iter().map(|&s| (s, start)).collect();

        while !remaining.is_empty() {
            match self.events.next_event() {
                Event::Heartbeat => {
                    log::debug!("resending COMMIT_REQUEST for file {file_id}");
                    if let Err(e) = self.events.channel().send(&record) {
                        log::warn!("failed to resend COMMIT_REQUEST: {e}");
                    }
                }
                Event::Packet {
                    record: Record::ReadyToCommit(body),
                    ..
                } if body.file_id == file_id.0 && body.commit_num == commit_num => {
                    let server = ServerId(body.server_id);
                    remaining.remove(&server);
                    last_contact.remove(&server);
                }
                Event::Packet {
                    record: Record::WriteResendRequest(body),
                    ..
                } if body.file_id == file_id.0 && body.commit_num == commit_num => {
                    let server = ServerId(body.server_id);
                    last_contact.insert(server, Instant::now());
                    self.resend_requested_writes(file_id, commit_num, &body.bitmap());
                }
                Event::Packet { .. } => {}
            }

            let now = Instant::now();
            if last_contact.values().any(|&t| now.duration_since(t) >= MAX_COMMIT_LATENCY) {
                log::warn!("server silent past {MAX_COMMIT_LATENCY:?}, failing commit phase 1 for file {file_id}");
                return Err(ReplFsError::Commit("a replica went silent during readiness gathering"));
            }
        }
        Ok(())
    }

    fn resend_requested_writes(&self, file_id: FileId, commit_num: u32, bitmap: &replfs_wire::Bitset128) {
        let Some(open_file) = self.open_files.get(&file_id) else {
            return;
        };
        for write in &open_file.staged_writes {
            if !bitmap.is_set(write.write_num) {
                continue;
            }
            let record = Record::WriteBlock(build_write_block(
                file_id,
                commit_num,
                write.write_num,
                write.byte_offset,
                &write.data,
            ));
            if let Err(e) = self.events.channel().send(&record) {
                log::warn!("failed to resend WRITE_BLOCK {}: {e}", write.write_num);
            }
        }
    }

    /// Sends COMMIT and collects COMMIT_ACKs, heartbeat-bounded
    /// (`spec.md` §4.4.4 phase 2).
    fn commit_phase2(&mut self, file_id: FileId, close: bool) -> Result<(), ReplFsError> {
        let open_file = self.open_files.get(&file_id).expect("checked by caller");
        let commit_num = open_file.commit_num;
        let record = Record::Commit(CommitBody {
            file_id: file_id.0,
            commit_num,
            close_flag: close as u8,
        });
        if let Err(e) = self.events.channel().send(&record) {
            log::warn!("failed to send COMMIT: {e}");
        }

        let mut remaining = self.server_ids.clone();
        let mut heartbeats = 0;
        while !remaining.is_empty() && heartbeats < MAX_TIMEOUTS_PER_COMMIT {
            match self.events.next_event() {
                Event::Heartbeat => {
                    heartbeats += 1;
                    if let Err(e) = self.events.channel().send(&record) {
                        log::warn!("failed to resend COMMIT: {e}");
                    }
                }
                Event::Packet {
                    record: Record::CommitAck(body),
                    ..
                } if body.file_id == file_id.0 && body.commit_num == commit_num => {
                    remaining.remove(&ServerId(body.server_id));
                }
                Event::Packet { .. } => {}
            }
        }

        if !remaining.is_empty() {
            log::warn!("{} servers never acked COMMIT for file {file_id}", remaining.len());
            return Err(ReplFsError::Commit("not every replica acknowledged the commit"));
        }
        let open_file = self.open_files.get_mut(&file_id).expect("checked by caller");
        open_file.staged_writes.clear();
        open_file.commit_num += 1;
        open_file.write_num = 0;
        if close {
            self.open_files.remove(&file_id);
        }
        Ok(())
    }

    fn abort_with_close(&mut self, file_id: FileId, close: bool) -> Result<(), ReplFsError> {
        let open_file = self
            .open_files
            .get_mut(&file_id)
            .ok_or(ReplFsError::InvalidArgument("file is not open"))?;
        let commit_num = open_file.commit_num;
        open_file.staged_writes.clear();
        open_file.commit_num += 1;
        open_file.write_num = 0;
        if close {
            self.open_files.remove(&file_id);
        }

        let record = Record::Abort(AbortBody {
            file_id: file_id.0,
            commit_num,
            close_flag: close as u8,
        });
        if let Err(e) = self.events.channel().send(&record) {
            log::warn!("failed to send ABORT: {e}");
        }

        let mut remaining = self.server_ids.clone();
        let mut heartbeats = 0;
        while !remaining.is_empty() && heartbeats < MAX_TIMEOUTS_PER_COMMIT {
            match self.events.next_event() {
                Event::Heartbeat => {
                    heartbeats += 1;
                    if let Err(e) = self.events.channel().send(&record) {
                        log::warn!("failed to resend ABORT: {e}");
                    }
                }
                Event::Packet {
                    record: Record::AbortAck(body),
                    ..
                } if body.file_id == file_id.0 && body.commit_num == commit_num => {
                    remaining.remove(&ServerId(body.server_id));
                }
                Event::Packet { .. } => {}
            }
        }
        if !remaining.is_empty() {
            log::debug!("{} servers never acked ABORT for file {file_id}, ignoring", remaining.len());
        }
        Ok(())
    }
}

fn build_write_block(
    file_id: FileId,
    commit_num: u32,
    write_num: u8,
    byte_offset: u32,
    bytes: &[u8],
) -> WriteBlockBody {
    let mut data = [0u8; MAX_WRITE_SIZE];
    data[..bytes.len()].copy_from_slice(bytes);
    WriteBlockBody {
        file_id: file_id.0,
        commit_num,
        write_num,
        byte_offset,
        block_size: bytes.len() as u32,
        data,
    }
}
