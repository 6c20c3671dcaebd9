//! Entity types held by the state store.
//!
//! These are plain data: the providers own the logic that mutates them. Each
//! record mirrors one kernel object the automaton reconstructs from the event
//! stream (threads, FDs, CPUs, disks, interfaces, interrupts, I/O requests).

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;

use crate::syscalls::{is_generic_fd_name, SyscallKind, UNKNOWN_FILENAME};

/// What an FD is believed to point at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FdType {
    #[default]
    Unknown,
    Disk,
    Net,
    /// Guessed from a network transmit during an unclassified write.
    MaybeNet,
}

impl FdType {
    pub fn is_net(self) -> bool {
        matches!(self, FdType::Net | FdType::MaybeNet)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Byte counters shared by FDs and processes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IoCounters {
    pub read: u64,
    pub write: u64,
    pub net_read: u64,
    pub net_write: u64,
    /// Disk read/write through the page cache, not necessarily hitting a device.
    pub disk_read: u64,
    pub disk_write: u64,
    /// Traffic on FDs of unknown type (FD passing, statedump).
    pub unk_read: u64,
    pub unk_write: u64,
}

impl IoCounters {
    pub fn credit(&mut self, direction: Direction, fd_type: FdType, bytes: u64) {
        match direction {
            Direction::Read => {
                self.read += bytes;
                match fd_type {
                    FdType::Net | FdType::MaybeNet => self.net_read += bytes,
                    FdType::Disk => self.disk_read += bytes,
                    FdType::Unknown => self.unk_read += bytes,
                }
            }
            Direction::Write => {
                self.write += bytes;
                match fd_type {
                    FdType::Net | FdType::MaybeNet => self.net_write += bytes,
                    FdType::Disk => self.disk_write += bytes,
                    FdType::Unknown => self.unk_write += bytes,
                }
            }
        }
    }

    pub fn merge(&mut self, other: &IoCounters) {
        self.read += other.read;
        self.write += other.write;
        self.net_read += other.net_read;
        self.net_write += other.net_write;
        self.disk_read += other.disk_read;
        self.disk_write += other.disk_write;
        self.unk_read += other.unk_read;
        self.unk_write += other.unk_write;
    }
}

/// A file descriptor description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Fd {
    pub fd: i64,
    pub filename: String,
    pub fd_type: FdType,
    /// Socket address family, when opened by a network syscall.
    pub family: Option<i64>,
    pub cloexec: bool,
    /// Pid of the process this FD was inherited from on fork.
    pub parent: Option<i32>,
    pub counters: IoCounters,
    pub open_count: u64,
    pub close_count: u64,
    #[serde(skip)]
    pub io_requests: Vec<IoRequest>,
}

impl Fd {
    pub fn new(fd: i64, filename: impl Into<String>, fd_type: FdType) -> Self {
        Self {
            fd,
            filename: filename.into(),
            fd_type,
            ..Default::default()
        }
    }

    /// Placeholder for an FD used before we saw where it came from.
    pub fn unknown_origin(fd: i64) -> Self {
        Self::new(fd, UNKNOWN_FILENAME, FdType::Unknown)
    }

    /// Copy handed to a forked child: same description, fresh counters.
    pub fn inherit(&self, parent_pid: i32) -> Self {
        Self {
            fd: self.fd,
            filename: self.filename.clone(),
            fd_type: self.fd_type,
            family: self.family,
            cloexec: self.cloexec,
            parent: Some(parent_pid),
            ..Default::default()
        }
    }

    pub fn has_known_filename(&self) -> bool {
        !self.filename.is_empty() && self.filename != UNKNOWN_FILENAME
    }

    /// Sums `other`'s counters and history into this description.
    pub fn absorb(&mut self, other: Fd) {
        self.counters.merge(&other.counters);
        self.open_count += other.open_count;
        self.close_count += other.close_count;
        self.io_requests.extend(other.io_requests);
    }
}

/// One entry of an FD number's filename history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChronoFd {
    pub filename: String,
    pub fd_type: FdType,
}

/// Per-name syscall latency statistics for one thread.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyscallStats {
    pub count: u64,
    pub min: Option<u64>,
    pub max: u64,
    pub total_duration: u64,
}

impl SyscallStats {
    pub fn record(&mut self, duration: u64) {
        self.count += 1;
        self.min = Some(self.min.map_or(duration, |m| m.min(duration)));
        self.max = self.max.max(duration);
        self.total_duration += duration;
    }
}

/// I/O-specific part of an in-flight syscall, resolved at entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyscallIo {
    pub kind: SyscallKind,
    /// Acting FD for single-FD calls.
    pub fd: Option<i64>,
    /// Source and destination FDs for splice-style calls.
    pub fd_in: Option<i64>,
    pub fd_out: Option<i64>,
    /// Filename the operation is about (the new FD's name for opens).
    pub filename: Option<String>,
    pub fd_type: FdType,
    pub family: Option<i64>,
    pub cloexec: bool,
    /// Requested size, if the entry event carries one.
    pub size: Option<u64>,
}

impl SyscallIo {
    pub fn new(kind: SyscallKind) -> Self {
        Self {
            kind,
            fd: None,
            fd_in: None,
            fd_out: None,
            filename: None,
            fd_type: FdType::Unknown,
            family: None,
            cloexec: false,
            size: None,
        }
    }

    /// FD the finished request is filed under.
    pub fn acting_fd(&self) -> Option<i64> {
        self.fd.or(self.fd_in)
    }
}

/// The syscall a thread is currently inside of.
///
/// Other providers annotate it while it is open (memory pressure, dirty
/// buffers); the syscall provider reads the annotations when it finalizes the
/// record on exit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentSyscall {
    pub name: String,
    pub start: u64,
    pub io: Option<SyscallIo>,
    pub pages_allocated: u64,
    pub pages_freed: u64,
    pub pages_written: Option<u64>,
    pub dirty: u64,
    pub woke_kswapd: bool,
}

impl CurrentSyscall {
    pub fn new(name: impl Into<String>, start: u64, io: Option<SyscallIo>) -> Self {
        Self {
            name: name.into(),
            start,
            io,
            pages_allocated: 0,
            pages_freed: 0,
            pages_written: None,
            dirty: 0,
            woke_kswapd: false,
        }
    }
}

/// A thread, and for thread-group leaders, the process it stands for.
#[derive(Clone, Debug, Default)]
pub struct Process {
    pub tid: i32,
    /// Thread-group leader. `None` until learned.
    pub pid: Option<i32>,
    pub comm: String,
    pub prio: Option<i32>,
    /// Thread that ran on the CPU before this one was scheduled in.
    pub prev_tid: Option<i32>,
    pub last_sched: Option<u64>,
    pub cpu_ns: u64,
    pub last_wakeup: Option<u64>,
    pub last_waker: Option<i32>,
    pub fds: BTreeMap<i64, Fd>,
    /// Last description closed under each filename.
    pub closed_fds: HashMap<String, Fd>,
    /// Per FD number, filename changes keyed by timestamp.
    pub chrono_fds: HashMap<i64, BTreeMap<u64, ChronoFd>>,
    pub current_syscall: Option<CurrentSyscall>,
    pub syscalls: BTreeMap<String, SyscallStats>,
    pub total_syscalls: u64,
    pub io: IoCounters,
    pub block_read: u64,
    pub block_write: u64,
    pub allocated_pages: u64,
    pub freed_pages: u64,
    /// Requests not tied to an FD (block I/O, sync, failed opens).
    pub io_requests: Vec<IoRequest>,
}

impl Process {
    pub fn new(tid: i32) -> Self {
        Self {
            tid,
            ..Default::default()
        }
    }

    pub fn with_pid(tid: i32, pid: i32, comm: impl Into<String>) -> Self {
        Self {
            tid,
            pid: Some(pid),
            comm: comm.into(),
            ..Default::default()
        }
    }

    /// True for secondary threads whose FDs live on the leader.
    pub fn is_secondary_thread(&self) -> bool {
        matches!(self.pid, Some(pid) if pid != self.tid)
    }

    /// Records `filename` for `fd` at `ts` if it differs from the last one seen.
    pub fn track_chrono_fd(&mut self, fd: i64, filename: &str, fd_type: FdType, ts: u64) {
        let history = self.chrono_fds.entry(fd).or_default();
        let changed = history
            .values()
            .next_back()
            .map_or(true, |last| last.filename != filename);
        if changed {
            history.insert(
                ts,
                ChronoFd {
                    filename: filename.to_string(),
                    fd_type,
                },
            );
        }
    }

    /// What `fd` pointed to at time `ts`, from the chronological history.
    pub fn fd_at(&self, fd: i64, ts: u64) -> Option<&ChronoFd> {
        self.chrono_fds
            .get(&fd)?
            .range(..=ts)
            .next_back()
            .map(|(_, entry)| entry)
    }

    /// Returns `fd`, creating an unknown-origin placeholder if it is not on record.
    pub fn get_fd(&mut self, fd: i64, ts: u64) -> &mut Fd {
        let (filename, fd_type) = match self.fds.get(&fd) {
            Some(f) => (f.filename.clone(), f.fd_type),
            None => (UNKNOWN_FILENAME.to_string(), FdType::Unknown),
        };
        self.track_chrono_fd(fd, &filename, fd_type, ts);
        self.fds.entry(fd).or_insert_with(|| Fd::unknown_origin(fd))
    }

    /// Removes `fd`, folding its counters into `closed_fds` under its filename.
    ///
    /// Returns the closed description's filename, or `None` if `fd` was not open.
    pub fn close_fd(&mut self, fd: i64) -> Option<String> {
        let mut closed = self.fds.remove(&fd)?;
        let filename = closed.filename.clone();
        closed.close_count += 1;
        if is_generic_fd_name(&filename) {
            return Some(filename);
        }
        match self.closed_fds.get_mut(&filename) {
            Some(previous) => previous.absorb(closed),
            None => {
                self.closed_fds.insert(filename.clone(), closed);
            }
        }
        Some(filename)
    }

    /// Installs `fd` opened on `filename`, reusing the closed description of the
    /// same name so cumulative counters survive a close/reopen cycle.
    pub fn open_fd(&mut self, fd: i64, filename: &str, fd_type: FdType, ts: u64) -> &mut Fd {
        // A lost close leaves a stale entry behind; retire it first.
        self.close_fd(fd);
        let mut desc = match is_generic_fd_name(filename) {
            true => None,
            false => self.closed_fds.remove(filename),
        }
        .unwrap_or_else(|| Fd::new(fd, filename, fd_type));
        desc.fd = fd;
        desc.fd_type = fd_type;
        desc.open_count += 1;
        self.track_chrono_fd(fd, filename, fd_type, ts);
        self.fds.entry(fd).or_insert(desc)
    }
}

/// Kernel interrupt handled in hard-IRQ context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HardIrq {
    pub id: i64,
    pub cpu_id: u32,
    pub name: Option<String>,
    pub begin_ts: u64,
    pub end_ts: Option<u64>,
    pub ret: Option<i64>,
}

impl HardIrq {
    pub fn duration(&self) -> Option<u64> {
        self.end_ts.map(|end| end.saturating_sub(self.begin_ts))
    }
}

/// Deferred interrupt work for one softirq vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SoftIrq {
    pub vec: i64,
    pub cpu_id: u32,
    pub raise_ts: Option<u64>,
    pub begin_ts: Option<u64>,
    pub end_ts: Option<u64>,
}

impl SoftIrq {
    pub fn duration(&self) -> Option<u64> {
        Some(self.end_ts?.saturating_sub(self.begin_ts?))
    }

    /// Delay between the raise and the handler starting.
    pub fn raise_latency(&self) -> Option<u64> {
        Some(self.begin_ts?.saturating_sub(self.raise_ts?))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Cpu {
    pub cpu_id: u32,
    /// `None` while idle.
    pub current_tid: Option<i32>,
    pub current_hard_irq: Option<HardIrq>,
    /// Raised/running softirqs in arrival order, all vectors interleaved.
    pub current_softirqs: VecDeque<SoftIrq>,
    /// When the current non-idle task was scheduled in.
    pub task_start: Option<u64>,
    pub busy_ns: u64,
}

impl Cpu {
    pub fn new(cpu_id: u32) -> Self {
        Self {
            cpu_id,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IoType {
    Syscall,
    Block,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IoOperation {
    Open,
    Read,
    Write,
    /// splice/sendfile: reads one FD and writes another.
    ReadWrite,
    Close,
    Sync,
    /// Block request issued without `rwbs` flags.
    Unknown,
}

impl IoOperation {
    pub fn for_kind(kind: SyscallKind) -> Self {
        match kind {
            SyscallKind::DiskOpen | SyscallKind::NetOpen | SyscallKind::DupOpen => {
                IoOperation::Open
            }
            SyscallKind::Close => IoOperation::Close,
            SyscallKind::Read => IoOperation::Read,
            SyscallKind::Write => IoOperation::Write,
            SyscallKind::ReadWrite => IoOperation::ReadWrite,
            SyscallKind::Sync => IoOperation::Sync,
        }
    }
}

/// One finished I/O operation, from a syscall or from the block layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IoRequest {
    pub io_type: IoType,
    pub operation: IoOperation,
    /// Syscall name; `None` for block requests.
    pub name: Option<String>,
    /// Requested size in bytes, or the returned size when none was requested.
    pub size: Option<u64>,
    /// Bytes actually transferred, from the syscall return value.
    pub returned_size: Option<u64>,
    pub begin: u64,
    pub end: Option<u64>,
    /// Syscalls: `end - begin`. Block requests: latency per sector.
    pub duration: Option<u64>,
    pub tid: Option<i32>,
    pub pid: Option<i32>,
    pub fd: Option<i64>,
    pub filename: Option<String>,
    pub ret: Option<i64>,
    pub pages_allocated: u64,
    pub pages_freed: u64,
    pub pages_written: u64,
    pub dirty: u64,
    pub woke_kswapd: bool,
    pub dev: Option<u64>,
    pub sector: Option<u64>,
    pub nr_sector: Option<u64>,
}

impl IoRequest {
    pub fn new(io_type: IoType, operation: IoOperation, begin: u64) -> Self {
        Self {
            io_type,
            operation,
            name: None,
            size: None,
            returned_size: None,
            begin,
            end: None,
            duration: None,
            tid: None,
            pid: None,
            fd: None,
            filename: None,
            ret: None,
            pages_allocated: 0,
            pages_freed: 0,
            pages_written: 0,
            dirty: 0,
            woke_kswapd: false,
            dev: None,
            sector: None,
            nr_sector: None,
        }
    }

    pub fn complete(&mut self, end: u64) {
        self.end = Some(end);
        self.duration = Some(end.saturating_sub(self.begin));
    }

    /// Error number of a failed syscall request.
    pub fn errno(&self) -> Option<i64> {
        self.ret.filter(|ret| *ret < 0).map(|ret| -ret)
    }
}

/// A block request issued but not yet completed.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingBlockRequest {
    pub nr_sector: u64,
    pub issue_ts: u64,
    /// Issuing thread, when the issue carried thread context.
    pub tid: Option<i32>,
    pub request: IoRequest,
}

#[derive(Clone, Debug, Default)]
pub struct Disk {
    pub dev: u64,
    /// Human-readable name from the statedump.
    pub name: Option<String>,
    pub nr_sector: u64,
    pub nr_requests: u64,
    pub completed_requests: u64,
    pub bytes_requested: u64,
    /// Sum of per-sector latencies of completed requests, in ns.
    pub request_time: f64,
    /// In-flight requests keyed by sector; one per sector.
    pub pending_requests: HashMap<u64, PendingBlockRequest>,
    pub io_requests: Vec<IoRequest>,
}

impl Disk {
    pub fn new(dev: u64) -> Self {
        Self {
            dev,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("({},{})", self.dev >> 20, self.dev & 0xfffff),
        }
    }
}

/// Alias left by a bio remap: I/O on `(dev, sector)` belongs to `orig_dev`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRemap {
    pub orig_dev: u64,
    pub dev: u64,
    pub sector: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Iface {
    pub name: String,
    pub send_bytes: u64,
    pub send_packets: u64,
    pub recv_bytes: u64,
    pub recv_packets: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub allocated_pages: u64,
    pub freed_pages: u64,
    /// Allocations not yet matched by a free.
    pub outstanding_pages: u64,
    /// Buffers dirtied since the kernel last reported the global dirty state.
    pub dirty: u64,
}

/// A buffer dirtied by a write inside a syscall on a known FD.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirtyPage {
    pub tid: i32,
    pub syscall: String,
    pub filename: String,
    pub fd: i64,
}
