//! FD table bookkeeping for I/O syscalls.
//!
//! Entry-side helpers resolve what an I/O syscall is about (the file being
//! opened, the FD being read) while the arguments are at hand; exit-side
//! helpers apply the outcome once the return value is known. Every table
//! operation goes through the thread-group leader.

use log::trace;

use crate::event::Event;
use crate::model::{
    CurrentSyscall, Direction, FdType, IoOperation, IoRequest, IoType, Process, SyscallIo,
};
use crate::notify::{Notification, Topic};
use crate::state::State;
use crate::syscalls::{
    net_fd_type, requested_size, v4addr, SyscallKind, AF_INET, F_DUPFD, F_DUPFD_CLOEXEC,
    O_CLOEXEC, SOCKET_FILENAME, UNKNOWN_FILENAME,
};

fn has_cloexec(flags: Option<i64>) -> bool {
    flags.is_some_and(|f| f & O_CLOEXEC == O_CLOEXEC)
}

/// Resolves the I/O part of syscall `name` entered by `tid`.
///
/// Returns `None` when the call turns out not to be I/O (an `fcntl` that does
/// not duplicate) or lacks the fields needed to track it.
pub(super) fn track_entry(
    state: &mut State,
    tid: i32,
    name: &str,
    kind: SyscallKind,
    event: &Event,
) -> Option<SyscallIo> {
    let ts = event.timestamp;
    let mut io = SyscallIo::new(kind);
    match kind {
        SyscallKind::DiskOpen => {
            io.filename = Some(event.str("filename")?.to_string());
            io.fd_type = FdType::Disk;
            io.cloexec = has_cloexec(event.int("flags"));
        }
        SyscallKind::NetOpen => track_net_open(&mut io, name, event),
        SyscallKind::DupOpen => track_dup(state, tid, &mut io, name, event)?,
        SyscallKind::Close => {
            let fd = event.int("fd")?;
            io.fd = Some(fd);
            let leader = state.leader_tid(tid);
            let proc = state.get_or_create_thread(leader);
            if let Some(desc) = proc.fds.get(&fd) {
                io.filename = Some(desc.filename.clone());
                io.fd_type = desc.fd_type;
                close_fd(state, leader, fd, ts);
            }
        }
        SyscallKind::Read | SyscallKind::Write | SyscallKind::Sync => {
            if name != "sync" {
                let fd = event.int("fd")?;
                let desc = state.leader_mut(tid).get_fd(fd, ts);
                io.fd = Some(fd);
                io.filename = Some(desc.filename.clone());
                io.fd_type = desc.fd_type;
            }
            io.size = requested_size(name, event);
        }
        SyscallKind::ReadWrite => {
            let (in_key, out_key, size_key) = match name {
                "splice" => ("fd_in", "fd_out", "len"),
                _ => ("in_fd", "out_fd", "count"),
            };
            let (fd_in, fd_out) = (event.int(in_key)?, event.int(out_key)?);
            let proc = state.leader_mut(tid);
            proc.get_fd(fd_out, ts);
            let desc = proc.get_fd(fd_in, ts);
            io.fd_in = Some(fd_in);
            io.fd_out = Some(fd_out);
            io.filename = Some(desc.filename.clone());
            io.fd_type = desc.fd_type;
            io.size = event.uint(size_key);
        }
    }
    Some(io)
}

fn track_net_open(io: &mut SyscallIo, name: &str, event: &Event) {
    io.family = event.int("family");
    io.fd_type = net_fd_type(io.family);
    io.filename = Some(SOCKET_FILENAME.to_string());
    match name {
        "accept" | "accept4" => {
            if io.family == Some(AF_INET) {
                if let (Some(addr), Some(port)) = (v4addr(event, "v4addr"), event.int("sport")) {
                    io.filename = Some(format!("{addr}:{port}"));
                }
            }
            io.cloexec = has_cloexec(event.int("flags"));
        }
        // SOCK_CLOEXEC shares its value with O_CLOEXEC.
        _ => io.cloexec = has_cloexec(event.int("type")),
    }
}

fn track_dup(
    state: &mut State,
    tid: i32,
    io: &mut SyscallIo,
    name: &str,
    event: &Event,
) -> Option<()> {
    let leader = state.leader_tid(tid);
    let oldfd = match name {
        "dup" => event.int("fildes")?,
        "dup2" | "dup3" => {
            let oldfd = event.int("oldfd")?;
            let newfd = event.int("newfd")?;
            if newfd != oldfd && state.get_or_create_thread(leader).fds.contains_key(&newfd) {
                close_fd(state, leader, newfd, event.timestamp);
            }
            if name == "dup3" {
                io.cloexec = has_cloexec(event.int("flags"));
            }
            oldfd
        }
        _ => {
            let cmd = event.int("cmd")?;
            if cmd != F_DUPFD && cmd != F_DUPFD_CLOEXEC {
                return None;
            }
            io.cloexec = cmd == F_DUPFD_CLOEXEC;
            event.int("fd")?
        }
    };
    io.fd = Some(oldfd);
    match state.get_or_create_thread(leader).fds.get(&oldfd) {
        Some(old) => {
            io.filename = Some(old.filename.clone());
            io.fd_type = old.fd_type;
            io.family = old.family;
        }
        None => io.filename = Some(UNKNOWN_FILENAME.to_string()),
    }
    Some(())
}

/// Renames the FD of an IPv4 `connect` to its peer address.
pub(super) fn track_connect(state: &mut State, tid: i32, event: &Event) {
    if event.int("family") != Some(AF_INET) {
        return;
    }
    let (Some(fd), Some(addr), Some(port)) =
        (event.int("fd"), v4addr(event, "v4addr"), event.int("dport"))
    else {
        return;
    };
    let filename = format!("{addr}:{port}");
    let proc = state.leader_mut(tid);
    let fd_type = {
        let desc = proc.get_fd(fd, event.timestamp);
        desc.filename.clone_from(&filename);
        desc.fd_type
    };
    proc.track_chrono_fd(fd, &filename, fd_type, event.timestamp);
}

/// Closes `fd` in `leader`'s table and announces it.
pub(super) fn close_fd(state: &mut State, leader: i32, fd: i64, timestamp: u64) {
    if state.get_or_create_thread(leader).close_fd(fd).is_some() {
        state.publish(
            Topic::CloseFd,
            Notification::CloseFd {
                timestamp,
                pid: leader,
                fd,
            },
        );
    }
}

/// Applies the outcome of a tracked I/O syscall and files its request.
///
/// Returns a copy of the request when someone listens on `syscall_exit`.
pub(super) fn finish_io(
    state: &mut State,
    tid: i32,
    syscall: &CurrentSyscall,
    mut io: SyscallIo,
    event: &Event,
) -> Option<IoRequest> {
    let end = event.timestamp;
    let ret = event.int("ret");
    let leader = state.leader_tid(tid);

    let mut request = IoRequest::new(IoType::Syscall, IoOperation::for_kind(io.kind), syscall.start);
    request.name = Some(syscall.name.clone());
    request.tid = Some(tid);
    request.pid = Some(leader);
    request.ret = ret;
    request.size = io.size;
    request.pages_allocated = syscall.pages_allocated;
    request.pages_freed = syscall.pages_freed;
    request.pages_written = syscall.pages_written.unwrap_or(0);
    request.dirty = syscall.dirty;
    request.woke_kswapd = syscall.woke_kswapd;
    request.complete(end);

    let transferred = ret.and_then(|r| u64::try_from(r).ok());
    match io.kind {
        kind if kind.is_open() => {
            if let Some(newfd) = ret.filter(|r| *r >= 0) {
                open_fd(state, leader, newfd, &io, end);
                io.fd = Some(newfd);
            }
        }
        SyscallKind::Read | SyscallKind::Write => {
            if let (Some(fd), Some(bytes)) = (io.fd, transferred) {
                let direction = match io.kind {
                    SyscallKind::Read => Direction::Read,
                    _ => Direction::Write,
                };
                credit(state, leader, fd, io.filename.as_deref(), direction, bytes, end);
                request.returned_size = Some(bytes);
                request.size = request.size.or(Some(bytes));
            }
        }
        SyscallKind::ReadWrite => {
            if let (Some(fd_in), Some(fd_out), Some(bytes)) = (io.fd_in, io.fd_out, transferred) {
                let filename = io.filename.as_deref();
                credit(state, leader, fd_in, filename, Direction::Read, bytes, end);
                credit(state, leader, fd_out, None, Direction::Write, bytes, end);
                request.returned_size = Some(bytes);
            }
        }
        _ => {}
    }
    request.fd = io.acting_fd();
    request.filename = io.filename.clone();

    let copy = state
        .bus
        .has_subscribers(Topic::SyscallExit)
        .then(|| request.clone());
    if state.config.record_io_requests {
        store_request(state, leader, &io, request);
    }
    copy
}

/// Installs the FD returned by an open-family syscall.
fn open_fd(state: &mut State, leader: i32, newfd: i64, io: &SyscallIo, ts: u64) {
    let filename = io.filename.as_deref().unwrap_or(UNKNOWN_FILENAME);
    let proc = state.get_or_create_thread(leader);
    let replaced = proc.fds.contains_key(&newfd);
    let desc = proc.open_fd(newfd, filename, io.fd_type, ts);
    desc.cloexec = io.cloexec;
    desc.family = io.family;
    if replaced {
        trace!("pid {leader}: fd {newfd} reopened without a close");
        state.publish(
            Topic::CloseFd,
            Notification::CloseFd {
                timestamp: ts,
                pid: leader,
                fd: newfd,
            },
        );
    }
    state.publish(
        Topic::CreateFd,
        Notification::CreateFd {
            timestamp: ts,
            pid: leader,
            fd: newfd,
        },
    );
}

/// Name of the description `fd` had at syscall entry, when that description
/// has since been closed (and the number possibly reused) and its record now
/// sits in `closed_fds`.
fn closed_since_entry<'a>(proc: &Process, fd: i64, filename: Option<&'a str>) -> Option<&'a str> {
    filename.filter(|name| {
        proc.fds.get(&fd).map_or(true, |live| live.filename != *name)
            && proc.closed_fds.contains_key(*name)
    })
}

fn credit(
    state: &mut State,
    leader: i32,
    fd: i64,
    filename: Option<&str>,
    direction: Direction,
    bytes: u64,
    ts: u64,
) {
    let proc = state.get_or_create_thread(leader);
    let desc = match closed_since_entry(proc, fd, filename) {
        Some(name) => {
            trace!("pid {leader}: fd {fd} closed during the syscall, crediting {name}");
            proc.closed_fds.get_mut(name)
        }
        None => Some(proc.get_fd(fd, ts)),
    };
    let Some(desc) = desc else {
        return;
    };
    let fd_type = desc.fd_type;
    desc.counters.credit(direction, fd_type, bytes);
    proc.io.credit(direction, fd_type, bytes);
}

/// Files `request` with the FD it acted on: the closed record for closes,
/// the live FD otherwise, falling back to the process itself.
fn store_request(state: &mut State, leader: i32, io: &SyscallIo, request: IoRequest) {
    let proc = state.get_or_create_thread(leader);
    let target = match (io.kind, io.acting_fd()) {
        (SyscallKind::Close, _) => io
            .filename
            .as_ref()
            .and_then(|name| proc.closed_fds.get_mut(name)),
        (_, Some(fd)) => match closed_since_entry(proc, fd, io.filename.as_deref()) {
            Some(name) => proc.closed_fds.get_mut(name),
            None => proc.fds.get_mut(&fd),
        },
        (_, None) => None,
    };
    match target {
        Some(desc) => desc.io_requests.push(request),
        None => proc.io_requests.push(request),
    }
}
