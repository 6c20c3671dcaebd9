//! Syscall entry/exit correlation.
//!
//! Every syscall opens a `current_syscall` record on the calling thread and is
//! timed on exit. I/O families additionally carry FD bookkeeping, handled in
//! the `fds` module.

use log::{debug, trace};

use super::fds;
use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::{CurrentSyscall, Process};
use crate::notify::{Notification, Topic};
use crate::state::State;
use crate::syscalls::{entry_syscall_name, SyscallKind};

pub struct SyscallProvider;

impl StateProvider for SyscallProvider {
    fn name(&self) -> &'static str {
        "syscalls"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (EventMatch::SyscallEntry, syscall_entry as Callback),
            (EventMatch::SyscallExit, syscall_exit),
        ]
    }
}

/// Learns the pid of `tid` from a `pid` context field, unless the payload has
/// its own `pid` (e.g. `kill`), which would be ambiguous.
fn fix_context_pid(state: &mut State, tid: i32, event: &Event) {
    if event.has("pid") {
        return;
    }
    let Some(pid) = event.context_int("pid").and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    let proc = state.get_or_create_thread(tid);
    if proc.pid.is_some() {
        return;
    }
    proc.pid = Some(pid);
    if pid != tid {
        let comm = proc.comm.clone();
        state
            .tids
            .entry(pid)
            .or_insert_with(|| Process::with_pid(pid, pid, comm));
    }
}

fn syscall_entry(state: &mut State, event: &Event) {
    let Some(name) = entry_syscall_name(&event.name) else {
        return;
    };
    let Some(tid) = state.current_tid(event.cpu) else {
        trace!("cpu {}: {name} entry with no current thread", event.cpu);
        return;
    };

    *state.syscalls.entry(name.to_string()).or_default() += 1;
    state.total_syscalls += 1;
    fix_context_pid(state, tid, event);

    let kind = SyscallKind::classify(name);
    let io = kind.and_then(|kind| fds::track_entry(state, tid, name, kind, event));
    if name == "connect" {
        fds::track_connect(state, tid, event);
    }
    let pending = io.as_ref().is_some_and(|io| io.kind.is_data_io());

    let proc = state.get_or_create_thread(tid);
    proc.total_syscalls += 1;
    if let Some(stale) = proc.current_syscall.take() {
        debug!("tid {tid}: {} never exited, replaced by {name}", stale.name);
    }
    proc.current_syscall = Some(CurrentSyscall::new(name, event.timestamp, io));

    if pending && !state.pending_syscalls.contains(&tid) {
        state.pending_syscalls.push(tid);
    }
}

fn syscall_exit(state: &mut State, event: &Event) {
    let Some(tid) = state.current_tid(event.cpu) else {
        return;
    };
    let proc = state.get_or_create_thread(tid);
    let Some(mut syscall) = proc.current_syscall.take() else {
        trace!("tid {tid}: syscall exit without entry");
        return;
    };
    let end = event.timestamp;
    proc.syscalls
        .entry(syscall.name.clone())
        .or_default()
        .record(end.saturating_sub(syscall.start));

    let io_request = match syscall.io.take() {
        Some(io) => fds::finish_io(state, tid, &syscall, io, event),
        None => None,
    };
    state.pending_syscalls.retain(|t| *t != tid);

    if state.bus.has_subscribers(Topic::SyscallExit) {
        state.publish(
            Topic::SyscallExit,
            Notification::SyscallExit {
                tid,
                name: syscall.name,
                begin: syscall.start,
                end,
                ret: event.int("ret"),
                io_request,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FdType;
    use crate::syscalls::UNKNOWN_FILENAME;

    fn running(tid: i32, pid: i32) -> State {
        let mut state = State::default();
        state.get_or_create_cpu(0).current_tid = Some(tid);
        let proc = state.get_or_create_thread(tid);
        proc.pid = Some(pid);
        proc.comm = "worker".to_string();
        state
    }

    #[test]
    fn test_untracked_syscall_is_timed() {
        let mut state = running(10, 10);
        syscall_entry(&mut state, &Event::new("syscall_entry_nanosleep", 100, 0));
        assert!(state.tids[&10].current_syscall.is_some());
        assert!(state.pending_syscalls.is_empty());
        syscall_exit(
            &mut state,
            &Event::new("syscall_exit_nanosleep", 130, 0).with("ret", 0),
        );
        let proc = &state.tids[&10];
        assert!(proc.current_syscall.is_none());
        let stats = &proc.syscalls["nanosleep"];
        assert_eq!((stats.count, stats.min, stats.max), (1, Some(30), 30));
        assert_eq!(state.syscalls["nanosleep"], 1);
        assert_eq!(state.total_syscalls, 1);
    }

    #[test]
    fn test_read_pending_until_exit() {
        let mut state = running(10, 10);
        syscall_entry(
            &mut state,
            &Event::new("syscall_entry_read", 100, 0)
                .with("fd", 0)
                .with("count", 10),
        );
        assert_eq!(state.pending_syscalls, vec![10]);
        syscall_exit(
            &mut state,
            &Event::new("syscall_exit_read", 110, 0).with("ret", -11),
        );
        assert!(state.pending_syscalls.is_empty());
        let fd = &state.tids[&10].fds[&0];
        assert_eq!(fd.filename, UNKNOWN_FILENAME);
        assert_eq!(fd.counters.read, 0);
        assert_eq!(fd.io_requests[0].errno(), Some(11));
    }

    #[test]
    fn test_context_pid_creates_leader() {
        let mut state = State::default();
        state.get_or_create_cpu(0).current_tid = Some(11);
        state.get_or_create_thread(11).comm = "thr".to_string();
        syscall_entry(
            &mut state,
            &Event::new("syscall_entry_getpid", 1, 0).with_context("pid", 10),
        );
        assert_eq!(state.tids[&11].pid, Some(10));
        assert_eq!(state.tids[&10].pid, Some(10));
        assert_eq!(state.tids[&10].comm, "thr");
    }

    #[test]
    fn test_open_on_thread_lands_on_leader() {
        let mut state = running(11, 10);
        syscall_entry(
            &mut state,
            &Event::new("syscall_entry_open", 1, 0)
                .with("filename", "/srv/db")
                .with("flags", 0),
        );
        syscall_exit(
            &mut state,
            &Event::new("syscall_exit_open", 2, 0).with("ret", 6),
        );
        let leader = &state.tids[&10];
        assert_eq!(leader.fds[&6].filename, "/srv/db");
        assert_eq!(leader.fds[&6].fd_type, FdType::Disk);
        assert_eq!(leader.fds[&6].open_count, 1);
        assert!(state.tids[&11].fds.is_empty());
    }

    #[test]
    fn test_failed_open_creates_nothing() {
        let mut state = running(10, 10);
        syscall_entry(
            &mut state,
            &Event::new("syscall_entry_openat", 1, 0).with("filename", "/nope"),
        );
        syscall_exit(
            &mut state,
            &Event::new("syscall_exit_openat", 2, 0).with("ret", -2),
        );
        let proc = &state.tids[&10];
        assert!(proc.fds.is_empty());
        assert_eq!(proc.io_requests.len(), 1);
        assert_eq!(proc.io_requests[0].filename.as_deref(), Some("/nope"));
    }
}
