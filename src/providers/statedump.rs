//! Bootstraps state from the snapshot events emitted at trace start.

use std::mem;

use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::{Fd, FdType, Process};
use crate::notify::{Notification, Topic};
use crate::state::State;
use crate::syscalls::O_CLOEXEC;

pub struct StatedumpProvider;

impl StateProvider for StatedumpProvider {
    fn name(&self) -> &'static str {
        "statedump"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (
                EventMatch::Name("lttng_statedump_process_state"),
                process_state as Callback,
            ),
            (
                EventMatch::Name("lttng_statedump_file_descriptor"),
                file_descriptor,
            ),
            (EventMatch::Name("lttng_statedump_block_device"), block_device),
        ]
    }
}

fn process_state(state: &mut State, event: &Event) {
    let (Some(tid), Some(pid)) = (event.tid("tid"), event.tid("pid")) else {
        return;
    };
    let name = event.str("name").unwrap_or_default().to_string();
    let proc = state.get_or_create_thread(tid);
    proc.pid = Some(pid);
    proc.comm.clone_from(&name);
    if proc.prio.is_none() {
        proc.prio = event.int("prio").and_then(|p| i32::try_from(p).ok());
    }
    if pid == tid {
        return;
    }

    // FDs seen on a thread before its leader was known belong to the leader.
    let fds = mem::take(&mut proc.fds);
    let closed_fds = mem::take(&mut proc.closed_fds);
    let chrono_fds = mem::take(&mut proc.chrono_fds);
    let parent = state
        .tids
        .entry(pid)
        .or_insert_with(|| Process::with_pid(pid, pid, name));

    for (num, fd) in fds {
        match parent.fds.get_mut(&num) {
            Some(existing) => {
                if !existing.has_known_filename() {
                    existing.filename.clone_from(&fd.filename);
                }
                existing.absorb(fd);
            }
            None => {
                parent.fds.insert(num, fd);
            }
        }
    }
    for (filename, fd) in closed_fds {
        match parent.closed_fds.get_mut(&filename) {
            Some(existing) => existing.absorb(fd),
            None => {
                parent.closed_fds.insert(filename, fd);
            }
        }
    }
    for (num, history) in chrono_fds {
        parent.chrono_fds.entry(num).or_default().extend(history);
    }
}

fn file_descriptor(state: &mut State, event: &Event) {
    let (Some(pid), Some(fd), Some(filename)) =
        (event.tid("pid"), event.int("fd"), event.str("filename"))
    else {
        return;
    };
    let cloexec = event
        .int("flags")
        .is_some_and(|flags| flags & O_CLOEXEC == O_CLOEXEC);
    let proc = state
        .tids
        .entry(pid)
        .or_insert_with(|| Process::with_pid(pid, pid, ""));

    let created = match proc.fds.get_mut(&fd) {
        Some(existing) => {
            existing.filename = filename.to_string();
            // The earlier name was a placeholder; correct it in the history too.
            if let Some((_, last)) = proc
                .chrono_fds
                .get_mut(&fd)
                .and_then(|history| history.iter_mut().next_back())
            {
                last.filename = filename.to_string();
            }
            false
        }
        None => {
            let mut desc = Fd::new(fd, filename, FdType::Unknown);
            desc.cloexec = cloexec;
            proc.fds.insert(fd, desc);
            proc.track_chrono_fd(fd, filename, FdType::Unknown, event.timestamp);
            true
        }
    };
    if created {
        state.publish(
            Topic::CreateFd,
            Notification::CreateFd {
                timestamp: event.timestamp,
                pid,
                fd,
            },
        );
    }
}

fn block_device(state: &mut State, event: &Event) {
    let (Some(dev), Some(name)) = (event.uint("dev"), event.str("diskname")) else {
        return;
    };
    state.get_disk(dev).name = Some(name.to_string());
}
