//! Thread and CPU lifecycle from scheduler events.

use log::{debug, trace};

use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::Fd;
use crate::notify::{Notification, Topic};
use crate::state::State;

pub struct SchedProvider;

impl StateProvider for SchedProvider {
    fn name(&self) -> &'static str {
        "sched"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (EventMatch::Name("sched_switch"), sched_switch as Callback),
            (EventMatch::Name("sched_migrate_task"), sched_migrate_task),
            (EventMatch::Name("sched_wakeup"), sched_wakeup),
            (EventMatch::Name("sched_wakeup_new"), sched_wakeup),
            (EventMatch::Name("sched_waking"), sched_wakeup),
            (EventMatch::Name("sched_process_fork"), sched_process_fork),
            (EventMatch::Name("sched_process_exec"), sched_process_exec),
            (EventMatch::Name("sched_pi_setprio"), sched_pi_setprio),
        ]
    }
}

/// Updates `tid`'s priority and publishes the change. The idle task has none.
fn check_prio_changed(state: &mut State, timestamp: u64, tid: i32, prio: Option<i64>) {
    let Some(prio) = prio.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if tid == 0 {
        return;
    }
    let proc = state.get_or_create_thread(tid);
    if proc.prio == Some(prio) {
        return;
    }
    proc.prio = Some(prio);
    state.publish(
        Topic::PrioChanged,
        Notification::PrioChanged {
            timestamp,
            tid,
            prio,
        },
    );
}

fn sched_switch(state: &mut State, event: &Event) {
    let (Some(prev_tid), Some(next_tid)) = (event.tid("prev_tid"), event.tid("next_tid")) else {
        return;
    };
    let next_comm = event.str("next_comm").unwrap_or_default().to_string();
    let ts = event.timestamp;

    let cpu = state.get_or_create_cpu(event.cpu);
    if let Some(start) = cpu.task_start.take() {
        cpu.busy_ns += ts.saturating_sub(start);
    }
    if next_tid == 0 {
        cpu.current_tid = None;
    } else {
        cpu.current_tid = Some(next_tid);
        cpu.task_start = Some(ts);
    }

    let prev = state.get_or_create_thread(prev_tid);
    if prev_tid != 0 {
        if let Some(last) = prev.last_sched.take() {
            prev.cpu_ns += ts.saturating_sub(last);
        }
    }

    let next = state.get_or_create_thread(next_tid);
    next.comm.clone_from(&next_comm);
    next.prev_tid = Some(prev_tid);
    next.last_sched = Some(ts);

    check_prio_changed(state, ts, prev_tid, event.int("prev_prio"));
    check_prio_changed(state, ts, next_tid, event.int("next_prio"));

    let next = state.get_or_create_thread(next_tid);
    let waker_tid = next.last_waker.take();
    let wakeup_ts = next.last_wakeup.take();

    let notification = Notification::SchedSwitch {
        timestamp: ts,
        cpu: event.cpu,
        prev_tid,
        next_tid,
        next_comm,
        waker_tid,
        wakeup_ts,
    };
    state.bus.publish(Topic::SchedSwitchPerCpu, &notification);
    state.bus.publish(Topic::SchedSwitchPerTid, &notification);
}

fn sched_migrate_task(state: &mut State, event: &Event) {
    let Some(tid) = event.tid("tid") else {
        return;
    };
    let proc = state.get_or_create_thread(tid);
    if proc.comm.is_empty() {
        if let Some(comm) = event.str("comm") {
            proc.comm = comm.to_string();
        }
    }
    let dest_cpu = event
        .uint("dest_cpu")
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(event.cpu);
    state.publish(
        Topic::SchedMigrateTask,
        Notification::SchedMigrateTask {
            timestamp: event.timestamp,
            tid,
            cpu: event.cpu,
            dest_cpu,
        },
    );
    check_prio_changed(state, event.timestamp, tid, event.int("prio"));
}

/// Records the first wakeup of a sleeping thread and who issued it.
fn sched_wakeup(state: &mut State, event: &Event) {
    let Some(tid) = event.tid("tid") else {
        return;
    };
    if let Some(target) = event.uint("target_cpu").and_then(|c| u32::try_from(c).ok()) {
        state.get_or_create_cpu(target);
    }
    state.get_or_create_cpu(event.cpu);

    if state.cpus.values().any(|cpu| cpu.current_tid == Some(tid)) {
        trace!("tid {tid} woken while running, ignoring");
        return;
    }

    state.get_or_create_thread(tid);
    check_prio_changed(state, event.timestamp, tid, event.int("prio"));

    let waker = state.current_tid(event.cpu);
    let proc = state.get_or_create_thread(tid);
    if proc.last_wakeup.is_none() {
        proc.last_wakeup = Some(event.timestamp);
        if waker.is_some() {
            proc.last_waker = waker;
        }
    }
}

fn sched_process_fork(state: &mut State, event: &Event) {
    let (Some(parent_pid), Some(child_tid)) = (event.tid("parent_pid"), event.tid("child_tid"))
    else {
        return;
    };
    let child_pid = event.tid("child_pid").unwrap_or(child_tid);

    let parent = state.get_or_create_thread(parent_pid);
    parent.pid = Some(parent_pid);
    if let Some(comm) = event.str("parent_comm") {
        parent.comm = comm.to_string();
    }
    let inherited: Vec<Fd> = parent.fds.values().map(|fd| fd.inherit(parent_pid)).collect();

    let child = state.get_or_create_thread(child_tid);
    child.pid = Some(child_pid);
    if let Some(comm) = event.str("child_comm") {
        child.comm = comm.to_string();
    }
    child.fds = inherited.into_iter().map(|fd| (fd.fd, fd)).collect();
    let fds: Vec<i64> = child.fds.keys().copied().collect();

    debug!(
        "fork {parent_pid} -> {child_tid} (pid {child_pid}), {} fds copied",
        fds.len()
    );
    for fd in fds {
        state.publish(
            Topic::CreateFd,
            Notification::CreateFd {
                timestamp: event.timestamp,
                pid: child_tid,
                fd,
            },
        );
    }
}

/// Exec keeps the FD table except close-on-exec descriptors.
fn sched_process_exec(state: &mut State, event: &Event) {
    let Some(tid) = event.tid("tid") else {
        return;
    };
    let thread = state.get_or_create_thread(tid);
    if let Some(name) = event.context_str("procname") {
        thread.comm = name.to_string();
    }

    let leader = state.leader_tid(tid);
    let proc = state.get_or_create_thread(leader);
    let cloexec: Vec<i64> = proc
        .fds
        .values()
        .filter(|fd| fd.cloexec)
        .map(|fd| fd.fd)
        .collect();
    for fd in &cloexec {
        proc.fds.remove(fd);
    }
    for fd in cloexec {
        state.publish(
            Topic::CloseFd,
            Notification::CloseFd {
                timestamp: event.timestamp,
                pid: leader,
                fd,
            },
        );
    }
}

fn sched_pi_setprio(state: &mut State, event: &Event) {
    if let Some(tid) = event.tid("tid") {
        check_prio_changed(state, event.timestamp, tid, event.int("newprio"));
    }
}
