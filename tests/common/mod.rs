//! Common event builders for systate integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use systate::{Automaton, Event, Notification, Topic};

pub fn sched_switch(ts: u64, cpu: u32, prev_tid: i32, next_tid: i32, next_comm: &str) -> Event {
    Event::new("sched_switch", ts, cpu)
        .with("prev_tid", prev_tid)
        .with("next_tid", next_tid)
        .with("next_comm", next_comm)
}

pub fn fork(ts: u64, parent_pid: i32, child_tid: i32, comm: &str) -> Event {
    Event::new("sched_process_fork", ts, 0)
        .with("parent_pid", parent_pid)
        .with("parent_comm", comm)
        .with("child_tid", child_tid)
        .with("child_pid", child_tid)
        .with("child_comm", comm)
}

pub fn open(ts: u64, cpu: u32, filename: &str, flags: i64) -> Event {
    Event::new("syscall_entry_openat", ts, cpu)
        .with("filename", filename)
        .with("flags", flags)
}

pub fn read(ts: u64, cpu: u32, fd: i64, count: u64) -> Event {
    Event::new("syscall_entry_read", ts, cpu)
        .with("fd", fd)
        .with("count", count)
}

pub fn close(ts: u64, cpu: u32, fd: i64) -> Event {
    Event::new("syscall_entry_close", ts, cpu).with("fd", fd)
}

pub fn exit(name: &str, ts: u64, cpu: u32, ret: i64) -> Event {
    Event::new(format!("syscall_exit_{name}"), ts, cpu).with("ret", ret)
}

pub fn block(name: &str, ts: u64, dev: u64, sector: u64, nr_sector: u64) -> Event {
    Event::new(name, ts, 0)
        .with("dev", dev)
        .with("sector", sector)
        .with("nr_sector", nr_sector)
}

pub fn bio_remap(ts: u64, old: (u64, u64), new: (u64, u64)) -> Event {
    Event::new("block_bio_remap", ts, 0)
        .with("old_dev", old.0)
        .with("old_sector", old.1)
        .with("dev", new.0)
        .with("sector", new.1)
}

pub fn softirq(name: &str, ts: u64, vec: i64) -> Event {
    Event::new(name, ts, 0).with("vec", vec)
}

/// Automaton with `tid` (its own process) running on CPU 0.
pub fn running(tid: i32, comm: &str) -> Automaton {
    let mut automaton = Automaton::default();
    automaton.process_event(
        &Event::new("lttng_statedump_process_state", 1, 0)
            .with("tid", tid)
            .with("pid", tid)
            .with("name", comm),
    );
    automaton.process_event(&sched_switch(2, 0, 0, tid, comm));
    automaton
}

/// Collects every notification published on `topic`.
pub fn record(automaton: &mut Automaton, topic: Topic) -> Rc<RefCell<Vec<Notification>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    automaton.subscribe(topic, move |n| sink.borrow_mut().push(n.clone()));
    seen
}
