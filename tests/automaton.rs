//! Scenario tests driving the full provider set through the public API.

mod common;

use common::*;
use systate::model::{FdType, IoOperation};
use systate::syscalls::O_CLOEXEC;
use systate::{Automaton, Config, Event, Notification, Topic};

#[test]
fn test_single_current_thread_per_cpu() {
    let mut automaton = Automaton::default();
    let switches = [(0, 10), (10, 20), (20, 0), (0, 30), (30, 10)];
    let mut ts = 100;
    for (prev, next) in switches {
        automaton.process_event(&sched_switch(ts, 0, prev, next, "t"));
        let expected = if next == 0 { None } else { Some(next) };
        assert_eq!(automaton.state().current_tid(0), expected);
        ts += 10;
    }
    assert_eq!(automaton.state().cpus.len(), 1);
}

#[test]
fn test_fork_then_child_close_leaves_parent_fd() {
    let mut automaton = running(100, "server");
    automaton.process_events(&[
        open(10, 0, "/var/log/server.log", 0),
        exit("openat", 11, 0, 3),
        Event::new("syscall_entry_write", 12, 0)
            .with("fd", 3)
            .with("count", 64),
        exit("write", 13, 0, 64),
        fork(20, 100, 200, "server"),
        sched_switch(30, 0, 100, 200, "server"),
        close(31, 0, 3),
        exit("close", 32, 0, 0),
    ]);

    let state = automaton.state();
    let parent_fd = &state.tids[&100].fds[&3];
    assert_eq!(parent_fd.filename, "/var/log/server.log");
    assert_eq!(parent_fd.counters.disk_write, 64);
    let child = &state.tids[&200];
    assert!(!child.fds.contains_key(&3));
    assert_eq!(child.closed_fds["/var/log/server.log"].counters.write, 0);
}

#[test]
fn test_exec_drops_only_cloexec() {
    let mut automaton = running(100, "sh");
    automaton.process_events(&[
        open(10, 0, "/etc/passwd", O_CLOEXEC),
        exit("openat", 11, 0, 3),
        open(12, 0, "/tmp/out", 0),
        exit("openat", 13, 0, 4),
    ]);
    assert!(automaton.state().tids[&100].fds[&3].cloexec);

    let closed = record(&mut automaton, Topic::CloseFd);
    automaton.process_event(
        &Event::new("sched_process_exec", 20, 0)
            .with("tid", 100)
            .with_context("procname", "ls"),
    );
    let proc = &automaton.state().tids[&100];
    assert_eq!(proc.fds.keys().copied().collect::<Vec<_>>(), vec![4]);
    assert_eq!(proc.comm, "ls");
    assert_eq!(closed.borrow().len(), 1);
}

#[test]
fn test_zero_sector_issue_ignored() {
    let mut automaton = Automaton::default();
    automaton.process_event(&block("block_rq_issue", 10, 8, 100, 0));
    assert!(automaton.state().disks.get(&8).is_none());
}

#[test]
fn test_remap_credits_original_device() {
    let mut automaton = Automaton::default();
    automaton.process_events(&[
        bio_remap(10, (253, 1), (8, 2)),
        block("block_rq_issue", 100, 8, 2, 10),
        block("block_rq_complete", 600, 8, 2, 10),
    ]);
    let state = automaton.state();
    let orig = &state.disks[&253];
    assert_eq!(orig.nr_requests, 1);
    assert_eq!(orig.completed_requests, 1);
    assert_eq!(orig.nr_sector, 10);
    assert_eq!(orig.request_time, 50.0);
    assert!(state.disks.get(&8).is_none());
    assert!(state.remap_requests.is_empty());
}

#[test]
fn test_backmerge_discards_alias() {
    let mut automaton = Automaton::default();
    automaton.process_events(&[
        bio_remap(10, (253, 1), (8, 2)),
        Event::new("block_bio_backmerge", 11, 0)
            .with("dev", 8u64)
            .with("sector", 2u64),
    ]);
    assert!(automaton.state().remap_requests.is_empty());

    automaton.process_events(&[
        block("block_rq_issue", 20, 8, 2, 4),
        block("block_rq_complete", 40, 8, 2, 4),
    ]);
    let state = automaton.state();
    assert_eq!(state.disks[&8].completed_requests, 1);
    assert!(state.disks.get(&253).is_none());
}

#[test]
fn test_orphan_completion_changes_nothing() {
    let mut automaton = Automaton::default();
    automaton.process_event(&block("block_rq_complete", 10, 8, 2, 4));
    let disk = &automaton.state().disks[&8];
    assert_eq!(disk.completed_requests, 0);
    assert_eq!(disk.nr_requests, 0);
    assert_eq!(disk.request_time, 0.0);
    assert!(disk.io_requests.is_empty());
}

#[test]
fn test_softirq_fifo_pairing() {
    let mut automaton = Automaton::default();
    let exits = record(&mut automaton, Topic::SoftirqExit);
    automaton.process_events(&[
        softirq("softirq_raise", 10, 1),
        softirq("softirq_raise", 11, 1),
        softirq("softirq_entry", 12, 1),
        softirq("softirq_entry", 13, 1),
        softirq("softirq_exit", 14, 1),
        softirq("softirq_exit", 15, 1),
    ]);
    let pairs: Vec<(Option<u64>, Option<u64>, Option<u64>)> = exits
        .borrow()
        .iter()
        .filter_map(|n| match n {
            Notification::SoftirqExit(s) => Some((s.raise_ts, s.begin_ts, s.end_ts)),
            _ => None,
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            (Some(10), Some(12), Some(14)),
            (Some(11), Some(13), Some(15)),
        ]
    );
}

#[test]
fn test_read_credits_returned_bytes() {
    let mut automaton = running(500, "reader");
    automaton.process_events(&[
        open(1000, 0, "/data/file", 0),
        exit("openat", 1001, 0, 3),
        read(1008, 0, 3, 100),
        exit("read", 1009, 0, 42),
    ]);
    let proc = &automaton.state().tids[&500];
    let fd = &proc.fds[&3];
    assert_eq!(fd.counters.read, 42);
    assert_eq!(fd.counters.disk_read, 42);
    assert_eq!(proc.io.read, 42);
    let request = fd
        .io_requests
        .iter()
        .find(|r| r.operation == IoOperation::Read)
        .unwrap();
    assert_eq!(request.size, Some(100));
    assert_eq!(request.returned_size, Some(42));
    assert_eq!(request.duration, Some(1));
}

#[test]
fn test_mismatched_hard_irq_exit() {
    let mut automaton = Automaton::default();
    let exits = record(&mut automaton, Topic::IrqHandlerExit);
    automaton.process_events(&[
        Event::new("irq_handler_entry", 10, 0)
            .with("irq", 41)
            .with("name", "nvme0q1"),
        Event::new("irq_handler_exit", 11, 0)
            .with("irq", 99)
            .with("ret", 1),
    ]);
    assert!(exits.borrow().is_empty());
    assert!(automaton.state().cpus[&0].current_hard_irq.is_none());
}

#[test]
fn test_close_reopen_accumulates_through_syscalls() {
    let mut automaton = running(600, "logger");
    automaton.process_events(&[
        open(10, 0, "/var/log/app", 0),
        exit("openat", 11, 0, 5),
        Event::new("syscall_entry_write", 12, 0)
            .with("fd", 5)
            .with("count", 10),
        exit("write", 13, 0, 10),
        close(14, 0, 5),
        exit("close", 15, 0, 0),
        open(20, 0, "/var/log/app", 0),
        exit("openat", 21, 0, 7),
        Event::new("syscall_entry_write", 22, 0)
            .with("fd", 7)
            .with("count", 5),
        exit("write", 23, 0, 5),
    ]);
    let proc = &automaton.state().tids[&600];
    let fd = &proc.fds[&7];
    assert_eq!(fd.counters.write, 15);
    assert_eq!(fd.open_count, 2);
    assert_eq!(fd.close_count, 1);
    assert_eq!(proc.fd_at(5, 12).unwrap().filename, "/var/log/app");
    assert!(proc.fds.get(&5).is_none());
}

#[test]
fn test_syscall_exit_published_with_request() {
    let mut automaton = running(700, "cat");
    let exits = record(&mut automaton, Topic::SyscallExit);
    automaton.process_events(&[
        Event::new("syscall_entry_getpid", 10, 0),
        exit("getpid", 11, 0, 700),
        read(12, 0, 0, 16),
        exit("read", 14, 0, 16),
    ]);
    let exits = exits.borrow();
    assert_eq!(exits.len(), 2);
    match &exits[0] {
        Notification::SyscallExit {
            name, io_request, ..
        } => {
            assert_eq!(name, "getpid");
            assert!(io_request.is_none());
        }
        other => panic!("unexpected notification {other:?}"),
    }
    match &exits[1] {
        Notification::SyscallExit {
            io_request: Some(request),
            ..
        } => assert_eq!(request.returned_size, Some(16)),
        other => panic!("unexpected notification {other:?}"),
    }
}

#[test]
fn test_maybe_net_upgrade_during_write() {
    let mut automaton = running(800, "curl");
    automaton.process_events(&[
        Event::new("syscall_entry_write", 10, 0)
            .with("fd", 9)
            .with("count", 100),
        Event::new("net_dev_xmit", 11, 0)
            .with("name", "eth0")
            .with("len", 154),
        exit("write", 12, 0, 100),
    ]);
    let state = automaton.state();
    let fd = &state.tids[&800].fds[&9];
    assert_eq!(fd.fd_type, FdType::MaybeNet);
    assert_eq!(fd.counters.net_write, 100);
    assert_eq!(state.ifaces["eth0"].send_bytes, 154);
}

#[test]
fn test_history_disabled_keeps_counters() {
    let mut automaton = Automaton::new(Config {
        record_io_requests: false,
        ..Config::default()
    });
    automaton.process_events(&[
        Event::new("lttng_statedump_process_state", 1, 0)
            .with("tid", 900)
            .with("pid", 900)
            .with("name", "dd"),
        sched_switch(2, 0, 0, 900, "dd"),
        read(10, 0, 0, 512),
        exit("read", 11, 0, 512),
        block("block_rq_issue", 12, 8, 0, 1).with("tid", 900).with("rwbs", 0),
        block("block_rq_complete", 20, 8, 0, 1),
    ]);
    let state = automaton.state();
    let proc = &state.tids[&900];
    assert_eq!(proc.io.read, 512);
    assert!(proc.fds[&0].io_requests.is_empty());
    assert_eq!(proc.block_read, 512);
    assert_eq!(state.disks[&8].completed_requests, 1);
    assert!(state.disks[&8].io_requests.is_empty());
}

#[test]
fn test_read_credits_fd_reused_during_syscall() {
    let mut automaton = running(100, "app");
    automaton.process_events(&[
        Event::new("lttng_statedump_process_state", 3, 1)
            .with("tid", 101)
            .with("pid", 100)
            .with("name", "app"),
        sched_switch(4, 1, 0, 101, "app"),
        open(10, 0, "/old", 0),
        exit("openat", 11, 0, 3),
        read(12, 0, 3, 100),
        // A sibling thread closes fd 3 and reopens it on another file while
        // the read blocks.
        close(13, 1, 3),
        exit("close", 14, 1, 0),
        open(15, 1, "/new", 0),
        exit("openat", 16, 1, 3),
        exit("read", 20, 0, 42),
    ]);
    let leader = &automaton.state().tids[&100];
    let old = &leader.closed_fds["/old"];
    assert_eq!(old.counters.read, 42);
    assert!(old
        .io_requests
        .iter()
        .any(|r| r.operation == IoOperation::Read && r.returned_size == Some(42)));
    let new = &leader.fds[&3];
    assert_eq!(new.filename, "/new");
    assert_eq!(new.counters.read, 0);
    assert!(new.io_requests.iter().all(|r| r.operation != IoOperation::Read));
    assert_eq!(leader.io.read, 42);
}

#[test]
fn test_migrate_task_published() {
    let mut automaton = Automaton::default();
    let migrations = record(&mut automaton, Topic::SchedMigrateTask);
    automaton.process_event(
        &Event::new("sched_migrate_task", 50, 2)
            .with("tid", 77)
            .with("comm", "kworker/2:1")
            .with("prio", 120)
            .with("orig_cpu", 2)
            .with("dest_cpu", 5),
    );
    assert_eq!(
        *migrations.borrow(),
        vec![Notification::SchedMigrateTask {
            timestamp: 50,
            tid: 77,
            cpu: 2,
            dest_cpu: 5,
        }]
    );
    let proc = &automaton.state().tids[&77];
    assert_eq!(proc.comm, "kworker/2:1");
    assert_eq!(proc.prio, Some(120));
}

#[test]
fn test_sendfile_credits_both_fds() {
    let mut automaton = running(300, "nginx");
    automaton.process_events(&[
        open(10, 0, "/srv/index.html", 0),
        exit("openat", 11, 0, 3),
        Event::new("syscall_entry_socket", 12, 0)
            .with("family", systate::syscalls::AF_INET)
            .with("type", 1),
        exit("socket", 13, 0, 4),
        Event::new("syscall_entry_sendfile64", 20, 0)
            .with("out_fd", 4)
            .with("in_fd", 3)
            .with("count", 1000),
        exit("sendfile64", 25, 0, 700),
    ]);
    let proc = &automaton.state().tids[&300];
    let file = &proc.fds[&3];
    assert_eq!(file.counters.disk_read, 700);
    let sock = &proc.fds[&4];
    assert_eq!(sock.fd_type, FdType::Net);
    assert_eq!(sock.counters.net_write, 700);
    assert_eq!(proc.io.read, 700);
    assert_eq!(proc.io.write, 700);
    let request = file
        .io_requests
        .iter()
        .find(|r| r.operation == IoOperation::ReadWrite)
        .unwrap();
    assert_eq!(request.size, Some(1000));
    assert_eq!(request.returned_size, Some(700));
}

#[test]
fn test_fcntl_dupfd_cloexec_materializes_fd() {
    let mut automaton = running(400, "sshd");
    let created = record(&mut automaton, Topic::CreateFd);
    automaton.process_events(&[
        open(10, 0, "/etc/ssh/sshd_config", 0),
        exit("openat", 11, 0, 3),
        Event::new("syscall_entry_fcntl", 12, 0)
            .with("fd", 3)
            .with("cmd", systate::syscalls::F_DUPFD_CLOEXEC)
            .with("arg", 10),
        exit("fcntl", 13, 0, 10),
        Event::new("syscall_entry_dup", 14, 0).with("fildes", 3),
        exit("dup", 15, 0, 11),
    ]);
    let proc = &automaton.state().tids[&400];
    let dupfd = &proc.fds[&10];
    assert_eq!(dupfd.filename, "/etc/ssh/sshd_config");
    assert_eq!(dupfd.fd_type, FdType::Disk);
    assert!(dupfd.cloexec);
    let dup = &proc.fds[&11];
    assert_eq!(dup.filename, "/etc/ssh/sshd_config");
    assert!(!dup.cloexec);
    assert!(!proc.fds[&3].cloexec);
    let fds: Vec<i64> = created
        .borrow()
        .iter()
        .filter_map(|n| match n {
            Notification::CreateFd { fd, .. } => Some(*fd),
            _ => None,
        })
        .collect();
    assert_eq!(fds, vec![3, 10, 11]);
}
