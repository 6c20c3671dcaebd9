//! Synchronous publish/subscribe bus between providers and their consumers.
//!
//! Providers publish while handling an event; every subscriber registered for
//! the topic at that moment runs before `publish` returns. Nothing is queued,
//! and a topic without subscribers costs a single map lookup.

use std::collections::HashMap;
use std::fmt;

use crate::model::{HardIrq, IoRequest, SoftIrq};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    SchedSwitchPerCpu,
    SchedSwitchPerTid,
    SchedMigrateTask,
    IrqHandlerEntry,
    IrqHandlerExit,
    SoftirqExit,
    SyscallExit,
    PrioChanged,
    CreateFd,
    CloseFd,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::SchedSwitchPerCpu,
        Topic::SchedSwitchPerTid,
        Topic::SchedMigrateTask,
        Topic::IrqHandlerEntry,
        Topic::IrqHandlerExit,
        Topic::SoftirqExit,
        Topic::SyscallExit,
        Topic::PrioChanged,
        Topic::CreateFd,
        Topic::CloseFd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::SchedSwitchPerCpu => "sched_switch_per_cpu",
            Topic::SchedSwitchPerTid => "sched_switch_per_tid",
            Topic::SchedMigrateTask => "sched_migrate_task",
            Topic::IrqHandlerEntry => "irq_handler_entry",
            Topic::IrqHandlerExit => "irq_handler_exit",
            Topic::SoftirqExit => "softirq_exit",
            Topic::SyscallExit => "syscall_exit",
            Topic::PrioChanged => "prio_changed",
            Topic::CreateFd => "create_fd",
            Topic::CloseFd => "close_fd",
        }
    }

    pub fn from_name(name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payloads carried by the bus. Each variant is published on one topic, except
/// `SchedSwitch` which goes out on both per-CPU and per-TID topics.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    SchedSwitch {
        timestamp: u64,
        cpu: u32,
        prev_tid: i32,
        next_tid: i32,
        next_comm: String,
        /// Thread that woke `next_tid`, if the wakeup was observed.
        waker_tid: Option<i32>,
        wakeup_ts: Option<u64>,
    },
    SchedMigrateTask {
        timestamp: u64,
        tid: i32,
        cpu: u32,
        dest_cpu: u32,
    },
    IrqHandlerEntry {
        timestamp: u64,
        cpu: u32,
        irq: i64,
        name: Option<String>,
    },
    IrqHandlerExit(HardIrq),
    SoftirqExit(SoftIrq),
    SyscallExit {
        tid: i32,
        name: String,
        begin: u64,
        end: u64,
        ret: Option<i64>,
        /// Present for tracked I/O syscalls.
        io_request: Option<IoRequest>,
    },
    PrioChanged {
        timestamp: u64,
        tid: i32,
        prio: i32,
    },
    CreateFd {
        timestamp: u64,
        pid: i32,
        fd: i64,
    },
    CloseFd {
        timestamp: u64,
        pid: i32,
        fd: i64,
    },
}

pub type Subscriber = Box<dyn FnMut(&Notification)>;

#[derive(Default)]
pub struct NotificationBus {
    subscribers: HashMap<Topic, Vec<Subscriber>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, topic: Topic, callback: F)
    where
        F: FnMut(&Notification) + 'static,
    {
        self.subscribers
            .entry(topic)
            .or_default()
            .push(Box::new(callback));
    }

    /// Used by publishers to skip building payloads nobody reads.
    pub fn has_subscribers(&self, topic: Topic) -> bool {
        self.subscribers
            .get(&topic)
            .is_some_and(|subs| !subs.is_empty())
    }

    pub fn publish(&mut self, topic: Topic, notification: &Notification) {
        if let Some(subs) = self.subscribers.get_mut(&topic) {
            for sub in subs.iter_mut() {
                sub(notification);
            }
        }
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(&'static str, usize)> = self
            .subscribers
            .iter()
            .map(|(topic, subs)| (topic.as_str(), subs.len()))
            .collect();
        counts.sort();
        f.debug_struct("NotificationBus")
            .field("subscribers", &counts)
            .finish()
    }
}
