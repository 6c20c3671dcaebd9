//! The shared state store.
//!
//! `State` owns every entity table. Providers receive it by `&mut` for the
//! duration of one callback and never keep references across events.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::config::Config;
use crate::model::{BlockRemap, Cpu, DirtyPage, Disk, Iface, MemoryStats, Process};
use crate::notify::{Notification, NotificationBus, Topic};

#[derive(Debug, Default)]
pub struct State {
    pub config: Config,
    pub tids: HashMap<i32, Process>,
    pub cpus: BTreeMap<u32, Cpu>,
    pub disks: HashMap<u64, Disk>,
    pub ifaces: HashMap<String, Iface>,
    /// Threads inside a read/write/sync syscall, in entry order.
    pub pending_syscalls: Vec<i32>,
    /// Live block remap aliases.
    pub remap_requests: Vec<BlockRemap>,
    pub mm: MemoryStats,
    pub dirty_pages: VecDeque<DirtyPage>,
    /// Global per-name syscall counts.
    pub syscalls: BTreeMap<String, u64>,
    pub total_syscalls: u64,
    pub bus: NotificationBus,
}

impl State {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Returns the thread record, creating it if needed. The idle task (tid 0)
    /// is its own process.
    pub fn get_or_create_thread(&mut self, tid: i32) -> &mut Process {
        self.tids.entry(tid).or_insert_with(|| {
            let mut proc = Process::new(tid);
            if tid == 0 {
                proc.pid = Some(0);
                proc.comm = "swapper".to_string();
            }
            proc
        })
    }

    pub fn get_or_create_cpu(&mut self, cpu_id: u32) -> &mut Cpu {
        self.cpus.entry(cpu_id).or_insert_with(|| Cpu::new(cpu_id))
    }

    pub fn get_disk(&mut self, dev: u64) -> &mut Disk {
        self.disks.entry(dev).or_insert_with(|| Disk::new(dev))
    }

    pub fn get_iface(&mut self, name: &str) -> &mut Iface {
        self.ifaces
            .entry(name.to_string())
            .or_insert_with(|| Iface {
                name: name.to_string(),
                ..Default::default()
            })
    }

    /// Thread currently scheduled on `cpu_id`, `None` when idle or unknown.
    pub fn current_tid(&self, cpu_id: u32) -> Option<i32> {
        self.cpus.get(&cpu_id)?.current_tid
    }

    /// Tid whose record owns `tid`'s FD table: the leader for secondary threads,
    /// `tid` itself otherwise. Creates the leader record if it is missing.
    pub fn leader_tid(&mut self, tid: i32) -> i32 {
        let leader = match self.tids.get(&tid).and_then(|p| p.pid) {
            Some(pid) if pid != tid => pid,
            _ => return tid,
        };
        self.tids
            .entry(leader)
            .or_insert_with(|| Process::new(leader))
            .pid = Some(leader);
        leader
    }

    /// Mutable access to the record holding `tid`'s FD table.
    pub fn leader_mut(&mut self, tid: i32) -> &mut Process {
        let leader = self.leader_tid(tid);
        self.get_or_create_thread(leader)
    }

    pub fn publish(&mut self, topic: Topic, notification: Notification) {
        self.bus.publish(topic, &notification);
    }

    pub fn push_dirty_page(&mut self, page: DirtyPage) {
        self.dirty_pages.push_back(page);
        while self.dirty_pages.len() > self.config.max_dirty_pages {
            self.dirty_pages.pop_front();
        }
    }
}
