//! End-of-run snapshot of the state store.
//!
//! Reads the tables once after the last event and renders them either as
//! JSON or as aligned text tables.

use std::fmt::Write as _;

use serde::Serialize;

use crate::model::MemoryStats;
use crate::state::State;

const MAX_COLUMN_WIDTH: usize = 40;

#[derive(Debug, Serialize)]
pub struct Summary {
    pub processes: Vec<ProcessSummary>,
    pub cpus: Vec<CpuSummary>,
    pub disks: Vec<DiskSummary>,
    pub ifaces: Vec<IfaceSummary>,
    pub memory: MemoryStats,
    pub syscalls: Vec<SyscallCount>,
    pub completions: Completions,
}

#[derive(Debug, Serialize)]
pub struct ProcessSummary {
    pub tid: i32,
    pub pid: Option<i32>,
    pub comm: String,
    pub cpu_ns: u64,
    pub syscalls: u64,
    pub read: u64,
    pub write: u64,
    pub disk_read: u64,
    pub disk_write: u64,
    pub net_read: u64,
    pub net_write: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub open_fds: usize,
}

#[derive(Debug, Serialize)]
pub struct CpuSummary {
    pub cpu: u32,
    pub busy_ns: u64,
    pub current_tid: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct DiskSummary {
    pub dev: u64,
    pub name: String,
    pub requests: u64,
    pub completed: u64,
    pub sectors: u64,
    pub bytes: u64,
    /// Mean per-sector completion latency in ns.
    pub avg_sector_latency_ns: Option<f64>,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct IfaceSummary {
    pub name: String,
    pub send_bytes: u64,
    pub send_packets: u64,
    pub recv_bytes: u64,
    pub recv_packets: u64,
}

#[derive(Debug, Serialize)]
pub struct SyscallCount {
    pub name: String,
    pub count: u64,
}

/// Completion notifications observed on the bus during the run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Completions {
    pub irq: u64,
    pub softirq: u64,
    pub syscall: u64,
}

impl Summary {
    pub fn from_state(state: &State, completions: Completions) -> Self {
        let mut processes: Vec<ProcessSummary> = state
            .tids
            .values()
            .filter(|p| p.tid != 0)
            .map(|p| ProcessSummary {
                tid: p.tid,
                pid: p.pid,
                comm: p.comm.clone(),
                cpu_ns: p.cpu_ns,
                syscalls: p.total_syscalls,
                read: p.io.read,
                write: p.io.write,
                disk_read: p.io.disk_read,
                disk_write: p.io.disk_write,
                net_read: p.io.net_read,
                net_write: p.io.net_write,
                block_read: p.block_read,
                block_write: p.block_write,
                open_fds: p.fds.len(),
            })
            .collect();
        processes.sort_by_key(|p| p.tid);

        let cpus = state
            .cpus
            .values()
            .map(|c| CpuSummary {
                cpu: c.cpu_id,
                busy_ns: c.busy_ns,
                current_tid: c.current_tid,
            })
            .collect();

        let mut disks: Vec<DiskSummary> = state
            .disks
            .values()
            .map(|d| DiskSummary {
                dev: d.dev,
                name: d.display_name(),
                requests: d.nr_requests,
                completed: d.completed_requests,
                sectors: d.nr_sector,
                bytes: d.bytes_requested,
                avg_sector_latency_ns: (d.completed_requests > 0)
                    .then(|| d.request_time / d.completed_requests as f64),
                pending: d.pending_requests.len(),
            })
            .collect();
        disks.sort_by_key(|d| d.dev);

        let mut ifaces: Vec<IfaceSummary> = state
            .ifaces
            .values()
            .map(|i| IfaceSummary {
                name: i.name.clone(),
                send_bytes: i.send_bytes,
                send_packets: i.send_packets,
                recv_bytes: i.recv_bytes,
                recv_packets: i.recv_packets,
            })
            .collect();
        ifaces.sort_by(|a, b| a.name.cmp(&b.name));

        let mut syscalls: Vec<SyscallCount> = state
            .syscalls
            .iter()
            .map(|(name, count)| SyscallCount {
                name: name.clone(),
                count: *count,
            })
            .collect();
        syscalls.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

        Self {
            processes,
            cpus,
            disks,
            ifaces,
            memory: state.mm.clone(),
            syscalls,
            completions,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_table(&self) -> String {
        let mut out = String::new();

        section(
            &mut out,
            "Processes",
            &[
                "tid", "pid", "comm", "cpu_ns", "syscalls", "read", "write", "disk_r", "disk_w",
                "net_r", "net_w", "blk_r", "blk_w", "fds",
            ],
            self.processes
                .iter()
                .map(|p| {
                    vec![
                        p.tid.to_string(),
                        opt(p.pid),
                        p.comm.clone(),
                        p.cpu_ns.to_string(),
                        p.syscalls.to_string(),
                        p.read.to_string(),
                        p.write.to_string(),
                        p.disk_read.to_string(),
                        p.disk_write.to_string(),
                        p.net_read.to_string(),
                        p.net_write.to_string(),
                        p.block_read.to_string(),
                        p.block_write.to_string(),
                        p.open_fds.to_string(),
                    ]
                })
                .collect(),
        );
        section(
            &mut out,
            "CPUs",
            &["cpu", "busy_ns", "current"],
            self.cpus
                .iter()
                .map(|c| vec![c.cpu.to_string(), c.busy_ns.to_string(), opt(c.current_tid)])
                .collect(),
        );
        section(
            &mut out,
            "Disks",
            &["disk", "requests", "completed", "sectors", "bytes", "ns/sector", "pending"],
            self.disks
                .iter()
                .map(|d| {
                    vec![
                        d.name.clone(),
                        d.requests.to_string(),
                        d.completed.to_string(),
                        d.sectors.to_string(),
                        d.bytes.to_string(),
                        d.avg_sector_latency_ns
                            .map_or("-".to_string(), |l| format!("{l:.1}")),
                        d.pending.to_string(),
                    ]
                })
                .collect(),
        );
        section(
            &mut out,
            "Interfaces",
            &["iface", "tx_bytes", "tx_pkts", "rx_bytes", "rx_pkts"],
            self.ifaces
                .iter()
                .map(|i| {
                    vec![
                        i.name.clone(),
                        i.send_bytes.to_string(),
                        i.send_packets.to_string(),
                        i.recv_bytes.to_string(),
                        i.recv_packets.to_string(),
                    ]
                })
                .collect(),
        );
        section(
            &mut out,
            "Syscalls",
            &["syscall", "count"],
            self.syscalls
                .iter()
                .map(|s| vec![s.name.clone(), s.count.to_string()])
                .collect(),
        );

        let _ = writeln!(
            out,
            "Memory: {} pages allocated, {} freed, {} dirty",
            self.memory.allocated_pages, self.memory.freed_pages, self.memory.dirty
        );
        let _ = writeln!(
            out,
            "Completions: {} irq, {} softirq, {} syscall",
            self.completions.irq, self.completions.softirq, self.completions.syscall
        );
        out
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or("-".to_string(), |v| v.to_string())
}

fn section(out: &mut String, title: &str, headers: &[&str], rows: Vec<Vec<String>>) {
    let _ = writeln!(out, "{title}");
    if rows.is_empty() {
        let _ = writeln!(out, "(none)\n");
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, val) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(val.len());
            }
        }
    }
    for w in &mut widths {
        *w = (*w).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, &width)| format!("{h:width$}"))
        .collect();
    let _ = writeln!(out, "{}", header_line.join(" | "));
    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", sep.join("-+-"));

    for row in rows {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(v, &width)| {
                let truncated = if v.chars().count() > width && width > 3 {
                    let keep: String = v.chars().take(width - 3).collect();
                    format!("{keep}...")
                } else {
                    v.clone()
                };
                format!("{truncated:width$}")
            })
            .collect();
        let _ = writeln!(out, "{}", line.join(" | "));
    }
    out.push('\n');
}
