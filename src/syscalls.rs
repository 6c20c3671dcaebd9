//! Syscall families and naming conventions.
//!
//! The kernel exposes syscalls under architecture- and tracer-specific event
//! names (`syscall_entry_read`, `sys_read`, `compat_syscall_exit_read`, ...).
//! Only the families listed here are tracked as I/O; every other syscall is
//! still timed but carries no FD bookkeeping.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::event::Event;
use crate::model::FdType;

/// Filename given to FDs used before their origin was observed.
pub const UNKNOWN_FILENAME: &str = "unknown";
/// Filename given to sockets opened without a known peer.
pub const SOCKET_FILENAME: &str = "socket";

/// Placeholder names that never identify a file, so they are never aggregated
/// in `closed_fds`.
pub const GENERIC_FD_NAMES: &[&str] = &[UNKNOWN_FILENAME, SOCKET_FILENAME];

pub const AF_UNIX: i64 = 1;
pub const AF_INET: i64 = 2;
pub const AF_INET6: i64 = 10;

pub const O_CLOEXEC: i64 = 0o2000000;
pub const F_DUPFD: i64 = 0;
pub const F_DUPFD_CLOEXEC: i64 = 1030;

pub const DISK_OPEN_SYSCALLS: &[&str] = &["open", "openat"];
pub const NET_OPEN_SYSCALLS: &[&str] = &["accept", "accept4", "socket"];
pub const DUP_OPEN_SYSCALLS: &[&str] = &["fcntl", "dup", "dup2", "dup3"];
pub const CLOSE_SYSCALLS: &[&str] = &["close"];
pub const READ_SYSCALLS: &[&str] = &[
    "read", "recvmsg", "recvfrom", "readv", "pread", "pread64", "preadv",
];
pub const WRITE_SYSCALLS: &[&str] = &[
    "write", "sendmsg", "sendto", "writev", "pwrite", "pwrite64", "pwritev",
];
pub const READ_WRITE_SYSCALLS: &[&str] = &["splice", "sendfile64"];
pub const SYNC_SYSCALLS: &[&str] = &["sync", "sync_file_range", "fsync", "fdatasync"];

/// Matches syscall entry event names and captures the bare syscall name.
pub static SYSCALL_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:sys_|syscall_entry_|compat_syscall_entry_)(?P<name>.+)$")
        .expect("Invalid syscall entry regex pattern")
});

/// Matches syscall exit event names, including the legacy `exit_syscall`.
pub static SYSCALL_EXIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:exit_syscall|(?:compat_)?syscall_exit_(?P<name>.+))$")
        .expect("Invalid syscall exit regex pattern")
});

/// I/O family a tracked syscall belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyscallKind {
    DiskOpen,
    NetOpen,
    DupOpen,
    Close,
    Read,
    Write,
    /// Reads one FD and writes another (splice, sendfile).
    ReadWrite,
    Sync,
}

impl SyscallKind {
    pub fn classify(name: &str) -> Option<Self> {
        let families: [(&[&str], SyscallKind); 8] = [
            (DISK_OPEN_SYSCALLS, SyscallKind::DiskOpen),
            (NET_OPEN_SYSCALLS, SyscallKind::NetOpen),
            (DUP_OPEN_SYSCALLS, SyscallKind::DupOpen),
            (CLOSE_SYSCALLS, SyscallKind::Close),
            (READ_SYSCALLS, SyscallKind::Read),
            (WRITE_SYSCALLS, SyscallKind::Write),
            (READ_WRITE_SYSCALLS, SyscallKind::ReadWrite),
            (SYNC_SYSCALLS, SyscallKind::Sync),
        ];
        families
            .iter()
            .find(|(names, _)| names.contains(&name))
            .map(|(_, kind)| *kind)
    }

    pub fn is_open(self) -> bool {
        matches!(
            self,
            SyscallKind::DiskOpen | SyscallKind::NetOpen | SyscallKind::DupOpen
        )
    }

    /// Families whose threads are listed in the pending-syscall table.
    pub fn is_data_io(self) -> bool {
        matches!(
            self,
            SyscallKind::Read | SyscallKind::Write | SyscallKind::ReadWrite | SyscallKind::Sync
        )
    }
}

/// Bare syscall name from an entry event name, if it is one.
pub fn entry_syscall_name(event_name: &str) -> Option<&str> {
    SYSCALL_ENTRY_RE
        .captures(event_name)
        .and_then(|caps| caps.name("name"))
        .map(|m| m.as_str())
}

pub fn is_syscall_entry(event_name: &str) -> bool {
    SYSCALL_ENTRY_RE.is_match(event_name)
}

pub fn is_syscall_exit(event_name: &str) -> bool {
    SYSCALL_EXIT_RE.is_match(event_name)
}

pub fn is_generic_fd_name(filename: &str) -> bool {
    GENERIC_FD_NAMES.contains(&filename)
}

/// Bytes requested by a read/write syscall, from the field that call uses.
pub fn requested_size(name: &str, event: &Event) -> Option<u64> {
    match name {
        "readv" | "writev" | "preadv" | "pwritev" => event.uint("vlen"),
        "recvfrom" => event.uint("size"),
        "sendto" => event.uint("len"),
        // msghdr carries the size, which the entry event does not expose.
        "recvmsg" | "sendmsg" => None,
        "splice" => event.uint("len"),
        "sync_file_range" => event.uint("nbytes"),
        _ => event.uint("count"),
    }
}

/// FD type of a network open, from its socket family.
pub fn net_fd_type(family: Option<i64>) -> FdType {
    match family {
        None | Some(AF_INET) | Some(AF_INET6) => FdType::Net,
        Some(AF_UNIX) => FdType::Disk,
        Some(_) => FdType::Unknown,
    }
}

/// Dotted IPv4 address from a `v4addr` field, given as 4 bytes or as an
/// integer in network byte order.
pub fn v4addr(event: &Event, key: &str) -> Option<String> {
    if let Some(bytes) = event.bytes(key) {
        let octets: [u8; 4] = bytes.try_into().ok()?;
        return Some(Ipv4Addr::from(octets).to_string());
    }
    let raw = u32::try_from(event.uint(key)?).ok()?;
    Some(Ipv4Addr::from(raw).to_string())
}
