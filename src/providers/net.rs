//! Network interface counters.

use log::trace;

use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::FdType;
use crate::state::State;
use crate::syscalls::SyscallKind;

pub struct NetProvider;

impl StateProvider for NetProvider {
    fn name(&self) -> &'static str {
        "net"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (EventMatch::Name("net_dev_xmit"), net_dev_xmit as Callback),
            (EventMatch::Name("netif_receive_skb"), netif_receive_skb),
        ]
    }
}

fn net_dev_xmit(state: &mut State, event: &Event) {
    let (Some(name), Some(len)) = (event.str("name"), event.uint("len")) else {
        return;
    };
    let iface = state.get_iface(name);
    iface.send_bytes += len;
    iface.send_packets += 1;
    guess_net_fd(state, event.cpu);
}

fn netif_receive_skb(state: &mut State, event: &Event) {
    let (Some(name), Some(len)) = (event.str("name"), event.uint("len")) else {
        return;
    };
    let iface = state.get_iface(name);
    iface.recv_bytes += len;
    iface.recv_packets += 1;
}

/// A transmit during a write on an unclassified FD hints that the FD is a socket.
fn guess_net_fd(state: &mut State, cpu: u32) {
    let Some(tid) = state.current_tid(cpu) else {
        return;
    };
    let fd = match state
        .tids
        .get_mut(&tid)
        .and_then(|p| p.current_syscall.as_mut())
        .and_then(|s| s.io.as_mut())
    {
        Some(io) if io.kind == SyscallKind::Write => {
            if io.fd_type == FdType::Unknown {
                io.fd_type = FdType::MaybeNet;
            }
            io.fd
        }
        _ => None,
    };
    let Some(fd) = fd else {
        return;
    };
    let proc = state.leader_mut(tid);
    if let Some(desc) = proc.fds.get_mut(&fd) {
        if desc.fd_type == FdType::Unknown {
            trace!("pid {}: fd {fd} is probably a socket", proc.tid);
            desc.fd_type = FdType::MaybeNet;
        }
    }
}
