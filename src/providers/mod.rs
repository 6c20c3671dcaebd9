//! State providers.
//!
//! Each provider owns one kernel domain and declares which events it handles
//! through a static callback table. Providers never call each other; anything
//! another component must observe goes through the state's notification bus.

mod block;
mod fds;
mod irq;
mod mem;
mod net;
mod sched;
mod statedump;
mod syscalls;

use std::collections::HashMap;

pub use block::BlockProvider;
pub use irq::IrqProvider;
pub use mem::MemoryProvider;
pub use net::NetProvider;
pub use sched::SchedProvider;
pub use statedump::StatedumpProvider;
pub use syscalls::SyscallProvider;

use crate::event::Event;
use crate::state::State;
use crate::syscalls::{is_syscall_entry, is_syscall_exit};

/// Handler invoked with the shared state for one matching event.
pub type Callback = fn(&mut State, &Event);

/// Which events a callback applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventMatch {
    /// Exactly this event name.
    Name(&'static str),
    /// Any syscall entry event name.
    SyscallEntry,
    /// Any syscall exit event name.
    SyscallExit,
}

pub trait StateProvider {
    fn name(&self) -> &'static str;

    fn callbacks(&self) -> Vec<(EventMatch, Callback)>;
}

/// The providers in dispatch order.
///
/// Memory and network run before the syscall provider so that annotations they
/// write into an open syscall are in place before it is finalized.
pub fn default_providers() -> Vec<Box<dyn StateProvider>> {
    vec![
        Box::new(SchedProvider),
        Box::new(MemoryProvider),
        Box::new(IrqProvider),
        Box::new(NetProvider),
        Box::new(SyscallProvider),
        Box::new(StatedumpProvider),
        Box::new(BlockProvider),
    ]
}

/// One provider's callbacks indexed for dispatch.
pub struct CallbackTable {
    provider: &'static str,
    by_name: HashMap<&'static str, Callback>,
    syscall_entry: Option<Callback>,
    syscall_exit: Option<Callback>,
}

impl CallbackTable {
    pub fn new(provider: &dyn StateProvider) -> Self {
        let mut table = Self {
            provider: provider.name(),
            by_name: HashMap::new(),
            syscall_entry: None,
            syscall_exit: None,
        };
        for (matcher, callback) in provider.callbacks() {
            match matcher {
                EventMatch::Name(name) => {
                    table.by_name.insert(name, callback);
                }
                EventMatch::SyscallEntry => table.syscall_entry = Some(callback),
                EventMatch::SyscallExit => table.syscall_exit = Some(callback),
            }
        }
        table
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Runs the callbacks registered for `event`: the exact-name one, then the
    /// generic syscall entry/exit one if the name follows that convention.
    /// Returns whether anything ran.
    pub fn dispatch(&self, state: &mut State, event: &Event) -> bool {
        let mut handled = false;
        if let Some(callback) = self.by_name.get(event.name.as_str()) {
            callback(state, event);
            handled = true;
        }
        if let Some(callback) = self.syscall_entry {
            if is_syscall_entry(&event.name) {
                callback(state, event);
                handled = true;
            }
        }
        if let Some(callback) = self.syscall_exit {
            if is_syscall_exit(&event.name) {
                callback(state, event);
                handled = true;
            }
        }
        handled
    }
}
