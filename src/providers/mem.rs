//! Page allocation, reclaim and dirty-buffer tracking.
//!
//! Besides the global counters, these handlers annotate open syscalls with the
//! memory activity seen while they ran. The syscall provider copies those
//! annotations onto the finished I/O request.

use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::DirtyPage;
use crate::state::State;

const KSWAPD_COMM: &str = "kswapd0";

pub struct MemoryProvider;

impl StateProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (EventMatch::Name("mm_page_alloc"), mm_page_alloc as Callback),
            (EventMatch::Name("kmem_mm_page_alloc"), mm_page_alloc),
            (EventMatch::Name("mm_page_free"), mm_page_free),
            (EventMatch::Name("kmem_mm_page_free"), mm_page_free),
            (EventMatch::Name("mm_vmscan_wakeup_kswapd"), mm_vmscan_wakeup_kswapd),
            (EventMatch::Name("writeback_pages_written"), writeback_pages_written),
            (EventMatch::Name("block_dirty_buffer"), block_dirty_buffer),
            (
                EventMatch::Name("writeback_global_dirty_state"),
                writeback_global_dirty_state,
            ),
        ]
    }
}

fn mm_page_alloc(state: &mut State, event: &Event) {
    state.mm.allocated_pages += 1;
    state.mm.outstanding_pages += 1;

    for proc in state.tids.values_mut() {
        if let Some(syscall) = proc.current_syscall.as_mut() {
            syscall.pages_allocated += 1;
        }
    }

    if let Some(tid) = state.current_tid(event.cpu) {
        state.get_or_create_thread(tid).allocated_pages += 1;
    }
}

/// Frees done by kswapd count against the syscall that woke it up.
fn attribute_kswapd_frees(state: &mut State) {
    let running: Vec<i32> = state.cpus.values().filter_map(|c| c.current_tid).collect();
    for tid in running {
        let mut owner = tid;
        if let Some(proc) = state.tids.get(&tid) {
            if proc.comm == KSWAPD_COMM {
                if let Some(prev) = proc.prev_tid.filter(|p| *p > 0) {
                    owner = prev;
                }
            }
        }
        let Some(syscall) = state
            .tids
            .get_mut(&owner)
            .and_then(|p| p.current_syscall.as_mut())
        else {
            continue;
        };
        if syscall.woke_kswapd {
            syscall.pages_freed += 1;
        }
    }
}

fn mm_page_free(state: &mut State, event: &Event) {
    attribute_kswapd_frees(state);
    state.mm.freed_pages += 1;

    // Frees of pages allocated before the trace started do not count.
    if state.mm.outstanding_pages == 0 {
        return;
    }
    state.mm.outstanding_pages -= 1;

    if let Some(tid) = state.current_tid(event.cpu) {
        state.get_or_create_thread(tid).freed_pages += 1;
    }
}

fn mm_vmscan_wakeup_kswapd(state: &mut State, event: &Event) {
    let Some(tid) = state.current_tid(event.cpu) else {
        return;
    };
    if let Some(syscall) = state.get_or_create_thread(tid).current_syscall.as_mut() {
        syscall.woke_kswapd = true;
    }
}

fn writeback_pages_written(state: &mut State, event: &Event) {
    let Some(pages) = event.uint("pages") else {
        return;
    };
    let running: Vec<i32> = state.cpus.values().filter_map(|c| c.current_tid).collect();
    for tid in running {
        let Some(syscall) = state
            .tids
            .get_mut(&tid)
            .and_then(|p| p.current_syscall.as_mut())
        else {
            continue;
        };
        // Latest batch wins.
        syscall.pages_written = Some(pages);
    }
}

fn block_dirty_buffer(state: &mut State, event: &Event) {
    state.mm.dirty += 1;
    let Some(tid) = state.current_tid(event.cpu) else {
        return;
    };
    let Some(syscall) = state.get_or_create_thread(tid).current_syscall.as_mut() else {
        return;
    };
    syscall.dirty += 1;
    let Some((fd, filename)) = syscall
        .io
        .as_ref()
        .and_then(|io| Some((io.acting_fd()?, io.filename.clone()?)))
    else {
        return;
    };
    let page = DirtyPage {
        tid,
        syscall: syscall.name.clone(),
        filename,
        fd,
    };
    state.push_dirty_page(page);
}

fn writeback_global_dirty_state(state: &mut State, _event: &Event) {
    state.mm.dirty = 0;
}
