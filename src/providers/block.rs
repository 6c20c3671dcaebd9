//! Block request issue/complete correlation.
//!
//! Requests are matched per device by sector. A remapped bio (device-mapper,
//! partitions) leaves an alias so the request is credited to the device it
//! was originally submitted to.

use log::debug;

use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::{BlockRemap, IoOperation, IoRequest, IoType, PendingBlockRequest};
use crate::state::State;

pub struct BlockProvider;

impl StateProvider for BlockProvider {
    fn name(&self) -> &'static str {
        "block"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (EventMatch::Name("block_bio_remap"), block_bio_remap as Callback),
            (EventMatch::Name("block_bio_backmerge"), block_bio_backmerge),
            (EventMatch::Name("block_rq_issue"), block_rq_issue),
            (EventMatch::Name("block_rq_complete"), block_rq_complete),
        ]
    }
}

/// Position of the alias for `(dev, sector)`, if any.
fn find_remap(state: &State, dev: u64, sector: u64) -> Option<usize> {
    state
        .remap_requests
        .iter()
        .position(|r| r.dev == dev && r.sector == sector)
}

fn block_bio_remap(state: &mut State, event: &Event) {
    let (Some(dev), Some(sector), Some(old_dev), Some(old_sector)) = (
        event.uint("dev"),
        event.uint("sector"),
        event.uint("old_dev"),
        event.uint("old_sector"),
    ) else {
        return;
    };
    // Stacked remaps extend the existing chain, keeping the first device.
    if let Some(idx) = find_remap(state, old_dev, old_sector) {
        let remap = &mut state.remap_requests[idx];
        remap.dev = dev;
        remap.sector = sector;
        return;
    }
    state.remap_requests.push(BlockRemap {
        orig_dev: old_dev,
        dev,
        sector,
    });
}

fn block_bio_backmerge(state: &mut State, event: &Event) {
    let (Some(dev), Some(sector)) = (event.uint("dev"), event.uint("sector")) else {
        return;
    };
    state
        .remap_requests
        .retain(|r| !(r.dev == dev && r.sector == sector));
}

fn block_rq_issue(state: &mut State, event: &Event) {
    let (Some(dev), Some(sector), Some(nr_sector)) = (
        event.uint("dev"),
        event.uint("sector"),
        event.uint("nr_sector"),
    ) else {
        return;
    };
    if nr_sector == 0 {
        return;
    }
    let dev = match find_remap(state, dev, sector) {
        Some(idx) => state.remap_requests[idx].orig_dev,
        None => dev,
    };
    let Some(bytes) = nr_sector.checked_mul(state.config.sector_size) else {
        debug!("disk {dev}: issue of {nr_sector} sectors at {sector} overflows, dropped");
        return;
    };
    let tid = event.tid("tid");
    let is_write = event.int("rwbs").map(|rwbs| rwbs & 1 == 1);

    let mut request = IoRequest::new(
        IoType::Block,
        match is_write {
            Some(true) => IoOperation::Write,
            Some(false) => IoOperation::Read,
            None => IoOperation::Unknown,
        },
        event.timestamp,
    );
    request.size = Some(bytes);
    request.tid = tid;
    request.dev = Some(dev);
    request.sector = Some(sector);
    request.nr_sector = Some(nr_sector);
    if let Some(tid) = tid {
        request.pid = state.tids.get(&tid).and_then(|p| p.pid);
    }

    let disk = state.get_disk(dev);
    disk.nr_requests += 1;
    disk.nr_sector = disk.nr_sector.saturating_add(nr_sector);
    disk.bytes_requested = disk.bytes_requested.saturating_add(bytes);
    if disk.pending_requests.contains_key(&sector) {
        debug!("disk {dev}: sector {sector} reissued before completion");
    }
    disk.pending_requests.insert(
        sector,
        PendingBlockRequest {
            nr_sector,
            issue_ts: event.timestamp,
            tid,
            request,
        },
    );

    // Block traffic is accounted to the process, like the FD tables.
    if let (Some(tid), Some(is_write)) = (tid, is_write) {
        let proc = state.leader_mut(tid);
        if is_write {
            proc.block_write = proc.block_write.saturating_add(bytes);
        } else {
            proc.block_read = proc.block_read.saturating_add(bytes);
        }
    }
}

fn block_rq_complete(state: &mut State, event: &Event) {
    let (Some(dev), Some(sector), Some(nr_sector)) = (
        event.uint("dev"),
        event.uint("sector"),
        event.uint("nr_sector"),
    ) else {
        return;
    };
    if nr_sector == 0 {
        return;
    }
    let dev = match find_remap(state, dev, sector) {
        Some(idx) => state.remap_requests.remove(idx).orig_dev,
        None => dev,
    };

    let record = state.config.record_io_requests;
    let disk = state.get_disk(dev);
    let Some(pending) = disk.pending_requests.get(&sector) else {
        debug!("disk {dev}: completion for sector {sector} without issue, dropped");
        return;
    };
    if pending.nr_sector != nr_sector {
        debug!(
            "disk {dev}: sector {sector} completed {nr_sector} sectors, issued {}, dropped",
            pending.nr_sector
        );
        return;
    }
    let Some(mut pending) = disk.pending_requests.remove(&sector) else {
        return;
    };

    let latency = event.timestamp.saturating_sub(pending.issue_ts);
    disk.request_time += latency as f64 / nr_sector as f64;
    disk.completed_requests += 1;
    pending.request.complete(event.timestamp);
    pending.request.duration = Some(latency / nr_sector);

    if !record {
        return;
    }
    disk.io_requests.push(pending.request.clone());
    if let Some(tid) = pending.tid {
        state.leader_mut(tid).io_requests.push(pending.request);
    }
}
