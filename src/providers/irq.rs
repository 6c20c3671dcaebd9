//! Hard and soft interrupt tracking per CPU.
//!
//! A CPU runs at most one hard IRQ handler at a time. Softirqs are queued in
//! raise order on a single per-CPU FIFO shared by all vectors.

use log::debug;

use super::{Callback, EventMatch, StateProvider};
use crate::event::Event;
use crate::model::{HardIrq, SoftIrq};
use crate::notify::{Notification, Topic};
use crate::state::State;

pub struct IrqProvider;

impl StateProvider for IrqProvider {
    fn name(&self) -> &'static str {
        "irq"
    }

    fn callbacks(&self) -> Vec<(EventMatch, Callback)> {
        vec![
            (EventMatch::Name("irq_handler_entry"), irq_handler_entry as Callback),
            (EventMatch::Name("irq_handler_exit"), irq_handler_exit),
            (EventMatch::Name("softirq_raise"), softirq_raise),
            (EventMatch::Name("softirq_entry"), softirq_entry),
            (EventMatch::Name("softirq_exit"), softirq_exit),
        ]
    }
}

fn irq_handler_entry(state: &mut State, event: &Event) {
    let Some(id) = event.int("irq") else {
        return;
    };
    let name = event.str("name").map(str::to_string);
    let cpu = state.get_or_create_cpu(event.cpu);
    cpu.current_hard_irq = Some(HardIrq {
        id,
        cpu_id: event.cpu,
        name: name.clone(),
        begin_ts: event.timestamp,
        end_ts: None,
        ret: None,
    });
    state.publish(
        Topic::IrqHandlerEntry,
        Notification::IrqHandlerEntry {
            timestamp: event.timestamp,
            cpu: event.cpu,
            irq: id,
            name,
        },
    );
}

fn irq_handler_exit(state: &mut State, event: &Event) {
    let Some(id) = event.int("irq") else {
        return;
    };
    let cpu = state.get_or_create_cpu(event.cpu);
    let Some(mut irq) = cpu.current_hard_irq.take() else {
        debug!("cpu {}: irq {id} exit without entry", event.cpu);
        return;
    };
    if irq.id != id {
        debug!(
            "cpu {}: irq {id} exit does not match running irq {}, dropped",
            event.cpu, irq.id
        );
        return;
    }
    irq.end_ts = Some(event.timestamp);
    irq.ret = event.int("ret");
    state.publish(Topic::IrqHandlerExit, Notification::IrqHandlerExit(irq));
}

fn softirq_raise(state: &mut State, event: &Event) {
    let Some(vec) = event.int("vec") else {
        return;
    };
    let cpu = state.get_or_create_cpu(event.cpu);
    cpu.current_softirqs.push_back(SoftIrq {
        vec,
        cpu_id: event.cpu,
        raise_ts: Some(event.timestamp),
        begin_ts: None,
        end_ts: None,
    });
}

/// Starts the oldest queued softirq of this vector that has not started yet,
/// or queues one without a raise if there is none.
fn softirq_entry(state: &mut State, event: &Event) {
    let Some(vec) = event.int("vec") else {
        return;
    };
    let cpu = state.get_or_create_cpu(event.cpu);
    let waiting = cpu
        .current_softirqs
        .iter_mut()
        .find(|s| s.begin_ts.is_none());
    match waiting {
        Some(softirq) if softirq.vec == vec => softirq.begin_ts = Some(event.timestamp),
        _ => cpu.current_softirqs.push_back(SoftIrq {
            vec,
            cpu_id: event.cpu,
            raise_ts: None,
            begin_ts: Some(event.timestamp),
            end_ts: None,
        }),
    }
}

/// Completes the head of the queue. Exits that do not match the head are
/// dropped.
fn softirq_exit(state: &mut State, event: &Event) {
    let Some(vec) = event.int("vec") else {
        return;
    };
    let cpu = state.get_or_create_cpu(event.cpu);
    if cpu.current_softirqs.front().map(|s| s.vec) != Some(vec) {
        debug!(
            "cpu {}: softirq {vec} exit does not match queue head, dropped",
            event.cpu
        );
        return;
    }
    let Some(mut softirq) = cpu.current_softirqs.pop_front() else {
        return;
    };
    softirq.end_ts = Some(event.timestamp);
    state.publish(Topic::SoftirqExit, Notification::SoftirqExit(softirq));
}
