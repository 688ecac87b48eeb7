//! Tin (C5) and its flow-level DRR scheduler (C4): one traffic class in
//! CAKE's priority hierarchy. Holds the flow table, the new/old intrusive
//! lists, per-tin byte-clock state, and the two DRR weights used by the tin
//! selector (C6).

use crate::clock::TimeNs;
use crate::codel::{codel_dequeue, CodelParams};
use crate::flow::{Flow, ListMembership};
use crate::list::FlowList;
use crate::packet::Packet;
use crate::shaper::ByteClock;

pub const CAKE_MAX_TINS: usize = 8;

pub struct Tin {
    flows: Vec<Flow>,
    perturbation: u32,

    new_flows: FlowList,
    old_flows: FlowList,

    pub clock: ByteClock,

    pub quantum: u32,
    pub quantum_prio: i64,
    pub quantum_band: i64,
    pub tin_deficit: i64,

    pub backlog_bytes: u64,
    pub dropped: u64,
    pub ecn_marked: u64,
    pub packets: u64,
    pub bytes: u64,
    pub bulk_flow_count: u32,

    /// Reserved for future set-associative collision amortization
    /// (CAKE_SET_WAYS, spec §9 open question); always 1 in this
    /// implementation, which is direct-mapped.
    pub set_ways: u8,
}

impl Tin {
    pub fn new(flows_count: usize, perturbation: u32, rate_bps: u64, quantum: u32) -> Self {
        Self {
            flows: (0..flows_count).map(Flow::new).collect(),
            perturbation,
            new_flows: FlowList::default(),
            old_flows: FlowList::default(),
            clock: ByteClock::new(rate_bps),
            quantum,
            quantum_prio: 0,
            quantum_band: 0,
            tin_deficit: 0,
            backlog_bytes: 0,
            dropped: 0,
            ecn_marked: 0,
            packets: 0,
            bytes: 0,
            bulk_flow_count: 0,
            set_ways: 1,
        }
    }

    pub fn flows_count(&self) -> usize {
        self.flows.len()
    }

    pub fn perturbation(&self) -> u32 {
        self.perturbation
    }

    pub fn is_backlogged(&self) -> bool {
        self.backlog_bytes > 0
    }

    pub fn flow_backlog_bytes(&self, idx: usize) -> u64 {
        self.flows[idx].backlog_bytes()
    }

    /// Largest backlog among this tin's non-empty flows, used by the
    /// overflow dropper (C8) to compare candidates across tins.
    pub fn max_flow_backlog(&self) -> Option<u64> {
        self.flows.iter().filter(|f| !f.is_empty()).map(|f| f.backlog_bytes()).max()
    }

    /// Enqueues a packet onto `flow_idx`, updating per-flow, per-tin, and
    /// (via the returned byte delta) global backlog bookkeeping (§4.5).
    /// Moves the flow onto `new_flows` if it was previously idle.
    pub fn enqueue(&mut self, flow_idx: usize, mut packet: Packet, now: TimeNs) -> u64 {
        let bytes = packet.truesize() as u64;
        packet.stamp_enqueue(now);

        let was_empty = self.flows[flow_idx].is_empty();
        self.flows[flow_idx].push_back(packet);
        self.backlog_bytes += bytes;

        if self.backlog_bytes == bytes {
            // Tin transitioned from empty to backlogged.
            self.clock.refresh_if_stale(now);
        }

        if was_empty && self.flows[flow_idx].membership == ListMembership::None {
            self.flows[flow_idx].deficit = self.quantum as i64;
            self.new_flows.push_back(&mut self.flows, flow_idx, ListMembership::New);
        }

        bytes
    }

    /// Runs one DRR service step (§4.4): picks a flow, runs CoDel against
    /// it, and returns the emitted packet's overhead-corrected charge to
    /// the caller (along with the packet itself) so C6/C7 can advance the
    /// shaper. Returns `None` if the tin has nothing left to send this
    /// turn (either genuinely empty, or the head flow is mid-replenish and
    /// should be retried by the caller on the next selector pass).
    pub fn service(
        &mut self,
        codel_params: &CodelParams,
        now: TimeNs,
        overloaded: bool,
        overhead_len: impl Fn(u32) -> u32,
    ) -> Option<(Packet, u32)> {
        loop {
            let (flow_idx, from_new) = match self.new_flows.front() {
                Some(idx) => (idx, true),
                None => match self.old_flows.front() {
                    Some(idx) => (idx, false),
                    None => return None,
                },
            };

            if self.flows[flow_idx].deficit <= 0 {
                let was_new = from_new;
                if was_new {
                    self.new_flows.remove(&mut self.flows, flow_idx);
                } else {
                    self.old_flows.remove(&mut self.flows, flow_idx);
                }
                self.flows[flow_idx].deficit += self.quantum as i64;
                self.old_flows.push_back(&mut self.flows, flow_idx, ListMembership::Old);
                if was_new {
                    self.bulk_flow_count += 1;
                }
                continue;
            }

            // A flow can legitimately sit at the head of a list with
            // positive deficit but an already-empty queue (its last packet
            // drained the queue on a prior turn without exhausting its
            // deficit). `codel_dequeue` handles this by returning `None`
            // immediately, which the branch below reaps.
            let drop_count_before = self.flows[flow_idx].drop_count;
            let ecn_marked_before = self.flows[flow_idx].ecn_marked;

            match codel_dequeue(&mut self.flows[flow_idx], codel_params, now, overloaded) {
                Some(packet) => {
                    let corrected = overhead_len(packet.len());
                    self.flows[flow_idx].deficit -= corrected as i64;
                    self.tin_deficit -= corrected as i64;
                    self.backlog_bytes = self.backlog_bytes.saturating_sub(packet.truesize() as u64);
                    self.packets += 1;
                    self.bytes += packet.truesize() as u64;
                    self.dropped += self.flows[flow_idx].drop_count - drop_count_before;
                    self.ecn_marked += self.flows[flow_idx].ecn_marked - ecn_marked_before;
                    return Some((packet, corrected));
                }
                None => {
                    self.dropped += self.flows[flow_idx].drop_count - drop_count_before;
                    self.ecn_marked += self.flows[flow_idx].ecn_marked - ecn_marked_before;

                    // `codel_dequeue` only returns `None` once the flow's
                    // queue is fully drained.
                    debug_assert!(self.flows[flow_idx].is_empty());
                    if from_new {
                        self.new_flows.remove(&mut self.flows, flow_idx);
                        if !self.old_flows.is_empty() {
                            self.old_flows.push_back(&mut self.flows, flow_idx, ListMembership::Old);
                            self.bulk_flow_count += 1;
                        }
                    } else {
                        self.old_flows.remove(&mut self.flows, flow_idx);
                        if self.bulk_flow_count > 0 {
                            self.bulk_flow_count -= 1;
                        }
                    }
                    // loop again: either this flow was re-queued with
                    // remaining deficit (unlikely since it just drained) or
                    // we move on to the next candidate.
                    continue;
                }
            }
        }
    }

    /// Forcibly evicts the head packet of the single flow with the largest
    /// backlog, for the overflow dropper (C8). Returns the dropped packet's
    /// id and truesize, or `None` if every flow in this tin is empty.
    pub fn drop_from_fattest_flow(&mut self) -> Option<(crate::packet::PacketId, u64)> {
        let fattest = (0..self.flows.len())
            .filter(|&i| !self.flows[i].is_empty())
            .max_by_key(|&i| self.flows[i].backlog_bytes())?;

        let packet = self.flows[fattest].pop_front()?;
        let bytes = packet.truesize() as u64;
        self.backlog_bytes = self.backlog_bytes.saturating_sub(bytes);
        self.dropped += 1;

        if self.flows[fattest].is_empty() {
            match self.flows[fattest].membership {
                ListMembership::New => self.new_flows.remove(&mut self.flows, fattest),
                ListMembership::Old => {
                    self.old_flows.remove(&mut self.flows, fattest);
                    self.bulk_flow_count = self.bulk_flow_count.saturating_sub(1);
                }
                ListMembership::None => {}
            }
        }

        Some((packet.id, bytes))
    }

    pub fn reset(&mut self) {
        for flow in &mut self.flows {
            flow.reset();
        }
        self.new_flows = FlowList::default();
        self.old_flows = FlowList::default();
        self.backlog_bytes = 0;
        self.dropped = 0;
        self.ecn_marked = 0;
        self.packets = 0;
        self.bytes = 0;
        self.bulk_flow_count = 0;
        self.tin_deficit = 0;
        self.clock.time_next_packet = TimeNs::ZERO;
    }
}
