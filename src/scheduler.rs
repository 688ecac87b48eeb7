//! Top-level scheduler (C6/C7/C8/C10): the Producer API surface —
//! `enqueue`, `dequeue`, `peek`, `reset`, `drop_one`, `init`, `change`,
//! `destroy`, `dump`, `dump_stats` — tying together the tin selector, the
//! global byte clock, and the overflow dropper.

use crate::clock::{TimeNs, Watchdog};
use crate::codel::CodelParams;
use crate::config::{build_tin_configs, CakeMode, CakeParams};
use crate::error::CakeError;
use crate::hash::{hash_flow, FlowKey, FlowMode};
use crate::packet::{Packet, PacketId};
use crate::shaper::{cake_overhead, quantum_for_rate, ByteClock};
use crate::stats::{GlobalStats, TinStats};
use crate::tin::Tin;
use tracing::{debug, info, trace, warn};

/// `buffer_used` past this fraction of `buffer_limit` forces CoDel to drop
/// instead of ECN-mark, shedding backlog faster (§4.1, §8 scenario 5).
const OVERLOAD_NUMERATOR: u128 = 3;
const OVERLOAD_DENOMINATOR: u128 = 4;

const MIN_BUFFER_LIMIT_BYTES: u64 = 64 * 1024;
const REFERENCE_WINDOW_US: u128 = 250_000;

pub struct Scheduler<W: Watchdog> {
    tins: Vec<Tin>,
    dscp_table: [u8; crate::config::DSCP_TABLE_SIZE],
    mode: CakeMode,
    flow_mode: FlowMode,

    global_clock: ByteClock,
    codel_params: CodelParams,

    buffer_used: u64,
    buffer_limit: u64,
    buffer_config_limit: u64,

    atm: bool,
    wash: bool,
    autorate_ingress: bool,
    overhead: i32,

    cur_tin: usize,
    peeked: Option<Packet>,

    watchdog: W,
}

impl<W: Watchdog> Scheduler<W> {
    pub fn init(
        params: &CakeParams,
        flows_per_tin: usize,
        perturbation_seed: u32,
        watchdog: W,
    ) -> Result<Self, CakeError> {
        params.validate()?;
        let (tin_configs, dscp_table) = build_tin_configs(params.diffserv_mode, params.base_rate);

        let tins = tin_configs
            .iter()
            .enumerate()
            .map(|(i, cfg)| {
                let mut tin = Tin::new(
                    flows_per_tin,
                    perturbation_seed.wrapping_add(i as u32),
                    cfg.rate_bps,
                    quantum_for_rate(cfg.rate_bps),
                );
                tin.quantum_prio = cfg.quantum_prio;
                tin.quantum_band = cfg.quantum_band;
                tin
            })
            .collect::<Vec<_>>();

        let tin0_rate = tin_configs.first().map(|c| c.rate_bps).unwrap_or(0);
        let buffer_limit = derive_buffer_limit(params, tin0_rate);

        info!(mode = ?params.diffserv_mode, tins = tins.len(), rate_bps = tin0_rate, "scheduler initialized");

        Ok(Self {
            tins,
            dscp_table,
            mode: params.diffserv_mode,
            flow_mode: params.flow_mode,
            global_clock: ByteClock::new(tin0_rate),
            codel_params: CodelParams { target: params.target(), interval: params.interval() },
            buffer_used: 0,
            buffer_limit,
            buffer_config_limit: params.memory,
            atm: params.atm,
            wash: params.wash,
            autorate_ingress: params.autorate_ingress,
            overhead: params.overhead,
            cur_tin: 0,
            peeked: None,
            watchdog,
        })
    }

    /// Re-reads the parameter block and reconfigures tin rates, weights,
    /// and the DSCP map. Tins within the new tin count keep their flow
    /// tables and backlog; tins at or beyond the new count are discarded
    /// and their backlog released (§4.9).
    pub fn change(&mut self, params: &CakeParams, perturbation_seed: u32) -> Result<(), CakeError> {
        params.validate()?;
        let (tin_configs, dscp_table) = build_tin_configs(params.diffserv_mode, params.base_rate);
        let flows_per_tin = self.tins.first().map(|t| t.flows_count()).unwrap_or(1024);
        let n_new = tin_configs.len();

        if self.tins.len() > n_new {
            for tin in self.tins.drain(n_new..) {
                warn!(freed_bytes = tin.backlog_bytes, "discarding tin beyond new tin count");
                self.buffer_used = self.buffer_used.saturating_sub(tin.backlog_bytes);
            }
        }
        while self.tins.len() < n_new {
            let i = self.tins.len();
            let cfg = tin_configs[i];
            self.tins.push(Tin::new(
                flows_per_tin,
                perturbation_seed.wrapping_add(i as u32),
                cfg.rate_bps,
                quantum_for_rate(cfg.rate_bps),
            ));
        }
        for (i, cfg) in tin_configs.iter().enumerate() {
            let tin = &mut self.tins[i];
            tin.quantum = quantum_for_rate(cfg.rate_bps);
            tin.quantum_prio = cfg.quantum_prio;
            tin.quantum_band = cfg.quantum_band;
            tin.clock = ByteClock::new(cfg.rate_bps);
        }

        self.dscp_table = dscp_table;
        self.mode = params.diffserv_mode;
        self.flow_mode = params.flow_mode;
        self.codel_params = CodelParams { target: params.target(), interval: params.interval() };
        self.atm = params.atm;
        self.wash = params.wash;
        self.autorate_ingress = params.autorate_ingress;
        self.overhead = params.overhead;
        self.buffer_config_limit = params.memory;

        let tin0_rate = tin_configs.first().map(|c| c.rate_bps).unwrap_or(0);
        self.global_clock = ByteClock::new(tin0_rate);
        self.buffer_limit = derive_buffer_limit(params, tin0_rate);
        self.cur_tin = self.cur_tin.min(n_new.saturating_sub(1));

        info!(mode = ?params.diffserv_mode, tins = n_new, "scheduler reconfigured");
        Ok(())
    }

    /// Drops every packet in every tin; configuration is untouched.
    pub fn reset(&mut self) {
        for tin in &mut self.tins {
            tin.reset();
        }
        self.buffer_used = 0;
        self.cur_tin = 0;
        self.peeked = None;
        self.global_clock.time_next_packet = TimeNs::ZERO;
        self.watchdog.cancel();
        info!("scheduler reset");
    }

    pub fn destroy(mut self) {
        self.watchdog.cancel();
        info!("scheduler destroyed");
    }

    fn is_overloaded(&self) -> bool {
        self.buffer_limit != u64::MAX
            && (self.buffer_used as u128) * OVERLOAD_DENOMINATOR > (self.buffer_limit as u128) * OVERLOAD_NUMERATOR
    }

    /// Classifies by DSCP (C9 table), hashes to a flow (C3), and enqueues
    /// into that tin's flow table (C2/C5), then runs the overflow dropper
    /// (C8) if the global memory budget is now exceeded. Returns whether
    /// this specific packet survived — it may itself be evicted if its own
    /// flow turns out to be the fattest.
    pub fn enqueue(&mut self, key: &FlowKey, mut packet: Packet, now: TimeNs) -> bool {
        if self.wash {
            packet.wash_dscp();
        }
        let id = packet.id;
        let tin_idx = (self.dscp_table[packet.dscp as usize] as usize).min(self.tins.len().saturating_sub(1));
        let flows_count = self.tins[tin_idx].flows_count();
        let flow_idx = hash_flow(key, self.tins[tin_idx].perturbation(), self.flow_mode, flows_count);

        let bytes = self.tins[tin_idx].enqueue(flow_idx, packet, now);
        self.buffer_used += bytes;
        trace!(tin = tin_idx, flow = flow_idx, bytes, "enqueued");

        let mut accepted = true;
        while self.buffer_used > self.buffer_limit {
            match self.drop_fattest() {
                Some(dropped_id) => {
                    if dropped_id == id {
                        accepted = false;
                    }
                }
                None => break,
            }
        }
        accepted
    }

    /// Overflow dropper (C8): finds the single flow with the largest
    /// backlog across every tin and evicts its head packet.
    fn drop_fattest(&mut self) -> Option<PacketId> {
        let victim_tin = (0..self.tins.len())
            .filter_map(|i| self.tins[i].max_flow_backlog().map(|b| (i, b)))
            .max_by_key(|&(_, b)| b)
            .map(|(i, _)| i)?;

        let (id, bytes) = self.tins[victim_tin].drop_from_fattest_flow()?;
        self.buffer_used = self.buffer_used.saturating_sub(bytes);
        warn!(tin = victim_tin, bytes, "overflow dropped fattest flow's head packet");
        Some(id)
    }

    /// Manual eviction hook for the host under memory pressure (delegates
    /// to C8 directly, independent of the enqueue-triggered overflow path).
    pub fn drop_one(&mut self) -> Option<PacketId> {
        self.drop_fattest()
    }

    /// Tin selector (C6): hybrid priority/bandwidth DRR across tins,
    /// replenishing skipped tins' deficits as it goes.
    fn select_tin(&mut self, now: TimeNs) -> Option<usize> {
        let n = self.tins.len();
        if n == 0 || !self.tins.iter().any(|t| t.is_backlogged()) {
            return None;
        }

        let mut idx = self.cur_tin % n;
        loop {
            let backlogged = self.tins[idx].is_backlogged();
            if backlogged && self.tins[idx].tin_deficit > 0 {
                self.cur_tin = idx;
                return Some(idx);
            }

            let under_rate = self.tins[idx].clock.gate(now).is_none();
            if under_rate {
                self.tins[idx].tin_deficit += self.tins[idx].quantum_prio;
            } else {
                self.tins[idx].tin_deficit += self.tins[idx].quantum_band;
            }
            idx = (idx + 1) % n;
        }
    }

    /// Dequeues the next packet ready to transmit, or `None` if under-rate
    /// or empty. Arms the watchdog for the earliest future time it should
    /// be called again; cancels it when there is nothing left to wait for.
    pub fn dequeue(&mut self, now: TimeNs) -> Option<Packet> {
        if let Some(packet) = self.peeked.take() {
            return Some(packet);
        }

        if let Some(gate_at) = self.global_clock.gate(now) {
            self.watchdog.schedule_at(gate_at);
            trace!(gate_at = gate_at.as_nanos(), "dequeue gated by global shaper");
            return None;
        }

        loop {
            let idx = match self.select_tin(now) {
                Some(idx) => idx,
                None => {
                    self.watchdog.cancel();
                    return None;
                }
            };

            let atm = self.atm;
            let overhead = self.overhead;
            let overloaded = self.is_overloaded();
            let serviced =
                self.tins[idx].service(&self.codel_params, now, overloaded, |len| cake_overhead(len, overhead, atm));

            let (packet, corrected) = match serviced {
                Some(result) => result,
                None => continue, // tin drained entirely this turn; try the selector again
            };

            for tin in self.tins[..=idx].iter_mut() {
                tin.clock.advance(corrected);
            }
            self.global_clock.advance(corrected);
            self.buffer_used = self.buffer_used.saturating_sub(packet.truesize() as u64);

            debug!(tin = idx, bytes = corrected, "dequeued");
            return Some(packet);
        }
    }

    /// Functionally equivalent to dequeue followed by push-back, via
    /// dequeue-and-cache.
    pub fn peek(&mut self, now: TimeNs) -> Option<&Packet> {
        if self.peeked.is_none() {
            self.peeked = self.dequeue(now);
        }
        self.peeked.as_ref()
    }

    pub fn dump(&self) -> CakeParams {
        CakeParams {
            base_rate: self.global_clock.rate_bps,
            diffserv_mode: self.mode,
            flow_mode: self.flow_mode,
            atm: self.atm,
            wash: self.wash,
            autorate_ingress: self.autorate_ingress,
            overhead: self.overhead,
            interval_us: self.codel_params.interval.as_micros() as u64,
            target_us: self.codel_params.target.as_micros() as u64,
            memory: self.buffer_config_limit,
        }
    }

    pub fn dump_stats(&self) -> GlobalStats {
        let target_us = self.codel_params.target.as_micros() as u64;
        let interval_us = self.codel_params.interval.as_micros() as u64;
        GlobalStats {
            memory_limit: self.buffer_limit,
            memory_used: self.buffer_used,
            tins: self
                .tins
                .iter()
                .map(|t| TinStats {
                    rate_bps: t.clock.rate_bps,
                    target_us,
                    interval_us,
                    packets: t.packets,
                    bytes: t.bytes,
                    dropped: t.dropped,
                    ecn_marked: t.ecn_marked,
                    backlog_bytes: t.backlog_bytes,
                    bulk_flow_count: t.bulk_flow_count,
                    peak_delay_us: 0,
                    avg_delay_us: 0,
                    way_hits: 0,
                    way_misses: 0,
                })
                .collect(),
        }
    }
}

fn derive_buffer_limit(params: &CakeParams, tin0_rate_bps: u64) -> u64 {
    if params.memory > 0 {
        return params.memory;
    }
    if tin0_rate_bps == 0 {
        return u64::MAX;
    }
    let bytes = (tin0_rate_bps as u128 * params.interval_us as u128) / REFERENCE_WINDOW_US;
    (bytes as u64).max(MIN_BUFFER_LIMIT_BYTES)
}
