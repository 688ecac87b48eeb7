//! CoDel leaf controller (C1): per-flow sojourn-time AQM.
//!
//! Applied at the granularity of one flow queue. On dequeue it pops packets
//! from the head until one is acceptable, dropping or ECN-marking the ones
//! that aren't, and schedules future drops using the same
//! interval/sqrt(count) control law as the reference algorithm.

use crate::clock::TimeNs;
use crate::flow::Flow;
use std::time::Duration;

/// Shared CoDel parameters (same for every flow in the scheduler).
#[derive(Debug, Clone, Copy)]
pub struct CodelParams {
    pub target: Duration,
    pub interval: Duration,
}

impl Default for CodelParams {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(5),
            interval: Duration::from_millis(100),
        }
    }
}

/// A packet is exempt from sojourn-time drops while backlog is below this
/// many bytes — roughly one MTU, so a flow with a single packet in flight
/// never gets penalized for network RTT alone.
const MAX_PACKET_BYTES: u64 = 1514;

const REC_INV_SQRT_SHIFT: u32 = 16;
const REC_INV_SQRT_ONE: u32 = 1 << REC_INV_SQRT_SHIFT;

/// Per-flow CoDel state (data model: "CoDel variables").
#[derive(Debug, Clone)]
pub struct CodelVars {
    pub count: u32,
    pub drop_next: TimeNs,
    pub dropping: bool,
    pub first_above_time: Option<TimeNs>,
    /// Q16.16 fixed-point approximation of `1/sqrt(count)`, refined by one
    /// Newton step per drop so the hot path never calls `sqrt`.
    rec_inv_sqrt: u32,
    /// Drops + marks issued during the current `codel_dequeue` call.
    pub cycle_actions: u32,
}

impl Default for CodelVars {
    fn default() -> Self {
        Self {
            count: 0,
            drop_next: TimeNs::ZERO,
            dropping: false,
            first_above_time: None,
            rec_inv_sqrt: REC_INV_SQRT_ONE,
            cycle_actions: 0,
        }
    }
}

/// What happened to the packet CoDel just looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pass,
    Drop,
    Mark,
}

/// One Newton-Raphson refinement step toward `1/sqrt(count)`, starting from
/// the previous estimate. Mirrors the incremental approach used by the
/// reference CoDel implementation: the estimate only needs to track a
/// slowly-growing `count`, so one iteration per call keeps it accurate
/// without ever computing a square root directly.
fn newton_step(rec_inv_sqrt: u32, count: u32) -> u32 {
    let inv_sqrt2 = ((rec_inv_sqrt as u64) * (rec_inv_sqrt as u64)) >> REC_INV_SQRT_SHIFT;
    let three = 3u64 << REC_INV_SQRT_SHIFT;
    let val = three.saturating_sub((count as u64) * inv_sqrt2);
    (((rec_inv_sqrt as u64) * val) >> (REC_INV_SQRT_SHIFT + 1)) as u32
}

fn control_law(interval: Duration, rec_inv_sqrt: u32) -> Duration {
    let ns = (interval.as_nanos() as u128 * rec_inv_sqrt as u128) >> REC_INV_SQRT_SHIFT;
    Duration::from_nanos(ns.min(u64::MAX as u128) as u64)
}

/// A dropping episode that ended within this many intervals ago is
/// considered part of the same oscillation, so its `count` is decayed
/// toward rather than discarded on re-entry.
const RECENT_EPISODE_INTERVALS: u32 = 16;

impl CodelVars {
    /// Begins (or resumes) a dropping episode. If the last episode's
    /// scheduled drop fell within the last `RECENT_EPISODE_INTERVALS`
    /// intervals, `count` decays by 2 (floor 1) instead of resetting to 1 —
    /// a flow oscillating around the target keeps most of its accumulated
    /// drop pressure rather than starting cold every time it dips below
    /// target for a moment.
    fn enter_dropping(&mut self, now: TimeNs, interval: Duration) {
        let since_last_drop = now.saturating_sub(self.drop_next);
        let recent_episode = since_last_drop < interval.saturating_mul(RECENT_EPISODE_INTERVALS);

        self.dropping = true;
        self.count = if recent_episode { self.count.saturating_sub(2).max(1) } else { 1 };
        self.rec_inv_sqrt = newton_step(self.rec_inv_sqrt, self.count);
        self.drop_next = now + control_law(interval, self.rec_inv_sqrt);
    }

    fn advance_drop_next(&mut self, now: TimeNs, interval: Duration) {
        self.count = self.count.saturating_add(1);
        self.rec_inv_sqrt = newton_step(self.rec_inv_sqrt, self.count);
        self.drop_next = now + control_law(interval, self.rec_inv_sqrt);
    }

    fn act(&self, ecn_capable: bool, overloaded: bool) -> Verdict {
        if ecn_capable && !overloaded {
            Verdict::Mark
        } else {
            Verdict::Drop
        }
    }

    /// Evaluate this single packet's sojourn time and decide drop/mark/pass.
    /// `overloaded` forces drops even for ECN-capable packets, shedding
    /// backlog faster when the global memory budget is under pressure.
    ///
    /// Leaving the dropping state (a sojourn dip below target) only clears
    /// `dropping`; `count` is left untouched so a brief dip doesn't erase
    /// memory of a recent episode (§4.1 — count is decayed, not reset, when
    /// an interval passes without action).
    fn classify(
        &mut self,
        sojourn: Duration,
        backlog_bytes: u64,
        params: &CodelParams,
        now: TimeNs,
        ecn_capable: bool,
        overloaded: bool,
    ) -> Verdict {
        let above_target = !(sojourn < params.target || backlog_bytes <= MAX_PACKET_BYTES);

        if !above_target {
            self.first_above_time = None;
        } else if self.first_above_time.is_none() {
            self.first_above_time = Some(now + params.interval);
        }

        let ok_to_drop = above_target && self.first_above_time.map_or(false, |t| now >= t);

        if self.dropping {
            if !ok_to_drop {
                self.dropping = false;
            } else if now >= self.drop_next {
                self.advance_drop_next(now, params.interval);
                return self.act(ecn_capable, overloaded);
            }
        } else if ok_to_drop {
            self.enter_dropping(now, params.interval);
            return self.act(ecn_capable, overloaded);
        }

        Verdict::Pass
    }
}

/// Pops packets from `flow`'s head until one passes CoDel, dropping/marking
/// the rest. Returns the first passing packet, or `None` if the flow
/// drained without producing one.
pub fn codel_dequeue(
    flow: &mut Flow,
    params: &CodelParams,
    now: TimeNs,
    overloaded: bool,
) -> Option<crate::packet::Packet> {
    flow.codel.cycle_actions = 0;

    loop {
        let mut packet = flow.pop_front()?;
        let sojourn = packet.sojourn(now);
        let backlog = flow.backlog_bytes();
        let ecn_capable = packet.ecn_capable;

        match flow.codel.classify(sojourn, backlog, params, now, ecn_capable, overloaded) {
            Verdict::Pass => return Some(packet),
            Verdict::Mark => {
                flow.codel.cycle_actions += 1;
                flow.ecn_marked += 1;
                packet.ecn_capable = false; // already acted on; avoid double marking downstream
                return Some(packet);
            }
            Verdict::Drop => {
                flow.codel.cycle_actions += 1;
                flow.drop_count += 1;
                // continue the loop, looking at the next packet
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::packet::{Packet, PacketId};

    fn push(flow: &mut Flow, id: u64, at: TimeNs, ecn: bool) {
        let mut p = Packet::new(PacketId(id), 1000, 0, ecn);
        p.stamp_enqueue(TimeNs(0));
        flow.push_back(p);
        let _ = at;
    }

    #[test]
    fn below_target_always_passes() {
        let mut flow = Flow::new(1024);
        push(&mut flow, 1, TimeNs(0), false);
        let params = CodelParams::default();
        let got = codel_dequeue(&mut flow, &params, TimeNs(1_000_000), false); // 1ms sojourn < 5ms target
        assert!(got.is_some());
        assert_eq!(flow.drop_count, 0);
    }

    #[test]
    fn sustained_overload_enters_dropping_and_drops_non_ecn() {
        let mut flow = Flow::new(1024);
        let params = CodelParams::default();

        // Fill with packets whose sojourn is always above target; keep
        // backlog above the MTU floor so the "ok" escape hatch doesn't fire.
        for i in 0..50u64 {
            push(&mut flow, i, TimeNs(0), false);
        }

        let mut saw_drop = false;
        let mut now = TimeNs(0);
        for _ in 0..50 {
            now = now + Duration::from_millis(20);
            if flow.is_empty() {
                break;
            }
            if let Some(_pkt) = codel_dequeue(&mut flow, &params, now, false) {
                if flow.drop_count > 0 {
                    saw_drop = true;
                }
            }
        }
        assert!(saw_drop, "expected CoDel to start dropping under sustained overload");
    }

    #[test]
    fn ecn_capable_marks_instead_of_dropping_when_not_overloaded() {
        let mut flow = Flow::new(1024);
        let params = CodelParams::default();
        for i in 0..20u64 {
            push(&mut flow, i, TimeNs(0), true);
        }

        let mut now = TimeNs(0);
        let mut marked = 0u64;
        for _ in 0..20 {
            now = now + Duration::from_millis(20);
            if flow.is_empty() {
                break;
            }
            codel_dequeue(&mut flow, &params, now, false);
            marked = flow.ecn_marked;
        }
        assert!(marked > 0);
        assert_eq!(flow.drop_count, 0, "ECN-capable flow should be marked, not dropped, while not overloaded");
    }

    #[test]
    fn count_decays_instead_of_resetting_on_quick_reentry() {
        let mut vars = CodelVars::default();
        let params = CodelParams::default();
        let above = Duration::from_millis(10);
        let below = Duration::from_millis(1);

        // Drive count up to 4 across a sustained dropping episode.
        let mut now = TimeNs::ZERO;
        vars.classify(above, 2000, &params, now, false, false); // arms first_above_time
        now = now + Duration::from_millis(100);
        vars.classify(above, 2000, &params, now, false, false); // enters dropping, count=1
        while vars.count < 4 {
            now = now + Duration::from_millis(1000);
            vars.classify(above, 2000, &params, now, false, false);
        }
        assert!(vars.dropping);
        let count_before_leaving = vars.count;

        // A brief dip below target leaves the dropping state...
        now = now + Duration::from_millis(5);
        vars.classify(below, 2000, &params, now, false, false);
        assert!(!vars.dropping);
        assert_eq!(vars.count, count_before_leaving, "count must not reset to 0 on a brief dip below target");

        // ...and re-entering shortly after decays count by 2 rather than
        // restarting at 1.
        now = now + Duration::from_millis(20);
        vars.classify(above, 2000, &params, now, false, false); // re-arms first_above_time
        now = now + params.interval;
        vars.classify(above, 2000, &params, now, false, false); // re-enters dropping
        assert!(vars.dropping);
        assert_eq!(vars.count, count_before_leaving.saturating_sub(2).max(1));
    }

    #[test]
    fn overload_flag_forces_drops_even_when_ecn_capable() {
        let mut flow = Flow::new(1024);
        let params = CodelParams::default();
        for i in 0..20u64 {
            push(&mut flow, i, TimeNs(0), true);
        }

        let mut now = TimeNs(0);
        for _ in 0..20 {
            now = now + Duration::from_millis(20);
            if flow.is_empty() {
                break;
            }
            codel_dequeue(&mut flow, &params, now, true);
        }
        assert!(flow.drop_count > 0, "overloaded=true should force drops over ECN marks");
        assert_eq!(flow.ecn_marked, 0);
    }
}
