//! Shaper (C7): byte-clock pacing, shared by the global scope and each tin.
//!
//! For a packet of overhead-corrected length `L`, `time_next_packet` is
//! advanced by `(L * rate_ns) >> rate_shift`. `(rate_ns, rate_shift)` is
//! derived once from a configured byte rate so the hot path never needs a
//! 64-bit divide.

use crate::clock::TimeNs;

/// Floor on the configured rate used when computing `rate_ns`, so a
/// pathologically small nonzero rate can't make the shift search degenerate.
const MIN_RATE_BPS: u64 = 1;
const NSEC_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct ByteClock {
    pub rate_bps: u64,
    rate_ns: u32,
    rate_shift: u8,
    pub time_next_packet: TimeNs,
}

impl ByteClock {
    /// `rate_bps == 0` means unlimited: the gate never closes and
    /// `advance` is a no-op.
    pub fn new(rate_bps: u64) -> Self {
        let (rate_ns, rate_shift) = Self::derive(rate_bps);
        Self {
            rate_bps,
            rate_ns,
            rate_shift,
            time_next_packet: TimeNs::ZERO,
        }
    }

    /// Finds the largest shift `s <= 32` such that
    /// `(NSEC_PER_SEC << s) / max(r, MIN_RATE)` still fits in 32 bits,
    /// yielding the most fractional precision a 32-bit `rate_ns` can hold
    /// without a 64-bit divide on the hot path.
    fn derive(rate_bps: u64) -> (u32, u8) {
        if rate_bps == 0 {
            return (0, 0);
        }
        let r = rate_bps.max(MIN_RATE_BPS);
        let mut shift: u8 = 0;
        let mut rate_ns: u32 = 0;
        for s in 0..=32u8 {
            let numerator = NSEC_PER_SEC.checked_shl(s as u32);
            let Some(numerator) = numerator else { break };
            let q = numerator / r;
            if q > u32::MAX as u64 {
                break;
            }
            shift = s;
            rate_ns = q as u32;
        }
        (rate_ns, shift)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate_bps == 0
    }

    /// Advances `time_next_packet` by the pacing interval for `len` bytes
    /// (already overhead-corrected). No-op when unlimited.
    pub fn advance(&mut self, len: u32) {
        if self.is_unlimited() {
            return;
        }
        let delta_ns = ((len as u64) * (self.rate_ns as u64)) >> self.rate_shift;
        self.time_next_packet = self.time_next_packet + delta_ns;
    }

    /// Returns `Some(time_next_packet)` if `now` is still gated (too early
    /// to send), or `None` if the gate is open.
    pub fn gate(&self, now: TimeNs) -> Option<TimeNs> {
        if self.is_unlimited() {
            return None;
        }
        if self.time_next_packet > now {
            Some(self.time_next_packet)
        } else {
            None
        }
    }

    /// Reopens the gate if backlog just transitioned from empty to
    /// non-empty and the clock had fallen behind `now` (§4.5).
    pub fn refresh_if_stale(&mut self, now: TimeNs) {
        if !self.is_unlimited() && self.time_next_packet < now {
            self.time_next_packet = now;
        }
    }
}

/// Overhead correction (§4.7): adds the configured per-packet overhead
/// (which may be negative, e.g. to undo a preamble), then optionally rounds
/// up to ATM cell boundaries and inflates for cell framing.
pub fn cake_overhead(len: u32, rate_overhead: i32, atm: bool) -> u32 {
    let corrected = (len as i64 + rate_overhead as i64).max(0) as u32;
    if atm {
        let cells = corrected.div_ceil(48);
        let padded = cells * 48;
        // 53/48 cell framing: each 48-byte payload cell costs 53 bytes on
        // the wire (5-byte ATM cell header).
        ((padded as u64 * 53).div_ceil(48)) as u32
    } else {
        corrected
    }
}

/// DRR quantum for a rate, clamped per §4.7 so low rates still get a usable
/// per-flow turn and high rates don't burst for a full MTU-sized window.
pub fn quantum_for_rate(rate_bps: u64) -> u32 {
    ((rate_bps >> 12) as u32).clamp(300, 1514)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_rate_never_gates() {
        let clock = ByteClock::new(0);
        assert!(clock.gate(TimeNs(1_000_000_000)).is_none());
    }

    #[test]
    fn advancing_paces_subsequent_packets() {
        // 1,000,000 bytes/sec, 1500-byte packets -> ~1.5ms apart.
        let mut clock = ByteClock::new(1_000_000);
        assert_eq!(clock.gate(TimeNs(0)), None);
        clock.advance(1500);
        let gated_until = clock.gate(TimeNs(0)).expect("should be gated immediately after");
        let expected_ns = 1_500_000_000u64 / 1_000_000; // 1.5ms in ns
        let tolerance = expected_ns / 100; // 1%
        let actual = gated_until.as_nanos();
        assert!(
            actual.abs_diff(expected_ns) <= tolerance.max(1000),
            "expected ~{expected_ns}ns, got {actual}ns"
        );
    }

    #[test]
    fn refresh_if_stale_only_moves_clock_forward() {
        let mut clock = ByteClock::new(1000);
        clock.time_next_packet = TimeNs(10);
        clock.refresh_if_stale(TimeNs(100));
        assert_eq!(clock.time_next_packet, TimeNs(100));

        clock.time_next_packet = TimeNs(500);
        clock.refresh_if_stale(TimeNs(100));
        assert_eq!(clock.time_next_packet, TimeNs(500), "must not move clock backward");
    }

    #[test]
    fn atm_overhead_rounds_up_to_cell_boundary() {
        // 1 byte of payload still costs a full 48-byte cell, inflated 53/48.
        let corrected = cake_overhead(1, 0, true);
        assert_eq!(corrected, 53);
    }

    #[test]
    fn overhead_can_be_negative() {
        assert_eq!(cake_overhead(100, -10, false), 90);
        assert_eq!(cake_overhead(5, -10, false), 0, "clamped at zero, never negative");
    }

    #[test]
    fn quantum_clamps_to_bounds() {
        assert_eq!(quantum_for_rate(0), 300);
        assert_eq!(quantum_for_rate(u64::MAX), 1514);
    }
}
