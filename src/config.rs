//! Configurator (C9): maps one of four preset diffserv modes into per-tin
//! rates, DRR weights, and a 64-entry DSCP→tin table.

use crate::hash::FlowMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Diffserv code points used by the preset tables below. Standard CS/AF/EF
/// values per RFC 2474/2597/3246; TOS1/TOS4 are legacy code points named in
/// the reference tin tables that don't correspond to a standard AF/CS name —
/// assigned otherwise-unused numeric values here (see DESIGN.md).
mod dscp {
    pub const CS0: u8 = 0;
    pub const TOS1: u8 = 4;
    pub const CS1: u8 = 8;
    pub const AF11: u8 = 10;
    pub const AF12: u8 = 12;
    pub const AF13: u8 = 14;
    pub const CS2: u8 = 16;
    pub const AF21: u8 = 18;
    pub const AF22: u8 = 20;
    pub const AF23: u8 = 22;
    pub const CS3: u8 = 24;
    pub const AF31: u8 = 26;
    pub const AF32: u8 = 28;
    pub const AF33: u8 = 30;
    pub const TOS4: u8 = 33;
    pub const CS4: u8 = 32;
    pub const AF41: u8 = 34;
    pub const AF42: u8 = 36;
    pub const AF43: u8 = 38;
    pub const CS5: u8 = 40;
    pub const VA: u8 = 44;
    pub const EF: u8 = 46;
    pub const CS6: u8 = 48;
    pub const CS7: u8 = 56;
}

pub const DSCP_TABLE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CakeMode {
    BestEffort,
    Precedence,
    Diffserv4,
    Diffserv8,
}

impl Default for CakeMode {
    fn default() -> Self {
        CakeMode::Diffserv4
    }
}

/// The scheduler's full configuration blob (§6 parameter table).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CakeParams {
    /// Shaping rate in bytes/sec; 0 = unlimited.
    pub base_rate: u64,
    pub diffserv_mode: CakeMode,
    pub flow_mode: FlowMode,
    pub atm: bool,
    pub wash: bool,
    /// Reserved; accepted but never read (spec §9 open question).
    pub autorate_ingress: bool,
    pub overhead: i32,
    pub interval_us: u64,
    pub target_us: u64,
    /// Explicit buffer_limit in bytes; 0 = derive from rate * interval.
    pub memory: u64,
}

impl Default for CakeParams {
    fn default() -> Self {
        Self {
            base_rate: 0,
            diffserv_mode: CakeMode::default(),
            flow_mode: FlowMode::default(),
            atm: false,
            wash: false,
            autorate_ingress: false,
            overhead: 0,
            interval_us: 100_000,
            target_us: 5_000,
            memory: 0,
        }
    }
}

impl CakeParams {
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    pub fn target(&self) -> Duration {
        Duration::from_micros(self.target_us)
    }

    pub fn validate(&self) -> Result<(), crate::error::CakeError> {
        if self.interval_us == 0 {
            return Err(crate::error::CakeError::InvalidConfig("interval must be positive".into()));
        }
        if self.target_us == 0 {
            return Err(crate::error::CakeError::InvalidConfig("target must be positive".into()));
        }
        if self.target_us >= self.interval_us {
            return Err(crate::error::CakeError::InvalidConfig("target must be less than interval".into()));
        }
        Ok(())
    }
}

/// Per-tin parameters produced by `build_tin_configs`, independent of the
/// `Tin` runtime struct (C5) so the configurator can be tested without
/// constructing flow tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TinConfig {
    pub rate_bps: u64,
    pub quantum_prio: i64,
    pub quantum_band: i64,
}

/// Builds the per-tin configs and the 64-entry DSCP→tin table for `mode`,
/// scaling tier 0's rate from `base_rate` (§4.9).
pub fn build_tin_configs(mode: CakeMode, base_rate: u64) -> (Vec<TinConfig>, [u8; DSCP_TABLE_SIZE]) {
    match mode {
        CakeMode::BestEffort => (
            vec![TinConfig { rate_bps: base_rate, quantum_prio: 65535, quantum_band: 65535 }],
            [0u8; DSCP_TABLE_SIZE],
        ),
        CakeMode::Precedence => {
            let tins = progression_tins(base_rate, 8);
            let mut table = [0u8; DSCP_TABLE_SIZE];
            for (d, slot) in table.iter_mut().enumerate() {
                *slot = ((d >> 3).min(7)) as u8;
            }
            (tins, table)
        }
        CakeMode::Diffserv8 => {
            let tins = progression_tins(base_rate, 8);
            let mut table = [2u8; DSCP_TABLE_SIZE]; // default: CS0 / best-effort tin
            use dscp::*;
            for &d in &[CS1] {
                table[d as usize] = 0;
            }
            for &d in &[AF11, AF12, AF13] {
                table[d as usize] = 1;
            }
            table[CS0 as usize] = 2;
            for &d in &[CS3, AF31, AF32, AF33, AF41, AF42, AF43] {
                table[d as usize] = 3;
            }
            for &d in &[TOS4, AF21, AF22, AF23] {
                table[d as usize] = 4;
            }
            for &d in &[TOS1, CS2] {
                table[d as usize] = 5;
            }
            for &d in &[CS4, CS5, VA, EF] {
                table[d as usize] = 6;
            }
            for &d in &[CS6, CS7] {
                table[d as usize] = 7;
            }
            (tins, table)
        }
        CakeMode::Diffserv4 => {
            let rates = [base_rate, mul_frac(base_rate, 15, 16), mul_frac(base_rate, 3, 4), mul_frac(base_rate, 1, 4)];
            // Priority weight biased toward the latency tin (index 3);
            // bandwidth weight biased toward best-effort (index 1). See
            // DESIGN.md for the exact multipliers chosen.
            let quantum_prio = [256i64, 256, 256, 2048];
            let quantum_band = [256i64, 1024, 256, 256];
            let tins = (0..4)
                .map(|i| TinConfig { rate_bps: rates[i], quantum_prio: quantum_prio[i], quantum_band: quantum_band[i] })
                .collect();

            let mut table = [1u8; DSCP_TABLE_SIZE]; // default: best-effort
            use dscp::*;
            table[CS1 as usize] = 0;
            for &d in &[CS3, AF21, AF22, AF23, AF31, AF32, AF33, AF41, AF42, AF43, CS2, TOS1, TOS4] {
                table[d as usize] = 2;
            }
            for &d in &[CS4, CS5, EF, VA, CS6, CS7] {
                table[d as usize] = 3;
            }
            (tins, table)
        }
    }
}

/// The precedence/diffserv8 tier progression: rate decays by 7/8 per tier,
/// quantum_prio grows by 3/2, quantum_band decays by 7/8, all starting from
/// tier 0's configured rate and a quantum of 256 (§4.9).
fn progression_tins(base_rate: u64, tiers: usize) -> Vec<TinConfig> {
    let mut rate = base_rate;
    let mut prio = 256i64;
    let mut band = 256i64;
    let mut out = Vec::with_capacity(tiers);
    for _ in 0..tiers {
        out.push(TinConfig { rate_bps: rate, quantum_prio: prio, quantum_band: band });
        rate = mul_frac(rate, 7, 8);
        prio = prio * 3 / 2;
        band = band * 7 / 8;
    }
    out
}

fn mul_frac(v: u64, num: u64, den: u64) -> u64 {
    ((v as u128 * num as u128) / den as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn besteffort_has_one_tin_and_zeroed_table() {
        let (tins, table) = build_tin_configs(CakeMode::BestEffort, 1_000_000);
        assert_eq!(tins.len(), 1);
        assert!(table.iter().all(|&t| t == 0));
        assert_eq!(tins[0].quantum_prio, 65535);
    }

    #[test]
    fn precedence_maps_top_three_bits() {
        let (tins, table) = build_tin_configs(CakeMode::Precedence, 1_000_000);
        assert_eq!(tins.len(), 8);
        assert_eq!(table[0], 0);
        assert_eq!(table[56], 7); // CS7 = 0b111000 -> top 3 bits = 7
        assert_eq!(table[8], 1); // CS1 = 0b001000 -> top 3 bits = 1
    }

    #[test]
    fn precedence_rate_and_quantum_progression() {
        let (tins, _) = build_tin_configs(CakeMode::Precedence, 800_000);
        assert_eq!(tins[0].rate_bps, 800_000);
        assert_eq!(tins[1].rate_bps, 700_000); // 800_000 * 7/8
        assert_eq!(tins[0].quantum_prio, 256);
        assert_eq!(tins[1].quantum_prio, 384); // 256 * 3/2
        assert_eq!(tins[1].quantum_band, 224); // 256 * 7/8
    }

    #[test]
    fn diffserv8_known_codepoints_land_in_expected_tins() {
        let (_, table) = build_tin_configs(CakeMode::Diffserv8, 1_000_000);
        assert_eq!(table[dscp::CS1 as usize], 0);
        assert_eq!(table[dscp::AF11 as usize], 1);
        assert_eq!(table[dscp::CS0 as usize], 2);
        assert_eq!(table[dscp::EF as usize], 6);
        assert_eq!(table[dscp::CS7 as usize], 7);
    }

    #[test]
    fn diffserv4_rate_tiers() {
        let (tins, _) = build_tin_configs(CakeMode::Diffserv4, 1_000_000);
        assert_eq!(tins.len(), 4);
        assert_eq!(tins[0].rate_bps, 1_000_000);
        assert_eq!(tins[1].rate_bps, 937_500); // 15/16
        assert_eq!(tins[2].rate_bps, 750_000); // 3/4
        assert_eq!(tins[3].rate_bps, 250_000); // 1/4
    }

    #[test]
    fn diffserv4_default_codepoint_is_besteffort() {
        let (_, table) = build_tin_configs(CakeMode::Diffserv4, 1_000_000);
        assert_eq!(table[dscp::CS0 as usize], 1);
        assert_eq!(table[dscp::AF11 as usize], 1);
        assert_eq!(table[dscp::EF as usize], 3);
        assert_eq!(table[dscp::CS1 as usize], 0);
    }

    #[test]
    fn params_validate_rejects_bad_target_interval() {
        let mut p = CakeParams::default();
        p.target_us = p.interval_us;
        assert!(p.validate().is_err());
    }
}
