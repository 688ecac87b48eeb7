//! Flow hasher (C3): maps a packet's flow key to a flow index within a tin.

use serde::{Deserialize, Serialize};

/// Which header fields participate in the flow hash. Named after CAKE's own
/// `flow_mode` knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMode {
    /// Every packet hashes to flow 0 — no isolation.
    None,
    SrcIp,
    DstIp,
    /// src+dst addresses, ignoring ports/protocol.
    Hosts,
    /// Full 5-tuple (addresses, ports, protocol).
    Flows,
    /// Hosts and 5-tuple combined, biasing collision amortization toward
    /// per-host fairness as well as per-flow fairness.
    Dual,
}

impl Default for FlowMode {
    fn default() -> Self {
        FlowMode::Flows
    }
}

/// Header fields the host extracts from a packet; opaque to everything but
/// the hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowKey {
    pub src_ip: u128,
    pub dst_ip: u128,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

/// One-at-a-time hash (Bob Jenkins), the same family CAKE uses for flow
/// hashing: cheap, good avalanche behavior, no lookup tables.
fn jenkins_one_at_a_time(seed: u32, bytes: &[u8]) -> u32 {
    let mut hash = seed;
    for &b in bytes {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

fn key_bytes(key: &FlowKey, mode: FlowMode) -> Vec<u8> {
    let mut buf = Vec::with_capacity(40);
    match mode {
        FlowMode::None => {}
        FlowMode::SrcIp => buf.extend_from_slice(&key.src_ip.to_be_bytes()),
        FlowMode::DstIp => buf.extend_from_slice(&key.dst_ip.to_be_bytes()),
        FlowMode::Hosts => {
            buf.extend_from_slice(&key.src_ip.to_be_bytes());
            buf.extend_from_slice(&key.dst_ip.to_be_bytes());
        }
        FlowMode::Flows | FlowMode::Dual => {
            buf.extend_from_slice(&key.src_ip.to_be_bytes());
            buf.extend_from_slice(&key.dst_ip.to_be_bytes());
            buf.extend_from_slice(&key.src_port.to_be_bytes());
            buf.extend_from_slice(&key.dst_port.to_be_bytes());
            buf.push(key.protocol);
            if matches!(mode, FlowMode::Dual) {
                // Fold the host-only pair in too, so two 5-tuples sharing a
                // host pair still perturb the same way the `dual` policy
                // intends (per-host fairness as well as per-flow fairness).
                buf.extend_from_slice(&key.src_ip.to_be_bytes());
                buf.extend_from_slice(&key.dst_ip.to_be_bytes());
            }
        }
    }
    buf
}

/// Reduces a 32-bit hash to `[0, n)` by a reciprocal multiply — avoids a
/// modulo on the hot path and is unbiased enough for `n` not a power of two,
/// unlike a plain mask.
fn reduce(hash: u32, n: usize) -> usize {
    (((hash as u64) * (n as u64)) >> 32) as usize
}

/// Maps a flow key to a flow index in `[0, flows_count)`.
pub fn hash_flow(key: &FlowKey, perturbation: u32, mode: FlowMode, flows_count: usize) -> usize {
    if matches!(mode, FlowMode::None) || flows_count == 0 {
        return 0;
    }
    let bytes = key_bytes(key, mode);
    let hash = jenkins_one_at_a_time(perturbation, &bytes);
    reduce(hash, flows_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src: u128, dst: u128, sport: u16, dport: u16) -> FlowKey {
        FlowKey { src_ip: src, dst_ip: dst, src_port: sport, dst_port: dport, protocol: 6 }
    }

    #[test]
    fn none_mode_always_hashes_to_zero() {
        let k = key(1, 2, 3, 4);
        assert_eq!(hash_flow(&k, 7, FlowMode::None, 1024), 0);
        let k2 = key(999, 888, 1, 2);
        assert_eq!(hash_flow(&k2, 7, FlowMode::None, 1024), 0);
    }

    #[test]
    fn result_is_in_range() {
        for i in 0..200u128 {
            let k = key(i, i * 7, i as u16, (i * 3) as u16);
            let idx = hash_flow(&k, 42, FlowMode::Flows, 113);
            assert!(idx < 113);
        }
    }

    #[test]
    fn different_five_tuples_usually_differ() {
        let a = hash_flow(&key(1, 2, 10, 20), 1, FlowMode::Flows, 1024);
        let b = hash_flow(&key(1, 2, 10, 21), 1, FlowMode::Flows, 1024);
        assert_ne!(a, b);
    }

    #[test]
    fn hosts_mode_ignores_ports() {
        let a = hash_flow(&key(1, 2, 10, 20), 5, FlowMode::Hosts, 1024);
        let b = hash_flow(&key(1, 2, 999, 1), 5, FlowMode::Hosts, 1024);
        assert_eq!(a, b);
    }

    #[test]
    fn perturbation_changes_mapping() {
        let k = key(10, 20, 30, 40);
        let a = hash_flow(&k, 1, FlowMode::Flows, 1024);
        let b = hash_flow(&k, 2, FlowMode::Flows, 1024);
        assert_ne!(a, b, "different seeds should almost never collide for this key");
    }
}
