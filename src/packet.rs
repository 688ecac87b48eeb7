//! Packet record (data model §3). Owned exclusively by one flow queue between
//! enqueue and dequeue; released to the producer (or dropped) on dequeue.

use crate::clock::TimeNs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u64);

/// IP version of the packet, used only to decide how the flow hasher reads
/// address fields out of the flow key the host supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

/// A packet as the engine sees it. Real header bytes, payload, and socket
/// buffer bookkeeping live with the host; we only need wire length, memory
/// footprint, classification inputs, and ECN capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub id: PacketId,
    /// Bytes on the wire, used for rate shaping and DRR deficits.
    len: u32,
    /// Memory footprint as held by the host (skb truesize equivalent),
    /// always >= `len`. Charged against the global memory budget.
    truesize: u32,
    pub ip_version: IpVersion,
    /// 6-bit Diffserv code point.
    pub dscp: u8,
    /// Whether the transport marked this packet ECN-capable; if so CoDel
    /// marks instead of dropping (unless the scheduler is overloaded).
    pub ecn_capable: bool,
    /// Set by the flow queue on push, read back on dequeue to compute
    /// sojourn time. `None` means "not yet enqueued".
    enqueue_time: Option<TimeNs>,
    /// Purely a CLI/test correlation aid; never read by any scheduling or
    /// AQM decision.
    pub trace_id: Option<u64>,
}

impl Packet {
    pub fn new(id: PacketId, len: u32, dscp: u8, ecn_capable: bool) -> Self {
        Self::with_truesize(id, len, len, dscp, ecn_capable)
    }

    pub fn with_truesize(id: PacketId, len: u32, truesize: u32, dscp: u8, ecn_capable: bool) -> Self {
        Self {
            id,
            len,
            truesize: truesize.max(len),
            ip_version: IpVersion::V4,
            dscp: dscp & 0x3f,
            ecn_capable,
            enqueue_time: None,
            trace_id: None,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn truesize(&self) -> u32 {
        self.truesize
    }

    pub fn enqueue_time(&self) -> Option<TimeNs> {
        self.enqueue_time
    }

    pub(crate) fn stamp_enqueue(&mut self, now: TimeNs) {
        self.enqueue_time = Some(now);
    }

    /// Time the packet has spent in the system, measured from when it was
    /// handed to the flow queue. Zero if it was never stamped (shouldn't
    /// happen for packets coming back out of a flow queue).
    pub fn sojourn(&self, now: TimeNs) -> std::time::Duration {
        match self.enqueue_time {
            Some(t) => now.saturating_sub(t),
            None => std::time::Duration::ZERO,
        }
    }

    /// Clears the DSCP field to 0; `ecn_capable` is untouched. Used by the
    /// `wash` configuration flag to strip Diffserv markings that shouldn't
    /// leak past this shaping point, while leaving ECN signaling intact.
    pub fn wash_dscp(&mut self) {
        self.dscp = 0;
    }
}
