// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flow records: one entry per connection observed through the kernel
//! connection tracker.
//!
//! A flow is owned by exactly one container at any time (the known index,
//! the per-scan latest index, or the outbound report queue) and *moves*
//! between them. The only copies ever made are the report-queue duplicates
//! of newly opened flows.

use core::fmt;

/// One tracked connection of an authorized SDP identity.
///
/// `connection_id` is assigned exactly once, when the flow first enters the
/// known index, and never changes afterwards. `end_time == 0` means the flow
/// is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub connection_id: u64,
    /// SDP id carried in the kernel connection mark; groups flows.
    pub sdp_id: u32,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    /// Unix seconds at which the flow was first observed.
    pub start_time: i64,
    /// Unix seconds at which the flow was closed; 0 while open.
    pub end_time: i64,
}

impl Flow {
    /// Builds a freshly observed (still open, not yet numbered) flow.
    pub fn observed(
        sdp_id: u32,
        src_ip: impl Into<String>,
        src_port: u16,
        dst_ip: impl Into<String>,
        dst_port: u16,
        start_time: i64,
    ) -> Self {
        Self {
            connection_id: 0,
            sdp_id,
            src_ip: src_ip.into(),
            src_port,
            dst_ip: dst_ip.into(),
            dst_port,
            start_time,
            end_time: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time == 0
    }

    /// Structural equality used by the reconciler: identity plus both
    /// endpoints. `connection_id` and the timestamps do not participate, so
    /// a re-observed flow matches the ledger entry that already numbers it.
    pub fn same_endpoints(&self, other: &Flow) -> bool {
        self.sdp_id == other.sdp_id
            && self.src_port == other.src_port
            && self.dst_port == other.dst_port
            && self.src_ip == other.src_ip
            && self.dst_ip == other.dst_ip
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn {} sdp {} {}:{} -> {}:{} started {}",
            self.connection_id,
            self.sdp_id,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.start_time,
        )?;
        if self.is_open() {
            f.write_str(" (open)")
        } else {
            write!(f, " ended {}", self.end_time)
        }
    }
}
