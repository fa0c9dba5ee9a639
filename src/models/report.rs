// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire form of the lifecycle reports sent to the SDP controller.

use serde::Serialize;
use serde_json::Value;

use crate::models::flow::Flow;

/// Message type accompanying every connection report.
pub const CONNECTION_UPDATE: &str = "connection_update";

/// One lifecycle event inside a `connection_update` array.
///
/// `end_timestamp == 0` marks a newly opened connection; anything else is a
/// closure.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub connection_id: u64,
    pub sdp_id: u32,
    pub source_ip: String,
    pub source_port: u16,
    pub destination_ip: String,
    pub destination_port: u16,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

impl From<&Flow> for ConnectionRecord {
    fn from(flow: &Flow) -> Self {
        Self {
            connection_id: flow.connection_id,
            sdp_id: flow.sdp_id,
            source_ip: flow.src_ip.clone(),
            source_port: flow.src_port,
            destination_ip: flow.dst_ip.clone(),
            destination_port: flow.dst_port,
            start_timestamp: flow.start_time,
            end_timestamp: flow.end_time,
        }
    }
}

/// Serializes the outbound queue as the JSON array the controller expects.
pub fn report_payload(flows: &[Flow]) -> Value {
    let records: Vec<ConnectionRecord> = flows.iter().map(ConnectionRecord::from).collect();
    serde_json::json!(records)
}
