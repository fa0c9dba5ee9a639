// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Seam over the firewall's connection-tracking facility.
//!
//! [`FlowDriver`] abstracts the two raw operations the gateway needs from
//! `conntrack(8)`: dumping live flows and deleting flows by criteria.
//! [`probe`] and [`close`] build the tracker-facing operations on top.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use crate::models::flow::Flow;

pub mod conntrack;
mod parse;

pub use conntrack::ConntrackCli;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to run conntrack: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("conntrack {status}: {output}")]
    CommandFailed {
        status: std::process::ExitStatus,
        output: String,
    },
    #[error("conntrack invocation cancelled")]
    Cancelled,
}

/// Raw access to the kernel connection tracker.
///
/// Futures here are awaited on the single reconciliation task; they do not
/// need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait FlowDriver {
    /// Combined stdout+stderr of `conntrack -L [filter]`.
    async fn query(&self, filter: Option<&str>) -> Result<String, DriverError>;

    /// Combined output of `conntrack -D <filter>`.
    async fn delete(&self, filter: &str) -> Result<String, DriverError>;
}

/// Dumps the flows currently live in the kernel, restricted by `filter` when
/// given. Lines that do not describe a marked flow are skipped; malformed
/// lines are logged and skipped without failing the probe.
pub async fn probe<D: FlowDriver>(driver: &D, filter: Option<&str>) -> Result<Vec<Flow>> {
    let now = Utc::now().timestamp();
    let dump = driver
        .query(filter)
        .await
        .context("conntrack query failed")?;
    Ok(parse::parse_flow_dump(&dump, now))
}

/// Deletes every flow matching `filter`, then re-queries with the same
/// filter to prove the deletion took. Surviving flows escalate to a driver
/// error.
pub async fn close<D: FlowDriver>(driver: &D, filter: &str) -> Result<()> {
    driver
        .delete(filter)
        .await
        .with_context(|| format!("conntrack deletion failed for criteria '{filter}'"))?;

    let survivors = probe(driver, Some(filter)).await?;
    if !survivors.is_empty() {
        for flow in &survivors {
            error!(%flow, "flow survived deletion");
        }
        bail!(
            "failed to close {} flow(s) matching criteria '{filter}'",
            survivors.len()
        );
    }

    info!(criteria = filter, "gateway closed flows");
    Ok(())
}

/// Deletion criteria for every flow marked with `sdp_id`.
pub fn identity_filter(sdp_id: u32) -> String {
    format!("-m {sdp_id}")
}

/// Deletion criteria for a single flow: connection mark plus the full
/// address tuple.
pub fn tuple_filter(flow: &Flow) -> String {
    format!(
        "-m {} -s {} --sport {} -d {} --dport {}",
        flow.sdp_id, flow.src_ip, flow.src_port, flow.dst_ip, flow.dst_port,
    )
}
