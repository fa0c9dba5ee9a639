// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The connection ledger and its three tick entry points.
//!
//! An external scheduler drives one tick as `update` → `validate` →
//! `maybe_report`. `update` reconciles the ledger against a fresh kernel
//! scan, `validate` enforces the access policy over everything still
//! ledgered, and `maybe_report` drains the outbound queue to the controller
//! on its own cadence. The entry points must never run concurrently.

use std::collections::HashMap;

use anyhow::{Context, Result, ensure};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::TrackerConfig,
    control::ControlChannel,
    driver::{self, FlowDriver},
    models::{flow::Flow, report},
    policy::AccessTable,
};

pub mod id_alloc;
mod reconcile;

pub use id_alloc::ConnIdAllocator;

/// Accepted range for the identity-index sizing hint.
pub const MIN_HASH_TABLE_LENGTH: usize = 16;
pub const MAX_HASH_TABLE_LENGTH: usize = 65_536;

/// Authoritative in-process ledger of live authorized connections.
///
/// Owns the known index, the outbound event queue, the id allocator and the
/// report timing; the firewall driver and controller transport are the only
/// collaborators it talks to.
pub struct ConnectionTracker<D, C> {
    driver: D,
    control: C,
    /// Known index: identity -> flows currently believed live.
    known: HashMap<u32, Vec<Flow>>,
    /// Lifecycle events awaiting delivery, closed-before-opened per identity.
    outbound: Vec<Flow>,
    ids: ConnIdAllocator,
    index_capacity: usize,
    report_interval: i64,
    next_report_due: i64,
}

impl<D: FlowDriver, C: ControlChannel> ConnectionTracker<D, C> {
    pub fn new(driver: D, control: C, cfg: &TrackerConfig) -> Result<Self> {
        ensure!(
            (MIN_HASH_TABLE_LENGTH..=MAX_HASH_TABLE_LENGTH).contains(&cfg.hash_table_length),
            "ACC_STANZA_HASH_TABLE_LENGTH value {} not in the range {MIN_HASH_TABLE_LENGTH}-{MAX_HASH_TABLE_LENGTH}",
            cfg.hash_table_length,
        );
        ensure!(
            cfg.report_interval >= 1 && cfg.report_interval <= i64::from(i32::MAX),
            "CONN_REPORT_INTERVAL value {} must be between 1 and {}",
            cfg.report_interval,
            i32::MAX,
        );

        let ids = ConnIdAllocator::load(&cfg.conn_id_file)
            .context("failed to initialize connection id allocator")?;

        Ok(Self {
            driver,
            control,
            known: HashMap::with_capacity(cfg.hash_table_length),
            outbound: Vec::new(),
            ids,
            index_capacity: cfg.hash_table_length,
            report_interval: cfg.report_interval,
            next_report_due: 0,
        })
    }

    /// Reconciles the ledger against a fresh kernel scan.
    ///
    /// A probe failure aborts the tick with the ledger untouched. On
    /// success the latest index has been fully consumed: every scanned flow
    /// either matched a ledger entry, opened a new one, or extended an
    /// existing identity.
    pub async fn update(&mut self) -> Result<()> {
        let scanned = driver::probe(&self.driver, None).await?;
        debug!(count = scanned.len(), "scan returned flows");

        let mut latest = self.index_by_identity(scanned);
        let now = Utc::now().timestamp();

        // Phase A: diff every identity already ledgered. Keys are
        // snapshotted first so entries can be dropped mid-walk.
        let identities: Vec<u32> = self.known.keys().copied().collect();
        for sdp_id in identities {
            let Some(ledgered) = self.known.remove(&sdp_id) else {
                continue;
            };

            let Some(current) = latest.remove(&sdp_id) else {
                // Identity vanished from the scan entirely.
                info!(sdp_id, count = ledgered.len(), "all connections closed");
                self.close_out(ledgered, now);
                continue;
            };

            let diff = reconcile::diff_flow_lists(ledgered, current);
            let mut updated = diff.kept;

            for mut flow in diff.closed {
                flow.end_time = now;
                info!(%flow, "connection closed");
                self.outbound.push(flow);
            }
            for mut flow in diff.opened {
                flow.connection_id = self.ids.allocate();
                info!(%flow, "new connection");
                self.outbound.push(flow.clone());
                updated.push(flow);
            }

            if !updated.is_empty() {
                self.known.insert(sdp_id, updated);
            }
        }

        // Phase B: whatever identities remain were never ledgered; number
        // their flows and promote them wholesale.
        for (sdp_id, mut flows) in latest.drain() {
            for flow in &mut flows {
                flow.connection_id = self.ids.allocate();
                info!(%flow, "new connection");
            }
            self.outbound.extend(flows.iter().cloned());
            self.known.insert(sdp_id, flows);
        }

        // Phase C: the scan must be fully consumed.
        debug_assert!(latest.is_empty());
        Ok(())
    }

    /// Sweeps the ledger against the access policy, tearing down every flow
    /// that is no longer authorized.
    ///
    /// A driver failure aborts the sweep; flows not yet processed stay
    /// ledgered.
    pub async fn validate(&mut self, access: &AccessTable) -> Result<()> {
        let now = Utc::now().timestamp();

        let identities: Vec<u32> = self.known.keys().copied().collect();
        for sdp_id in identities {
            let Some(flows) = self.known.remove(&sdp_id) else {
                continue;
            };

            let Some(entry) = access.lookup(sdp_id) else {
                // Identity deauthorized: remove every flow it marked.
                if let Err(e) = driver::close(&self.driver, &driver::identity_filter(sdp_id)).await
                {
                    self.known.insert(sdp_id, flows);
                    return Err(e);
                }
                warn!(sdp_id, count = flows.len(), "closed all connections of deauthorized identity");
                self.close_out(flows, now);
                continue;
            };

            let mut kept = Vec::with_capacity(flows.len());
            let mut pending = flows.into_iter();
            while let Some(mut flow) = pending.next() {
                if entry.permits_port(flow.dst_port) {
                    kept.push(flow);
                    continue;
                }

                warn!(%flow, "connection no longer permitted by policy");
                if let Err(e) = driver::close(&self.driver, &driver::tuple_filter(&flow)).await {
                    kept.push(flow);
                    kept.extend(pending);
                    self.known.insert(sdp_id, kept);
                    return Err(e);
                }
                flow.end_time = now;
                info!(%flow, "gateway closed connection");
                self.outbound.push(flow);
            }

            if !kept.is_empty() {
                self.known.insert(sdp_id, kept);
            }
        }
        Ok(())
    }

    /// Delivers the outbound queue to the controller when due.
    ///
    /// Cheap when early or when there is nothing to say. On delivery the
    /// queue is dropped and the next due time moves one interval forward.
    pub async fn maybe_report(&mut self) -> Result<()> {
        let now = Utc::now().timestamp();
        if now < self.next_report_due || self.outbound.is_empty() {
            return Ok(());
        }

        debug!(count = self.outbound.len(), "sending connection update");
        let payload = report::report_payload(&self.outbound);
        self.control
            .send(report::CONNECTION_UPDATE, payload)
            .await
            .context("failed to deliver connection report")?;

        self.outbound.clear();
        self.next_report_due = now
            .checked_add(self.report_interval)
            .context("report due time overflowed, check CONN_REPORT_INTERVAL")?;
        Ok(())
    }

    /// Persists the id allocator; the daemon calls this on its shutdown
    /// path so restarts keep connection ids unique.
    pub fn persist(&self) {
        self.ids.store();
    }

    /// Flows currently ledgered for `sdp_id`.
    pub fn known_flows(&self, sdp_id: u32) -> Option<&[Flow]> {
        self.known.get(&sdp_id).map(Vec::as_slice)
    }

    /// The whole known index.
    pub fn known(&self) -> &HashMap<u32, Vec<Flow>> {
        &self.known
    }

    /// Events queued for the next report, oldest first.
    pub fn pending_reports(&self) -> &[Flow] {
        &self.outbound
    }

    pub fn last_conn_id(&self) -> u64 {
        self.ids.last()
    }

    /// Stamps `end_time` on every flow and splices the list onto the
    /// outbound queue.
    fn close_out(&mut self, mut flows: Vec<Flow>, end_time: i64) {
        for flow in &mut flows {
            flow.end_time = end_time;
            info!(%flow, "connection closed");
        }
        self.outbound.append(&mut flows);
    }

    fn index_by_identity(&self, flows: Vec<Flow>) -> HashMap<u32, Vec<Flow>> {
        let mut index: HashMap<u32, Vec<Flow>> = HashMap::with_capacity(self.index_capacity);
        for flow in flows {
            index.entry(flow.sdp_id).or_default().push(flow);
        }
        index
    }
}
