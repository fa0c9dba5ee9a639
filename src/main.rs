// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use spa_conntrack::{
    cfg::{config::Config, logger::init_logger},
    control::{ControlChannel, LogControl},
    driver::{ConntrackCli, FlowDriver},
    policy::AccessTable,
    tracker::ConnectionTracker,
};
use tokio::{signal, time};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let cfg = Config::load_from_file(&cfg_path)
        .with_context(|| format!("failed to load config {cfg_path}"))?;

    let _log_guard = init_logger(&cfg.logger)?;

    let cancel = CancellationToken::new();
    let driver = ConntrackCli::new(&cfg.conntrack, cancel.clone());
    let access = AccessTable::new(cfg.access.iter().cloned());
    let mut tracker = ConnectionTracker::new(driver, LogControl, &cfg.tracker)
        .context("failed to initialize connection tracking")?;

    info!(
        identities = access.len(),
        last_conn_id = tracker.last_conn_id(),
        "connection tracker started"
    );

    let mut ticker = time::interval(cfg.runtime.scan_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_tick(&mut tracker, &access).await {
                    error!(error = ?e, "scan cycle failed");
                }
            },
            _ = signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            },
        }
    }

    cancel.cancel();
    tracker.persist();
    Ok(())
}

/// One tick: reconcile, enforce policy, report when due.
async fn run_tick<D: FlowDriver, C: ControlChannel>(
    tracker: &mut ConnectionTracker<D, C>,
    access: &AccessTable,
) -> Result<()> {
    tracker.update().await?;
    tracker.validate(access).await?;
    tracker.maybe_report().await
}
