// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cfg::config::ConntrackConfig,
    driver::{DriverError, FlowDriver},
};

/// Production [`FlowDriver`] shelling out to `conntrack(8)`.
#[derive(Debug, Clone)]
pub struct ConntrackCli {
    command: String,
    cancel: CancellationToken,
}

impl ConntrackCli {
    pub fn new(cfg: &ConntrackConfig, cancel: CancellationToken) -> Self {
        Self {
            command: cfg.command.clone(),
            cancel,
        }
    }

    /// Runs the driver with `args`, waiting without a deadline; cancelling
    /// the token aborts the wait.
    async fn run(&self, args: Vec<&str>) -> Result<String, DriverError> {
        debug!(command = %self.command, ?args, "invoking conntrack");

        let output = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DriverError::Cancelled),
            res = Command::new(&self.command).args(&args).kill_on_drop(true).output() => res?,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(DriverError::CommandFailed {
                status: output.status,
                output: text,
            });
        }
        Ok(text)
    }
}

impl FlowDriver for ConntrackCli {
    async fn query(&self, filter: Option<&str>) -> Result<String, DriverError> {
        let mut args = vec!["-L"];
        if let Some(criteria) = filter {
            args.extend(criteria.split_whitespace());
        }
        self.run(args).await
    }

    async fn delete(&self, filter: &str) -> Result<String, DriverError> {
        let mut args = vec!["-D"];
        args.extend(filter.split_whitespace());
        self.run(args).await
    }
}
