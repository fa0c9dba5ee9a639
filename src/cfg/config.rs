// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cfg::logger::LogConfig,
    policy::AccessEntry,
    tracker::{MAX_HASH_TABLE_LENGTH, MIN_HASH_TABLE_LENGTH},
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Connection ledger settings (id persistence, index sizing, report
    /// cadence).
    pub tracker: TrackerConfig,
    /// Daemon-side knobs that never reach the firewall driver.
    pub runtime: RuntimeConfig,
    /// Firewall driver invocation.
    #[serde(default)]
    pub conntrack: ConntrackConfig,
    /// Logging setup.
    pub logger: LogConfig,
    /// Access stanzas, one per authorized SDP identity.
    #[serde(default)]
    pub access: Vec<AccessEntry>,
}

/// Settings of the connection ledger itself.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TrackerConfig {
    #[serde(rename = "CONN_ID_FILE")]
    /// File holding the last assigned connection id across restarts.
    pub conn_id_file: PathBuf,

    #[serde(rename = "ACC_STANZA_HASH_TABLE_LENGTH")]
    /// Sizing hint for both identity indices.
    pub hash_table_length: usize,

    #[serde(rename = "CONN_REPORT_INTERVAL")]
    /// Seconds between connection reports to the controller.
    pub report_interval: i64,
}

/// Runtime-only settings that do not map to gateway keys.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "ScanInterval", with = "serde_secs")]
    /// Cadence of the scan/validate/report tick loop.
    pub scan_interval: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConntrackConfig {
    #[serde(default = "default_conntrack_command")]
    /// Executable invoked for flow queries and deletions.
    pub command: String,
}

impl Default for ConntrackConfig {
    fn default() -> Self {
        Self {
            command: default_conntrack_command(),
        }
    }
}

fn default_conntrack_command() -> String {
    "conntrack".to_string()
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants; violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (MIN_HASH_TABLE_LENGTH..=MAX_HASH_TABLE_LENGTH)
                .contains(&self.tracker.hash_table_length),
            "ACC_STANZA_HASH_TABLE_LENGTH value {} not in the range {}-{}",
            self.tracker.hash_table_length,
            MIN_HASH_TABLE_LENGTH,
            MAX_HASH_TABLE_LENGTH,
        );
        ensure!(
            self.tracker.report_interval >= 1
                && self.tracker.report_interval <= i64::from(i32::MAX),
            "CONN_REPORT_INTERVAL value {} must be between 1 and {}",
            self.tracker.report_interval,
            i32::MAX,
        );
        ensure!(
            self.runtime.scan_interval >= Duration::from_secs(1),
            "ScanInterval must be >= 1 second"
        );
        ensure!(
            !self.conntrack.command.is_empty(),
            "conntrack command must not be empty"
        );
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
