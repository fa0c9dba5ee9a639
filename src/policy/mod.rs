// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Access policy: which destination ports each SDP identity may reach.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One access stanza for an authorized SDP identity.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AccessEntry {
    #[serde(rename = "SDP_ID")]
    pub sdp_id: u32,

    #[serde(default, rename = "OPEN_PORTS")]
    /// Free-form text listing the permitted destination ports.
    pub open_ports: String,
}

impl AccessEntry {
    /// Whether `dst_port` is currently permitted.
    ///
    /// Membership is a substring search of the decimal port inside the
    /// `OPEN_PORTS` text, so `80` also matches inside `8080`. Deployed
    /// gateway policies depend on this exact behavior.
    pub fn permits_port(&self, dst_port: u16) -> bool {
        self.open_ports.contains(&dst_port.to_string())
    }
}

/// Identity-indexed view over the configured access stanzas.
#[derive(Debug, Clone, Default)]
pub struct AccessTable {
    entries: HashMap<u32, AccessEntry>,
}

impl AccessTable {
    pub fn new(entries: impl IntoIterator<Item = AccessEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.sdp_id, entry))
                .collect(),
        }
    }

    pub fn lookup(&self, sdp_id: u32) -> Option<&AccessEntry> {
        self.entries.get(&sdp_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
