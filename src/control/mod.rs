// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport seam towards the SDP controller.

use anyhow::Result;
use serde_json::Value;
use tracing::info;

/// Fire-and-forget delivery channel for control-plane reports.
///
/// Futures here are awaited on the single reconciliation task; they do not
/// need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait ControlChannel {
    async fn send(&self, message_type: &str, payload: Value) -> Result<()>;
}

/// Sink used when no controller transport is wired in: reports only reach
/// the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogControl;

impl ControlChannel for LogControl {
    async fn send(&self, message_type: &str, payload: Value) -> Result<()> {
        info!(message_type, %payload, "connection report");
        Ok(())
    }
}
