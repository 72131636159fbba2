// SPDX-FileCopyrightText: 2026 boardsync contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tunables for the synchronization protocol.

use std::time::Duration;

/// Timing knobs for heartbeat and presence traffic.
#[derive(Debug, Clone)]
#[must_use]
pub struct SyncConfig {
    /// How often a connected client emits a `ping`.
    pub heartbeat_interval: Duration,
    /// After how many silent heartbeat intervals the server forcibly
    /// closes a connection. Zero disables the watchdog.
    pub heartbeat_miss_limit: u32,
    /// Minimum spacing between two transmitted cursor updates. Received
    /// cursor updates are applied unthrottled.
    pub cursor_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_miss_limit: 3,
            cursor_interval: Duration::from_millis(100),
        }
    }
}
