// SPDX-FileCopyrightText: 2026 boardsync contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log output setup. Without `RUST_LOG`, output is a compact human-readable
//! feed of this crate's messages; with it (or `--debug`), full tracing
//! formatting with timestamps and thread ids is enabled.

use anyhow::Result;
use time::macros::format_description;
use tracing_subscriber::{fmt::time::UtcTime, EnvFilter, FmtSubscriber};

pub fn initialize(debug: bool) -> Result<()> {
    if std::env::var("RUST_LOG").is_err() && !debug {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new("boardsync=info"))
            .without_time()
            .with_level(false)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Setting default log subscriber failed");
        return Ok(());
    }

    let filter = if debug {
        EnvFilter::new("boardsync=debug")
    } else {
        EnvFilter::builder().from_env()?
    };
    let timer = UtcTime::new(format_description!("[hour]:[minute]:[second]Z"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_timer(timer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default log subscriber failed");

    Ok(())
}
