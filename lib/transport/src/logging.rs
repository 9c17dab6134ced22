// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! Filters come from the `OSTORE_LOG` environment variable (`tracing`
//! `EnvFilter` syntax, default `info`). Setting `OSTORE_LOG_JSONL=1` switches
//! the output from the human-readable format to JSON lines.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes the global subscriber once; later calls are no-ops, so
/// libraries and tests may call this freely.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("OSTORE_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let jsonl = std::env::var("OSTORE_LOG_JSONL").is_ok_and(|v| v == "1" || v == "true");
        if jsonl {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    });
}
