// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed errors surfaced by the stream bundle.
//!
//! Send paths return [`anyhow::Error`]; the variants below are the kinds a
//! caller can act on and are recoverable with `downcast_ref::<BundleError>()`.
//! Failures of the underlying wire stream propagate unchanged.

use thiserror::Error;

use crate::cluster::NodeId;

#[derive(Debug, Error)]
pub enum BundleError {
    /// A send was attempted against an empty bundle.
    #[error("{0}: no streams to send to")]
    NoStreams(String),

    /// A targeted send named a node absent from the current bundle.
    #[error("{bundle}: destination mismatch: no stream => {node}")]
    DestinationMismatch { bundle: String, node: NodeId },

    /// Re-opening the payload reader for a replica failed; the remaining
    /// fanout was not attempted.
    #[error("{bundle}: failed to reopen reader: {source}")]
    ReaderReopen {
        bundle: String,
        #[source]
        source: std::io::Error,
    },

    /// Stream multiplier outside the supported range.
    #[error("stream multiplier {0} out of range 1..=255")]
    Multiplier(usize),

    /// Unrecognized receiver role selector.
    #[error("unknown receiver role: {0:?}")]
    Role(String),
}
