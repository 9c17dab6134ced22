// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streaming object transport for the ostore data plane.
//!
//! The central abstraction is the [`StreamBundle`]: a membership-aware fanout
//! layer that keeps one round-robin group of long-lived outbound streams per
//! cluster peer of a selected role, reconciles that set against the cluster
//! map whenever membership changes, and dispatches (header + payload) objects
//! across the open streams.
//!
//! Collaborators are consumed through narrow interfaces: the cluster map
//! provider ([`cluster::SmapOwner`]) and the single-destination wire stream
//! ([`stream::ObjectStream`], HTTP-backed by default). Mock implementations
//! of both ship in the corresponding `mock` modules.

pub use anyhow::{Context as ErrorContext, Error, Result};

pub mod bundle;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod obj;
pub mod stream;

pub use bundle::{BundleStats, StreamBundle};
pub use cluster::{NodeId, NodeMap, RxKind, Smap, SmapListener, SmapOwner, Snode};
pub use error::BundleError;
pub use obj::{ObjAttrs, ObjHdr, ObjectReader, Reopen};
pub use stream::{Extra, ObjectStream, SendCallback, SendUnit, Stats, StreamConnector};
