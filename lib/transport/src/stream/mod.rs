// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The single-destination wire stream, as consumed by the bundle.
//!
//! [`ObjectStream`] is the narrow interface the bundle drives: accept a
//! (header, payload) unit, drain gracefully, abort, report termination and
//! counters. [`HttpStream`](http::HttpStream) is the default implementation;
//! [`mock::MockStream`] is the in-memory test double.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::obj::{ObjHdr, ObjectReader};
use crate::{Error, Result};

pub mod http;
pub mod mock;

pub use http::{HttpConnector, HttpStream};

/// Invoked exactly once per logical send, after the object has been fully
/// handed to the wire (or failed). For a fanout, the callback fires once the
/// last per-destination completion comes in.
pub type SendCallback = Arc<dyn Fn(&ObjHdr, Option<&Error>) + Send + Sync>;

/// One object handed to a stream: header, optional payload cursor, optional
/// completion callback, and the shared refcount of a multi-destination send.
pub struct SendUnit {
    pub hdr: ObjHdr,
    pub reader: Option<ObjectReader>,
    pub cb: Option<SendCallback>,
    pub prc: Option<Arc<AtomicI64>>,
}

/// Runs the completion protocol for one per-destination send: without a
/// refcount the callback fires directly; with one, only the completion that
/// brings it to zero fires the callback.
pub fn complete_send(
    hdr: &ObjHdr,
    err: Option<&Error>,
    cb: Option<&SendCallback>,
    prc: Option<&Arc<AtomicI64>>,
) {
    let Some(cb) = cb else { return };
    match prc {
        Some(rc) => {
            if rc.fetch_sub(1, Ordering::AcqRel) == 1 {
                cb(hdr, err);
            }
        }
        None => cb(hdr, err),
    }
}

/// Point-in-time stream counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Objects accepted by this stream.
    pub num: u64,
    /// Payload bytes put on the wire.
    pub bytes: u64,
    /// Objects fully sent.
    pub completed: u64,
}

/// Live counters backing [`Stats`].
#[derive(Debug, Default)]
pub struct StreamStats {
    num: AtomicU64,
    bytes: AtomicU64,
    completed: AtomicU64,
}

impl StreamStats {
    pub fn inc_num(&self) {
        self.num.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            num: self.num.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// One outbound, long-lived connection to a single peer endpoint.
#[async_trait]
pub trait ObjectStream: Send + Sync {
    /// Hands one object to the stream; backpressures on the work queue.
    async fn send(&self, unit: SendUnit) -> Result<()>;

    /// Graceful close: stops accepting work, drains everything already
    /// accepted, then tears the connection down.
    async fn fin(&self);

    /// Abortive close; in-flight objects may be lost.
    fn stop(&self);

    /// Sticky: once true, never false again. A terminated stream is never
    /// reused.
    fn terminated(&self) -> bool;

    fn stats(&self) -> Stats;

    fn url(&self) -> &str;
}

/// Opens streams for the bundle; injectable so tests can substitute mocks.
pub trait StreamConnector: Send + Sync {
    fn connect(&self, url: &str, extra: &Extra) -> Arc<dyn ObjectStream>;
}

/// Per-bundle stream options.
#[derive(Builder, Clone)]
pub struct Extra {
    /// Default per-send callback, used when the caller passes none.
    #[builder(default)]
    pub callback: Option<SendCallback>,
    /// Work-queue depth per stream.
    #[builder(default = "config::DEFAULT_BURST")]
    pub burst: usize,
    /// Payload chunk size per wire write.
    #[builder(default = "config::DEFAULT_CHUNK_SIZE")]
    pub chunk_size: usize,
}

impl Extra {
    pub fn builder() -> ExtraBuilder {
        ExtraBuilder::default()
    }

    /// Options seeded from [`config::TransportConfig::from_env`].
    pub fn from_env() -> Self {
        let cfg = config::TransportConfig::from_env();
        Self {
            callback: None,
            burst: cfg.burst,
            chunk_size: cfg.chunk_size,
        }
    }
}

impl Default for Extra {
    fn default() -> Self {
        Self {
            callback: None,
            burst: config::DEFAULT_BURST,
            chunk_size: config::DEFAULT_CHUNK_SIZE,
        }
    }
}
